//! Credential and Identity types
//!
//! A [`Credential`] is the access/refresh token pair returned by the identity
//! provider, with its expiry resolved to an absolute instant. An
//! [`Identity`] is the principal and role set derived from a credential.

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Refresh this many seconds before the credential actually expires
pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 60;

const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Token endpoint response (RFC 6749 section 5.1)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Userinfo endpoint response (OpenID Connect core, section 5.3)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Access/refresh token pair. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Timestamp,
    pub token_type: String,
}

impl Credential {
    /// Build a credential from a token endpoint response.
    ///
    /// `expires_in` is resolved against `issued_at`. When the provider omits
    /// the refresh token, `fallback_refresh` is kept; with no fallback the
    /// response is malformed.
    pub fn from_token_response(
        response: TokenResponse,
        issued_at: Timestamp,
        fallback_refresh: Option<&str>,
    ) -> Result<Self, AuthError> {
        let refresh_token = match (response.refresh_token, fallback_refresh) {
            (Some(token), _) => token,
            (None, Some(fallback)) => fallback.to_string(),
            (None, None) => {
                return Err(AuthError::MalformedResponse(
                    "missing refresh_token".to_string(),
                ));
            }
        };

        let expires_at = issued_at
            .checked_add(SignedDuration::from_secs(response.expires_in))
            .map_err(|e| AuthError::MalformedResponse(format!("invalid expires_in: {e}")))?;

        Ok(Self {
            access_token: response.access_token,
            refresh_token,
            expires_at,
            token_type: response
                .token_type
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
        })
    }

    /// True if the credential expires within `skew_secs` from now
    pub fn is_expiring(&self, skew_secs: i64) -> bool {
        self.is_expiring_at(Timestamp::now(), skew_secs)
    }

    /// True iff `now + skew_secs >= expires_at` (boundary inclusive)
    pub fn is_expiring_at(&self, now: Timestamp, skew_secs: i64) -> bool {
        match now.checked_add(SignedDuration::from_secs(skew_secs)) {
            Ok(deadline) => deadline >= self.expires_at,
            Err(_) => true,
        }
    }

    /// Seconds until expiry, negative once expired
    pub fn remaining_secs(&self, now: Timestamp) -> i64 {
        self.expires_at.as_second() - now.as_second()
    }
}

/// Role claims read from the token payload without verifying the signature.
///
/// This is advisory only: the userinfo endpoint is the authority on who the
/// caller is. Nothing here checks the token signature, so these roles must
/// not be used as the sole basis for an access decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleClaims {
    pub realm_roles: BTreeSet<String>,
    pub resource_roles: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawClaims {
    #[serde(default)]
    realm_access: RawRoles,
    #[serde(default)]
    resource_access: BTreeMap<String, RawRoles>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRoles {
    #[serde(default)]
    roles: Vec<String>,
}

/// Why a token payload could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum ClaimsDecodeError {
    #[error("token has no payload segment")]
    MissingPayload,
    #[error("payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl RoleClaims {
    /// Decode `realm_access.roles` and `resource_access.<client>.roles` from
    /// the middle segment of a JWT. The signature is not checked.
    pub fn decode_unverified(token: &str) -> Result<Self, ClaimsDecodeError> {
        let payload = token
            .split('.')
            .nth(1)
            .filter(|segment| !segment.is_empty())
            .ok_or(ClaimsDecodeError::MissingPayload)?;

        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))?;
        let raw: RawClaims = serde_json::from_slice(&bytes)?;

        Ok(Self {
            realm_roles: raw.realm_access.roles.into_iter().collect(),
            resource_roles: raw
                .resource_access
                .into_iter()
                .map(|(client, access)| (client, access.roles.into_iter().collect()))
                .collect(),
        })
    }
}

/// Resolved principal and effective roles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub email: Option<String>,
    /// Realm roles and every resource role, flattened
    pub roles: BTreeSet<String>,
    pub realm_roles: BTreeSet<String>,
    pub resource_roles: BTreeMap<String, BTreeSet<String>>,
}

impl Identity {
    pub fn new(user: UserInfo, claims: RoleClaims) -> Self {
        let mut roles = claims.realm_roles.clone();
        for resource in claims.resource_roles.values() {
            roles.extend(resource.iter().cloned());
        }

        Self {
            username: user.preferred_username.unwrap_or_default(),
            email: user.email,
            roles,
            realm_roles: claims.realm_roles,
            resource_roles: claims.resource_roles,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.has_role(role.as_ref()))
    }

    /// Fail with [`AuthError::MissingRole`] unless one of `roles` is held
    pub fn require_any_role<S: AsRef<str>>(&self, roles: &[S]) -> Result<(), AuthError> {
        if self.has_any_role(roles) {
            Ok(())
        } else {
            Err(AuthError::MissingRole {
                username: self.username.clone(),
                required: roles.iter().map(|r| r.as_ref().to_string()).collect(),
            })
        }
    }
}
