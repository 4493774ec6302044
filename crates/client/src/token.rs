//! Credential lifecycle against a Keycloak-style identity provider
//!
//! The manager owns a single shared slot holding the current [`Credential`]
//! and the [`Identity`] derived from it. Any successful login or refresh
//! replaces the slot as a whole, so an identity is never served alongside a
//! credential it was not derived from.

use std::sync::Arc;

use http::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use http::{HeaderMap, Method};
use jiff::Timestamp;
use minio_mcp_core::{
    AuthError, Credential, DEFAULT_EXPIRY_SKEW_SECS, HttpRequest, HttpResponse, HttpTransport,
    Identity, IdentityConfig, RequestBody, RoleClaims, TokenResponse, UserInfo,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const LOGIN_SCOPE: &str = "openid profile email";

/// Where the cached credential currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Unauthenticated,
    Active,
    /// Active, but inside the refresh skew window (or already past expiry)
    Expiring,
}

/// Point-in-time view of the authentication state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub state: TokenState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<i64>,
}

#[derive(Debug, Clone)]
struct Session {
    credential: Credential,
    identity: Option<Identity>,
}

#[derive(Debug, Clone, Copy)]
enum Grant {
    Password,
    RefreshToken,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Performs login/refresh/validate and caches the result
pub struct TokenManager {
    transport: Arc<dyn HttpTransport>,
    config: IdentityConfig,
    session: RwLock<Option<Session>>,
}

impl TokenManager {
    pub fn new(transport: Arc<dyn HttpTransport>, config: IdentityConfig) -> Self {
        Self {
            transport,
            config,
            session: RwLock::new(None),
        }
    }

    /// Exchange a username and password for a credential.
    ///
    /// On success the cached credential is replaced and the cached identity
    /// is dropped.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential, AuthError> {
        let form = vec![
            ("grant_type".to_string(), "password".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("client_secret".to_string(), self.config.client_secret.clone()),
            ("username".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
            ("scope".to_string(), LOGIN_SCOPE.to_string()),
        ];

        let credential = self.request_token(form, Grant::Password, None).await?;
        self.store(credential.clone()).await;
        tracing::info!(username = %username, "Successfully authenticated user");
        Ok(credential)
    }

    /// Exchange a refresh token for a new credential.
    ///
    /// The provider may omit a new refresh token, in which case the input is
    /// kept. Failures are reported as-is and never retried here. A rejected
    /// refresh of the cached credential discards it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credential, AuthError> {
        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("client_secret".to_string(), self.config.client_secret.clone()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];

        match self
            .request_token(form, Grant::RefreshToken, Some(refresh_token))
            .await
        {
            Ok(credential) => {
                self.store(credential.clone()).await;
                tracing::info!("Successfully refreshed authentication token");
                Ok(credential)
            }
            Err(err @ AuthError::RefreshRejected(_)) => {
                let mut session = self.session.write().await;
                if session
                    .as_ref()
                    .is_some_and(|s| s.credential.refresh_token == refresh_token)
                {
                    *session = None;
                    tracing::warn!("Refresh token rejected, discarded cached credential");
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Refresh using the cached credential's refresh token
    pub async fn refresh_cached(&self) -> Result<Credential, AuthError> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.credential.refresh_token.clone())
            .ok_or(AuthError::NotAuthenticated)?;

        self.refresh(&refresh_token).await
    }

    /// Resolve the identity behind an access token.
    ///
    /// The userinfo endpoint decides whether the token is valid. Roles are
    /// then read from the token payload without signature verification; a
    /// payload that cannot be decoded yields an empty role set instead of a
    /// failure.
    pub async fn validate(&self, access_token: &str) -> Result<Identity, AuthError> {
        let mut request = HttpRequest::new(Method::GET, self.config.userinfo_endpoint());
        request.headers = accept_json();
        let bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| AuthError::InvalidToken)?;
        request.headers.insert(AUTHORIZATION, bearer);

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        if response.status != 200 {
            tracing::debug!(status = response.status, "Userinfo endpoint rejected token");
            return Err(AuthError::InvalidToken);
        }

        let user: UserInfo = serde_json::from_slice(&response.body)
            .map_err(|e| AuthError::MalformedResponse(format!("userinfo: {e}")))?;

        let claims = RoleClaims::decode_unverified(access_token).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not extract roles from token");
            RoleClaims::default()
        });

        let identity = Identity::new(user, claims);

        let mut session = self.session.write().await;
        if let Some(current) = session.as_mut()
            && current.credential.access_token == access_token
        {
            current.identity = Some(identity.clone());
        }

        Ok(identity)
    }

    /// True if `credential` expires within `skew_secs`
    pub fn is_expiring(credential: &Credential, skew_secs: i64) -> bool {
        credential.is_expiring(skew_secs)
    }

    /// Install a credential obtained elsewhere
    pub async fn set_credential(&self, credential: Credential) {
        self.store(credential).await;
    }

    /// Forget the cached credential and identity
    pub async fn logout(&self) {
        *self.session.write().await = None;
    }

    pub async fn current_credential(&self) -> Option<Credential> {
        self.session.read().await.as_ref().map(|s| s.credential.clone())
    }

    pub async fn current_identity(&self) -> Option<Identity> {
        self.session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.identity.clone())
    }

    pub async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.credential.access_token.clone())
    }

    pub async fn status(&self) -> AuthStatus {
        let session = self.session.read().await;
        let Some(session) = session.as_ref() else {
            return AuthStatus {
                state: TokenState::Unauthenticated,
                username: None,
                expires_at: None,
                remaining_secs: None,
            };
        };

        let now = Timestamp::now();
        let state = if session
            .credential
            .is_expiring_at(now, DEFAULT_EXPIRY_SKEW_SECS)
        {
            TokenState::Expiring
        } else {
            TokenState::Active
        };

        AuthStatus {
            state,
            username: session.identity.as_ref().map(|i| i.username.clone()),
            expires_at: Some(session.credential.expires_at),
            remaining_secs: Some(session.credential.remaining_secs(now)),
        }
    }

    async fn store(&self, credential: Credential) {
        *self.session.write().await = Some(Session {
            credential,
            identity: None,
        });
    }

    async fn request_token(
        &self,
        form: Vec<(String, String)>,
        grant: Grant,
        fallback_refresh: Option<&str>,
    ) -> Result<Credential, AuthError> {
        let mut request = HttpRequest::new(Method::POST, self.config.token_endpoint());
        request.headers = accept_json();
        request.body = RequestBody::Form(form);

        let issued_at = Timestamp::now();
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        if response.status != 200 {
            let detail = provider_error_detail(&response, grant);
            return Err(match grant {
                Grant::Password => AuthError::LoginRejected(detail),
                Grant::RefreshToken => AuthError::RefreshRejected(detail),
            });
        }

        let token: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| AuthError::MalformedResponse(format!("token response: {e}")))?;

        Credential::from_token_response(token, issued_at, fallback_refresh)
    }
}

fn accept_json() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

fn provider_error_detail(response: &HttpResponse, grant: Grant) -> String {
    let parsed: ProviderError = serde_json::from_slice(&response.body).unwrap_or_default();
    parsed
        .error_description
        .or(parsed.error)
        .unwrap_or_else(|| {
            match grant {
                Grant::Password => "Authentication failed",
                Grant::RefreshToken => "Token refresh failed",
            }
            .to_string()
        })
}
