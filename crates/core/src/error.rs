//! Error types for minio-mcp
//!
//! Authentication, request and transport failures are separate types so the
//! request engine and its callers can match on exactly the failure class they
//! care about. `Error` wraps them for code that only needs to report.

use thiserror::Error;

use crate::outcome::ResponseBody;

/// Result type alias for minio-mcp operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for configuration loading and process setup
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Request(#[from] RequestFailure),

    #[error("{0}")]
    General(String),
}

/// Failures reported by the identity provider integration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The provider refused the username/password pair
    #[error("Login failed: {0}")]
    LoginRejected(String),

    /// The refresh token is expired or revoked
    #[error("Token refresh failed: {0}")]
    RefreshRejected(String),

    /// The userinfo endpoint did not accept the access token
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Identity provider unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed identity provider response: {0}")]
    MalformedResponse(String),

    /// No credential is cached, so there is nothing to refresh
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("User '{username}' lacks required roles: {required:?}")]
    MissingRole {
        username: String,
        required: Vec<String>,
    },
}

/// Coarse classification of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be established
    Connect,
    /// The request or response timed out
    Timeout,
    /// Any other failure while the request was in flight
    Request,
    /// The request could not be constructed (bad header, bad multipart part)
    Build,
}

/// A network-level failure: no HTTP response was obtained
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Build failures repeat identically on every attempt, everything else
    /// may be transient.
    pub fn is_retryable(&self) -> bool {
        self.kind != TransportErrorKind::Build
    }
}

/// Terminal failure of a request engine call
///
/// Every variant carries the correlation id that was sent on the wire as
/// `X-Correlation-ID`, so a failure can be matched against server logs.
#[derive(Error, Debug, Clone)]
pub enum RequestFailure {
    /// No response was obtained within the retry budget
    #[error("Request failed after {attempts} attempts [{correlation_id}]: {source}")]
    Network {
        correlation_id: String,
        attempts: u32,
        source: TransportError,
    },

    /// A response was obtained but its status is an error
    #[error("Request failed with status {status} [{correlation_id}]: {message}")]
    Protocol {
        correlation_id: String,
        status: u16,
        message: String,
        body: ResponseBody,
    },

    /// The response declared a structured body that could not be decoded
    #[error("Response parsing error with status {status} [{correlation_id}]: {message}")]
    Parse {
        correlation_id: String,
        status: u16,
        message: String,
    },
}

impl RequestFailure {
    pub fn correlation_id(&self) -> &str {
        match self {
            RequestFailure::Network { correlation_id, .. }
            | RequestFailure::Protocol { correlation_id, .. }
            | RequestFailure::Parse { correlation_id, .. } => correlation_id,
        }
    }

    /// HTTP status of the final response, if one was obtained
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestFailure::Network { .. } => None,
            RequestFailure::Protocol { status, .. } | RequestFailure::Parse { status, .. } => {
                Some(*status)
            }
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, RequestFailure::Network { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_retryable() {
        assert!(TransportError::new(TransportErrorKind::Timeout, "timed out").is_retryable());
        assert!(TransportError::new(TransportErrorKind::Connect, "refused").is_retryable());
        assert!(!TransportError::new(TransportErrorKind::Build, "bad header").is_retryable());
    }

    #[test]
    fn test_request_failure_accessors() {
        let network = RequestFailure::Network {
            correlation_id: "mcp-1234abcd".to_string(),
            attempts: 3,
            source: TransportError::new(TransportErrorKind::Connect, "connection refused"),
        };
        assert_eq!(network.correlation_id(), "mcp-1234abcd");
        assert_eq!(network.status(), None);
        assert!(network.is_network());
        assert!(network.to_string().contains("after 3 attempts"));
        assert!(network.to_string().contains("connection refused"));

        let protocol = RequestFailure::Protocol {
            correlation_id: "mcp-deadbeef".to_string(),
            status: 404,
            message: "NoSuchBucket".to_string(),
            body: ResponseBody::Empty,
        };
        assert_eq!(protocol.status(), Some(404));
        assert_eq!(protocol.correlation_id(), "mcp-deadbeef");
        assert!(!protocol.is_network());
    }

    #[test]
    fn test_error_from_auth() {
        let err: Error = AuthError::InvalidToken.into();
        assert_eq!(err.to_string(), "Invalid or expired token");
    }
}
