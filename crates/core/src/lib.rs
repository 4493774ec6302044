//! minio-mcp-core: Core library for the minio-mcp bridge
//!
//! This crate provides the transport-independent pieces shared by the
//! request engine and the event stream, including:
//! - Configuration management
//! - Error taxonomy (authentication, request and transport failures)
//! - Retry policy and backoff schedule
//! - Credential and Identity types
//! - The `HttpTransport` trait that every network call goes through
//!
//! Nothing here performs I/O on its own, which keeps the engine testable
//! against a mocked transport.

pub mod auth;
pub mod config;
pub mod error;
pub mod outcome;
pub mod retry;
pub mod traits;

pub use auth::{
    ClaimsDecodeError, Credential, DEFAULT_EXPIRY_SKEW_SECS, Identity, RoleClaims, TokenResponse,
    UserInfo,
};
pub use config::{
    CONFIG_DIR_ENV, Config, ConfigManager, IdentityConfig, LoggingConfig, ServerConfig, StorageConfig,
};
pub use error::{
    AuthError, Error, RequestFailure, Result, TransportError, TransportErrorKind,
};
pub use outcome::{RequestOutcome, ResponseBody};
pub use retry::{RetryAction, RetryBuilder, RetryConfig, backoff_delay, classify_status};
pub use traits::{FilePart, HttpRequest, HttpResponse, HttpTransport, RequestBody};
