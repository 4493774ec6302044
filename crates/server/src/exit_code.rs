//! Process exit codes
//!
//! Scripts and service managers can tell a bad configuration apart from an
//! unreachable backend without parsing stderr.

use minio_mcp_core::{Error, RequestFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Invalid flags or configuration
    UsageError = 2,
    /// Storage or identity provider unreachable, or the listener failed
    NetworkError = 3,
    AuthError = 4,
}

impl ExitCode {
    /// Map a startup failure to an exit code
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return match err {
                Error::Config(_) | Error::TomlParse(_) => ExitCode::UsageError,
                Error::Auth(_) => ExitCode::AuthError,
                Error::Request(RequestFailure::Network { .. }) => ExitCode::NetworkError,
                _ => ExitCode::GeneralError,
            };
        }
        if err.downcast_ref::<std::io::Error>().is_some() {
            return ExitCode::NetworkError;
        }
        ExitCode::GeneralError
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
