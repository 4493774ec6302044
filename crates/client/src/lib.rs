//! minio-mcp-client: authenticated access to the MinIO REST API
//!
//! - [`ReqwestTransport`]: the production [`HttpTransport`](minio_mcp_core::HttpTransport)
//! - [`TokenManager`]: login, refresh and validation against the identity provider
//! - [`RequestEngine`]: one retry loop for expired credentials, server errors
//!   and network failures

pub mod engine;
pub mod token;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use engine::{CORRELATION_ID_PREFIX, RequestEngine, RequestOptions, new_correlation_id};
pub use token::{AuthStatus, TokenManager, TokenState};
pub use transport::ReqwestTransport;
