//! Authenticated, retrying request engine for the storage REST API
//!
//! One call runs one retry loop with one budget. Three failure classes feed
//! into it: an expired credential (401) triggers a refresh, a server error
//! (5xx) or a transport error triggers an exponential backoff. Any other
//! client error is final.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue, USER_AGENT,
};
use http::{HeaderMap, Method};
use minio_mcp_core::{
    Config, DEFAULT_EXPIRY_SKEW_SECS, FilePart, HttpRequest, HttpResponse, HttpTransport,
    RequestBody, RequestFailure, RequestOutcome, ResponseBody, RetryAction, RetryConfig,
    TransportError, TransportErrorKind, backoff_delay, classify_status,
};
use serde_json::Value;

use crate::token::TokenManager;

/// Prefix of every `X-Correlation-ID` value
pub const CORRELATION_ID_PREFIX: &str = "mcp-";

const CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");
const HEALTH_PATH: &str = "/api/v1/health";
const OCTET_STREAM: &str = "application/octet-stream";
const APPLICATION_JSON: &str = "application/json";

/// Optional parts of a request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
    pub raw: Option<Bytes>,
    /// Applied last, so they override the engine's defaults
    pub headers: HeaderMap,
    pub files: Vec<FilePart>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn raw(mut self, body: impl Into<Bytes>) -> Self {
        self.raw = Some(body.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn file(mut self, file: FilePart) -> Self {
        self.files.push(file);
        self
    }

    /// Multipart files win over a JSON body, which wins over raw bytes
    fn body(&self) -> RequestBody {
        if !self.files.is_empty() {
            RequestBody::Multipart(self.files.clone())
        } else if let Some(json) = &self.json {
            RequestBody::Json(json.clone())
        } else if let Some(raw) = &self.raw {
            RequestBody::Raw(raw.clone())
        } else {
            RequestBody::Empty
        }
    }
}

/// Fresh correlation id: fixed prefix plus 8 random hex digits
pub fn new_correlation_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{CORRELATION_ID_PREFIX}{}", &suffix[..8])
}

pub struct RequestEngine {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    base_url: String,
    user_agent: String,
    retry: RetryConfig,
}

impl RequestEngine {
    pub fn new(transport: Arc<dyn HttpTransport>, tokens: Arc<TokenManager>, config: &Config) -> Self {
        Self {
            transport,
            tokens,
            base_url: config.storage.api_base_url.clone(),
            user_agent: config.server.user_agent(),
            retry: config.retry.clone(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a request against `path`, relative to the API base URL.
    ///
    /// Returns the outcome of the last attempt when its status is below 400.
    /// Every failure carries the correlation id sent on the wire.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<RequestOutcome, RequestFailure> {
        let correlation_id = new_correlation_id();
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let max_attempts = self.retry.max_attempts.max(1);

        tracing::info!(
            correlation_id = %correlation_id,
            method = %method,
            url = %url,
            "Making request"
        );

        self.refresh_if_expiring(&correlation_id).await;
        let mut access_token = self.tokens.access_token().await;
        let mut attempt: u32 = 0;

        loop {
            let has_budget = attempt + 1 < max_attempts;
            let request = self
                .build_request(&method, &url, &options, &correlation_id, access_token.as_deref())
                .map_err(|source| RequestFailure::Network {
                    correlation_id: correlation_id.clone(),
                    attempts: attempt + 1,
                    source,
                })?;

            match self.transport.send(request).await {
                Ok(response) => match classify_status(response.status) {
                    RetryAction::RefreshCredential if has_budget => {
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            attempt = attempt + 1,
                            "Received 401, attempting token refresh"
                        );
                        match self.tokens.refresh_cached().await {
                            Ok(credential) => access_token = Some(credential.access_token),
                            Err(e) => {
                                tracing::warn!(
                                    correlation_id = %correlation_id,
                                    error = %e,
                                    "Token refresh failed"
                                );
                                return self.finish(response, &correlation_id);
                            }
                        }
                    }
                    RetryAction::Backoff if has_budget => {
                        let delay = backoff_delay(&self.retry, attempt);
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            attempt = attempt + 1,
                            status = response.status,
                            backoff_ms = delay.as_millis() as u64,
                            "Server error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    _ => return self.finish(response, &correlation_id),
                },
                Err(error) => {
                    if !error.is_retryable() || !has_budget {
                        tracing::error!(
                            correlation_id = %correlation_id,
                            attempts = attempt + 1,
                            error = %error,
                            "Request failed"
                        );
                        return Err(RequestFailure::Network {
                            correlation_id,
                            attempts: attempt + 1,
                            source: error,
                        });
                    }

                    let delay = backoff_delay(&self.retry, attempt);
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        attempt = attempt + 1,
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "Network error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            attempt += 1;
        }
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<RequestOutcome, RequestFailure> {
        self.execute(Method::GET, path, options).await
    }

    pub async fn post(&self, path: &str, options: RequestOptions) -> Result<RequestOutcome, RequestFailure> {
        self.execute(Method::POST, path, options).await
    }

    pub async fn put(&self, path: &str, options: RequestOptions) -> Result<RequestOutcome, RequestFailure> {
        self.execute(Method::PUT, path, options).await
    }

    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<RequestOutcome, RequestFailure> {
        self.execute(Method::DELETE, path, options).await
    }

    pub async fn head(&self, path: &str, options: RequestOptions) -> Result<RequestOutcome, RequestFailure> {
        self.execute(Method::HEAD, path, options).await
    }

    /// Probe the storage API; any failure counts as unhealthy
    pub async fn health_check(&self) -> bool {
        match self.get(HEALTH_PATH, RequestOptions::default()).await {
            Ok(outcome) => outcome.is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Health check failed");
                false
            }
        }
    }

    async fn refresh_if_expiring(&self, correlation_id: &str) {
        let Some(credential) = self.tokens.current_credential().await else {
            return;
        };
        if !TokenManager::is_expiring(&credential, DEFAULT_EXPIRY_SKEW_SECS) {
            return;
        }

        tracing::debug!(correlation_id = %correlation_id, "Credential expiring, refreshing");
        if let Err(e) = self.tokens.refresh(&credential.refresh_token).await {
            tracing::warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Proactive token refresh failed"
            );
        }
    }

    fn build_request(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
        correlation_id: &str,
        access_token: Option<&str>,
    ) -> Result<HttpRequest, TransportError> {
        let body = options.body();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        headers.insert(USER_AGENT, header_value(&self.user_agent)?);
        headers.insert(CORRELATION_HEADER, header_value(correlation_id)?);

        match &body {
            // The transport sets the multipart boundary itself
            RequestBody::Multipart(_) => {}
            RequestBody::Raw(_) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
            }
            _ => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
            }
        }

        if let Some(token) = access_token {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
        }

        headers.extend(options.headers.clone());
        if matches!(body, RequestBody::Multipart(_)) {
            headers.remove(CONTENT_TYPE);
        }

        Ok(HttpRequest {
            method: method.clone(),
            url: url.to_string(),
            headers,
            query: options.query.clone(),
            body,
        })
    }

    fn finish(
        &self,
        response: HttpResponse,
        correlation_id: &str,
    ) -> Result<RequestOutcome, RequestFailure> {
        let status = response.status;
        let body = ResponseBody::from_response(&response).map_err(|e| {
            tracing::error!(correlation_id = %correlation_id, status, error = %e, "Response parsing error");
            RequestFailure::Parse {
                correlation_id: correlation_id.to_string(),
                status,
                message: e.to_string(),
            }
        })?;

        let outcome = RequestOutcome::new(status, body, correlation_id);
        if status >= 400 {
            let message = outcome.error().unwrap_or_default().to_string();
            tracing::error!(
                correlation_id = %correlation_id,
                status,
                error = %message,
                "Request failed"
            );
            return Err(RequestFailure::Protocol {
                correlation_id: correlation_id.to_string(),
                status,
                message,
                body: outcome.into_body(),
            });
        }

        tracing::debug!(correlation_id = %correlation_id, status, "Request completed");
        Ok(outcome)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|e| {
        TransportError::new(TransportErrorKind::Build, format!("Invalid header value: {e}"))
    })
}
