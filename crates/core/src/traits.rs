//! HTTP transport abstraction
//!
//! The request engine and the token manager never talk to an HTTP library
//! directly. They build an [`HttpRequest`] and hand it to an
//! [`HttpTransport`], which makes it possible to test the retry and refresh
//! logic against a mock.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use serde_json::Value;

use crate::error::TransportError;

/// One file of a multipart upload
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    /// Form field name
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FilePart {
    /// Create a part, guessing the content type from the file extension
    pub fn new(field: impl Into<String>, file_name: impl Into<String>, data: Bytes) -> Self {
        let file_name = file_name.into();
        let content_type = mime_guess::from_path(&file_name)
            .first_raw()
            .map(str::to_string);
        Self {
            field: field.into(),
            file_name,
            content_type,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Request body variants understood by every transport
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Raw(Bytes),
    /// `application/x-www-form-urlencoded` pairs
    Form(Vec<(String, String)>),
    Multipart(Vec<FilePart>),
}

/// A fully resolved outbound request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A response as returned by the transport, body fully buffered
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// True when the response declares a JSON body
    pub fn is_json(&self) -> bool {
        self.content_type().is_some_and(|ct| {
            let mime = ct.split(';').next().unwrap_or_default().trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
    }
}

/// Sends a single HTTP request. Implementations must not retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_part_guesses_content_type() {
        let part = FilePart::new("file", "report.json", Bytes::from_static(b"{}"));
        assert_eq!(part.content_type.as_deref(), Some("application/json"));

        let part = FilePart::new("file", "no-extension", Bytes::new());
        assert_eq!(part.content_type, None);

        let part = FilePart::new("file", "x.bin", Bytes::new()).with_content_type("image/png");
        assert_eq!(part.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_is_json() {
        let mut response = HttpResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(!response.is_json());

        response
            .headers
            .insert(CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert!(response.is_json());

        response
            .headers
            .insert(CONTENT_TYPE, "application/problem+json".parse().unwrap());
        assert!(response.is_json());

        response
            .headers
            .insert(CONTENT_TYPE, "text/html".parse().unwrap());
        assert!(!response.is_json());
    }

    #[test]
    fn test_request_header_lookup() {
        let mut request = HttpRequest::new(Method::GET, "http://localhost/api");
        request
            .headers
            .insert("x-correlation-id", "mcp-00000000".parse().unwrap());
        assert_eq!(request.header("X-Correlation-ID"), Some("mcp-00000000"));
        assert_eq!(request.header("authorization"), None);
    }
}
