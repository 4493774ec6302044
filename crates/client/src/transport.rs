//! reqwest-backed implementation of [`HttpTransport`]

use std::time::Duration;

use async_trait::async_trait;
use minio_mcp_core::{
    Error, FilePart, HttpRequest, HttpResponse, HttpTransport, RequestBody, Result,
    TransportError, TransportErrorKind,
};
use reqwest::multipart::{Form, Part};

const MAX_REDIRECTS: usize = 10;

/// Production transport: one pooled reqwest client, no retries of its own
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the given per-request timeout
    pub fn new(timeout: Duration, verify_tls: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| Error::General(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn multipart_form(files: Vec<FilePart>) -> std::result::Result<Form, TransportError> {
        let mut form = Form::new();
        for file in files {
            let mut part = Part::bytes(file.data.to_vec()).file_name(file.file_name);
            if let Some(content_type) = file.content_type {
                part = part.mime_str(&content_type).map_err(|e| {
                    TransportError::new(
                        TransportErrorKind::Build,
                        format!("Invalid content type '{content_type}': {e}"),
                    )
                })?;
            }
            form = form.part(file.field, part);
        }
        Ok(form)
    }
}

fn classify(error: &reqwest::Error) -> TransportErrorKind {
    if error.is_builder() {
        TransportErrorKind::Build
    } else if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Request
    }
}

fn transport_error(error: reqwest::Error) -> TransportError {
    TransportError::new(classify(&error), error.to_string())
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => {
                let body = serde_json::to_vec(&value).map_err(|e| {
                    TransportError::new(TransportErrorKind::Build, format!("Invalid JSON body: {e}"))
                })?;
                builder.body(body)
            }
            RequestBody::Raw(bytes) => builder.body(bytes),
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Multipart(files) => builder.multipart(Self::multipart_form(files)?),
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_transport_builds() {
        assert!(ReqwestTransport::new(Duration::from_secs(30), true).is_ok());
        assert!(ReqwestTransport::new(Duration::from_secs(5), false).is_ok());
    }

    #[test]
    fn test_multipart_rejects_bad_content_type() {
        let part = FilePart::new("file", "a.txt", Bytes::from_static(b"a"))
            .with_content_type("not a mime type");
        let err = ReqwestTransport::multipart_form(vec![part]).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::Build);
    }

    #[test]
    fn test_multipart_accepts_parts() {
        let parts = vec![
            FilePart::new("file", "a.txt", Bytes::from_static(b"a")),
            FilePart::new("file", "b", Bytes::from_static(b"b")),
        ];
        assert!(ReqwestTransport::multipart_form(parts).is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(2), true).unwrap();
        // Port 9 (discard) on localhost is essentially never listening.
        let request = HttpRequest::new(http::Method::GET, "http://127.0.0.1:9/health");
        let err = transport.send(request).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
