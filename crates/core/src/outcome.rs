//! Normalized result of a completed HTTP call

use bytes::Bytes;
use serde_json::Value;

use crate::traits::HttpResponse;

/// Response body, decoded according to the declared content type
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Json(Value),
    Text(String),
    Binary(Bytes),
}

impl ResponseBody {
    /// Decode a response body.
    ///
    /// A JSON content type must carry valid JSON; anything else is kept as
    /// text when it is UTF-8 and as raw bytes otherwise.
    pub fn from_response(response: &HttpResponse) -> Result<Self, serde_json::Error> {
        if response.body.is_empty() {
            return Ok(ResponseBody::Empty);
        }

        if response.is_json() {
            return serde_json::from_slice(&response.body).map(ResponseBody::Json);
        }

        match std::str::from_utf8(&response.body) {
            Ok(text) => Ok(ResponseBody::Text(text.to_string())),
            Err(_) => Ok(ResponseBody::Binary(response.body.clone())),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }

    /// Human-readable error description extracted from a failed response.
    ///
    /// Prefers the `error` member of a JSON object body.
    fn error_description(&self) -> Option<String> {
        match self {
            ResponseBody::Empty => None,
            ResponseBody::Json(Value::Object(map)) => Some(match map.get("error") {
                Some(Value::String(message)) => message.clone(),
                Some(other) => other.to_string(),
                None => Value::Object(map.clone()).to_string(),
            }),
            ResponseBody::Json(other) => Some(other.to_string()),
            ResponseBody::Text(text) => Some(text.clone()),
            ResponseBody::Binary(bytes) => Some(format!("{} bytes of binary data", bytes.len())),
        }
    }
}

/// Outcome of a request: immutable once constructed.
///
/// `success` is derived from the status code and is true exactly for
/// statuses in `[200, 300)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    success: bool,
    status: u16,
    body: ResponseBody,
    error: Option<String>,
    correlation_id: String,
}

impl RequestOutcome {
    pub fn new(status: u16, body: ResponseBody, correlation_id: impl Into<String>) -> Self {
        let success = (200..300).contains(&status);
        let error = if success {
            None
        } else {
            Some(
                body.error_description()
                    .unwrap_or_else(|| format!("Request failed with status {status}")),
            )
        };

        Self {
            success,
            status,
            body,
            error,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}
