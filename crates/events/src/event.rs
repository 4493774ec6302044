//! Event model and the server-sent events wire format
//!
//! A frame looks like:
//!
//! ```text
//! id: 6f1c...
//! event: tool_result
//! retry: 5000
//! data: {"connection_id":"...","event_id":"6f1c...","result":{},"success":true,"timestamp":"..."}
//!
//! ```
//!
//! The `data` line is the payload object with `timestamp` and `event_id`
//! merged in. `retry` is only present when a reconnect hint was set.

use std::fmt;
use std::str::FromStr;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const CONNECTED_MESSAGE: &str = "Successfully connected to MinIO MCP Server";
const DISCONNECTED_MESSAGE: &str = "Connection closed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    Heartbeat,
    ToolCall,
    ToolResult,
    Error,
    StatusUpdate,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Heartbeat => "heartbeat",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::Error => "error",
            EventKind::StatusUpdate => "status_update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(EventKind::Connected),
            "disconnected" => Ok(EventKind::Disconnected),
            "heartbeat" => Ok(EventKind::Heartbeat),
            "tool_call" => Ok(EventKind::ToolCall),
            "tool_result" => Ok(EventKind::ToolResult),
            "error" => Ok(EventKind::Error),
            "status_update" => Ok(EventKind::StatusUpdate),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

/// An immutable event. Broadcasts share one instance across connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    payload: Map<String, Value>,
    timestamp: Timestamp,
    id: String,
    retry: Option<u64>,
}

impl Event {
    /// New event with a fresh id and the current time.
    ///
    /// An object payload is used as-is, `null` becomes an empty object and
    /// any other value is wrapped as `{"value": ...}`.
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self::from_parts(
            kind,
            payload,
            Timestamp::now(),
            uuid::Uuid::new_v4().to_string(),
        )
    }

    pub fn from_parts(
        kind: EventKind,
        payload: Value,
        timestamp: Timestamp,
        id: impl Into<String>,
    ) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        Self {
            kind,
            payload,
            timestamp,
            id: id.into(),
            retry: None,
        }
    }

    /// Reconnect hint for the subscriber, in milliseconds
    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry = Some(retry_ms);
        self
    }

    pub fn connected(connection_id: &str) -> Self {
        Self::new(
            EventKind::Connected,
            serde_json::json!({
                "connection_id": connection_id,
                "message": CONNECTED_MESSAGE,
            }),
        )
    }

    pub fn disconnected(connection_id: &str) -> Self {
        Self::new(
            EventKind::Disconnected,
            serde_json::json!({
                "connection_id": connection_id,
                "message": DISCONNECTED_MESSAGE,
            }),
        )
    }

    pub fn heartbeat(connection_id: &str) -> Self {
        Self::new(
            EventKind::Heartbeat,
            serde_json::json!({ "connection_id": connection_id }),
        )
    }

    pub fn error(connection_id: &str, message: &str) -> Self {
        Self::new(
            EventKind::Error,
            serde_json::json!({
                "error": message,
                "connection_id": connection_id,
            }),
        )
    }

    pub fn tool_call(connection_id: &str, tool_name: &str, parameters: Value) -> Self {
        Self::new(
            EventKind::ToolCall,
            serde_json::json!({
                "tool_name": tool_name,
                "parameters": parameters,
                "connection_id": connection_id,
            }),
        )
    }

    pub fn tool_result(connection_id: &str, tool_name: &str, result: Value, success: bool) -> Self {
        Self::new(
            EventKind::ToolResult,
            serde_json::json!({
                "tool_name": tool_name,
                "result": result,
                "success": success,
                "connection_id": connection_id,
            }),
        )
    }

    pub fn status_update(status: &str, details: Value) -> Self {
        let details = if details.is_null() {
            Value::Object(Map::new())
        } else {
            details
        };
        Self::new(
            EventKind::StatusUpdate,
            serde_json::json!({
                "status": status,
                "details": details,
            }),
        )
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn retry(&self) -> Option<u64> {
        self.retry
    }

    /// The `data` object: payload plus `timestamp` and `event_id`
    pub fn data(&self) -> Value {
        let mut data = self.payload.clone();
        data.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_string()),
        );
        data.insert("event_id".to_string(), Value::String(self.id.clone()));
        Value::Object(data)
    }

    pub fn data_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.data())
    }

    /// Serialize to a complete wire frame, blank-line terminated
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let data = self.data_json()?;

        let mut frame = String::with_capacity(data.len() + 64);
        if !self.id.is_empty() {
            frame.push_str(&format!("id: {}\n", self.id));
        }
        frame.push_str(&format!("event: {}\n", self.kind));
        if let Some(retry) = self.retry.filter(|r| *r > 0) {
            frame.push_str(&format!("retry: {retry}\n"));
        }
        for line in data.split('\n') {
            frame.push_str(&format!("data: {line}\n"));
        }
        frame.push('\n');
        Ok(frame)
    }
}

/// Why a wire frame could not be decoded
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has no data field")]
    MissingData,
    #[error("invalid retry value: {0}")]
    InvalidRetry(String),
}

/// Fields of a decoded wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub retry: Option<u64>,
    /// `data` lines joined with `\n`
    pub data: String,
}

impl ParsedFrame {
    pub fn kind(&self) -> Option<EventKind> {
        self.event.as_deref().and_then(|e| e.parse().ok())
    }

    pub fn data_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// Decode a single frame. Comment lines (`:`) and unknown fields are ignored.
pub fn parse_frame(frame: &str) -> Result<ParsedFrame, FrameError> {
    let mut id = None;
    let mut event = None;
    let mut retry = None;
    let mut data: Option<String> = None;

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "id" => id = Some(value.to_string()),
            "event" => event = Some(value.to_string()),
            "retry" => {
                retry = Some(
                    value
                        .parse()
                        .map_err(|_| FrameError::InvalidRetry(value.to_string()))?,
                )
            }
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    Ok(ParsedFrame {
        id,
        event,
        retry,
        data: data.ok_or(FrameError::MissingData)?,
    })
}
