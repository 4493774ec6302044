//! HTTP adapter: event stream, connection stats and health endpoints

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use jiff::Timestamp;
use minio_mcp_client::RequestEngine;
use minio_mcp_core::Config;
use minio_mcp_events::{ConnectionRegistry, EventStream};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Last observed state of the storage API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

impl StorageHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageHealth::Unknown => "unknown",
            StorageHealth::Healthy => "healthy",
            StorageHealth::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<RequestEngine>,
    pub registry: ConnectionRegistry,
    pub events: EventStream,
    storage_health: Arc<Mutex<StorageHealth>>,
}

impl AppState {
    /// Streams created from this state end when `shutdown` fires
    pub fn new(config: Config, engine: Arc<RequestEngine>, shutdown: CancellationToken) -> Self {
        let registry = ConnectionRegistry::new();
        let events = EventStream::new(registry.clone())
            .with_idle_timeout(Duration::from_secs(config.server.heartbeat_secs))
            .with_cancellation(shutdown);

        Self {
            config: Arc::new(config),
            engine,
            registry,
            events,
            storage_health: Arc::new(Mutex::new(StorageHealth::Unknown)),
        }
    }

    pub fn storage_health(&self) -> StorageHealth {
        *self
            .storage_health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a probe result. On a change, every subscriber receives a
    /// `status_update`; returns whether the state changed.
    pub fn record_health(&self, healthy: bool) -> bool {
        let current = if healthy {
            StorageHealth::Healthy
        } else {
            StorageHealth::Unhealthy
        };

        let previous = {
            let mut guard = self
                .storage_health
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, current)
        };
        if previous == current {
            return false;
        }

        let delivered = self.registry.send_status_update(
            current.as_str(),
            json!({
                "component": "storage",
                "previous": previous.as_str(),
                "api_base_url": self.engine.base_url(),
            }),
        );
        tracing::info!(
            previous = previous.as_str(),
            current = current.as_str(),
            delivered,
            "Storage health changed"
        );
        true
    }
}

/// Probe storage health every `interval` until `cancel` fires
pub async fn run_health_monitor(state: AppState, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let healthy = state.engine.health_check().await;
        state.record_health(healthy);
    }

    tracing::debug!("Health monitor stopped");
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/events", get(events))
        .route("/connections", get(connections))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": state.config.server.name,
        "version": state.config.server.version,
        "endpoints": {
            "events": "/events",
            "connections": "/connections",
            "health": "/health",
        },
    }))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    connection_id: Option<String>,
}

async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Response {
    let connection_id = query
        .connection_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    state
        .registry
        .attach(&connection_id, json!({ "user_agent": user_agent }));

    let frames = state
        .events
        .consume(&connection_id)
        .map(Ok::<_, Infallible>);

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            (
                header::HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

async fn connections(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.stats())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "name": state.config.server.name,
        "version": state.config.server.version,
        "storage": state.storage_health(),
        "auth": state.engine.tokens().status().await,
        "active_connections": state.registry.len(),
        "timestamp": Timestamp::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use minio_mcp_client::{ReqwestTransport, TokenManager};
    use minio_mcp_events::{EventKind, parse_frame};
    use tower::ServiceExt;

    const CONFIG: &str = r#"
[identity]
server_url = "https://keycloak.test"
realm = "minio"
client_id = "minio-mcp"
client_secret = "secret"

[storage]
api_base_url = "https://minio.test/api"
"#;

    fn state() -> AppState {
        let config = Config::from_toml(CONFIG).unwrap();
        let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5), true).unwrap());
        let tokens = Arc::new(TokenManager::new(transport.clone(), config.identity.clone()));
        let engine = Arc::new(RequestEngine::new(transport, tokens, &config));
        AppState::new(config, engine, CancellationToken::new())
    }

    async fn get_json(app: Router, uri: &str) -> Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_root_lists_endpoints() {
        let json = get_json(router(state()), "/").await;
        assert_eq!(json["name"], "MinIO MCP Server");
        assert_eq!(json["endpoints"]["events"], "/events");
    }

    #[tokio::test]
    async fn test_health_reports_state() {
        let state = state();
        state.registry.attach("c1", Value::Null);

        let json = get_json(router(state.clone()), "/health").await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["storage"], "unknown");
        assert_eq!(json["auth"]["state"], "unauthenticated");
        assert_eq!(json["active_connections"], 1);

        state.record_health(false);
        let json = get_json(router(state), "/health").await;
        assert_eq!(json["storage"], "unhealthy");
    }

    #[tokio::test]
    async fn test_connections_stats() {
        let state = state();
        state
            .registry
            .attach("c1", json!({"user_agent": "curl/8.5"}));

        let json = get_json(router(state), "/connections").await;
        assert_eq!(json["total_connections"], 1);
        assert_eq!(json["connections"]["c1"]["client_info"]["user_agent"], "curl/8.5");
        assert_eq!(json["connections"]["c1"]["queue_size"], 1);
    }

    #[tokio::test]
    async fn test_events_stream_attaches_and_detaches() {
        let state = state();
        let request = Request::builder()
            .uri("/events?connection_id=abc")
            .header(header::USER_AGENT, "test-client")
            .body(Body::empty())
            .unwrap();

        let response = router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let frame = parse_frame(std::str::from_utf8(&first).unwrap()).unwrap();
        assert_eq!(frame.kind(), Some(EventKind::Connected));
        assert_eq!(frame.data_json().unwrap()["connection_id"], "abc");

        let stats = state.registry.stats();
        assert_eq!(stats.connections["abc"].client_info["user_agent"], "test-client");

        drop(body);
        assert!(!state.registry.contains("abc"));
    }

    #[tokio::test]
    async fn test_events_generates_connection_id() {
        let state = state();
        let request = Request::builder().uri("/events").body(Body::empty()).unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.registry.len(), 1);
        let id = state.registry.stats().connections.keys().next().unwrap().clone();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        // The body was never polled; dropping it still detaches
        drop(response);
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_health_change_broadcasts_status_update() {
        let state = state();
        state.registry.attach("c1", Value::Null);
        let mut frames = Box::pin(state.events.consume("c1"));
        frames.next().await.unwrap();

        assert!(state.record_health(true));
        assert!(!state.record_health(true));
        assert_eq!(state.storage_health(), StorageHealth::Healthy);

        let frame = parse_frame(&frames.next().await.unwrap()).unwrap();
        assert_eq!(frame.kind(), Some(EventKind::StatusUpdate));
        let data = frame.data_json().unwrap();
        assert_eq!(data["status"], "healthy");
        assert_eq!(data["details"]["previous"], "unknown");
        assert_eq!(data["details"]["api_base_url"], "https://minio.test/api");

        assert!(state.record_health(false));
        let frame = parse_frame(&frames.next().await.unwrap()).unwrap();
        assert_eq!(frame.data_json().unwrap()["status"], "unhealthy");
    }
}
