//! Shared fixtures for the client unit tests

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use minio_mcp_core::{HttpRequest, HttpResponse, HttpTransport, IdentityConfig, TransportError};
use serde_json::Value;

mockall::mock! {
    pub Transport {}

    #[async_trait]
    impl HttpTransport for Transport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
    }
}

pub fn identity_config() -> IdentityConfig {
    IdentityConfig {
        server_url: "https://keycloak.test".to_string(),
        realm: "minio".to_string(),
        client_id: "minio-mcp".to_string(),
        client_secret: "secret".to_string(),
        verify_tls: true,
        username: None,
        password: None,
    }
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
    HttpResponse {
        status,
        headers,
        body: Bytes::from(body.to_string()),
    }
}

pub fn text_response(status: u16, content_type: &str, body: &str) -> HttpResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, content_type.parse().unwrap());
    HttpResponse {
        status,
        headers,
        body: Bytes::from(body.to_string()),
    }
}

pub fn token_body(access_token: &str, refresh_token: Option<&str>, expires_in: i64) -> Value {
    let mut body = serde_json::json!({
        "access_token": access_token,
        "expires_in": expires_in,
        "token_type": "Bearer",
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = Value::String(refresh.to_string());
    }
    body
}

/// Unsigned JWT-shaped token carrying the given roles
pub fn token_with_roles(realm_roles: &[&str], client: &str, client_roles: &[&str]) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let payload = serde_json::json!({
        "realm_access": {"roles": realm_roles},
        "resource_access": {client: {"roles": client_roles}},
    });
    format!(
        "{}.{}.sig",
        engine.encode(br#"{"alg":"none"}"#),
        engine.encode(payload.to_string())
    )
}
