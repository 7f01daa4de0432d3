//! Shared fixtures: a mock Keycloak realm and unsigned JWTs

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keycloak_web_guard::KeycloakService;
use keycloak_web_guard::config::KeycloakConfig;
use keycloak_web_guard::store::MemoryStore;

pub const REALM: &str = "demo";
pub const CLIENT_ID: &str = "app1";
pub const CLIENT_SECRET: &str = "s3cret";
pub const CALLBACK_URL: &str = "https://app.example/auth/callback";

pub const DISCOVERY_PATH: &str = "/realms/demo/.well-known/openid-configuration";
pub const TOKEN_PATH: &str = "/realms/demo/protocol/openid-connect/token";
pub const USERINFO_PATH: &str = "/realms/demo/protocol/openid-connect/userinfo";
pub const LOGOUT_PATH: &str = "/realms/demo/protocol/openid-connect/logout";

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Unsigned JWT around `payload`
pub fn jwt(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}

pub fn issuer(server: &MockServer) -> String {
    format!("{}/realms/{REALM}", server.uri())
}

/// ID token for `sub` issued by the mock realm, expiring at `exp`
pub fn id_token(server: &MockServer, sub: &str, exp: i64) -> String {
    jwt(&json!({
        "iss": issuer(server),
        "aud": CLIENT_ID,
        "sub": sub,
        "exp": exp,
        "iat": exp - 300
    }))
}

pub fn discovery_document(server: &MockServer) -> Value {
    let realm = issuer(server);
    json!({
        "issuer": realm,
        "authorization_endpoint": format!("{realm}/protocol/openid-connect/auth"),
        "token_endpoint": format!("{realm}/protocol/openid-connect/token"),
        "userinfo_endpoint": format!("{realm}/protocol/openid-connect/userinfo"),
        "end_session_endpoint": format!("{realm}/protocol/openid-connect/logout"),
        "grant_types_supported": ["authorization_code", "refresh_token", "password"]
    })
}

/// Discovery mock, not yet mounted
pub fn discovery_mock(server: &MockServer) -> Mock {
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_document(server)))
}

pub async fn mount_discovery(server: &MockServer) {
    discovery_mock(server).mount(server).await;
}

pub fn config(server: &MockServer) -> KeycloakConfig {
    KeycloakConfig::new(server.uri(), REALM, CLIENT_ID, CALLBACK_URL)
        .with_client_secret(CLIENT_SECRET)
}

pub fn service(server: &MockServer) -> KeycloakService {
    KeycloakService::new(config(server), Arc::new(MemoryStore::new())).unwrap()
}

/// Token response body as Keycloak sends it
pub fn token_response(access_token: &str, id_token: Option<&str>) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "refresh_token": format!("{access_token}-refresh"),
        "expires_in": 300,
        "refresh_expires_in": 1800,
        "token_type": "Bearer",
        "scope": "openid profile email",
        "session_state": "3f1c"
    });
    if let Some(id_token) = id_token {
        body["id_token"] = json!(id_token);
    }
    body
}
