//! Service tests against a mock Keycloak realm
//!
//! Covers discovery and its cache, the URL builders, every token grant,
//! refresh-token invalidation, UMA decisions and profile retrieval.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use keycloak_web_guard::oidc::discovery::cache_key;
use keycloak_web_guard::store::{DiscoveryCache, MemoryCache, MemoryStore};
use keycloak_web_guard::{Error, KeycloakService, TokenSet};

fn query_pairs(url: &str) -> Vec<(String, String)> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn discovery_is_fetched_once_per_instance() {
    let server = MockServer::start().await;
    discovery_mock(&server).expect(1).mount(&server).await;

    let svc = service(&server);
    svc.login_url().await.unwrap();
    svc.login_url().await.unwrap();
    assert_eq!(
        svc.discovery().endpoint("token_endpoint").await.unwrap(),
        Some(format!("{}{TOKEN_PATH}", server.uri()))
    );
}

#[tokio::test]
async fn discovery_failure_is_fatal_for_url_builders() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = service(&server).login_url().await.unwrap_err();
    assert!(matches!(err, Error::Discovery(_)));
    assert!(err.to_string().contains("It was not possible to load OpenId configuration"));
}

#[tokio::test]
async fn cache_hit_skips_the_network() {
    let server = MockServer::start().await;
    discovery_mock(&server).expect(0).mount(&server).await;

    let cache = Arc::new(MemoryCache::new());
    cache.put(&cache_key(&server.uri(), REALM), discovery_document(&server));

    let svc = KeycloakService::builder(config(&server).with_cache_openid(true))
        .cache(cache)
        .build()
        .unwrap();

    let url = svc.login_url().await.unwrap();
    assert!(url.starts_with(&format!("{}/realms/demo/protocol/openid-connect/auth?", server.uri())));
}

#[tokio::test]
async fn fetched_document_is_cached_for_other_instances() {
    let server = MockServer::start().await;
    discovery_mock(&server).expect(1).mount(&server).await;

    let cache = Arc::new(MemoryCache::new());
    for _ in 0..2 {
        let svc = KeycloakService::builder(config(&server).with_cache_openid(true))
            .cache(cache.clone())
            .build()
            .unwrap();
        svc.login_url().await.unwrap();
    }

    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn cache_is_ignored_when_disabled() {
    let server = MockServer::start().await;
    discovery_mock(&server).expect(1).mount(&server).await;

    let cache = Arc::new(MemoryCache::new());
    let svc = KeycloakService::builder(config(&server))
        .cache(cache.clone())
        .build()
        .unwrap();
    svc.login_url().await.unwrap();

    assert!(cache.is_empty());
}

// ============================================================================
// URL builders
// ============================================================================

#[tokio::test]
async fn login_url_carries_code_flow_parameters() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let svc = service(&server);

    let url = svc.login_url().await.unwrap();
    let pairs = query_pairs(&url);

    assert_eq!(pairs[0], ("scope".to_string(), "openid".to_string()));
    assert_eq!(pairs[1], ("response_type".to_string(), "code".to_string()));
    assert_eq!(pairs[2], ("client_id".to_string(), CLIENT_ID.to_string()));
    assert_eq!(pairs[3], ("redirect_uri".to_string(), CALLBACK_URL.to_string()));
    assert_eq!(pairs[4].0, "state");
    assert_eq!(pairs[4].1.len(), 32);
    assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example%2Fauth%2Fcallback"));

    // The state in the URL is the one stored in the session
    assert!(svc.validate_state(&pairs[4].1));
}

#[tokio::test]
async fn each_login_url_replaces_the_state() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let svc = service(&server);

    let first = query_pairs(&svc.login_url().await.unwrap())[4].1.clone();
    let second = query_pairs(&svc.login_url().await.unwrap())[4].1.clone();

    assert_ne!(first, second);
    assert!(!svc.validate_state(&first));
    assert!(svc.validate_state(&second));
}

#[tokio::test]
async fn register_url_points_at_registrations() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;

    let url = service(&server).register_url().await.unwrap();
    assert!(url.starts_with(&format!(
        "{}/realms/demo/protocol/openid-connect/registrations?scope=openid",
        server.uri()
    )));
}

#[tokio::test]
async fn logout_url_includes_id_token_hint() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let svc = service(&server);

    let id = id_token(&server, "u1", now() + 300);
    svc.save_token(&TokenSet {
        access_token: Some("X".to_string()),
        id_token: Some(id.clone()),
        ..TokenSet::default()
    });

    let url = svc.logout_url().await.unwrap();
    assert!(url.starts_with(&format!("{}{LOGOUT_PATH}?", server.uri())));
    assert_eq!(
        query_pairs(&url),
        vec![
            (
                "post_logout_redirect_uri".to_string(),
                "https://app.example/".to_string()
            ),
            ("id_token_hint".to_string(), id),
        ]
    );
}

#[tokio::test]
async fn logout_url_omits_hint_without_id_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let svc = KeycloakService::new(
        config(&server).with_redirect_logout("https://app.example/bye"),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    svc.save_token(&TokenSet {
        access_token: Some("X".to_string()),
        ..TokenSet::default()
    });

    let url = svc.logout_url().await.unwrap();
    assert_eq!(
        query_pairs(&url),
        vec![(
            "post_logout_redirect_uri".to_string(),
            "https://app.example/bye".to_string()
        )]
    );
}

// ============================================================================
// Token grants
// ============================================================================

#[tokio::test]
async fn exchange_code_posts_form_and_stamps_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("code=abc"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("client_id=app1"))
        .and(body_string_contains("client_secret=s3cret"))
        .and(body_string_contains(
            "redirect_uri=https%3A%2F%2Fapp.example%2Fauth%2Fcallback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("X", None)))
        .expect(1)
        .mount(&server)
        .await;

    let token = service(&server).exchange_code("abc").await;

    assert!(!token.is_fallback());
    let token = token.into_inner();
    assert_eq!(token.access_token(), Some("X"));
    assert_eq!(token.refresh_token(), Some("X-refresh"));
    assert_eq!(token.expires_in, Some(300));
    assert!(token.issued_at.is_some());
    assert_eq!(token.extra.get("session_state"), Some(&json!("3f1c")));
}

#[tokio::test]
async fn exchange_code_failure_yields_empty_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Code not valid"
        })))
        .mount(&server)
        .await;

    let token = service(&server).exchange_code("stale").await;

    assert!(token.is_fallback());
    assert!(token.failure().unwrap().contains("invalid_grant"));
    assert!(token.value().is_empty());
}

#[tokio::test]
async fn exchange_code_server_error_yields_empty_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(1)
        .mount(&server)
        .await;

    let token = service(&server).exchange_code("abc").await;

    assert!(token.is_fallback());
    assert!(token.failure().unwrap().contains("500"));
    assert!(token.value().is_empty());
}

#[tokio::test]
async fn grants_recover_from_discovery_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let svc = service(&server);
    assert!(svc.exchange_code("abc").await.value().is_empty());
    assert!(!svc.revoke("R").await.into_inner());
}

#[tokio::test]
async fn client_credentials_grant() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_secret=s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("SA", None)))
        .expect(1)
        .mount(&server)
        .await;

    let token = service(&server).exchange_client_credentials().await;
    assert_eq!(token.value().access_token(), Some("SA"));
}

#[tokio::test]
async fn password_grant_requests_openid_scope() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=alice"))
        .and(body_string_contains("password=p%40ss+word"))
        .and(body_string_contains("scope=openid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("PW", None)))
        .expect(1)
        .mount(&server)
        .await;

    let token = service(&server).exchange_password("alice", "p@ss word").await;
    assert_eq!(token.value().access_token(), Some("PW"));
}

#[tokio::test]
async fn refresh_grant() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=R"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("X2", None)))
        .expect(1)
        .mount(&server)
        .await;

    let token = service(&server).refresh("R").await;
    assert_eq!(token.value().access_token(), Some("X2"));
}

#[tokio::test]
async fn empty_refresh_token_makes_no_request() {
    let server = MockServer::start().await;
    discovery_mock(&server).expect(0).mount(&server).await;

    assert!(service(&server).refresh("").await.value().is_empty());
}

// ============================================================================
// Revoke
// ============================================================================

#[tokio::test]
async fn revoke_succeeds_on_no_content() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(LOGOUT_PATH))
        .and(body_string_contains("client_id=app1"))
        .and(body_string_contains("refresh_token=R"))
        .and(body_string_contains("client_secret=s3cret"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert!(service(&server).revoke("R").await.into_inner());
}

#[tokio::test]
async fn revoke_fails_on_any_other_status() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(LOGOUT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let revoked = service(&server).revoke("R").await;
    assert!(revoked.is_fallback());
    assert!(!revoked.into_inner());
}

// ============================================================================
// UMA permissions
// ============================================================================

#[tokio::test]
async fn permission_check_sends_uma_ticket_request() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(header("authorization", "Bearer X"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Auma-ticket",
        ))
        .and(body_string_contains("audience=app1"))
        .and(body_string_contains("permission=resource1%23view"))
        .and(body_string_contains("permission=resource2%23edit"))
        .and(body_string_contains("response_mode=decision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
        .expect(1)
        .mount(&server)
        .await;

    let svc = service(&server);
    svc.save_token(&TokenSet {
        access_token: Some("X".to_string()),
        ..TokenSet::default()
    });

    let allowed = svc
        .check_permission(&["resource1#view", "resource2#edit"], None)
        .await;
    assert!(allowed.into_inner());
}

#[tokio::test]
async fn permission_check_uses_given_audience() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("audience=billing"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let svc = service(&server);
    svc.save_token(&TokenSet {
        access_token: Some("X".to_string()),
        ..TokenSet::default()
    });

    assert!(svc.check_permission(&["invoice"], Some("billing")).await.into_inner());
}

#[tokio::test]
async fn permission_denied_is_false() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "access_denied",
            "error_description": "not_authorized"
        })))
        .mount(&server)
        .await;

    let svc = service(&server);
    svc.save_token(&TokenSet {
        access_token: Some("X".to_string()),
        ..TokenSet::default()
    });

    assert!(!svc.check_permission(&["resource1#view"], None).await.into_inner());
}

#[tokio::test]
async fn permission_check_without_token_makes_no_request() {
    let server = MockServer::start().await;
    discovery_mock(&server).expect(0).mount(&server).await;

    assert!(!service(&server)
        .check_permission(&["resource1#view"], None)
        .await
        .into_inner());
}

// ============================================================================
// Profile
// ============================================================================

fn userinfo_mock(sub: &str, bearer: &str) -> Mock {
    Mock::given(method("GET"))
        .and(path(USERINFO_PATH))
        .and(header("accept", "application/json"))
        .and(header("authorization", format!("Bearer {bearer}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": sub,
            "email": "alice@example.com",
            "preferred_username": "alice"
        })))
}

#[tokio::test]
async fn profile_of_valid_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    userinfo_mock("u1", "X")
        .expect(1)
        .mount(&server)
        .await;

    let credentials = TokenSet {
        access_token: Some("X".to_string()),
        refresh_token: Some("R".to_string()),
        id_token: Some(id_token(&server, "u1", now() + 300)),
        ..TokenSet::default()
    };

    let profile = service(&server).user_profile(credentials).await;
    assert!(!profile.is_fallback());
    assert_eq!(profile.value().get("preferred_username"), Some(&json!("alice")));
}

#[tokio::test]
async fn profile_with_foreign_audience_is_empty() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    userinfo_mock("u1", "X").expect(0).mount(&server).await;

    let credentials = TokenSet {
        access_token: Some("X".to_string()),
        id_token: Some(jwt(&json!({
            "iss": issuer(&server),
            "aud": "someone-else",
            "sub": "u1",
            "exp": now() + 300
        }))),
        ..TokenSet::default()
    };

    let profile = service(&server).user_profile(credentials).await;
    assert!(profile.value().is_empty());
    assert!(profile.failure().unwrap().contains("aud"));
}

#[tokio::test]
async fn profile_with_audience_array_is_accepted() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    userinfo_mock("u1", "X").mount(&server).await;

    let credentials = TokenSet {
        access_token: Some("X".to_string()),
        id_token: Some(jwt(&json!({
            "iss": issuer(&server),
            "aud": ["account", CLIENT_ID],
            "sub": "u1",
            "exp": now() + 300
        }))),
        ..TokenSet::default()
    };

    assert!(!service(&server).user_profile(credentials).await.value().is_empty());
}

#[tokio::test]
async fn profile_with_subject_mismatch_is_empty() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    userinfo_mock("u2", "X").mount(&server).await;

    let credentials = TokenSet {
        access_token: Some("X".to_string()),
        id_token: Some(id_token(&server, "u1", now() + 300)),
        ..TokenSet::default()
    };

    let profile = service(&server).user_profile(credentials).await;
    assert!(profile.value().is_empty());
}

#[tokio::test]
async fn profile_refreshes_expired_token_and_saves_it() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let fresh_id = id_token(&server, "u1", now() + 300);
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=R"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_response("X2", Some(&fresh_id))),
        )
        .expect(1)
        .mount(&server)
        .await;
    userinfo_mock("u1", "X2")
        .expect(1)
        .mount(&server)
        .await;

    let svc = service(&server);
    let expired = TokenSet {
        access_token: Some("X".to_string()),
        refresh_token: Some("R".to_string()),
        id_token: Some(id_token(&server, "u1", now() - 10)),
        ..TokenSet::default()
    };
    svc.save_token(&expired);

    let profile = svc.user_profile(expired).await;
    assert_eq!(profile.value().get("sub"), Some(&json!("u1")));

    let stored = svc.retrieve_token().unwrap();
    assert_eq!(stored.access_token(), Some("X2"));
    assert_eq!(stored.id_token(), Some(fresh_id.as_str()));
}

#[tokio::test]
async fn failed_refresh_forgets_the_session_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;
    userinfo_mock("u1", "X").expect(0).mount(&server).await;

    let svc = service(&server);
    let expired = TokenSet {
        access_token: Some("X".to_string()),
        refresh_token: Some("R".to_string()),
        id_token: Some(id_token(&server, "u1", now() - 10)),
        ..TokenSet::default()
    };
    svc.save_token(&expired);

    let profile = svc.user_profile(expired).await;
    assert!(profile.value().is_empty());
    assert_eq!(svc.retrieve_token(), None);
}

#[tokio::test]
async fn userinfo_error_yields_empty_profile() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path(USERINFO_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let credentials = TokenSet {
        access_token: Some("X".to_string()),
        id_token: Some(id_token(&server, "u1", now() + 300)),
        ..TokenSet::default()
    };

    let profile = service(&server).user_profile(credentials).await;
    assert!(profile.value().is_empty());
    assert!(profile.failure().unwrap().contains("userinfo"));
}
