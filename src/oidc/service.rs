//! Keycloak OIDC service
//!
//! Builds the authorization, registration and logout URLs, performs the
//! token endpoint grants, and resolves user profiles. Everything on the
//! authentication path is fail-soft and returns [`Recovered`] values; the
//! URL builders propagate discovery failures because a realm that cannot be
//! discovered is a configuration problem, not a login problem.

use std::sync::Arc;

use rand::Rng;
use reqwest::{Client, StatusCode, header::ACCEPT};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::discovery::{DiscoveryResolver, keys};
use super::outcome::Recovered;
use super::token::{ExpectedClaims, TokenSet};
use super::url::build_url;
use crate::config::KeycloakConfig;
use crate::error::ValidationError;
use crate::store::{DiscoveryCache, MemoryStore, STATE_KEY, SessionStore, TOKEN_KEY};
use crate::{Error, Result};

/// Raw userinfo response
pub type UserProfile = Map<String, Value>;

/// Grant type for UMA permission decisions
pub const UMA_TICKET_GRANT: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// Generate a fresh OAuth state nonce: 16 random bytes as 32 hex chars
pub fn new_state() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// OIDC client bound to one realm and one session
pub struct KeycloakService {
    config: KeycloakConfig,
    client_secret: Option<String>,
    http_client: Client,
    discovery: DiscoveryResolver,
    session: Arc<dyn SessionStore>,
}

/// Builder for [`KeycloakService`]
pub struct KeycloakServiceBuilder {
    config: KeycloakConfig,
    session: Option<Arc<dyn SessionStore>>,
    cache: Option<Arc<dyn DiscoveryCache>>,
    http_client: Option<Client>,
}

impl KeycloakServiceBuilder {
    /// Session store holding the token set and state nonce
    #[must_use]
    pub fn session(mut self, session: Arc<dyn SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    /// Discovery cache, used when `cache_openid` is enabled
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn DiscoveryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use a preconfigured HTTP client instead of one built from `http` settings
    #[must_use]
    pub fn http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Validate the configuration and build the service
    pub fn build(self) -> Result<KeycloakService> {
        let Self {
            mut config,
            session,
            cache,
            http_client,
        } = self;

        config.validate()?;
        let base_url = config.base_url().to_string();
        config.base_url.clone_from(&base_url);

        let http_client = match http_client {
            Some(client) => client,
            None => Client::builder()
                .timeout(config.http.timeout)
                .connect_timeout(config.http.connect_timeout)
                .build()?,
        };

        let cache = match (config.cache_openid, cache) {
            (true, Some(cache)) => Some(cache),
            (true, None) => {
                warn!("cache_openid is enabled but no discovery cache was provided");
                None
            }
            (false, _) => None,
        };

        let discovery =
            DiscoveryResolver::new(http_client.clone(), base_url, config.realm.clone(), cache);

        Ok(KeycloakService {
            client_secret: config.resolve_client_secret(),
            config,
            http_client,
            discovery,
            session: session.unwrap_or_else(|| Arc::new(MemoryStore::new())),
        })
    }
}

impl KeycloakService {
    /// Start building a service for `config`
    #[must_use]
    pub fn builder(config: KeycloakConfig) -> KeycloakServiceBuilder {
        KeycloakServiceBuilder {
            config,
            session: None,
            cache: None,
            http_client: None,
        }
    }

    /// Build a service with the given session store and default HTTP settings
    pub fn new(config: KeycloakConfig, session: Arc<dyn SessionStore>) -> Result<Self> {
        Self::builder(config).session(session).build()
    }

    /// Active configuration
    pub fn config(&self) -> &KeycloakConfig {
        &self.config
    }

    /// Discovery resolver
    pub fn discovery(&self) -> &DiscoveryResolver {
        &self.discovery
    }

    pub(crate) fn http_client(&self) -> &Client {
        &self.http_client
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Token set stored in the session
    pub fn retrieve_token(&self) -> Option<TokenSet> {
        let value = self.session.get(TOKEN_KEY)?;
        match serde_json::from_value(value) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session token");
                None
            }
        }
    }

    /// Stored token set, only if it carries an access token
    pub(crate) fn stored_access(&self) -> Option<TokenSet> {
        self.retrieve_token().filter(|t| !t.is_empty())
    }

    /// Replace the token set stored in the session
    pub fn save_token(&self, token: &TokenSet) {
        match serde_json::to_value(token) {
            Ok(value) => self.session.put(TOKEN_KEY, value),
            Err(e) => warn!(error = %e, "Failed to serialize token set"),
        }
    }

    /// Remove the token set from the session
    pub fn forget_token(&self) {
        self.session.forget(TOKEN_KEY);
    }

    /// Store `state` as the one active nonce for this session
    pub fn save_state(&self, state: &str) {
        self.session.put(STATE_KEY, Value::String(state.to_string()));
    }

    /// Whether `state` equals the stored nonce. Empty values never match.
    pub fn validate_state(&self, state: &str) -> bool {
        let stored = self.session.get(STATE_KEY);
        let challenge = stored.as_ref().and_then(Value::as_str).unwrap_or_default();
        !state.is_empty() && !challenge.is_empty() && challenge == state
    }

    /// Remove the stored nonce
    pub fn forget_state(&self) {
        self.session.forget(STATE_KEY);
    }

    // =========================================================================
    // URLs
    // =========================================================================

    /// Authorization URL for the code flow. A fresh state nonce is generated
    /// and stored, replacing any earlier one.
    pub async fn login_url(&self) -> Result<String> {
        let endpoint = self.discovery.require(keys::AUTHORIZATION).await?;

        let state = new_state();
        self.save_state(&state);

        Ok(build_url(
            &endpoint,
            [
                ("scope", "openid"),
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("state", state.as_str()),
            ],
        ))
    }

    /// Keycloak self-registration URL, derived from the login URL
    pub async fn register_url(&self) -> Result<String> {
        Ok(self.login_url().await?.replace("/auth?", "/registrations?"))
    }

    /// RP-initiated logout URL; empty when no token is stored
    pub async fn logout_url(&self) -> Result<String> {
        let Some(token) = self.stored_access() else {
            return Ok(String::new());
        };

        let endpoint = self.discovery.require(keys::END_SESSION).await?;
        let redirect = self.config.resolve_redirect_logout();

        let mut params = vec![("post_logout_redirect_uri", redirect.as_str())];
        if let Some(id_token) = token.id_token() {
            params.push(("id_token_hint", id_token));
        }

        Ok(build_url(&endpoint, params))
    }

    // =========================================================================
    // Token endpoint grants
    // =========================================================================

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> Recovered<TokenSet> {
        let mut params = vec![
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.callback_url.as_str()),
        ];
        self.push_secret(&mut params);

        Recovered::from_result(self.request_token("authorization_code", &params).await)
    }

    /// Obtain a service-account token
    pub async fn exchange_client_credentials(&self) -> Recovered<TokenSet> {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "client_credentials"),
        ];
        self.push_secret(&mut params);

        Recovered::from_result(self.request_token("client_credentials", &params).await)
    }

    /// Resource-owner password grant
    pub async fn exchange_password(&self, username: &str, password: &str) -> Recovered<TokenSet> {
        let mut params = vec![
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
            ("username", username),
            ("password", password),
            ("scope", "openid"),
        ];
        self.push_secret(&mut params);

        Recovered::from_result(self.request_token("password", &params).await)
    }

    /// Refresh a token set. An empty refresh token is a no-op.
    pub async fn refresh(&self, refresh_token: &str) -> Recovered<TokenSet> {
        if refresh_token.is_empty() {
            return Recovered::empty("no refresh token to exchange");
        }

        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("redirect_uri", self.config.callback_url.as_str()),
        ];
        self.push_secret(&mut params);

        Recovered::from_result(self.request_token("refresh_token", &params).await)
    }

    /// Invalidate a refresh token at the end-session endpoint.
    /// `true` only when Keycloak answers 204 No Content.
    pub async fn revoke(&self, refresh_token: &str) -> Recovered<bool> {
        Recovered::from_result(self.try_revoke(refresh_token).await)
    }

    /// Ask Keycloak for a UMA decision on `permissions` (`resource#scope`).
    ///
    /// `audience` defaults to the configured client id. Anything other than
    /// HTTP 200 is a denial, including transport errors and a missing token.
    pub async fn check_permission<S: AsRef<str>>(
        &self,
        permissions: &[S],
        audience: Option<&str>,
    ) -> Recovered<bool> {
        let Some(token) = self.stored_access() else {
            return Recovered::empty("no stored access token for permission check");
        };

        Recovered::from_result(self.try_check_permission(&token, permissions, audience).await)
    }

    fn push_secret<'a>(&'a self, params: &mut Vec<(&'a str, &'a str)>) {
        if let Some(secret) = self.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
    }

    async fn request_token(&self, grant: &str, params: &[(&str, &str)]) -> Result<TokenSet> {
        let url = self.discovery.require(keys::TOKEN).await?;

        let response = self
            .http_client
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{grant} request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "{grant} grant failed: HTTP {status} - {body}"
            )));
        }

        let token: TokenSet = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to parse token response: {e}")))?;

        info!(grant = %grant, "Token obtained");
        Ok(token.stamped())
    }

    async fn try_revoke(&self, refresh_token: &str) -> Result<bool> {
        let url = self.discovery.require(keys::END_SESSION).await?;

        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        self.push_secret(&mut params);

        let response = self
            .http_client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Logout request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "Refresh token invalidation failed: HTTP {status} - {body}"
            )));
        }

        info!("Refresh token invalidated");
        Ok(true)
    }

    async fn try_check_permission<S: AsRef<str>>(
        &self,
        token: &TokenSet,
        permissions: &[S],
        audience: Option<&str>,
    ) -> Result<bool> {
        let url = self.discovery.require(keys::TOKEN).await?;
        let access_token = token
            .access_token()
            .ok_or(ValidationError::MissingAccessToken)?;

        let mut params = vec![
            ("grant_type", UMA_TICKET_GRANT),
            ("audience", audience.unwrap_or(self.config.client_id.as_str())),
        ];
        params.extend(permissions.iter().map(|p| ("permission", p.as_ref())));
        params.push(("response_mode", "decision"));

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Permission request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Transport(format!(
                "Permission denied: HTTP {status}"
            )));
        }

        debug!(count = permissions.len(), "Permissions granted");
        Ok(true)
    }

    // =========================================================================
    // Profile
    // =========================================================================

    /// Resolve the userinfo profile for `credentials`, refreshing them first
    /// when they have expired. Any failure yields an empty profile.
    pub async fn user_profile(&self, credentials: TokenSet) -> Recovered<UserProfile> {
        let Some(credentials) = self.refresh_if_needed(credentials).await else {
            return Recovered::empty("token refresh failed; session token forgotten");
        };

        Recovered::from_result(self.fetch_profile(&credentials).await)
    }

    /// Refresh `credentials` when they carry both tokens and have expired.
    /// A failed refresh forgets the stored token and returns `None`.
    async fn refresh_if_needed(&self, credentials: TokenSet) -> Option<TokenSet> {
        let Some(refresh_token) = credentials.refresh_token() else {
            return Some(credentials);
        };
        if credentials.is_empty() || !credentials.is_expired() {
            return Some(credentials);
        }

        debug!("Access token expired, refreshing");
        let refreshed = self.refresh(refresh_token).await.into_inner();
        if refreshed.is_empty() {
            self.forget_token();
            return None;
        }

        self.save_token(&refreshed);
        Some(refreshed)
    }

    async fn fetch_profile(&self, token: &TokenSet) -> Result<UserProfile> {
        let access_token = token
            .access_token()
            .ok_or(ValidationError::MissingAccessToken)?;

        let metadata = self.discovery.metadata().await?;
        let expected = ExpectedClaims {
            aud: self.config.client_id.clone(),
            iss: metadata.issuer().unwrap_or_default().to_string(),
        };
        token.validate_claims(&expected)?;

        let url = self.discovery.require(keys::USERINFO).await?;
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Userinfo request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Transport(format!(
                "Was not able to get userinfo: HTTP {status}"
            )));
        }

        let profile: UserProfile = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to parse userinfo: {e}")))?;

        let sub = profile.get("sub").and_then(Value::as_str).unwrap_or_default();
        token.validate_subject(sub)?;

        Ok(profile)
    }
}
