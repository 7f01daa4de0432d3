//! Web guard helpers
//!
//! The pieces a web application wires into its login callback and its
//! authorization checks. Routing and middleware dispatch stay with the
//! host framework.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::Result;
use crate::oidc::{KeycloakService, Recovered, TokenSet, UserProfile};

/// Session-bound guard over a [`KeycloakService`]
#[derive(Clone)]
pub struct KeycloakGuard {
    service: Arc<KeycloakService>,
}

impl KeycloakGuard {
    /// Wrap a service
    pub fn new(service: Arc<KeycloakService>) -> Self {
        Self { service }
    }

    /// Underlying service
    pub fn service(&self) -> &KeycloakService {
        &self.service
    }

    /// Handle the authorization redirect.
    ///
    /// The stored state is consumed whether or not it matches. A mismatch
    /// never reaches the network. On success the token set is saved to the
    /// session.
    pub async fn authenticate_callback(&self, code: &str, state: &str) -> Recovered<TokenSet> {
        let valid = self.service.validate_state(state);
        self.service.forget_state();

        if !valid {
            return Recovered::empty("invalid state");
        }
        if code.is_empty() {
            return Recovered::empty("authorization response carries no code");
        }

        let token = self.service.exchange_code(code).await;
        if !token.value().is_empty() {
            self.service.save_token(token.value());
            info!("User authenticated");
        }
        token
    }

    /// Profile of the user holding the stored token
    pub async fn authenticated_user(&self) -> Recovered<UserProfile> {
        let Some(token) = self.service.retrieve_token() else {
            return Recovered::empty("no stored token");
        };
        self.service.user_profile(token).await
    }

    /// Whether the stored token resolves to a profile
    pub async fn is_authenticated(&self) -> bool {
        !self.authenticated_user().await.value().is_empty()
    }

    /// End the session: invalidate the refresh token (best effort), forget
    /// the stored token and return the Keycloak logout URL.
    ///
    /// The session token is forgotten even when the logout URL cannot be
    /// built; the error is returned afterwards.
    pub async fn logout(&self) -> Result<String> {
        let url = self.service.logout_url().await;

        if let Some(refresh_token) = self
            .service
            .retrieve_token()
            .as_ref()
            .and_then(TokenSet::refresh_token)
        {
            let revoked = self.service.revoke(refresh_token).await;
            if !revoked.into_inner() {
                warn!("Refresh token was not invalidated");
            }
        }

        self.service.forget_token();
        debug!("Session token forgotten");
        url
    }

    /// Whether the stored access token grants any of `roles` on `resource`
    /// (the configured client when `None`)
    pub fn has_role<S: AsRef<str>>(&self, roles: &[S], resource: Option<&str>) -> bool {
        let Some(token) = self.service.retrieve_token() else {
            return false;
        };
        let resource = resource.unwrap_or(self.service.config().client_id.as_str());
        token.has_role(roles, resource)
    }

    /// UMA decision for `permissions` against the configured client
    pub async fn has_permissions<S: AsRef<str>>(&self, permissions: &[S]) -> bool {
        self.service
            .check_permission(permissions, None)
            .await
            .into_inner()
    }
}

/// Split a `a|b|c` guard expression into its entries
pub fn split_guard(expression: &str) -> Vec<&str> {
    expression
        .split('|')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect()
}
