//! Keycloak Web Guard
//!
//! OpenID Connect client core for authenticating web application users
//! against a Keycloak realm.
//!
//! # Features
//!
//! - **Discovery**: lazy, optionally cached `.well-known/openid-configuration`
//! - **Authorization Code flow**: login, registration and logout URLs with a
//!   per-session state nonce
//! - **Grants**: authorization code, client credentials, password, refresh
//!   and UMA permission decisions
//! - **Token model**: expiry detection, `aud`/`iss`/`sub` claim checks, role
//!   look-ups
//! - **Admin REST**: users, clients, client roles and role mappings
//!
//! Session and cache storage are injected through the traits in [`store`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod callback;
pub mod cli;
pub mod config;
pub mod error;
pub mod guard;
pub mod oidc;
pub mod store;

pub use error::{Error, Result, ValidationError};
pub use guard::KeycloakGuard;
pub use oidc::{KeycloakService, Recovered, TokenSet};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries command output
    let result = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| Error::Internal(format!("Failed to setup tracing: {e}")))
}
