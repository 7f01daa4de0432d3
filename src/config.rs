//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Keycloak client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeycloakConfig {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,

    /// Keycloak base URL, e.g. `https://idp.example/auth`
    pub base_url: String,

    /// Realm name
    pub realm: String,

    /// OIDC client id
    pub client_id: String,

    /// Client secret for confidential clients.
    /// Supports: literal value, `env:VAR_NAME`, or `${VAR}` expansion.
    pub client_secret: Option<String>,

    /// Cache the OpenID configuration document in the injected cache
    pub cache_openid: bool,

    /// Where Keycloak sends the browser after logout.
    /// Relative paths are resolved against `callback_url`.
    pub redirect_logout: String,

    /// Redirect URI registered for the client
    pub callback_url: String,

    /// Outbound HTTP settings
    pub http: HttpConfig,
}

impl Default for KeycloakConfig {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            base_url: String::new(),
            realm: String::new(),
            client_id: String::new(),
            client_secret: None,
            cache_openid: false,
            redirect_logout: "/".to_string(),
            callback_url: String::new(),
            http: HttpConfig::default(),
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Total request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl KeycloakConfig {
    /// Build a configuration from the four values every deployment needs
    pub fn new(
        base_url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            realm: realm.into(),
            client_id: client_id.into(),
            callback_url: callback_url.into(),
            ..Self::default()
        }
    }

    /// Set the client secret
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Enable or disable discovery caching
    #[must_use]
    pub fn with_cache_openid(mut self, enabled: bool) -> Self {
        self.cache_openid = enabled;
        self
    }

    /// Set the post-logout redirect
    #[must_use]
    pub fn with_redirect_logout(mut self, target: impl Into<String>) -> Self {
        self.redirect_logout = target.into();
        self
    }

    /// Load configuration from file and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Environment overrides, e.g. KEYCLOAK_REALM, KEYCLOAK_HTTP__TIMEOUT
        figment = figment.merge(Env::prefixed("KEYCLOAK_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        config.expand_env_vars()?;
        config.normalize();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) -> Result<()> {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        for value in [
            &mut self.base_url,
            &mut self.realm,
            &mut self.client_id,
            &mut self.callback_url,
            &mut self.redirect_logout,
        ] {
            *value = Self::expand_string(&re, value);
        }

        if let Some(secret) = self.client_secret.as_mut() {
            *secret = Self::expand_string(&re, secret);
        }

        Ok(())
    }

    /// Expand a single string's ${VAR} patterns
    fn expand_string(re: &Regex, input: &str) -> String {
        re.replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Trim trailing slashes from the base URL
    fn normalize(&mut self) {
        let trimmed = self.base_url.trim_end_matches('/').len();
        self.base_url.truncate(trimmed);
    }

    /// Check that the required values are present
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("base_url", &self.base_url),
            ("realm", &self.realm),
            ("client_id", &self.client_id),
        ] {
            if value.is_empty() {
                return Err(Error::Config(format!("'{name}' is required")));
            }
        }

        Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("Invalid base_url '{}': {e}", self.base_url)))?;

        Ok(())
    }

    /// Resolve the client secret (`env:VAR_NAME` is read from the environment).
    /// Empty secrets count as absent, i.e. a public client.
    #[must_use]
    pub fn resolve_client_secret(&self) -> Option<String> {
        let secret = self.client_secret.as_ref()?;
        let resolved = if let Some(var_name) = secret.strip_prefix("env:") {
            env::var(var_name).unwrap_or_default()
        } else {
            secret.clone()
        };
        (!resolved.is_empty()).then_some(resolved)
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Absolute post-logout redirect target
    #[must_use]
    pub fn resolve_redirect_logout(&self) -> String {
        if Url::parse(&self.redirect_logout).is_ok() {
            return self.redirect_logout.clone();
        }

        Url::parse(&self.callback_url)
            .and_then(|base| base.join(&self.redirect_logout))
            .map_or_else(|_| self.redirect_logout.clone(), String::from)
    }
}
