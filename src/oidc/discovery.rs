//! OpenID Provider Metadata discovery
//!
//! Fetches `{base_url}/realms/{realm}/.well-known/openid-configuration` at
//! most once per resolver, optionally going through a shared
//! [`DiscoveryCache`]. A populated cache entry is trusted as-is and never
//! refreshed by this module; clearing stale entries is up to the operator.

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::store::DiscoveryCache;
use crate::{Error, Result};

/// Well-known endpoint keys used by the service
pub mod keys {
    /// Issuer identifier
    pub const ISSUER: &str = "issuer";
    /// Authorization endpoint
    pub const AUTHORIZATION: &str = "authorization_endpoint";
    /// Token endpoint
    pub const TOKEN: &str = "token_endpoint";
    /// Userinfo endpoint
    pub const USERINFO: &str = "userinfo_endpoint";
    /// End-session (logout) endpoint
    pub const END_SESSION: &str = "end_session_endpoint";
}

/// OpenID Provider Metadata, kept as the raw JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderMetadata {
    raw: Map<String, Value>,
}

impl ProviderMetadata {
    /// Wrap an already parsed document
    #[must_use]
    pub fn new(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    /// String value for `name`, exactly as found in the document
    pub fn endpoint(&self, name: &str) -> Option<&str> {
        self.raw.get(name).and_then(Value::as_str)
    }

    /// Issuer identifier
    pub fn issuer(&self) -> Option<&str> {
        self.endpoint(keys::ISSUER)
    }

    /// Whether the document has no entries
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// The raw document
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Fetch the document for a realm
    pub async fn fetch(client: &Client, base_url: &str, realm: &str) -> Result<Self> {
        let url = well_known_url(base_url, realm);
        debug!(url = %url, "Discovering OpenID configuration");

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Discovery(format!("HTTP {}", response.status())));
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| Error::Discovery(format!("invalid document: {e}")))?;

        debug!(issuer = ?metadata.issuer(), "Discovered OpenID provider");
        Ok(metadata)
    }
}

/// Discovery URL for a realm
pub fn well_known_url(base_url: &str, realm: &str) -> String {
    format!(
        "{}/realms/{realm}/.well-known/openid-configuration",
        base_url.trim_end_matches('/')
    )
}

/// Cache key for a realm's document: realm plus a digest of the base URL
pub fn cache_key(base_url: &str, realm: &str) -> String {
    let digest = hex::encode(Sha256::digest(base_url.trim_end_matches('/').as_bytes()));
    format!("keycloak_web_guard_openid-{realm}-{digest}")
}

/// Lazily resolves provider metadata, once per instance
pub struct DiscoveryResolver {
    http_client: Client,
    base_url: String,
    realm: String,
    cache: Option<Arc<dyn DiscoveryCache>>,
    metadata: OnceCell<ProviderMetadata>,
}

impl DiscoveryResolver {
    /// Create a resolver; `cache` is consulted only when provided
    #[must_use]
    pub fn new(
        http_client: Client,
        base_url: impl Into<String>,
        realm: impl Into<String>,
        cache: Option<Arc<dyn DiscoveryCache>>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            realm: realm.into(),
            cache,
            metadata: OnceCell::new(),
        }
    }

    /// The provider metadata, fetching it on first use
    pub async fn metadata(&self) -> Result<&ProviderMetadata> {
        self.metadata.get_or_try_init(|| self.load()).await
    }

    /// URL (or other string value) for `name`; `None` when absent
    pub async fn endpoint(&self, name: &str) -> Result<Option<String>> {
        Ok(self.metadata().await?.endpoint(name).map(str::to_string))
    }

    /// URL for `name`, failing when the document lacks it
    pub async fn require(&self, name: &str) -> Result<String> {
        self.endpoint(name)
            .await?
            .ok_or_else(|| Error::MissingEndpoint(name.to_string()))
    }

    async fn load(&self) -> Result<ProviderMetadata> {
        let key = cache_key(&self.base_url, &self.realm);

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key) {
                match serde_json::from_value::<ProviderMetadata>(cached) {
                    Ok(metadata) if !metadata.is_empty() => {
                        debug!(realm = %self.realm, "Using cached OpenID configuration");
                        return Ok(metadata);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Ignoring unreadable cached OpenID configuration"),
                }
            }
        }

        let metadata =
            ProviderMetadata::fetch(&self.http_client, &self.base_url, &self.realm).await?;

        if let Some(cache) = &self.cache {
            if !metadata.is_empty() {
                cache.put(&key, Value::Object(metadata.as_map().clone()));
                info!(realm = %self.realm, "Cached OpenID configuration");
            }
        }

        Ok(metadata)
    }
}
