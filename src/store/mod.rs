//! Session and discovery-cache adapters
//!
//! The service never reaches for global session or cache state. Both are
//! injected at construction through the [`SessionStore`] and
//! [`DiscoveryCache`] traits. Two implementations ship with the crate:
//! [`MemoryStore`] for tests and single-process use, and [`FileStore`] for
//! the CLI, which needs tokens to survive between invocations.

mod file;

use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

pub use file::FileStore;

/// Per-user session storage
///
/// The service uses two fixed keys: [`TOKEN_KEY`] for the token set and
/// [`STATE_KEY`] for the OAuth state nonce. Implementations must tolerate
/// at most one writer per session per request; no stronger guarantee is
/// assumed.
pub trait SessionStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Option<Value>;

    /// Write a value, replacing any previous one
    fn put(&self, key: &str, value: Value);

    /// Remove a value
    fn forget(&self, key: &str);
}

/// Shared cache for provider discovery documents
///
/// Entries are never invalidated by the service; expiry, if any, is the
/// implementation's business.
pub trait DiscoveryCache: Send + Sync {
    /// Read a cached document
    fn get(&self, key: &str) -> Option<Value>;

    /// Store a document
    fn put(&self, key: &str, value: Value);
}

/// Session key holding the serialized [`TokenSet`](crate::oidc::TokenSet)
pub const TOKEN_KEY: &str = "_keycloak_token";

/// Session key holding the OAuth state nonce
pub const STATE_KEY: &str = "_keycloak_state";

/// In-memory session store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        self.values.write().insert(key.to_string(), value);
    }

    fn forget(&self, key: &str) {
        self.values.write().remove(key);
    }
}

/// In-memory discovery cache shared across service instances
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Value>,
}

impl MemoryCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached documents
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DiscoveryCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }
}
