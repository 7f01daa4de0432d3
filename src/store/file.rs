//! File-backed store
//!
//! Persists session values and discovery documents as JSON files so that
//! separate CLI invocations share one login.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{DiscoveryCache, SessionStore};
use crate::{Error, Result};

/// Directory of JSON files, one per key
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `base_dir`, creating it if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .map_err(|e| Error::Internal(format!("Failed to create store dir: {e}")))?;
        }

        Ok(Self { base_dir })
    }

    /// Create a store in the default location (`~/.keycloak-web-guard/<name>`)
    pub fn default_location(name: &str) -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Internal("Cannot determine home directory".to_string()))?;

        Self::new(home.join(".keycloak-web-guard").join(name))
    }

    /// Root directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.base_dir.join(format!("{}.json", &digest[..16]))
    }

    fn read(&self, key: &str) -> Option<Value> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(key = %key, "No stored value");
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to parse stored value");
                    None
                }
            },
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read stored value");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key);
        let content = serde_json::to_string_pretty(value)?;

        // Tokens live here: owner read/write only, from creation on
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;

        // `mode` only applies to new files; tighten ones left by older runs
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
                warn!(key = %key, error = %e, "Failed to restrict stored value permissions");
            }
        }

        file.write_all(content.as_bytes())?;

        debug!(key = %key, "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(key = %key, "Removed value");
        }
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.read(key)
    }

    fn put(&self, key: &str, value: Value) {
        if let Err(e) = self.write(key, &value) {
            warn!(key = %key, error = %e, "Failed to write session value");
        }
    }

    fn forget(&self, key: &str) {
        if let Err(e) = self.remove(key) {
            warn!(key = %key, error = %e, "Failed to remove session value");
        }
    }
}

impl DiscoveryCache for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.read(key)
    }

    fn put(&self, key: &str, value: Value) {
        if let Err(e) = self.write(key, &value) {
            warn!(key = %key, error = %e, "Failed to write discovery cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        SessionStore::put(&store, "_keycloak_token", json!({"access_token": "X"}));

        let reopened = FileStore::new(dir.path()).unwrap();
        assert_eq!(
            SessionStore::get(&reopened, "_keycloak_token"),
            Some(json!({"access_token": "X"}))
        );
    }

    #[test]
    fn forget_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        SessionStore::put(&store, "k", json!(1));
        store.forget("k");
        assert!(SessionStore::get(&store, "k").is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn corrupt_file_reads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        fs::write(store.path_for("k"), "{not json").unwrap();
        assert!(SessionStore::get(&store, "k").is_none());
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::new(&nested).unwrap();
        assert!(store.base_dir().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        DiscoveryCache::put(&store, "k", json!({}));
        let mode = fs::metadata(store.path_for("k")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn overwrite_tightens_loose_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let path = store.path_for("k");
        fs::write(&path, "{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        DiscoveryCache::put(&store, "k", json!({"a": 1}));

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(DiscoveryCache::get(&store, "k"), Some(json!({"a": 1})));
    }
}
