// Persisted settings: a flat key/value file in the user's config directory.
// It holds the imported S3 config keys and the cached VK access tokens.
// Everything that needs settings takes a `&mut dyn KeyValueStore` so tests
// can hand in a `MemoryStore` instead.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "mini-test-groups";
const FILE_NAME: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt settings file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not determine the user config directory")]
    NoConfigDir,
}

/// Get/set/delete over string values.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&mut self, key: &str) -> Result<(), StoreError>;
}

/// JSON-file backed store. Every mutation is written through to disk.
pub struct FileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl FileStore {
    /// Open the store at `<config_dir>/mini-test-groups/config.json`.
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
        Self::open(dir.join(APP_DIR).join(FILE_NAME))
    }

    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            if data.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&data).map_err(|source| StoreError::Json {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            Map::new()
        };
        tracing::debug!(path = %path.display(), keys = values.len(), "settings loaded");
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(&self.values).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        // Tokens and secret keys live here.
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path).map_err(io_err)?;
        // `mode` only applies on creation; tighten files written by older runs.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        file.write_all(content.as_bytes()).map_err(io_err)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), Value::String(value.to_string()));
        self.save()
    }

    fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        if self.values.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }
}

/// In-memory store, for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    pub values: BTreeMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Cached VK access tokens, keyed by app id.
///
/// There is no expiry: a token stays until the platform rejects it and the
/// pipeline calls [`CredentialStore::delete`].
pub struct CredentialStore<'a> {
    store: &'a mut dyn KeyValueStore,
}

impl<'a> CredentialStore<'a> {
    pub fn new(store: &'a mut dyn KeyValueStore) -> Self {
        Self { store }
    }

    pub fn key(app_id: &str) -> String {
        format!("VK_TOKEN_{app_id}")
    }

    pub fn get(&self, app_id: &str) -> Option<String> {
        self.store.get(&Self::key(app_id)).filter(|t| !t.is_empty())
    }

    pub fn set(&mut self, app_id: &str, token: &str) -> Result<(), StoreError> {
        self.store.set(&Self::key(app_id), token)
    }

    pub fn delete(&mut self, app_id: &str) -> Result<(), StoreError> {
        tracing::info!(app_id, "forgetting cached access token");
        self.store.delete(&Self::key(app_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_persists_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("ACCESS_KEY"), None);
        store.set("ACCESS_KEY", "ak").unwrap();
        store.set("VK_TOKEN_1", "tok").unwrap();

        let mut reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("ACCESS_KEY").as_deref(), Some("ak"));
        reopened.delete("VK_TOKEN_1").unwrap();

        let again = FileStore::open(&path).unwrap();
        assert_eq!(again.get("VK_TOKEN_1"), None);
        assert_eq!(again.get("ACCESS_KEY").as_deref(), Some("ak"));
    }

    #[test]
    fn file_store_renders_non_string_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"SSL": false, "REGION": "ru-1", "X": null}"#).unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("SSL").as_deref(), Some("false"));
        assert_eq!(store.get("REGION").as_deref(), Some("ru-1"));
        assert_eq!(store.get("X"), None);
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Json { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut store = FileStore::open(&path).unwrap();
        store.set("SECRET_KEY", "s").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mut store = FileStore::open(&path).unwrap();
        store.set("VK_TOKEN_51", "t").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(FileStore::open(&path).unwrap().get("VK_TOKEN_51").as_deref(), Some("t"));
    }

    #[test]
    fn credentials_are_keyed_by_app_id() {
        let mut mem = MemoryStore::default();
        let mut creds = CredentialStore::new(&mut mem);
        creds.set("51", "token-a").unwrap();
        creds.set("52", "token-b").unwrap();
        assert_eq!(creds.get("51").as_deref(), Some("token-a"));

        creds.delete("51").unwrap();
        assert_eq!(creds.get("51"), None);
        assert_eq!(creds.get("52").as_deref(), Some("token-b"));
        assert!(mem.values.contains_key("VK_TOKEN_52"));
    }

    #[test]
    fn empty_token_counts_as_missing() {
        let mut mem = MemoryStore::default();
        mem.set("VK_TOKEN_7", "").unwrap();
        let creds = CredentialStore::new(&mut mem);
        assert_eq!(creds.get("7"), None);
    }
}
