//! Session store backends.
//!
//! The store is a small key/value surface over three keys: the access
//! token, the refresh token and the serialized user profile. Only the
//! session manager and the refresh coordinator write to it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing::debug;

use super::credentials::KeyringStore;
use super::session::TokenPair;
use crate::config::{Config, StorageBackend};
use crate::models::UserProfile;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageKey {
    AccessToken,
    RefreshToken,
    User,
}

impl StorageKey {
    pub const ALL: [StorageKey; 3] = [
        StorageKey::AccessToken,
        StorageKey::RefreshToken,
        StorageKey::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::AccessToken => "ironlog:token",
            StorageKey::RefreshToken => "ironlog:refresh_token",
            StorageKey::User => "ironlog:user",
        }
    }
}

/// Durable key/value storage for the session. Removing an absent key is not an error.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: StorageKey) -> Result<Option<String>>;
    fn set(&self, key: StorageKey, value: &str) -> Result<()>;
    fn remove(&self, key: StorageKey) -> Result<()>;
}

impl dyn SessionStore {
    pub fn tokens(&self) -> Result<Option<TokenPair>> {
        let token = self.get(StorageKey::AccessToken)?;
        let refresh_token = self.get(StorageKey::RefreshToken)?;
        Ok(match (token, refresh_token) {
            (Some(token), Some(refresh_token)) => Some(TokenPair {
                token,
                refresh_token,
            }),
            _ => None,
        })
    }

    pub fn save_tokens(&self, tokens: &TokenPair) -> Result<()> {
        self.set(StorageKey::AccessToken, &tokens.token)?;
        self.set(StorageKey::RefreshToken, &tokens.refresh_token)
    }

    pub fn user(&self) -> Result<Option<UserProfile>> {
        match self.get(StorageKey::User)? {
            Some(raw) => {
                let user = serde_json::from_str(&raw).context("Failed to parse stored user")?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    pub fn save_user(&self, user: &UserProfile) -> Result<()> {
        let raw = serde_json::to_string(user)?;
        self.set(StorageKey::User, &raw)
    }

    /// Remove every session key. Attempts all keys before reporting the first failure.
    pub fn clear(&self) -> Result<()> {
        let mut first_err = None;
        for key in StorageKey::ALL {
            if let Err(e) = self.remove(key) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Open the backend selected in the config.
pub fn open_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    Ok(match config.storage {
        StorageBackend::File => Arc::new(FileStore::open(config.cache_dir()?)?),
        StorageBackend::Keyring => Arc::new(KeyringStore::new()),
    })
}

// ============================================================================
// In-memory
// ============================================================================

/// Non-durable store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<StorageKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(&key).cloned())
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(&key);
        Ok(())
    }
}

// ============================================================================
// File
// ============================================================================

/// JSON file in the cache directory, rewritten on every mutation.
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let path = cache_dir.as_ref().join(SESSION_FILE);
        let values = if path.exists() {
            let contents =
                std::fs::read_to_string(&path).context("Failed to read session file")?;
            serde_json::from_str(&contents).context("Failed to parse session file")?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), keys = values.len(), "Session file opened");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if values.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove session file")?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key.as_str()).cloned())
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.as_str().to_string(), value.to_string());
        self.flush(&values)
    }

    fn remove(&self, key: StorageKey) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        if values.remove(key.as_str()).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}
