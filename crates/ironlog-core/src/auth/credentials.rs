use anyhow::{Context, Result};
use keyring::Entry;

use super::store::{SessionStore, StorageKey};

const SERVICE_NAME: &str = "ironlog";

/// Session store backed by the OS keychain, one entry per key.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(key: StorageKey) -> Result<Entry> {
        Entry::new(SERVICE_NAME, key.as_str()).context("Failed to create keyring entry")
    }
}

impl SessionStore for KeyringStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>> {
        match Self::entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<()> {
        Self::entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")
    }

    fn remove(&self, key: StorageKey) -> Result<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}
