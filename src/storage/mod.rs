//! Durable key/blob storage for provisioning state.
//!
//! Every call is one complete operation: a `set` has been committed by the
//! time it returns, and a missing key is a normal `Ok(None)` rather than an
//! error.
//!
//! # Components
//!
//! - [`CredentialStore`] - The storage contract
//! - [`MemoryStore`] - In-process store for tests and host simulation
//! - [`FileStore`] - One file per key (host only)
//! - [`NvsStore`] - ESP32 Non-Volatile Storage (ESP32 only)
//! - [`ProvisioningStore`] - Typed provisioning records on top of any store

#[cfg(not(target_os = "espidf"))]
mod file;
#[cfg(feature = "esp32")]
mod nvs;
mod record;

#[cfg(not(target_os = "espidf"))]
pub use file::{default_storage_dir, FileStore};
#[cfg(feature = "esp32")]
pub use nvs::NvsStore;
pub use record::{
    ProvisioningStore, KEY_HAS_CONFIG, KEY_OTA_URL, KEY_VERSION, KEY_WIFI_PASSWORD,
    KEY_WIFI_SSID, RECORD_VERSION,
};

use std::collections::HashMap;
use std::fmt;

/// Longest key the underlying NVS accepts.
pub const MAX_KEY_LEN: usize = 15;

/// Durable key to blob persistence.
pub trait CredentialStore: Send {
    /// Read a blob. `Ok(None)` means the key was never written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a blob, durable before returning.
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Delete a blob. Removing a missing key succeeds.
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;

    /// Check whether a key has been written.
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Reject keys the device store could not hold.
///
/// Keys are limited to ASCII letters, digits, `_` and `-` so they also work
/// as file names.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid_chars = key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if key.is_empty() || key.len() > MAX_KEY_LEN || !valid_chars {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Volatile store backed by a `HashMap`.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries.remove(key);
        Ok(())
    }
}

/// Errors from the credential store.
#[derive(Debug)]
pub enum StoreError {
    /// Key is empty, too long or has characters outside `[A-Za-z0-9_-]`.
    InvalidKey(String),
    /// Stored value could not be decoded.
    Corrupt { key: String, reason: String },
    /// Read-back after a write did not match what was written.
    VerificationFailed { key: String },
    /// Host file system error.
    Io(std::io::Error),
    /// ESP-IDF NVS error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey(key) => write!(f, "invalid store key: {:?}", key),
            Self::Corrupt { key, reason } => write!(f, "corrupt value for {}: {}", key, reason),
            Self::VerificationFailed { key } => {
                write!(f, "read-back verification failed for {}", key)
            }
            Self::Io(e) => write!(f, "I/O error: {}", e),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "NVS error: {:?}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for StoreError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("blufi_wifi_ssid").unwrap(), None);
        assert!(!store.exists("blufi_wifi_ssid").unwrap());

        store.set("blufi_wifi_ssid", b"Home\0").unwrap();
        assert_eq!(store.get("blufi_wifi_ssid").unwrap(), Some(b"Home\0".to_vec()));
        assert!(store.exists("blufi_wifi_ssid").unwrap());

        store.remove("blufi_wifi_ssid").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let mut store = MemoryStore::new();
        assert!(store.remove("blufi_ota_url").is_ok());
    }

    #[test]
    fn test_key_length_limit() {
        let mut store = MemoryStore::new();
        assert!(store.set("a_key_that_is_too_long", b"x").is_err());
        assert!(matches!(
            store.get(""),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(validate_key("fifteen_chars__").is_ok());
        assert!(validate_key("sixteen_chars___").is_err());
        assert!(validate_key("dir/key").is_err());
    }
}
