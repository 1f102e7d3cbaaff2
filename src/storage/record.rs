//! Typed provisioning records.
//!
//! Four independent blobs, each written through on its own:
//!
//! | Record          | Key               | Encoding                 |
//! |-----------------|-------------------|--------------------------|
//! | has_config      | `blufi_has_cfg`   | 1 byte, 0 or 1           |
//! | wifi_ssid       | `blufi_wifi_ssid` | bytes + NUL terminator   |
//! | wifi_password   | `blufi_wifi_psw`  | bytes + NUL terminator   |
//! | ota_url         | `blufi_ota_url`   | bytes + NUL terminator   |
//!
//! A one-byte `blufi_version` tag is written the first time any record is
//! stored so later firmware can tell which fields to expect.

use super::{CredentialStore, StoreError};
use log::{debug, info, warn};

/// Device has associated and obtained an IP at least once.
pub const KEY_HAS_CONFIG: &str = "blufi_has_cfg";

/// Station SSID.
pub const KEY_WIFI_SSID: &str = "blufi_wifi_ssid";

/// Station password.
pub const KEY_WIFI_PASSWORD: &str = "blufi_wifi_psw";

/// Firmware update URL received over custom data.
pub const KEY_OTA_URL: &str = "blufi_ota_url";

/// Record layout version.
pub const KEY_VERSION: &str = "blufi_version";

/// Current record layout.
pub const RECORD_VERSION: u8 = 1;

/// Provisioning records on top of a [`CredentialStore`].
pub struct ProvisioningStore<S> {
    store: S,
    version_checked: bool,
}

impl<S: CredentialStore> ProvisioningStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            version_checked: false,
        }
    }

    /// Access the underlying store.
    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Consume the wrapper, returning the underlying store.
    pub fn into_inner(self) -> S {
        self.store
    }

    /// Write the version tag if missing. Returns the stored version.
    ///
    /// A newer version than this firmware knows is logged and left alone.
    pub fn ensure_version(&mut self) -> Result<u8, StoreError> {
        let version = match self.store.get(KEY_VERSION)? {
            Some(bytes) if !bytes.is_empty() => {
                if bytes[0] > RECORD_VERSION {
                    warn!(
                        "Stored record version {} is newer than supported {}",
                        bytes[0], RECORD_VERSION
                    );
                }
                bytes[0]
            }
            _ => {
                self.store.set(KEY_VERSION, &[RECORD_VERSION])?;
                info!("Initialized provisioning record version {}", RECORD_VERSION);
                RECORD_VERSION
            }
        };
        self.version_checked = true;
        Ok(version)
    }

    fn before_write(&mut self) -> Result<(), StoreError> {
        if !self.version_checked {
            self.ensure_version()?;
        }
        Ok(())
    }

    /// Whether the device has ever obtained an IP with stored credentials.
    ///
    /// Missing or unreadable values read as `false`.
    pub fn read_has_config(&self) -> bool {
        match self.store.get(KEY_HAS_CONFIG) {
            Ok(Some(bytes)) => bytes.first().copied().unwrap_or(0) != 0,
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to read {}: {}", KEY_HAS_CONFIG, e);
                false
            }
        }
    }

    pub fn write_has_config(&mut self, has_config: bool) -> Result<(), StoreError> {
        self.before_write()?;
        self.store.set(KEY_HAS_CONFIG, &[u8::from(has_config)])?;
        debug!("Stored has_config={}", has_config);
        Ok(())
    }

    /// Stored SSID without its terminator.
    pub fn read_wifi_ssid(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_c_string(KEY_WIFI_SSID)
    }

    pub fn write_wifi_ssid(&mut self, ssid: &[u8]) -> Result<(), StoreError> {
        self.write_c_string(KEY_WIFI_SSID, ssid)
    }

    /// Stored password without its terminator.
    pub fn read_wifi_password(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_c_string(KEY_WIFI_PASSWORD)
    }

    pub fn write_wifi_password(&mut self, password: &[u8]) -> Result<(), StoreError> {
        self.write_c_string(KEY_WIFI_PASSWORD, password)
    }

    /// Stored OTA URL, if any.
    pub fn read_ota_url(&self) -> Result<Option<String>, StoreError> {
        self.read_c_string(KEY_OTA_URL)?
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|e| StoreError::Corrupt {
                    key: KEY_OTA_URL.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn write_ota_url(&mut self, url: &str) -> Result<(), StoreError> {
        self.write_c_string(KEY_OTA_URL, url.as_bytes())
    }

    /// Remove station credentials and the configured flag.
    pub fn clear_wifi(&mut self) -> Result<(), StoreError> {
        self.store.remove(KEY_WIFI_SSID)?;
        self.store.remove(KEY_WIFI_PASSWORD)?;
        self.store.remove(KEY_HAS_CONFIG)?;
        warn!("Stored WiFi credentials cleared");
        Ok(())
    }

    fn read_c_string(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(mut bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        match bytes.iter().position(|&b| b == 0) {
            Some(end) => bytes.truncate(end),
            None => {
                return Err(StoreError::Corrupt {
                    key: key.to_string(),
                    reason: "missing NUL terminator".to_string(),
                })
            }
        }
        Ok(Some(bytes))
    }

    fn write_c_string(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if value.contains(&0) {
            return Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: "embedded NUL byte".to_string(),
            });
        }
        self.before_write()?;
        let mut blob = Vec::with_capacity(value.len() + 1);
        blob.extend_from_slice(value);
        blob.push(0);
        self.store.set(key, &blob)?;
        debug!("Stored {} ({} bytes)", key, value.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn store() -> ProvisioningStore<MemoryStore> {
        ProvisioningStore::new(MemoryStore::new())
    }

    #[test]
    fn test_ssid_is_nul_terminated() {
        let mut records = store();
        records.write_wifi_ssid(b"HomeNet").unwrap();
        assert_eq!(
            records.inner().get(KEY_WIFI_SSID).unwrap(),
            Some(b"HomeNet\0".to_vec())
        );
        assert_eq!(records.read_wifi_ssid().unwrap(), Some(b"HomeNet".to_vec()));
    }

    #[test]
    fn test_missing_records_read_as_absent() {
        let records = store();
        assert!(!records.read_has_config());
        assert_eq!(records.read_wifi_ssid().unwrap(), None);
        assert_eq!(records.read_wifi_password().unwrap(), None);
        assert_eq!(records.read_ota_url().unwrap(), None);
    }

    #[test]
    fn test_empty_value_is_stored() {
        let mut records = store();
        records.write_ota_url("").unwrap();
        assert_eq!(records.read_ota_url().unwrap(), Some(String::new()));
    }

    #[test]
    fn test_has_config_flag() {
        let mut records = store();
        records.write_has_config(true).unwrap();
        assert!(records.read_has_config());
        records.write_has_config(false).unwrap();
        assert!(!records.read_has_config());
    }

    #[test]
    fn test_version_written_on_first_write() {
        let mut records = store();
        assert!(!records.inner().exists(KEY_VERSION).unwrap());
        records.write_wifi_password(b"abc").unwrap();
        assert_eq!(
            records.inner().get(KEY_VERSION).unwrap(),
            Some(vec![RECORD_VERSION])
        );
    }

    #[test]
    fn test_existing_version_is_kept() {
        let mut inner = MemoryStore::new();
        inner.set(KEY_VERSION, &[7]).unwrap();
        let mut records = ProvisioningStore::new(inner);
        assert_eq!(records.ensure_version().unwrap(), 7);
        assert_eq!(records.inner().get(KEY_VERSION).unwrap(), Some(vec![7]));
    }

    #[test]
    fn test_unterminated_blob_is_corrupt() {
        let mut inner = MemoryStore::new();
        inner.set(KEY_WIFI_SSID, b"NoTerminator").unwrap();
        let records = ProvisioningStore::new(inner);
        assert!(matches!(
            records.read_wifi_ssid(),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_embedded_nul_rejected() {
        let mut records = store();
        assert!(records.write_wifi_ssid(b"bad\0ssid").is_err());
        assert_eq!(records.read_wifi_ssid().unwrap(), None);
    }

    #[test]
    fn test_clear_wifi() {
        let mut records = store();
        records.write_wifi_ssid(b"Home").unwrap();
        records.write_wifi_password(b"secret").unwrap();
        records.write_has_config(true).unwrap();
        records.clear_wifi().unwrap();
        assert_eq!(records.read_wifi_ssid().unwrap(), None);
        assert!(!records.read_has_config());
    }
}
