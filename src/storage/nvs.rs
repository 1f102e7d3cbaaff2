//! NVS-backed credential store.
//!
//! Stores provisioning records in ESP32's Non-Volatile Storage (NVS) so they
//! persist across reboots. `EspNvs::set_raw` commits before returning, which
//! gives the write-through contract of [`CredentialStore`].
//!
//! # Security
//!
//! Development builds do not encrypt NVS data. Enable NVS encryption in the
//! partition table for production devices; the WiFi password is stored here.

use super::{validate_key, CredentialStore, StoreError};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_sys::EspError;
use log::info;

/// Largest blob this store reads back.
/// Fits a 64-byte password or a long OTA URL plus terminator.
const MAX_BLOB_SIZE: usize = 512;

/// Credential store over one NVS namespace.
pub struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStore {
    /// Open `namespace` on the default NVS partition.
    ///
    /// Must be called only once per boot for the default partition; pass the
    /// partition explicitly with [`NvsStore::with_partition`] when other code
    /// also needs it.
    pub fn open(namespace: &str) -> Result<Self, EspError> {
        let partition = EspNvsPartition::<NvsDefault>::take()?;
        Self::with_partition(partition, namespace)
    }

    /// Open `namespace` on an already-taken partition.
    pub fn with_partition(
        partition: EspNvsPartition<NvsDefault>,
        namespace: &str,
    ) -> Result<Self, EspError> {
        let nvs = EspNvs::new(partition, namespace, true)?;
        info!("NVS namespace '{}' opened", namespace);
        Ok(Self { nvs })
    }
}

impl CredentialStore for NvsStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        let mut buf = [0u8; MAX_BLOB_SIZE];
        let bytes = self.nvs.get_raw(key, &mut buf)?;
        Ok(bytes.map(<[u8]>::to_vec))
    }

    /// Write with read-back verification.
    ///
    /// Catches flash write failures that do not return an error code.
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.nvs.set_raw(key, value)?;

        let mut verify_buf = [0u8; MAX_BLOB_SIZE];
        let read_back = self.nvs.get_raw(key, &mut verify_buf).map_err(|e| {
            log::error!("Failed to read back {} after save: {:?}", key, e);
            e
        })?;

        if read_back != Some(value) {
            log::error!("Verification failed for {} - data mismatch after save", key);
            return Err(StoreError::VerificationFailed {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.nvs.remove(key)?;
        Ok(())
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::storage::ProvisioningStore;
    use blufi_provisioner_macros::tap_test;

    const TEST_NAMESPACE: &str = "blufi_test";

    #[tap_test]
    fn nvs_records_roundtrip() {
        let mut records =
            ProvisioningStore::new(NvsStore::open(TEST_NAMESPACE).expect("Failed to open NVS"));
        records.write_wifi_ssid(b"DeviceTest").expect("write ssid");
        assert_eq!(
            records.read_wifi_ssid().expect("read ssid"),
            Some(b"DeviceTest".to_vec())
        );
        records.clear_wifi().expect("clear");
        assert_eq!(records.read_wifi_ssid().expect("read ssid"), None);
    }
}
