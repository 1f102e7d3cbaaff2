//! File-backed credential store for host (development) builds.
//!
//! Each key is one file inside the store directory, so records stay
//! independent just like NVS blobs. Uses `~/.blufi-provisioner/` by default.

use super::{validate_key, CredentialStore, StoreError};
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default storage directory.
///
/// Returns `~/.blufi-provisioner`
pub fn default_storage_dir() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".blufi-provisioner"))
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open the store at `dir`, or at the default location when `None`.
    pub fn open_or_default(dir: Option<&Path>) -> Result<Self, StoreError> {
        match dir {
            Some(dir) => Self::open(dir),
            None => Self::open(default_storage_dir()?),
        }
    }

    /// Directory holding the key files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.bin", key)))
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No stored value for {}", key);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::write(&path, value)?;

        // Verify write by reading back
        let read_back = fs::read(&path)?;
        if read_back != value {
            return Err(StoreError::VerificationFailed {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ProvisioningStore, KEY_WIFI_SSID};
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Counter to ensure unique test directories even in parallel execution
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_store_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir().join(format!("blufi-test-{}-{}", pid, id))
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = unique_store_dir();
        let mut store = FileStore::open(&dir).expect("Failed to open store");

        assert_eq!(store.get("blufi_ota_url").unwrap(), None);
        store.set("blufi_ota_url", b"http://x/y\0").unwrap();
        assert_eq!(
            store.get("blufi_ota_url").unwrap(),
            Some(b"http://x/y\0".to_vec())
        );
        store.remove("blufi_ota_url").unwrap();
        assert!(!store.exists("blufi_ota_url").unwrap());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = unique_store_dir();

        {
            let mut records = ProvisioningStore::new(FileStore::open(&dir).unwrap());
            records.write_wifi_ssid(b"Persisted").unwrap();
        }

        let records = ProvisioningStore::new(FileStore::open(&dir).unwrap());
        assert_eq!(records.read_wifi_ssid().unwrap(), Some(b"Persisted".to_vec()));
        assert!(records.inner().exists(KEY_WIFI_SSID).unwrap());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let dir = unique_store_dir();
        let mut store = FileStore::open(&dir).unwrap();
        assert!(matches!(
            store.set("../escape", b"x"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.set("key_that_is_way_too_long", b"x"),
            Err(StoreError::InvalidKey(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
