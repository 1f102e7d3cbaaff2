//! Provisioning configuration types.
//!
//! # Components
//!
//! - [`wifi`] - Station and soft-AP field types with per-field validation
//! - [`settings`] - Runtime settings (advertised name, retry ceiling, storage)

mod settings;
mod wifi;

pub use settings::{
    ProvisionerConfig, RangeErrorPolicy, DEFAULT_DEVICE_NAME, DEFAULT_MAX_CONNECTION_RETRY,
    DEFAULT_STORAGE_NAMESPACE,
};
pub use wifi::{
    format_bssid, AuthMode, Bssid, ConfigError, SoftApConfig, StationCredentials, WifiMode,
    BSSID_LEN, MAX_AP_CHANNEL, MAX_AP_CONNECTIONS, MAX_PASSWORD_LEN, MAX_SSID_LEN,
    MIN_AP_CHANNEL,
};
