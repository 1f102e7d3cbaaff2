//! Runtime settings for the provisioner.
//!
//! Platform-independent defaults with overrides from the environment. Host
//! builds read the variables at startup; ESP32 builds bake them in at compile
//! time since there is no process environment on the device.

use std::path::PathBuf;

/// Default BLE advertisement name.
pub const DEFAULT_DEVICE_NAME: &str = "BLUFI_DEVICE";

/// Automatic reconnection attempts while an association is in flight.
pub const DEFAULT_MAX_CONNECTION_RETRY: u8 = 10;

/// Default NVS namespace for provisioning records.
pub const DEFAULT_STORAGE_NAMESPACE: &str = "blufi";

/// Environment variable overriding the advertisement name.
pub const ENV_DEVICE_NAME: &str = "BLUFI_DEVICE_NAME";

/// Environment variable overriding the reconnection ceiling.
pub const ENV_MAX_RETRY: &str = "BLUFI_MAX_RETRY";

/// Environment variable selecting the range error policy (`report` or `ignore`).
pub const ENV_RANGE_ERRORS: &str = "BLUFI_RANGE_ERRORS";

/// Environment variable overriding the host storage directory.
pub const ENV_STORAGE_DIR: &str = "BLUFI_STORAGE_DIR";

/// What to do when a soft-AP numeric field (max connections, auth mode,
/// channel) is out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeErrorPolicy {
    /// Send a `DataFormatError` report, same as oversized SSID/password fields.
    #[default]
    Report,
    /// Drop the value without telling the peer.
    Ignore,
}

impl std::str::FromStr for RangeErrorPolicy {
    type Err = super::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "report" => Ok(Self::Report),
            "ignore" | "silent" => Ok(Self::Ignore),
            _ => Err(super::ConfigError::InvalidFormat(format!(
                "unknown range error policy: {}",
                s
            ))),
        }
    }
}

/// Provisioner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Name advertised over BLE.
    pub device_name: String,
    /// Reconnection ceiling while connecting.
    pub max_connection_retry: u8,
    /// Reporting policy for out-of-range soft-AP fields.
    pub range_error_policy: RangeErrorPolicy,
    /// NVS namespace (ESP32).
    pub storage_namespace: String,
    /// Directory for the file store (host). `None` selects the default.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            max_connection_retry: DEFAULT_MAX_CONNECTION_RETRY,
            range_error_policy: RangeErrorPolicy::default(),
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            storage_dir: None,
        }
    }
}

impl ProvisionerConfig {
    /// Build settings from environment variables, falling back to defaults.
    ///
    /// Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from values baked in at compile time.
    pub fn from_build_env() -> Self {
        Self::from_lookup(|key| {
            let value = match key {
                ENV_DEVICE_NAME => option_env!("BLUFI_DEVICE_NAME"),
                ENV_MAX_RETRY => option_env!("BLUFI_MAX_RETRY"),
                ENV_RANGE_ERRORS => option_env!("BLUFI_RANGE_ERRORS"),
                _ => None,
            };
            value.map(str::to_string)
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_DEVICE_NAME).filter(|n| !n.is_empty()) {
            config.device_name = name;
        }

        if let Some(raw) = lookup(ENV_MAX_RETRY) {
            match raw.trim().parse::<u8>() {
                Ok(n) => config.max_connection_retry = n,
                Err(e) => log::warn!("Ignoring {}={:?}: {}", ENV_MAX_RETRY, raw, e),
            }
        }

        if let Some(raw) = lookup(ENV_RANGE_ERRORS) {
            match raw.parse() {
                Ok(policy) => config.range_error_policy = policy,
                Err(e) => log::warn!("Ignoring {}: {}", ENV_RANGE_ERRORS, e),
            }
        }

        if let Some(dir) = lookup(ENV_STORAGE_DIR).filter(|d| !d.is_empty()) {
            config.storage_dir = Some(PathBuf::from(dir));
        }

        config
    }
}
