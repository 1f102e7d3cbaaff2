//! WiFi configuration data structures.
//!
//! This module contains platform-independent types for station and soft-AP
//! configuration that can be tested on the host machine. Fields arrive one at
//! a time from the provisioning peer, so every setter validates its own field
//! and leaves the rest of the structure untouched on failure.
//!
//! # Example
//!
//! ```
//! use blufi_provisioner::config::{StationCredentials, SoftApConfig};
//!
//! let mut sta = StationCredentials::default();
//! sta.set_ssid(b"MyNetwork").unwrap();
//! sta.set_password(b"MyPassword").unwrap();
//! assert_eq!(sta.ssid_str(), "MyNetwork");
//!
//! let mut ap = SoftApConfig::default();
//! assert!(ap.set_max_connections(5).is_err());
//! ```

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Length of a BSSID (MAC address).
pub const BSSID_LEN: usize = 6;

/// Maximum number of stations the soft-AP accepts.
pub const MAX_AP_CONNECTIONS: u8 = 4;

/// Lowest valid soft-AP channel.
pub const MIN_AP_CHANNEL: u8 = 1;

/// Highest valid soft-AP channel.
pub const MAX_AP_CHANNEL: u8 = 13;

/// A 6-byte access point hardware address.
pub type Bssid = [u8; BSSID_LEN];

/// Format a BSSID as colon-separated hex.
pub fn format_bssid(bssid: &Bssid) -> String {
    bssid
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// WiFi operating mode, numbered as the network stack numbers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(not(target_os = "espidf"), derive(serde::Serialize))]
pub enum WifiMode {
    /// Radio off.
    Null,
    /// Station (client) only.
    #[default]
    Sta,
    /// Soft access point only.
    Ap,
    /// Station and soft access point at once.
    ApSta,
}

impl WifiMode {
    /// Decode a wire value.
    pub fn from_u8(value: u8) -> Result<Self, ConfigError> {
        match value {
            0 => Ok(Self::Null),
            1 => Ok(Self::Sta),
            2 => Ok(Self::Ap),
            3 => Ok(Self::ApSta),
            other => Err(ConfigError::InvalidMode(other)),
        }
    }

    /// Wire value of this mode.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Sta => 1,
            Self::Ap => 2,
            Self::ApSta => 3,
        }
    }

    /// Whether the station interface is active in this mode.
    pub fn has_station(self) -> bool {
        matches!(self, Self::Sta | Self::ApSta)
    }

    /// Whether the soft-AP interface is active in this mode.
    pub fn has_ap(self) -> bool {
        matches!(self, Self::Ap | Self::ApSta)
    }
}

impl std::str::FromStr for WifiMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "null" | "off" => Ok(Self::Null),
            "sta" | "station" => Ok(Self::Sta),
            "ap" | "softap" => Ok(Self::Ap),
            "apsta" | "ap-sta" => Ok(Self::ApSta),
            _ => Err(ConfigError::UnknownCommand(s.to_string())),
        }
    }
}

impl fmt::Display for WifiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Sta => "sta",
            Self::Ap => "ap",
            Self::ApSta => "apsta",
        };
        write!(f, "{}", name)
    }
}

/// Authentication mode, numbered as the network stack numbers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa2Enterprise,
    Wpa3Psk,
    Wpa2Wpa3Psk,
    WapiPsk,
}

impl AuthMode {
    /// Decode a wire value. Anything past the last known mode is rejected.
    pub fn from_u8(value: u8) -> Result<Self, ConfigError> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::Wep),
            2 => Ok(Self::WpaPsk),
            3 => Ok(Self::Wpa2Psk),
            4 => Ok(Self::WpaWpa2Psk),
            5 => Ok(Self::Wpa2Enterprise),
            6 => Ok(Self::Wpa3Psk),
            7 => Ok(Self::Wpa2Wpa3Psk),
            8 => Ok(Self::WapiPsk),
            other => Err(ConfigError::InvalidAuthMode(other)),
        }
    }

    /// Wire value of this mode.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Wep => 1,
            Self::WpaPsk => 2,
            Self::Wpa2Psk => 3,
            Self::WpaWpa2Psk => 4,
            Self::Wpa2Enterprise => 5,
            Self::Wpa3Psk => 6,
            Self::Wpa2Wpa3Psk => 7,
            Self::WapiPsk => 8,
        }
    }
}

/// Station credentials, assembled field by field from the provisioning peer.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct StationCredentials {
    ssid: Vec<u8>,
    password: Vec<u8>,
    #[zeroize(skip)]
    bssid: Option<Bssid>,
}

impl StationCredentials {
    /// Build credentials from a stored SSID and password.
    pub fn new(ssid: &[u8], password: &[u8]) -> Result<Self, ConfigError> {
        let mut creds = Self::default();
        creds.set_ssid(ssid)?;
        creds.set_password(password)?;
        Ok(creds)
    }

    /// Replace the SSID. Oversized input leaves the stored SSID unchanged.
    pub fn set_ssid(&mut self, ssid: &[u8]) -> Result<(), ConfigError> {
        check_len(ssid, MAX_SSID_LEN).map_err(|len| ConfigError::SsidTooLong {
            len,
            max: MAX_SSID_LEN,
        })?;
        check_no_nul(ssid)?;
        self.ssid = ssid.to_vec();
        Ok(())
    }

    /// Replace the password. Oversized input leaves the stored password unchanged.
    pub fn set_password(&mut self, password: &[u8]) -> Result<(), ConfigError> {
        check_len(password, MAX_PASSWORD_LEN).map_err(|len| ConfigError::PasswordTooLong {
            len,
            max: MAX_PASSWORD_LEN,
        })?;
        check_no_nul(password)?;
        self.password.zeroize();
        self.password = password.to_vec();
        Ok(())
    }

    /// Pin the access point by hardware address. Must be exactly 6 bytes.
    pub fn set_bssid(&mut self, bssid: &[u8]) -> Result<(), ConfigError> {
        let bssid: Bssid = bssid
            .try_into()
            .map_err(|_| ConfigError::InvalidBssid { len: bssid.len() })?;
        self.bssid = Some(bssid);
        Ok(())
    }

    pub fn ssid(&self) -> &[u8] {
        &self.ssid
    }

    /// SSID as text, with invalid UTF-8 replaced.
    pub fn ssid_str(&self) -> String {
        String::from_utf8_lossy(&self.ssid).into_owned()
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    pub fn bssid(&self) -> Option<Bssid> {
        self.bssid
    }

    /// Check if an SSID has been received.
    pub fn has_ssid(&self) -> bool {
        !self.ssid.is_empty()
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    /// Minimum authentication the station accepts when associating.
    pub fn auth_threshold(&self) -> AuthMode {
        if self.is_open() {
            AuthMode::Open
        } else {
            AuthMode::Wpa2Psk
        }
    }
}

impl fmt::Debug for StationCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationCredentials")
            .field("ssid", &self.ssid_str())
            .field("password_len", &self.password.len())
            .field("bssid", &self.bssid.as_ref().map(format_bssid))
            .finish()
    }
}

/// Soft access point parameters.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SoftApConfig {
    ssid: Vec<u8>,
    password: Vec<u8>,
    #[zeroize(skip)]
    max_connections: u8,
    #[zeroize(skip)]
    auth_mode: AuthMode,
    #[zeroize(skip)]
    channel: u8,
}

impl Default for SoftApConfig {
    fn default() -> Self {
        Self {
            ssid: Vec::new(),
            password: Vec::new(),
            max_connections: MAX_AP_CONNECTIONS,
            auth_mode: AuthMode::Open,
            channel: MIN_AP_CHANNEL,
        }
    }
}

impl SoftApConfig {
    pub fn set_ssid(&mut self, ssid: &[u8]) -> Result<(), ConfigError> {
        check_len(ssid, MAX_SSID_LEN).map_err(|len| ConfigError::SsidTooLong {
            len,
            max: MAX_SSID_LEN,
        })?;
        check_no_nul(ssid)?;
        self.ssid = ssid.to_vec();
        Ok(())
    }

    pub fn set_password(&mut self, password: &[u8]) -> Result<(), ConfigError> {
        check_len(password, MAX_PASSWORD_LEN).map_err(|len| ConfigError::PasswordTooLong {
            len,
            max: MAX_PASSWORD_LEN,
        })?;
        check_no_nul(password)?;
        self.password.zeroize();
        self.password = password.to_vec();
        Ok(())
    }

    /// Accepts 0 through [`MAX_AP_CONNECTIONS`].
    pub fn set_max_connections(&mut self, max: u8) -> Result<(), ConfigError> {
        if max > MAX_AP_CONNECTIONS {
            return Err(ConfigError::MaxConnectionsOutOfRange {
                value: max,
                max: MAX_AP_CONNECTIONS,
            });
        }
        self.max_connections = max;
        Ok(())
    }

    pub fn set_auth_mode(&mut self, raw: u8) -> Result<(), ConfigError> {
        self.auth_mode = AuthMode::from_u8(raw)?;
        Ok(())
    }

    /// Accepts [`MIN_AP_CHANNEL`] through [`MAX_AP_CHANNEL`].
    pub fn set_channel(&mut self, channel: u8) -> Result<(), ConfigError> {
        if !(MIN_AP_CHANNEL..=MAX_AP_CHANNEL).contains(&channel) {
            return Err(ConfigError::ChannelOutOfRange { value: channel });
        }
        self.channel = channel;
        Ok(())
    }

    pub fn ssid(&self) -> &[u8] {
        &self.ssid
    }

    pub fn ssid_str(&self) -> String {
        String::from_utf8_lossy(&self.ssid).into_owned()
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    pub fn max_connections(&self) -> u8 {
        self.max_connections
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl fmt::Debug for SoftApConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftApConfig")
            .field("ssid", &self.ssid_str())
            .field("password_len", &self.password.len())
            .field("max_connections", &self.max_connections)
            .field("auth_mode", &self.auth_mode)
            .field("channel", &self.channel)
            .finish()
    }
}

/// Returns the offending length when `data` exceeds `max`.
fn check_len(data: &[u8], max: usize) -> Result<(), usize> {
    if data.len() > max {
        Err(data.len())
    } else {
        Ok(())
    }
}

/// Stored fields are NUL-terminated, so a NUL inside the value would truncate it.
fn check_no_nul(data: &[u8]) -> Result<(), ConfigError> {
    if data.contains(&0) {
        return Err(ConfigError::InvalidFormat("embedded NUL byte".into()));
    }
    Ok(())
}

/// Errors that can occur during configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// BSSID is not exactly six bytes.
    InvalidBssid { len: usize },
    /// Soft-AP station limit out of range.
    MaxConnectionsOutOfRange { value: u8, max: u8 },
    /// Soft-AP channel out of range.
    ChannelOutOfRange { value: u8 },
    /// Unknown authentication mode value.
    InvalidAuthMode(u8),
    /// Unknown WiFi mode value.
    InvalidMode(u8),
    /// Invalid data format during decoding.
    InvalidFormat(String),
    /// Unknown command string.
    UnknownCommand(String),
}

impl ConfigError {
    /// Oversized or malformed fields, as opposed to out-of-range numbers.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::SsidTooLong { .. }
                | Self::PasswordTooLong { .. }
                | Self::InvalidBssid { .. }
                | Self::InvalidFormat(_)
        )
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::InvalidBssid { len } => write!(f, "BSSID must be 6 bytes, got {}", len),
            Self::MaxConnectionsOutOfRange { value, max } => {
                write!(f, "max connections {} out of range (max {})", value, max)
            }
            Self::ChannelOutOfRange { value } => write!(
                f,
                "channel {} out of range ({}-{})",
                value, MIN_AP_CHANNEL, MAX_AP_CHANNEL
            ),
            Self::InvalidAuthMode(v) => write!(f, "invalid auth mode: {}", v),
            Self::InvalidMode(v) => write!(f, "invalid WiFi mode: {}", v),
            Self::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
            Self::UnknownCommand(cmd) => write!(f, "unknown command: {}", cmd),
        }
    }
}

impl std::error::Error for ConfigError {}
