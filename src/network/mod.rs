//! Network stack abstraction and session management.
//!
//! The [`NetworkStack`] trait is the command side of the Wi-Fi driver:
//! every call only *starts* an operation, and results come back later as
//! [`NetworkEvent`]s through the coordinator's mailbox.
//!
//! # Components
//!
//! - [`NetworkSession`] - Mode, association state, retry policy and scans
//! - [`EspWifiStack`] - ESP-IDF driver adapter (ESP32 only)
//! - [`SimulatedNetwork`] - Scriptable stack for host runs (host only)

mod session;

#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(target_os = "espidf"))]
mod sim;

#[cfg(feature = "esp32")]
pub use esp::{subscribe_events, EspWifiStack, EventSubscription};
pub use session::{ConnectionInfo, NetworkSession, SessionNotice, INVALID_REASON, INVALID_RSSI};
#[cfg(not(target_os = "espidf"))]
pub use sim::{SimAccessPoint, SimulatedNetwork};

use crate::config::{AuthMode, Bssid, SoftApConfig, StationCredentials, WifiMode};
use std::fmt;

/// One access point seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ssid: Vec<u8>,
    pub rssi: i8,
}

/// Events raised by the network stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Station interface started.
    StaStarted,
    /// Station associated with an access point.
    StaConnected {
        bssid: Bssid,
        ssid: Vec<u8>,
        channel: u8,
        auth_mode: AuthMode,
    },
    /// Station lost (or failed to get) its association.
    StaDisconnected { rssi: i8, reason: u8 },
    /// Soft-AP interface started.
    ApStarted,
    /// A client joined the soft-AP.
    ApStationJoined { mac: Bssid, aid: u8 },
    /// A client left the soft-AP.
    ApStationLeft { mac: Bssid, aid: u8 },
    /// Scan finished with `count` results ready to collect.
    ScanDone { count: u16 },
    /// Station obtained an IP address.
    GotIp,
}

/// Command side of the Wi-Fi driver.
pub trait NetworkStack: Send {
    fn set_mode(&mut self, mode: WifiMode) -> Result<(), NetworkError>;
    fn mode(&self) -> Result<WifiMode, NetworkError>;
    fn set_station_config(&mut self, creds: &StationCredentials) -> Result<(), NetworkError>;
    fn set_ap_config(&mut self, config: &SoftApConfig) -> Result<(), NetworkError>;
    /// Start associating; completion arrives as `StaConnected` or `StaDisconnected`.
    fn connect(&mut self) -> Result<(), NetworkError>;
    fn disconnect(&mut self) -> Result<(), NetworkError>;
    /// Start a scan; completion arrives as `ScanDone`.
    fn start_scan(&mut self) -> Result<(), NetworkError>;
    /// Collect the results of the last finished scan. Results are handed out once.
    fn take_scan_results(&mut self) -> Result<Vec<ScanRecord>, NetworkError>;
    /// Clients currently joined to the soft-AP.
    fn ap_station_count(&self) -> usize;
}

/// Errors from the network stack.
#[derive(Debug)]
pub enum NetworkError {
    /// Driver refused the request.
    Rejected(String),
    /// Operation needs a mode that is not active.
    WrongMode(WifiMode),
    /// Configuration could not be expressed in driver types.
    InvalidConfig(String),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "request rejected: {}", msg),
            Self::WrongMode(mode) => write!(f, "not available in mode {}", mode),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for NetworkError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}
