//! Provisioning transport session.
//!
//! The transport is the short-range control channel between the device and
//! the companion app. The coordinator only sees decoded [`ProvisioningCommand`]s
//! coming in and calls [`TransportSession`] primitives going out.
//!
//! # Components
//!
//! - [`frame`] - Compact byte encoding for commands and reports
//! - [`fragment`] - Splits report frames to the notification size
//! - [`ble`] - esp32-nimble GATT adapter (ESP32 only)
//! - [`console`] - JSON-lines adapter for host simulation (host only)

pub mod fragment;
pub mod frame;

#[cfg(feature = "esp32")]
mod ble;
#[cfg(not(target_os = "espidf"))]
mod console;

#[cfg(feature = "esp32")]
pub use ble::BleTransport;
#[cfg(not(target_os = "espidf"))]
pub use console::ConsoleTransport;

use crate::config::{Bssid, WifiMode};
use std::fmt;

/// Report error codes, numbered as the BluFi profile numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    SequenceError,
    ChecksumError,
    DecryptError,
    EncryptError,
    InitSecurityError,
    DhMallocError,
    DhParamError,
    ReadParamError,
    MakePublicError,
    /// A field was oversized, malformed or out of range.
    DataFormatError,
    CalcMd5Error,
    /// Scan could not be started.
    WifiScanFail,
    MsgStateError,
    /// Any code this firmware does not name, carried verbatim.
    Other(u8),
}

impl ErrorCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::SequenceError,
            1 => Self::ChecksumError,
            2 => Self::DecryptError,
            3 => Self::EncryptError,
            4 => Self::InitSecurityError,
            5 => Self::DhMallocError,
            6 => Self::DhParamError,
            7 => Self::ReadParamError,
            8 => Self::MakePublicError,
            9 => Self::DataFormatError,
            10 => Self::CalcMd5Error,
            11 => Self::WifiScanFail,
            12 => Self::MsgStateError,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::SequenceError => 0,
            Self::ChecksumError => 1,
            Self::DecryptError => 2,
            Self::EncryptError => 3,
            Self::InitSecurityError => 4,
            Self::DhMallocError => 5,
            Self::DhParamError => 6,
            Self::ReadParamError => 7,
            Self::MakePublicError => 8,
            Self::DataFormatError => 9,
            Self::CalcMd5Error => 10,
            Self::WifiScanFail => 11,
            Self::MsgStateError => 12,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "error code {}", code),
            named => write!(f, "{:?} ({})", named, named.as_u8()),
        }
    }
}

/// Station connection result carried by a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(not(target_os = "espidf"), derive(serde::Serialize))]
pub enum ConnectionResult {
    /// Associated and holding an IP.
    ConnSuccess,
    /// Associated, no IP yet.
    NoIp,
    /// Association in progress.
    Connecting,
    /// Not associated and not trying.
    ConnFail,
}

impl ConnectionResult {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::ConnSuccess => 0,
            Self::ConnFail => 1,
            Self::Connecting => 2,
            Self::NoIp => 3,
        }
    }
}

/// Optional details attached to a status report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraInfo {
    pub bssid: Option<Bssid>,
    pub ssid: Option<Vec<u8>>,
    pub rssi: Option<i8>,
    /// Retry ceiling in force (set while connecting and after exhaustion).
    pub max_retry: Option<u8>,
    pub disconnect_reason: Option<u8>,
}

impl ExtraInfo {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Station status sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub mode: WifiMode,
    pub result: ConnectionResult,
    /// Stations currently joined to the soft-AP.
    pub station_count: u8,
    pub extra: ExtraInfo,
}

/// One scanned access point, as sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApRecord {
    pub ssid: Vec<u8>,
    pub rssi: i8,
}

/// Certificate and key material the peer may push. None of it is supported yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateKind {
    CaCert,
    ClientCert,
    ServerCert,
    ClientPrivateKey,
    ServerPrivateKey,
}

/// A decoded request from the provisioning peer.
#[derive(Clone, PartialEq, Eq)]
pub enum ProvisioningCommand {
    SetWifiMode(WifiMode),
    SetStationBssid(Vec<u8>),
    SetStationSsid(Vec<u8>),
    SetStationPassword(Vec<u8>),
    SetSoftApSsid(Vec<u8>),
    SetSoftApPassword(Vec<u8>),
    SetSoftApMaxConnections(u8),
    SetSoftApAuthMode(u8),
    SetSoftApChannel(u8),
    RequestConnect,
    RequestDisconnect,
    RequestWifiStatus,
    RequestWifiList,
    /// Error raised by an upstream layer, forwarded to the peer.
    ReportError(ErrorCode),
    CustomData(Vec<u8>),
    Deauthenticate,
    /// Peer asks the device to drop the transport connection.
    CloseTransport,
    Username(Vec<u8>),
    Certificate(CertificateKind, Vec<u8>),
}

impl ProvisioningCommand {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetWifiMode(_) => "set_wifi_mode",
            Self::SetStationBssid(_) => "set_sta_bssid",
            Self::SetStationSsid(_) => "set_sta_ssid",
            Self::SetStationPassword(_) => "set_sta_password",
            Self::SetSoftApSsid(_) => "set_softap_ssid",
            Self::SetSoftApPassword(_) => "set_softap_password",
            Self::SetSoftApMaxConnections(_) => "set_softap_max_conn",
            Self::SetSoftApAuthMode(_) => "set_softap_auth_mode",
            Self::SetSoftApChannel(_) => "set_softap_channel",
            Self::RequestConnect => "connect",
            Self::RequestDisconnect => "disconnect",
            Self::RequestWifiStatus => "get_wifi_status",
            Self::RequestWifiList => "get_wifi_list",
            Self::ReportError(_) => "report_error",
            Self::CustomData(_) => "custom_data",
            Self::Deauthenticate => "deauthenticate",
            Self::CloseTransport => "close_transport",
            Self::Username(_) => "username",
            Self::Certificate(..) => "certificate",
        }
    }
}

// Manual Debug keeps passwords and key material out of logs.
impl fmt::Debug for ProvisioningCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetStationPassword(p) | Self::SetSoftApPassword(p) => {
                write!(f, "{}(<{} bytes>)", self.name(), p.len())
            }
            Self::Certificate(kind, data) => {
                write!(f, "certificate({:?}, <{} bytes>)", kind, data.len())
            }
            Self::SetStationSsid(s) | Self::SetSoftApSsid(s) | Self::Username(s) => {
                write!(f, "{}({:?})", self.name(), String::from_utf8_lossy(s))
            }
            Self::SetStationBssid(b) => write!(f, "{}({:02x?})", self.name(), b),
            Self::CustomData(d) => write!(f, "custom_data(<{} bytes>)", d.len()),
            Self::SetWifiMode(m) => write!(f, "set_wifi_mode({})", m),
            Self::SetSoftApMaxConnections(v)
            | Self::SetSoftApAuthMode(v)
            | Self::SetSoftApChannel(v) => write!(f, "{}({})", self.name(), v),
            Self::ReportError(code) => write!(f, "report_error({})", code),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Events produced by the transport stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Stack initialised, ready to advertise.
    InitFinished,
    /// Stack torn down.
    DeinitFinished,
    /// A peer connected.
    Connected,
    /// The peer disconnected.
    Disconnected,
    /// A decoded request from the peer.
    Command(ProvisioningCommand),
}

/// Outbound primitives of the transport stack.
///
/// All calls are fire-and-forget: an `Err` means the stack refused the
/// request, not that the peer failed to receive it.
pub trait TransportSession: Send {
    fn start_advertising(&mut self) -> Result<(), TransportError>;
    fn stop_advertising(&mut self) -> Result<(), TransportError>;
    /// Drop the current peer connection.
    fn disconnect(&mut self) -> Result<(), TransportError>;
    fn send_status_report(&mut self, report: &StatusReport) -> Result<(), TransportError>;
    fn send_error_report(&mut self, code: ErrorCode) -> Result<(), TransportError>;
    fn send_custom_data(&mut self, data: &[u8]) -> Result<(), TransportError>;
    fn send_ap_list(&mut self, entries: &[ApRecord]) -> Result<(), TransportError>;
}

/// Transport errors.
#[derive(Debug)]
pub enum TransportError {
    /// No peer is connected.
    NotConnected,
    /// Payload does not fit in one report.
    PayloadTooLarge { len: usize, max: usize },
    /// Frame could not be decoded.
    Malformed(String),
    /// Host output failed.
    Io(std::io::Error),
    /// BLE stack error.
    #[cfg(feature = "esp32")]
    Ble(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no peer connected"),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload too large: {} bytes (max {})", len, max)
            }
            Self::Malformed(msg) => write!(f, "malformed frame: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            #[cfg(feature = "esp32")]
            Self::Ble(msg) => write!(f, "BLE error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_values() {
        assert_eq!(ErrorCode::DataFormatError.as_u8(), 9);
        assert_eq!(ErrorCode::WifiScanFail.as_u8(), 11);
        assert_eq!(ErrorCode::from_u8(9), ErrorCode::DataFormatError);
        assert_eq!(ErrorCode::from_u8(200), ErrorCode::Other(200));
        assert_eq!(ErrorCode::Other(200).as_u8(), 200);
    }

    #[test]
    fn test_command_debug_hides_password() {
        let cmd = ProvisioningCommand::SetStationPassword(b"hunter22".to_vec());
        let debug = format!("{:?}", cmd);
        assert_eq!(debug, "set_sta_password(<8 bytes>)");
    }

    #[test]
    fn test_command_debug_shows_ssid() {
        let cmd = ProvisioningCommand::SetStationSsid(b"Home".to_vec());
        assert_eq!(format!("{:?}", cmd), "set_sta_ssid(\"Home\")");
    }

    #[test]
    fn test_extra_info_empty() {
        assert!(ExtraInfo::default().is_empty());
        let info = ExtraInfo {
            max_retry: Some(10),
            ..Default::default()
        };
        assert!(!info.is_empty());
    }
}
