//! Station/soft-AP session state and reconnect policy.

use super::{NetworkError, NetworkEvent, NetworkStack, ScanRecord};
use crate::config::{format_bssid, Bssid, SoftApConfig, StationCredentials, WifiMode};
use crate::storage::{CredentialStore, ProvisioningStore};
use crate::transport::{ConnectionResult, ExtraInfo, StatusReport};
use log::{debug, error, info, warn};

/// RSSI recorded when no real measurement exists.
pub const INVALID_RSSI: i8 = -128;

/// Disconnect reason recorded when no real reason exists.
pub const INVALID_REASON: u8 = 255;

/// Snapshot of the station connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub associated_bssid: Option<Bssid>,
    pub associated_ssid: Option<Vec<u8>>,
    pub station_connected: bool,
    pub ip_acquired: bool,
    pub is_connecting: bool,
    pub last_rssi: Option<i8>,
    pub last_disconnect_reason: Option<u8>,
    pub retry_budget_exhausted: bool,
}

impl ConnectionInfo {
    /// Result code for a status report.
    ///
    /// IP acquired beats associated, which beats connecting.
    pub fn result(&self) -> ConnectionResult {
        if self.station_connected && self.ip_acquired {
            ConnectionResult::ConnSuccess
        } else if self.station_connected {
            ConnectionResult::NoIp
        } else if self.is_connecting {
            ConnectionResult::Connecting
        } else {
            ConnectionResult::ConnFail
        }
    }
}

/// What the coordinator should do after a network event.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionNotice {
    /// Nothing to tell the peer.
    Quiet,
    /// Station or soft-AP status changed; the peer may want a status report.
    StatusChanged,
    /// Scan finished with these results (possibly none).
    ScanComplete(Vec<ScanRecord>),
    /// Scan finished but the results could not be collected.
    ScanFailed,
}

/// Owns the network stack plus everything known about the current association.
pub struct NetworkSession<N> {
    stack: N,
    mode: WifiMode,
    station: StationCredentials,
    soft_ap: SoftApConfig,
    max_retry: u8,
    retry: u8,
    sta_connected: bool,
    got_ip: bool,
    is_connecting: bool,
    retry_exhausted: bool,
    bssid: Option<Bssid>,
    ssid: Option<Vec<u8>>,
    // Failure details kept for the next status report.
    report_rssi: Option<i8>,
    report_reason: Option<u8>,
    report_max_retry: bool,
}

impl<N: NetworkStack> NetworkSession<N> {
    /// Wrap a stack. `max_retry` is the reconnect ceiling while connecting.
    pub fn new(stack: N, max_retry: u8) -> Self {
        let mode = stack.mode().unwrap_or_default();
        Self {
            stack,
            mode,
            station: StationCredentials::default(),
            soft_ap: SoftApConfig::default(),
            max_retry,
            retry: 0,
            sta_connected: false,
            got_ip: false,
            is_connecting: false,
            retry_exhausted: false,
            bssid: None,
            ssid: None,
            report_rssi: None,
            report_reason: None,
            report_max_retry: false,
        }
    }

    pub fn stack(&self) -> &N {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut N {
        &mut self.stack
    }

    pub fn mode(&self) -> WifiMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: WifiMode) -> Result<(), NetworkError> {
        self.stack.set_mode(mode)?;
        self.mode = mode;
        info!("WiFi mode set to {}", mode);
        Ok(())
    }

    /// Station credentials as last accepted.
    pub fn station(&self) -> &StationCredentials {
        &self.station
    }

    pub fn soft_ap(&self) -> &SoftApConfig {
        &self.soft_ap
    }

    /// Adopt new station credentials and push them to the stack.
    ///
    /// The credentials are kept even if the stack rejects them.
    pub fn apply_station(&mut self, creds: StationCredentials) -> Result<(), NetworkError> {
        self.station = creds;
        debug!("Applying station config {:?}", self.station);
        self.stack.set_station_config(&self.station)
    }

    /// Adopt a new soft-AP configuration and push it to the stack.
    pub fn apply_soft_ap(&mut self, config: SoftApConfig) -> Result<(), NetworkError> {
        self.soft_ap = config;
        debug!("Applying soft-AP config {:?}", self.soft_ap);
        self.stack.set_ap_config(&self.soft_ap)
    }

    /// Start associating with a fresh retry budget.
    pub fn connect(&mut self) -> Result<(), NetworkError> {
        self.retry = 0;
        self.retry_exhausted = false;
        let result = self.stack.connect();
        self.is_connecting = result.is_ok();
        self.record_conn_info(INVALID_RSSI, INVALID_REASON);
        if self.is_connecting {
            info!("Connecting to {}", self.station.ssid_str());
        }
        result
    }

    /// Drop any association, then connect again.
    pub fn request_connect(&mut self) -> Result<(), NetworkError> {
        if let Err(e) = self.stack.disconnect() {
            debug!("Disconnect before connect failed: {}", e);
        }
        self.connect()
    }

    /// Drop the association without retrying.
    pub fn disconnect(&mut self) -> Result<(), NetworkError> {
        self.is_connecting = false;
        self.stack.disconnect()
    }

    pub fn start_scan(&mut self) -> Result<(), NetworkError> {
        self.stack.start_scan()
    }

    /// Whether the station currently holds an IP address.
    pub fn is_station_online(&self) -> bool {
        self.got_ip
    }

    pub fn ap_station_count(&self) -> usize {
        self.stack.ap_station_count()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            associated_bssid: self.bssid,
            associated_ssid: self.ssid.clone(),
            station_connected: self.sta_connected,
            ip_acquired: self.got_ip,
            is_connecting: self.is_connecting,
            last_rssi: self.report_rssi,
            last_disconnect_reason: self.report_reason,
            retry_budget_exhausted: self.retry_exhausted,
        }
    }

    /// Build the status report the peer sees.
    pub fn status_report(&self) -> StatusReport {
        let info = self.connection_info();
        let extra = if self.sta_connected {
            ExtraInfo {
                bssid: self.bssid,
                ssid: self.ssid.clone(),
                ..Default::default()
            }
        } else {
            ExtraInfo {
                rssi: self.report_rssi,
                max_retry: self.report_max_retry.then_some(self.max_retry),
                disconnect_reason: self.report_reason,
                ..Default::default()
            }
        };
        StatusReport {
            mode: self.mode,
            result: info.result(),
            station_count: u8::try_from(self.ap_station_count()).unwrap_or(u8::MAX),
            extra,
        }
    }

    /// Apply a network event.
    ///
    /// `GotIp` is the only place `has_config` is written.
    pub fn handle_event<S: CredentialStore>(
        &mut self,
        event: NetworkEvent,
        records: &mut ProvisioningStore<S>,
    ) -> SessionNotice {
        match event {
            NetworkEvent::StaStarted => {
                if self.is_connecting {
                    debug!("Station started, connect already in progress");
                } else if self.station.has_ssid() {
                    if let Err(e) = self.connect() {
                        error!("Connect after station start failed: {}", e);
                    }
                } else {
                    debug!("Station started without credentials");
                }
                SessionNotice::Quiet
            }
            NetworkEvent::StaConnected {
                bssid,
                ssid,
                channel,
                auth_mode,
            } => {
                info!(
                    "Connected to {} ({}), channel {}, auth {:?}",
                    String::from_utf8_lossy(&ssid),
                    format_bssid(&bssid),
                    channel,
                    auth_mode
                );
                self.sta_connected = true;
                self.is_connecting = false;
                self.bssid = Some(bssid);
                self.ssid = Some(ssid);
                SessionNotice::Quiet
            }
            NetworkEvent::StaDisconnected { rssi, reason } => {
                self.on_disconnected(rssi, reason);
                SessionNotice::Quiet
            }
            NetworkEvent::GotIp => {
                self.got_ip = true;
                info!("Station got IP");
                if let Err(e) = records.write_has_config(true) {
                    error!("Failed to store has_config: {}", e);
                }
                SessionNotice::StatusChanged
            }
            NetworkEvent::ApStarted => {
                info!("Soft-AP started");
                SessionNotice::StatusChanged
            }
            NetworkEvent::ApStationJoined { mac, aid } => {
                info!("Station {} joined soft-AP, AID={}", format_bssid(&mac), aid);
                SessionNotice::Quiet
            }
            NetworkEvent::ApStationLeft { mac, aid } => {
                info!("Station {} left soft-AP, AID={}", format_bssid(&mac), aid);
                SessionNotice::Quiet
            }
            NetworkEvent::ScanDone { count } => match self.stack.take_scan_results() {
                Ok(records) => {
                    info!("Scan done: {} reported, {} collected", count, records.len());
                    SessionNotice::ScanComplete(records)
                }
                Err(e) => {
                    error!("Failed to collect scan results: {}", e);
                    SessionNotice::ScanFailed
                }
            },
        }
    }

    fn on_disconnected(&mut self, rssi: i8, reason: u8) {
        if self.sta_connected {
            info!("Disconnected from AP (rssi {}, reason {})", rssi, reason);
            self.record_conn_info(rssi, reason);
        } else if self.is_connecting && self.retry < self.max_retry {
            self.retry += 1;
            info!("Connection attempt failed, retry {}/{}", self.retry, self.max_retry);
            match self.stack.connect() {
                Ok(()) => self.is_connecting = true,
                Err(e) => {
                    error!("Reconnect failed: {}", e);
                    self.is_connecting = false;
                }
            }
            self.record_conn_info(INVALID_RSSI, INVALID_REASON);
        } else {
            if self.is_connecting {
                warn!(
                    "Giving up after {} retries (rssi {}, reason {})",
                    self.max_retry, rssi, reason
                );
                self.retry_exhausted = true;
            }
            self.is_connecting = false;
            self.record_conn_info(rssi, reason);
        }

        self.sta_connected = false;
        self.got_ip = false;
        self.bssid = None;
        self.ssid = None;
    }

    // While connecting only the retry ceiling is worth reporting; otherwise
    // the last RSSI and reason explain why the station is down.
    fn record_conn_info(&mut self, rssi: i8, reason: u8) {
        if self.is_connecting {
            self.report_max_retry = true;
            self.report_rssi = None;
            self.report_reason = None;
        } else {
            self.report_max_retry = self.retry_exhausted;
            self.report_rssi = Some(rssi);
            self.report_reason = Some(reason);
        }
    }
}
