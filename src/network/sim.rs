//! Simulated Wi-Fi driver for host runs.
//!
//! Behaves like the real driver from the coordinator's point of view:
//! commands return immediately and outcomes arrive as events through the
//! mailbox. Access points are a fixed list given at construction.

use super::{NetworkError, NetworkEvent, NetworkStack, ScanRecord};
use crate::config::{AuthMode, Bssid, SoftApConfig, StationCredentials, WifiMode};
use crate::event::EventSender;
use log::debug;

/// Disconnect reason: no AP with the requested SSID.
const REASON_NO_AP_FOUND: u8 = 201;

/// Disconnect reason: handshake failed, usually a wrong password.
const REASON_HANDSHAKE_TIMEOUT: u8 = 15;

/// Disconnect reason: station left on request.
const REASON_ASSOC_LEAVE: u8 = 8;

/// An access point the simulated radio can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimAccessPoint {
    pub ssid: Vec<u8>,
    pub password: Vec<u8>,
    pub bssid: Bssid,
    pub rssi: i8,
    pub channel: u8,
}

impl SimAccessPoint {
    pub fn new(ssid: &str, password: &str, rssi: i8) -> Self {
        let mut bssid = [0x02, 0, 0, 0, 0, 0];
        for (i, b) in ssid.bytes().enumerate() {
            bssid[1 + i % 5] ^= b;
        }
        Self {
            ssid: ssid.as_bytes().to_vec(),
            password: password.as_bytes().to_vec(),
            bssid,
            rssi,
            channel: 6,
        }
    }

    fn auth_mode(&self) -> AuthMode {
        if self.password.is_empty() {
            AuthMode::Open
        } else {
            AuthMode::Wpa2Psk
        }
    }
}

/// Network stack driven by a list of simulated access points.
pub struct SimulatedNetwork {
    events: EventSender,
    networks: Vec<SimAccessPoint>,
    mode: WifiMode,
    station: StationCredentials,
    soft_ap: SoftApConfig,
    associated: bool,
    scan_results: Vec<ScanRecord>,
    ap_clients: usize,
}

impl SimulatedNetwork {
    pub fn new(events: EventSender, networks: Vec<SimAccessPoint>) -> Self {
        Self {
            events,
            networks,
            mode: WifiMode::Null,
            station: StationCredentials::default(),
            soft_ap: SoftApConfig::default(),
            associated: false,
            scan_results: Vec::new(),
            ap_clients: 0,
        }
    }

    /// Soft-AP configuration last applied.
    pub fn soft_ap(&self) -> &SoftApConfig {
        &self.soft_ap
    }

    /// Let a client join the soft-AP. Refused outside AP modes or when the
    /// soft-AP is full.
    pub fn join_client(&mut self, mac: Bssid) -> bool {
        if !self.mode.has_ap() || self.ap_clients >= usize::from(self.soft_ap.max_connections()) {
            return false;
        }
        self.ap_clients += 1;
        let aid = u8::try_from(self.ap_clients).unwrap_or(u8::MAX);
        self.events.post(NetworkEvent::ApStationJoined { mac, aid });
        true
    }

    pub fn leave_client(&mut self, mac: Bssid) {
        if self.ap_clients > 0 {
            let aid = u8::try_from(self.ap_clients).unwrap_or(u8::MAX);
            self.ap_clients -= 1;
            self.events.post(NetworkEvent::ApStationLeft { mac, aid });
        }
    }

    fn find_network(&self) -> Option<&SimAccessPoint> {
        self.networks.iter().find(|ap| {
            ap.ssid == self.station.ssid()
                && self.station.bssid().map_or(true, |bssid| bssid == ap.bssid)
        })
    }
}

impl NetworkStack for SimulatedNetwork {
    fn set_mode(&mut self, mode: WifiMode) -> Result<(), NetworkError> {
        let previous = self.mode;
        self.mode = mode;
        if mode.has_station() && !previous.has_station() {
            self.events.post(NetworkEvent::StaStarted);
        }
        if mode.has_ap() && !previous.has_ap() {
            self.events.post(NetworkEvent::ApStarted);
        }
        if !mode.has_station() && self.associated {
            self.associated = false;
            self.events.post(NetworkEvent::StaDisconnected {
                rssi: 0,
                reason: REASON_ASSOC_LEAVE,
            });
        }
        Ok(())
    }

    fn mode(&self) -> Result<WifiMode, NetworkError> {
        Ok(self.mode)
    }

    fn set_station_config(&mut self, creds: &StationCredentials) -> Result<(), NetworkError> {
        self.station = creds.clone();
        Ok(())
    }

    fn set_ap_config(&mut self, config: &SoftApConfig) -> Result<(), NetworkError> {
        self.soft_ap = config.clone();
        Ok(())
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        if !self.mode.has_station() {
            return Err(NetworkError::WrongMode(self.mode));
        }
        if !self.station.has_ssid() {
            return Err(NetworkError::InvalidConfig("no SSID configured".into()));
        }

        let outcome = match self.find_network() {
            None => Err((-128, REASON_NO_AP_FOUND)),
            Some(ap) if ap.password != self.station.password() => {
                Err((ap.rssi, REASON_HANDSHAKE_TIMEOUT))
            }
            Some(ap) => Ok(NetworkEvent::StaConnected {
                bssid: ap.bssid,
                ssid: ap.ssid.clone(),
                channel: ap.channel,
                auth_mode: ap.auth_mode(),
            }),
        };

        match outcome {
            Ok(connected) => {
                debug!("Simulated association with {}", self.station.ssid_str());
                self.associated = true;
                self.events.post(connected);
                self.events.post(NetworkEvent::GotIp);
            }
            Err((rssi, reason)) => {
                debug!("Simulated association failed, reason {}", reason);
                self.events
                    .post(NetworkEvent::StaDisconnected { rssi, reason });
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        if self.associated {
            self.associated = false;
            let rssi = self.find_network().map_or(0, |ap| ap.rssi);
            self.events.post(NetworkEvent::StaDisconnected {
                rssi,
                reason: REASON_ASSOC_LEAVE,
            });
        }
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), NetworkError> {
        if !self.mode.has_station() {
            return Err(NetworkError::WrongMode(self.mode));
        }
        self.scan_results = self
            .networks
            .iter()
            .map(|ap| ScanRecord {
                ssid: ap.ssid.clone(),
                rssi: ap.rssi,
            })
            .collect();
        let count = u16::try_from(self.scan_results.len()).unwrap_or(u16::MAX);
        self.events.post(NetworkEvent::ScanDone { count });
        Ok(())
    }

    fn take_scan_results(&mut self) -> Result<Vec<ScanRecord>, NetworkError> {
        Ok(std::mem::take(&mut self.scan_results))
    }

    fn ap_station_count(&self) -> usize {
        if self.mode.has_ap() {
            self.ap_clients
        } else {
            0
        }
    }
}
