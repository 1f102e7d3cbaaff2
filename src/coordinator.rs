//! Provisioning coordinator.
//!
//! The central state machine. Transport events and network events both end
//! up in [`Coordinator::handle_event`], which validates peer input, applies
//! it to the network session, persists what must survive a reboot and
//! answers the peer.
//!
//! # States
//!
//! ```text
//! Idle --init--> Advertising --peer connects--> AwaitingCredentials
//!                    ^                              | SSID accepted
//!                    |                              v
//!                    +------peer disconnects---- TransportConnected
//! ```
//!
//! `AwaitingCredentials` and `TransportConnected` both mean a peer is
//! attached; the first is used until a station SSID is known.
//!
//! All state and all collaborators sit behind one mutex, so events from the
//! BLE task and the WiFi driver task are applied one at a time.

use crate::config::{ConfigError, ProvisionerConfig, RangeErrorPolicy, WifiMode};
use crate::event::{Event, EventReceiver};
use crate::network::{
    ConnectionInfo, NetworkError, NetworkEvent, NetworkSession, NetworkStack, SessionNotice,
};
use crate::storage::{CredentialStore, ProvisioningStore, StoreError};
use crate::transport::{
    ApRecord, ErrorCode, ProvisioningCommand, TransportError, TransportEvent, TransportSession,
};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Custom data prefix carrying a firmware update URL.
pub const OTA_PREFIX: &[u8] = b"AT+OTA=";

/// Length of a code pushed with [`Coordinator::send_code`].
pub const CODE_LEN: usize = 6;

/// Transport-side provisioning state. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningState {
    #[default]
    Idle,
    Advertising,
    TransportConnected,
    AwaitingCredentials,
}

impl ProvisioningState {
    /// Whether a peer is attached.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::TransportConnected | Self::AwaitingCredentials)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Advertising => "advertising",
            Self::TransportConnected => "connected",
            Self::AwaitingCredentials => "awaiting credentials",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of an event the coordinator could not fully apply.
#[derive(Debug)]
pub enum ProvisioningError {
    /// Peer sent an invalid field. Already reported to the peer if policy says so.
    Config(ConfigError),
    /// Persisting a field failed; in-memory state is unchanged.
    Storage(StoreError),
    /// Network stack refused a request.
    Network(NetworkError),
    /// Transport stack refused a request.
    Transport(TransportError),
    /// Recognised command with no implementation.
    Unsupported(&'static str),
}

impl ProvisioningError {
    /// Level this outcome should be logged at.
    pub fn log_level(&self) -> log::Level {
        match self {
            Self::Config(_) | Self::Unsupported(_) => log::Level::Warn,
            Self::Storage(_) | Self::Network(_) | Self::Transport(_) => log::Level::Error,
        }
    }
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "rejected field: {}", e),
            Self::Storage(e) => write!(f, "storage failure: {}", e),
            Self::Network(e) => write!(f, "network failure: {}", e),
            Self::Transport(e) => write!(f, "transport failure: {}", e),
            Self::Unsupported(what) => write!(f, "unsupported command: {}", what),
        }
    }
}

impl std::error::Error for ProvisioningError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Network(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Unsupported(_) => None,
        }
    }
}

impl From<ConfigError> for ProvisioningError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for ProvisioningError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e)
    }
}

impl From<NetworkError> for ProvisioningError {
    fn from(e: NetworkError) -> Self {
        Self::Network(e)
    }
}

impl From<TransportError> for ProvisioningError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

struct Inner<S, N, T> {
    state: ProvisioningState,
    range_errors: RangeErrorPolicy,
    records: ProvisioningStore<S>,
    session: NetworkSession<N>,
    transport: T,
}

/// The provisioning state machine and its collaborators.
pub struct Coordinator<S, N, T> {
    inner: Mutex<Inner<S, N, T>>,
}

impl<S, N, T> Coordinator<S, N, T>
where
    S: CredentialStore,
    N: NetworkStack,
    T: TransportSession,
{
    pub fn new(store: S, stack: N, transport: T, config: &ProvisionerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ProvisioningState::Idle,
                range_errors: config.range_error_policy,
                records: ProvisioningStore::new(store),
                session: NetworkSession::new(stack, config.max_connection_retry),
                transport,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S, N, T>> {
        // A panic inside a handler must not wedge provisioning for good.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply one event. Every event source funnels through here.
    pub fn handle_event(&self, event: Event) -> Result<(), ProvisioningError> {
        let mut inner = self.lock();
        match event {
            Event::Transport(event) => inner.on_transport_event(event),
            Event::Network(event) => inner.on_network_event(event),
        }
    }

    pub fn provisioning_state(&self) -> ProvisioningState {
        self.lock().state
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.lock().session.connection_info()
    }

    /// Whether the station currently holds an IP address.
    pub fn is_station_online(&self) -> bool {
        self.lock().session.is_station_online()
    }

    /// Push a short code to the peer as custom data.
    ///
    /// Dropped with a log line when no peer is attached.
    pub fn send_code(&self, code: [u8; CODE_LEN]) -> Result<(), ProvisioningError> {
        let mut inner = self.lock();
        if !inner.state.is_connected() {
            info!("No peer connected, dropping code {:02x?}", code);
            return Ok(());
        }
        inner.transport.send_custom_data(&code)?;
        Ok(())
    }

    /// Boot path: join the network saved by an earlier provisioning run.
    ///
    /// Returns `Ok(false)` when nothing usable is stored. A connect the
    /// driver refuses before the station is up is retried on `StaStarted`.
    pub fn start_from_persisted(&self) -> Result<bool, ProvisioningError> {
        let mut inner = self.lock();
        let inner = &mut *inner;

        let Some(ssid) = inner.records.read_wifi_ssid()? else {
            info!("No stored SSID, waiting for provisioning");
            return Ok(false);
        };
        let Some(password) = inner.records.read_wifi_password()? else {
            info!("No stored password, waiting for provisioning");
            return Ok(false);
        };

        let creds = crate::config::StationCredentials::new(&ssid, &password)?;
        info!(
            "Starting with stored network {} ({:?})",
            creds.ssid_str(),
            creds.auth_threshold()
        );

        inner.session.set_mode(WifiMode::Sta)?;
        inner.session.apply_station(creds)?;
        if let Err(e) = inner.session.connect() {
            debug!("Early connect refused: {}", e);
        }
        Ok(true)
    }
}

impl<S, N, T> Inner<S, N, T>
where
    S: CredentialStore,
    N: NetworkStack,
    T: TransportSession,
{
    fn set_state(&mut self, next: ProvisioningState) {
        if self.state != next {
            debug!("Provisioning state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn connected_state(&self) -> ProvisioningState {
        if self.session.station().has_ssid() {
            ProvisioningState::TransportConnected
        } else {
            ProvisioningState::AwaitingCredentials
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Result<(), ProvisioningError> {
        match event {
            TransportEvent::InitFinished => {
                info!("Transport ready");
                self.transport.start_advertising()?;
                self.set_state(ProvisioningState::Advertising);
                Ok(())
            }
            TransportEvent::DeinitFinished => {
                info!("Transport shut down");
                self.set_state(ProvisioningState::Idle);
                Ok(())
            }
            TransportEvent::Connected => {
                info!("Peer connected");
                let next = self.connected_state();
                self.set_state(next);
                self.transport.stop_advertising()?;
                Ok(())
            }
            TransportEvent::Disconnected => {
                info!("Peer disconnected");
                match self.transport.start_advertising() {
                    Ok(()) => {
                        self.set_state(ProvisioningState::Advertising);
                        Ok(())
                    }
                    Err(e) => {
                        self.set_state(ProvisioningState::Idle);
                        Err(e.into())
                    }
                }
            }
            TransportEvent::Command(command) => {
                if !self.state.is_connected() {
                    debug!("Command {} arrived in state {}", command.name(), self.state);
                }
                debug!("Command {:?}", command);
                self.on_command(command)
            }
        }
    }

    fn on_command(&mut self, command: ProvisioningCommand) -> Result<(), ProvisioningError> {
        match command {
            ProvisioningCommand::SetWifiMode(mode) => {
                self.session.set_mode(mode)?;
                Ok(())
            }
            ProvisioningCommand::SetStationBssid(bssid) => {
                let mut next = self.session.station().clone();
                if let Err(e) = next.set_bssid(&bssid) {
                    return Err(self.reject(e));
                }
                self.session.apply_station(next)?;
                Ok(())
            }
            ProvisioningCommand::SetStationSsid(ssid) => {
                let mut next = self.session.station().clone();
                if let Err(e) = next.set_ssid(&ssid) {
                    return Err(self.reject(e));
                }
                self.records.write_wifi_ssid(&ssid).map_err(|e| {
                    error!("Failed to store SSID: {}", e);
                    e
                })?;
                info!("Station SSID set to {}", next.ssid_str());
                self.session.apply_station(next)?;
                if self.state == ProvisioningState::AwaitingCredentials {
                    self.set_state(self.connected_state());
                }
                Ok(())
            }
            ProvisioningCommand::SetStationPassword(password) => {
                let mut next = self.session.station().clone();
                if let Err(e) = next.set_password(&password) {
                    return Err(self.reject(e));
                }
                self.records.write_wifi_password(&password).map_err(|e| {
                    error!("Failed to store password: {}", e);
                    e
                })?;
                info!("Station password set ({} bytes)", password.len());
                self.session.apply_station(next)?;
                Ok(())
            }
            ProvisioningCommand::SetSoftApSsid(ssid) => {
                let mut next = self.session.soft_ap().clone();
                if let Err(e) = next.set_ssid(&ssid) {
                    return Err(self.reject(e));
                }
                self.session.apply_soft_ap(next)?;
                Ok(())
            }
            ProvisioningCommand::SetSoftApPassword(password) => {
                let mut next = self.session.soft_ap().clone();
                if let Err(e) = next.set_password(&password) {
                    return Err(self.reject(e));
                }
                self.session.apply_soft_ap(next)?;
                Ok(())
            }
            ProvisioningCommand::SetSoftApMaxConnections(max) => {
                let mut next = self.session.soft_ap().clone();
                if let Err(e) = next.set_max_connections(max) {
                    return Err(self.reject(e));
                }
                self.session.apply_soft_ap(next)?;
                Ok(())
            }
            ProvisioningCommand::SetSoftApAuthMode(raw) => {
                let mut next = self.session.soft_ap().clone();
                if let Err(e) = next.set_auth_mode(raw) {
                    return Err(self.reject(e));
                }
                self.session.apply_soft_ap(next)?;
                Ok(())
            }
            ProvisioningCommand::SetSoftApChannel(channel) => {
                let mut next = self.session.soft_ap().clone();
                if let Err(e) = next.set_channel(channel) {
                    return Err(self.reject(e));
                }
                self.session.apply_soft_ap(next)?;
                Ok(())
            }
            ProvisioningCommand::RequestConnect => {
                info!("Peer requested connect");
                self.session.request_connect()?;
                Ok(())
            }
            ProvisioningCommand::RequestDisconnect => {
                info!("Peer requested disconnect");
                self.session.disconnect()?;
                Ok(())
            }
            ProvisioningCommand::RequestWifiStatus => {
                let report = self.session.status_report();
                debug!("Status report {:?}", report);
                self.transport.send_status_report(&report)?;
                Ok(())
            }
            ProvisioningCommand::RequestWifiList => {
                if let Err(e) = self.session.start_scan() {
                    self.send_error(ErrorCode::WifiScanFail);
                    return Err(e.into());
                }
                Ok(())
            }
            ProvisioningCommand::ReportError(code) => {
                warn!("Forwarding error report: {}", code);
                self.transport.send_error_report(code)?;
                Ok(())
            }
            ProvisioningCommand::CustomData(data) => self.on_custom_data(&data),
            ProvisioningCommand::CloseTransport => {
                info!("Peer asked to close the connection");
                self.transport.disconnect()?;
                Ok(())
            }
            ProvisioningCommand::Deauthenticate
            | ProvisioningCommand::Username(_)
            | ProvisioningCommand::Certificate(..) => {
                Err(ProvisioningError::Unsupported(command.name()))
            }
        }
    }

    fn on_custom_data(&mut self, data: &[u8]) -> Result<(), ProvisioningError> {
        let Some(url) = data.strip_prefix(OTA_PREFIX) else {
            info!(
                "Custom data ({} bytes): {}",
                data.len(),
                String::from_utf8_lossy(data)
            );
            return Ok(());
        };

        let url = match std::str::from_utf8(url) {
            Ok(url) if !url.contains('\0') => url,
            _ => {
                return Err(self.reject(ConfigError::InvalidFormat(
                    "OTA URL is not a valid string".into(),
                )))
            }
        };
        info!("OTA URL received: {}", url);
        self.records.write_ota_url(url).map_err(|e| {
            error!("Failed to store OTA URL: {}", e);
            e
        })?;
        Ok(())
    }

    fn on_network_event(&mut self, event: NetworkEvent) -> Result<(), ProvisioningError> {
        let notice = self.session.handle_event(event, &mut self.records);
        let connected = self.state.is_connected();
        match notice {
            SessionNotice::Quiet => Ok(()),
            SessionNotice::StatusChanged if connected => {
                let report = self.session.status_report();
                self.transport.send_status_report(&report)?;
                Ok(())
            }
            SessionNotice::ScanComplete(records) if connected => {
                let entries: Vec<ApRecord> = records
                    .into_iter()
                    .map(|r| ApRecord {
                        ssid: r.ssid,
                        rssi: r.rssi,
                    })
                    .collect();
                self.transport.send_ap_list(&entries)?;
                Ok(())
            }
            SessionNotice::ScanFailed if connected => {
                self.transport.send_error_report(ErrorCode::WifiScanFail)?;
                Ok(())
            }
            SessionNotice::StatusChanged
            | SessionNotice::ScanComplete(_)
            | SessionNotice::ScanFailed => {
                debug!("No peer connected, not reporting");
                Ok(())
            }
        }
    }

    /// Turn a validation failure into the peer-facing report and the handler result.
    fn reject(&mut self, e: ConfigError) -> ProvisioningError {
        if e.is_format_error() || self.range_errors == RangeErrorPolicy::Report {
            self.send_error(ErrorCode::DataFormatError);
        }
        ProvisioningError::Config(e)
    }

    fn send_error(&mut self, code: ErrorCode) {
        if let Err(e) = self.transport.send_error_report(code) {
            error!("Failed to send error report {}: {}", code, e);
        }
    }
}

/// Drain the mailbox into the coordinator until cancelled or all senders drop.
pub async fn run_event_loop<S, N, T>(
    coordinator: Arc<Coordinator<S, N, T>>,
    mut events: EventReceiver,
    cancel: CancellationToken,
) where
    S: CredentialStore,
    N: NetworkStack,
    T: TransportSession,
{
    info!("Provisioning event loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Event loop cancelled");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("All event senders dropped");
                    break;
                };
                if let Err(e) = coordinator.handle_event(event) {
                    log::log!(e.log_level(), "{}", e);
                }
            }
        }
    }
    info!("Provisioning event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthMode, MAX_AP_CONNECTIONS};
    use crate::event::mailbox;
    use crate::network::ScanRecord;
    use crate::storage::{MemoryStore, KEY_OTA_URL, KEY_WIFI_PASSWORD, KEY_WIFI_SSID};
    use crate::test_support::{
        FakeStack, FakeStackHandle, FakeStore, FakeStoreHandle, FakeTransport,
        FakeTransportHandle, StackCall, TransportCall,
    };
    use crate::transport::ConnectionResult;

    type TestCoordinator = Coordinator<FakeStore, FakeStack, FakeTransport>;

    struct Harness {
        coordinator: TestCoordinator,
        store: FakeStoreHandle,
        stack: FakeStackHandle,
        transport: FakeTransportHandle,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(&ProvisionerConfig::default())
        }

        fn with_config(config: &ProvisionerConfig) -> Self {
            Self::with_store(MemoryStore::new(), config)
        }

        fn with_store(store: MemoryStore, config: &ProvisionerConfig) -> Self {
            let store = FakeStore::new(store);
            let store_handle = store.handle();
            let stack = FakeStack::new();
            let transport = FakeTransport::new();
            let stack_handle = stack.handle();
            let transport_handle = transport.handle();
            Self {
                coordinator: Coordinator::new(store, stack, transport, config),
                store: store_handle,
                stack: stack_handle,
                transport: transport_handle,
            }
        }

        /// Advertise, accept a peer, and forget the setup calls.
        fn connected() -> Self {
            let h = Self::new();
            h.transport(TransportEvent::InitFinished).unwrap();
            h.transport(TransportEvent::Connected).unwrap();
            h.stack.clear();
            h.transport.clear();
            h
        }

        fn transport(&self, event: TransportEvent) -> Result<(), ProvisioningError> {
            self.coordinator.handle_event(Event::Transport(event))
        }

        fn command(&self, command: ProvisioningCommand) -> Result<(), ProvisioningError> {
            self.transport(TransportEvent::Command(command))
        }

        fn network(&self, event: NetworkEvent) -> Result<(), ProvisioningError> {
            self.coordinator.handle_event(Event::Network(event))
        }

        fn stored(&self, key: &str) -> Option<Vec<u8>> {
            self.coordinator.lock().records.inner().get(key).unwrap()
        }

        fn has_config(&self) -> bool {
            self.coordinator.lock().records.read_has_config()
        }
    }

    #[test]
    fn test_lifecycle_states() {
        let h = Harness::new();
        assert_eq!(h.coordinator.provisioning_state(), ProvisioningState::Idle);

        h.transport(TransportEvent::InitFinished).unwrap();
        assert_eq!(
            h.coordinator.provisioning_state(),
            ProvisioningState::Advertising
        );

        h.transport(TransportEvent::Connected).unwrap();
        assert_eq!(
            h.coordinator.provisioning_state(),
            ProvisioningState::AwaitingCredentials
        );

        h.command(ProvisioningCommand::SetStationSsid(b"Home".to_vec()))
            .unwrap();
        assert_eq!(
            h.coordinator.provisioning_state(),
            ProvisioningState::TransportConnected
        );

        h.transport(TransportEvent::Disconnected).unwrap();
        assert_eq!(
            h.coordinator.provisioning_state(),
            ProvisioningState::Advertising
        );

        h.transport(TransportEvent::DeinitFinished).unwrap();
        assert_eq!(h.coordinator.provisioning_state(), ProvisioningState::Idle);

        assert_eq!(
            h.transport.calls(),
            vec![
                TransportCall::StartAdvertising,
                TransportCall::StopAdvertising,
                TransportCall::StartAdvertising,
            ]
        );
    }

    #[test]
    fn test_reconnect_with_known_ssid_is_transport_connected() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::SetStationSsid(b"Home".to_vec()))
            .unwrap();
        h.transport(TransportEvent::Disconnected).unwrap();
        h.transport(TransportEvent::Connected).unwrap();
        assert_eq!(
            h.coordinator.provisioning_state(),
            ProvisioningState::TransportConnected
        );
    }

    #[test]
    fn test_ssid_accepted_and_persisted() {
        let h = Harness::connected();
        for len in 0..=32 {
            let ssid = vec![b's'; len];
            h.command(ProvisioningCommand::SetStationSsid(ssid.clone()))
                .unwrap();

            let mut expected = ssid.clone();
            expected.push(0);
            assert_eq!(h.stored(KEY_WIFI_SSID), Some(expected), "length {}", len);
            assert_eq!(
                h.stack.last_station(),
                Some(StackCall::SetStation {
                    ssid,
                    password: Vec::new(),
                    bssid: None,
                }),
                "length {}",
                len
            );
        }
        assert!(h.transport.errors().is_empty());
    }

    #[test]
    fn test_failed_ssid_write_leaves_station_untouched() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::SetStationSsid(b"Home".to_vec()))
            .unwrap();
        let before = h.coordinator.lock().session.station().clone();
        h.stack.clear();
        h.transport.clear();

        h.store.fail_writes(true);
        let result = h.command(ProvisioningCommand::SetStationSsid(b"Office".to_vec()));
        assert!(matches!(result, Err(ProvisioningError::Storage(_))));
        assert_eq!(h.stack.last_station(), None);
        assert!(h.coordinator.lock().session.station() == &before);
        assert_eq!(h.stored(KEY_WIFI_SSID), Some(b"Home\0".to_vec()));
    }

    #[test]
    fn test_failed_password_write_leaves_station_untouched() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::SetStationPassword(b"secret99".to_vec()))
            .unwrap();
        let before = h.coordinator.lock().session.station().clone();
        h.stack.clear();

        h.store.fail_writes(true);
        let result = h.command(ProvisioningCommand::SetStationPassword(b"hunter22".to_vec()));
        assert!(matches!(result, Err(ProvisioningError::Storage(_))));
        assert_eq!(h.stack.last_station(), None);
        assert!(h.coordinator.lock().session.station() == &before);
        assert_eq!(h.stored(KEY_WIFI_PASSWORD), Some(b"secret99\0".to_vec()));

        // Recovers once the store accepts writes again
        h.store.fail_writes(false);
        h.command(ProvisioningCommand::SetStationPassword(b"hunter22".to_vec()))
            .unwrap();
        assert_eq!(h.stored(KEY_WIFI_PASSWORD), Some(b"hunter22\0".to_vec()));
    }

    #[test]
    fn test_ssid_with_embedded_nul_rejected() {
        let h = Harness::connected();
        let result = h.command(ProvisioningCommand::SetStationSsid(b"Ho\0me".to_vec()));
        assert!(matches!(result, Err(ProvisioningError::Config(_))));
        assert_eq!(h.transport.errors(), vec![ErrorCode::DataFormatError]);
        assert_eq!(h.stored(KEY_WIFI_SSID), None);
        assert!(h.stack.calls().is_empty());
    }

    #[test]
    fn test_dense_scan_forwarded_in_full() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::RequestWifiList).unwrap();
        let records: Vec<ScanRecord> = (0..24u8)
            .map(|i| ScanRecord {
                ssid: vec![b'a' + i; 32],
                rssi: -60,
            })
            .collect();
        h.stack.set_scan_results(records.clone());

        h.network(NetworkEvent::ScanDone { count: 24 }).unwrap();
        let expected: Vec<ApRecord> = records
            .into_iter()
            .map(|r| ApRecord {
                ssid: r.ssid,
                rssi: r.rssi,
            })
            .collect();
        assert_eq!(h.transport.calls(), vec![TransportCall::ApList(expected)]);
        assert!(h.transport.errors().is_empty());
    }

    #[test]
    fn test_oversized_ssid_rejected() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::SetStationSsid(b"Home".to_vec()))
            .unwrap();
        h.stack.clear();

        let result = h.command(ProvisioningCommand::SetStationSsid(vec![b'x'; 33]));
        assert!(matches!(result, Err(ProvisioningError::Config(_))));
        assert_eq!(h.transport.errors(), vec![ErrorCode::DataFormatError]);
        assert_eq!(h.stored(KEY_WIFI_SSID), Some(b"Home\0".to_vec()));
        assert!(h.stack.calls().is_empty());
    }

    #[test]
    fn test_password_set_twice_is_idempotent() {
        let h = Harness::connected();
        for _ in 0..2 {
            h.command(ProvisioningCommand::SetStationPassword(b"secret99".to_vec()))
                .unwrap();
        }
        assert_eq!(h.stored(KEY_WIFI_PASSWORD), Some(b"secret99\0".to_vec()));
        let calls = h.stack.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[test]
    fn test_oversized_password_rejected() {
        let h = Harness::connected();
        let result = h.command(ProvisioningCommand::SetStationPassword(vec![b'p'; 65]));
        assert!(result.is_err());
        assert_eq!(h.transport.errors(), vec![ErrorCode::DataFormatError]);
        assert_eq!(h.stored(KEY_WIFI_PASSWORD), None);
    }

    #[test]
    fn test_bssid_must_be_six_bytes() {
        let h = Harness::connected();
        assert!(h
            .command(ProvisioningCommand::SetStationBssid(vec![1, 2, 3]))
            .is_err());
        assert_eq!(h.transport.errors(), vec![ErrorCode::DataFormatError]);

        h.command(ProvisioningCommand::SetStationBssid(vec![1, 2, 3, 4, 5, 6]))
            .unwrap();
        assert_eq!(
            h.stack.last_station(),
            Some(StackCall::SetStation {
                ssid: Vec::new(),
                password: Vec::new(),
                bssid: Some([1, 2, 3, 4, 5, 6]),
            })
        );
    }

    #[test]
    fn test_soft_ap_max_connections_range() {
        let h = Harness::connected();
        assert!(h
            .command(ProvisioningCommand::SetSoftApMaxConnections(5))
            .is_err());
        assert!(h.stack.calls().is_empty());
        assert_eq!(h.transport.errors(), vec![ErrorCode::DataFormatError]);

        h.command(ProvisioningCommand::SetSoftApMaxConnections(MAX_AP_CONNECTIONS))
            .unwrap();
        assert!(matches!(
            h.stack.calls().as_slice(),
            [StackCall::SetAp {
                max_connections: 4,
                ..
            }]
        ));
    }

    #[test]
    fn test_range_errors_can_be_silent() {
        let config = ProvisionerConfig {
            range_error_policy: RangeErrorPolicy::Ignore,
            ..Default::default()
        };
        let h = Harness::with_config(&config);
        h.transport(TransportEvent::Connected).unwrap();

        assert!(h.command(ProvisioningCommand::SetSoftApChannel(14)).is_err());
        assert!(h.command(ProvisioningCommand::SetSoftApAuthMode(42)).is_err());
        assert!(h.transport.errors().is_empty());

        // Oversized fields are always reported
        assert!(h
            .command(ProvisioningCommand::SetSoftApSsid(vec![b'a'; 33]))
            .is_err());
        assert_eq!(h.transport.errors(), vec![ErrorCode::DataFormatError]);
    }

    #[test]
    fn test_soft_ap_fields_applied_not_persisted() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::SetSoftApSsid(b"DeviceAP".to_vec()))
            .unwrap();
        h.command(ProvisioningCommand::SetSoftApAuthMode(3)).unwrap();
        h.command(ProvisioningCommand::SetSoftApChannel(11)).unwrap();

        assert_eq!(
            h.stack.calls().last(),
            Some(&StackCall::SetAp {
                ssid: b"DeviceAP".to_vec(),
                max_connections: MAX_AP_CONNECTIONS,
                auth_mode: AuthMode::Wpa2Psk,
                channel: 11,
            })
        );
        assert_eq!(h.stored(KEY_WIFI_SSID), None);
    }

    #[test]
    fn test_request_connect_disconnects_first() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::RequestConnect).unwrap();
        assert_eq!(h.stack.calls(), vec![StackCall::Disconnect, StackCall::Connect]);
        assert!(h.coordinator.connection_info().is_connecting);
    }

    #[test]
    fn test_status_results() {
        let h = Harness::connected();
        let status = |h: &Harness| {
            h.transport.clear();
            h.command(ProvisioningCommand::RequestWifiStatus).unwrap();
            h.transport.status_reports()[0].result
        };

        assert_eq!(status(&h), ConnectionResult::ConnFail);

        h.command(ProvisioningCommand::RequestConnect).unwrap();
        assert_eq!(status(&h), ConnectionResult::Connecting);

        h.network(NetworkEvent::StaConnected {
            bssid: [9; 6],
            ssid: b"Home".to_vec(),
            channel: 1,
            auth_mode: AuthMode::Wpa2Psk,
        })
        .unwrap();
        assert_eq!(status(&h), ConnectionResult::NoIp);

        h.network(NetworkEvent::GotIp).unwrap();
        assert_eq!(status(&h), ConnectionResult::ConnSuccess);
        assert!(h.coordinator.is_station_online());
    }

    #[test]
    fn test_has_config_set_only_after_got_ip() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::SetStationSsid(b"Home".to_vec()))
            .unwrap();
        h.command(ProvisioningCommand::SetStationPassword(b"secret99".to_vec()))
            .unwrap();
        h.command(ProvisioningCommand::RequestConnect).unwrap();
        h.network(NetworkEvent::StaConnected {
            bssid: [9; 6],
            ssid: b"Home".to_vec(),
            channel: 1,
            auth_mode: AuthMode::Wpa2Psk,
        })
        .unwrap();
        assert!(!h.has_config());

        h.transport.clear();
        h.network(NetworkEvent::GotIp).unwrap();
        assert!(h.has_config());

        let reports = h.transport.status_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result, ConnectionResult::ConnSuccess);
    }

    #[test]
    fn test_retry_exhaustion_reported() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::RequestConnect).unwrap();
        for _ in 0..11 {
            h.network(NetworkEvent::StaDisconnected {
                rssi: -80,
                reason: 201,
            })
            .unwrap();
        }
        assert_eq!(h.stack.count(&StackCall::Connect), 11);

        h.command(ProvisioningCommand::RequestWifiStatus).unwrap();
        let report = &h.transport.status_reports()[0];
        assert_eq!(report.result, ConnectionResult::ConnFail);
        assert_eq!(report.extra.max_retry, Some(10));
        assert_eq!(report.extra.rssi, Some(-80));
        assert_eq!(report.extra.disconnect_reason, Some(201));
    }

    #[test]
    fn test_ota_url_persisted() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::CustomData(
            b"AT+OTA=http://x/y".to_vec(),
        ))
        .unwrap();
        assert_eq!(h.stored(KEY_OTA_URL), Some(b"http://x/y\0".to_vec()));
    }

    #[test]
    fn test_ota_prefix_is_case_sensitive() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::CustomData(b"at+ota=http://x".to_vec()))
            .unwrap();
        assert_eq!(h.stored(KEY_OTA_URL), None);
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn test_ota_empty_url_persisted() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::CustomData(b"AT+OTA=".to_vec()))
            .unwrap();
        assert_eq!(h.stored(KEY_OTA_URL), Some(b"\0".to_vec()));
    }

    #[test]
    fn test_scan_results_forwarded_while_connected() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::RequestWifiList).unwrap();
        assert_eq!(h.stack.calls(), vec![StackCall::StartScan]);

        h.stack.set_scan_results(vec![ScanRecord {
            ssid: b"Cafe".to_vec(),
            rssi: -55,
        }]);
        h.network(NetworkEvent::ScanDone { count: 1 }).unwrap();
        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::ApList(vec![ApRecord {
                ssid: b"Cafe".to_vec(),
                rssi: -55,
            }])]
        );

        // Empty scans still answer the request
        h.transport.clear();
        h.network(NetworkEvent::ScanDone { count: 0 }).unwrap();
        assert_eq!(h.transport.calls(), vec![TransportCall::ApList(Vec::new())]);
    }

    #[test]
    fn test_scan_results_dropped_after_disconnect() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::RequestWifiList).unwrap();
        h.transport(TransportEvent::Disconnected).unwrap();
        h.transport.clear();

        h.stack.set_scan_results(vec![ScanRecord {
            ssid: b"Cafe".to_vec(),
            rssi: -55,
        }]);
        h.network(NetworkEvent::ScanDone { count: 1 }).unwrap();
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn test_scan_start_failure_reported() {
        let h = Harness::connected();
        h.stack.fail_scan(true);
        let result = h.command(ProvisioningCommand::RequestWifiList);
        assert!(matches!(result, Err(ProvisioningError::Network(_))));
        assert_eq!(h.transport.errors(), vec![ErrorCode::WifiScanFail]);
    }

    #[test]
    fn test_report_error_forwarded_verbatim() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::ReportError(ErrorCode::Other(77)))
            .unwrap();
        assert_eq!(h.transport.errors(), vec![ErrorCode::Other(77)]);
    }

    #[test]
    fn test_unsupported_commands() {
        let h = Harness::connected();
        let result = h.command(ProvisioningCommand::Deauthenticate);
        assert!(matches!(
            result,
            Err(ProvisioningError::Unsupported("deauthenticate"))
        ));
        assert_eq!(result.unwrap_err().log_level(), log::Level::Warn);
        assert!(h.command(ProvisioningCommand::Username(b"me".to_vec())).is_err());
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn test_close_transport() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::CloseTransport).unwrap();
        assert_eq!(h.transport.calls(), vec![TransportCall::Disconnect]);
    }

    #[test]
    fn test_ap_started_reports_when_connected() {
        let h = Harness::connected();
        h.command(ProvisioningCommand::SetWifiMode(WifiMode::Ap))
            .unwrap();
        h.network(NetworkEvent::ApStarted).unwrap();
        let reports = h.transport.status_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].mode, WifiMode::Ap);
    }

    #[test]
    fn test_send_code() {
        let h = Harness::new();
        h.coordinator.send_code([1, 2, 3, 4, 5, 6]).unwrap();
        assert!(h.transport.calls().is_empty());

        h.transport(TransportEvent::Connected).unwrap();
        h.transport.clear();
        h.coordinator.send_code([1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::Custom(vec![1, 2, 3, 4, 5, 6])]
        );
    }

    #[test]
    fn test_start_from_persisted() {
        let h = Harness::new();
        assert!(!h.coordinator.start_from_persisted().unwrap());
        assert!(h.stack.calls().is_empty());

        let mut records = ProvisioningStore::new(MemoryStore::new());
        records.write_wifi_ssid(b"Home").unwrap();
        records.write_wifi_password(b"").unwrap();
        let h = Harness::with_store(records.into_inner(), &ProvisionerConfig::default());
        assert!(h.coordinator.start_from_persisted().unwrap());
        assert_eq!(
            h.stack.calls(),
            vec![
                StackCall::SetMode(WifiMode::Sta),
                StackCall::SetStation {
                    ssid: b"Home".to_vec(),
                    password: Vec::new(),
                    bssid: None,
                },
                StackCall::Connect,
            ]
        );

        // No second attempt when the station start event follows
        h.network(NetworkEvent::StaStarted).unwrap();
        assert_eq!(h.stack.count(&StackCall::Connect), 1);
    }

    #[test]
    fn test_start_from_persisted_retries_on_station_start() {
        let mut records = ProvisioningStore::new(MemoryStore::new());
        records.write_wifi_ssid(b"Home").unwrap();
        records.write_wifi_password(b"secret99").unwrap();
        let h = Harness::with_store(records.into_inner(), &ProvisionerConfig::default());
        h.stack.fail_connect(true);
        assert!(h.coordinator.start_from_persisted().unwrap());
        assert!(!h.coordinator.connection_info().is_connecting);

        h.stack.fail_connect(false);
        h.network(NetworkEvent::StaStarted).unwrap();
        assert_eq!(h.stack.count(&StackCall::Connect), 2);
        assert!(h.coordinator.connection_info().is_connecting);
    }

    #[test]
    fn test_start_from_persisted_needs_password() {
        let mut records = ProvisioningStore::new(MemoryStore::new());
        records.write_wifi_ssid(b"Home").unwrap();
        let h = Harness::with_store(records.into_inner(), &ProvisionerConfig::default());
        assert!(!h.coordinator.start_from_persisted().unwrap());
        assert!(h.stack.calls().is_empty());
    }

    #[tokio::test]
    async fn test_event_loop_drains_mailbox() {
        let stack = FakeStack::new();
        let transport = FakeTransport::new();
        let transport_handle = transport.handle();
        let coordinator = Arc::new(Coordinator::new(
            MemoryStore::new(),
            stack,
            transport,
            &ProvisionerConfig::default(),
        ));

        let (sender, receiver) = mailbox();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_event_loop(
            coordinator.clone(),
            receiver,
            cancel.clone(),
        ));

        sender.post(TransportEvent::InitFinished);
        sender.post(TransportEvent::Connected);
        sender.post(TransportEvent::Command(ProvisioningCommand::Deauthenticate));
        drop(sender);
        task.await.unwrap();

        assert_eq!(
            coordinator.provisioning_state(),
            ProvisioningState::AwaitingCredentials
        );
        assert_eq!(
            transport_handle.calls(),
            vec![TransportCall::StartAdvertising, TransportCall::StopAdvertising]
        );
    }

    #[tokio::test]
    async fn test_event_loop_stops_on_cancel() {
        let coordinator = Arc::new(Coordinator::new(
            MemoryStore::new(),
            FakeStack::new(),
            FakeTransport::new(),
            &ProvisionerConfig::default(),
        ));
        let (_sender, receiver) = mailbox();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_event_loop(coordinator, receiver, cancel.clone()));
        cancel.cancel();
        task.await.unwrap();
    }
}
