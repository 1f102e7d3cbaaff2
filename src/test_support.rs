//! Recording fakes for the collaborator traits.
//!
//! Each fake hands out a cloneable handle so tests can inspect calls and
//! script failures after the fake has been moved into a coordinator.

use crate::config::{AuthMode, Bssid, SoftApConfig, StationCredentials, WifiMode};
use crate::network::{NetworkError, NetworkStack, ScanRecord};
use crate::storage::{CredentialStore, MemoryStore, StoreError};
use crate::transport::{ApRecord, ErrorCode, StatusReport, TransportError, TransportSession};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    SetMode(WifiMode),
    SetStation {
        ssid: Vec<u8>,
        password: Vec<u8>,
        bssid: Option<Bssid>,
    },
    SetAp {
        ssid: Vec<u8>,
        max_connections: u8,
        auth_mode: AuthMode,
        channel: u8,
    },
    Connect,
    Disconnect,
    StartScan,
}

#[derive(Default)]
struct StackState {
    calls: Vec<StackCall>,
    mode: WifiMode,
    fail_connect: bool,
    fail_scan: bool,
    scan_results: Vec<ScanRecord>,
    station_count: usize,
}

#[derive(Clone, Default)]
pub struct FakeStackHandle(Arc<Mutex<StackState>>);

impl FakeStackHandle {
    fn lock(&self) -> MutexGuard<'_, StackState> {
        self.0.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<StackCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, call: &StackCall) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Last station config pushed to the stack.
    pub fn last_station(&self) -> Option<StackCall> {
        self.lock()
            .calls
            .iter()
            .rev()
            .find(|c| matches!(c, StackCall::SetStation { .. }))
            .cloned()
    }

    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn fail_scan(&self, fail: bool) {
        self.lock().fail_scan = fail;
    }

    pub fn set_scan_results(&self, results: Vec<ScanRecord>) {
        self.lock().scan_results = results;
    }

    pub fn set_station_count(&self, count: usize) {
        self.lock().station_count = count;
    }
}

pub struct FakeStack {
    handle: FakeStackHandle,
}

impl FakeStack {
    pub fn new() -> Self {
        Self {
            handle: FakeStackHandle::default(),
        }
    }

    pub fn handle(&self) -> FakeStackHandle {
        self.handle.clone()
    }

    fn record(&self, call: StackCall) {
        self.handle.lock().calls.push(call);
    }
}

impl NetworkStack for FakeStack {
    fn set_mode(&mut self, mode: WifiMode) -> Result<(), NetworkError> {
        self.record(StackCall::SetMode(mode));
        self.handle.lock().mode = mode;
        Ok(())
    }

    fn mode(&self) -> Result<WifiMode, NetworkError> {
        Ok(self.handle.lock().mode)
    }

    fn set_station_config(&mut self, creds: &StationCredentials) -> Result<(), NetworkError> {
        self.record(StackCall::SetStation {
            ssid: creds.ssid().to_vec(),
            password: creds.password().to_vec(),
            bssid: creds.bssid(),
        });
        Ok(())
    }

    fn set_ap_config(&mut self, config: &SoftApConfig) -> Result<(), NetworkError> {
        self.record(StackCall::SetAp {
            ssid: config.ssid().to_vec(),
            max_connections: config.max_connections(),
            auth_mode: config.auth_mode(),
            channel: config.channel(),
        });
        Ok(())
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        self.record(StackCall::Connect);
        if self.handle.lock().fail_connect {
            return Err(NetworkError::Rejected("connect".into()));
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        self.record(StackCall::Disconnect);
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), NetworkError> {
        self.record(StackCall::StartScan);
        if self.handle.lock().fail_scan {
            return Err(NetworkError::Rejected("scan".into()));
        }
        Ok(())
    }

    fn take_scan_results(&mut self) -> Result<Vec<ScanRecord>, NetworkError> {
        Ok(std::mem::take(&mut self.handle.lock().scan_results))
    }

    fn ap_station_count(&self) -> usize {
        self.handle.lock().station_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartAdvertising,
    StopAdvertising,
    Disconnect,
    Status(StatusReport),
    Error(ErrorCode),
    Custom(Vec<u8>),
    ApList(Vec<ApRecord>),
}

#[derive(Clone, Default)]
pub struct FakeTransportHandle(Arc<Mutex<Vec<TransportCall>>>);

impl FakeTransportHandle {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn errors(&self) -> Vec<ErrorCode> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::Error(code) => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn status_reports(&self) -> Vec<StatusReport> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::Status(report) => Some(report),
                _ => None,
            })
            .collect()
    }
}

pub struct FakeTransport {
    handle: FakeTransportHandle,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            handle: FakeTransportHandle::default(),
        }
    }

    pub fn handle(&self) -> FakeTransportHandle {
        self.handle.clone()
    }

    fn record(&self, call: TransportCall) -> Result<(), TransportError> {
        self.handle.0.lock().unwrap().push(call);
        Ok(())
    }
}

impl TransportSession for FakeTransport {
    fn start_advertising(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::StartAdvertising)
    }

    fn stop_advertising(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::StopAdvertising)
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect)
    }

    fn send_status_report(&mut self, report: &StatusReport) -> Result<(), TransportError> {
        self.record(TransportCall::Status(report.clone()))
    }

    fn send_error_report(&mut self, code: ErrorCode) -> Result<(), TransportError> {
        self.record(TransportCall::Error(code))
    }

    fn send_custom_data(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.record(TransportCall::Custom(data.to_vec()))
    }

    fn send_ap_list(&mut self, entries: &[ApRecord]) -> Result<(), TransportError> {
        self.record(TransportCall::ApList(entries.to_vec()))
    }
}

#[derive(Clone, Default)]
pub struct FakeStoreHandle(Arc<Mutex<bool>>);

impl FakeStoreHandle {
    /// Make every following write and remove fail.
    pub fn fail_writes(&self, fail: bool) {
        *self.0.lock().unwrap() = fail;
    }

    fn failing(&self) -> bool {
        *self.0.lock().unwrap()
    }
}

/// In-memory store whose writes can be made to fail.
pub struct FakeStore {
    inner: MemoryStore,
    handle: FakeStoreHandle,
}

impl FakeStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            handle: FakeStoreHandle::default(),
        }
    }

    pub fn handle(&self) -> FakeStoreHandle {
        self.handle.clone()
    }

    fn check_write(&self, key: &str) -> Result<(), StoreError> {
        if self.handle.failing() {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "write to {} failed",
                key
            ))));
        }
        Ok(())
    }
}

impl CredentialStore for FakeStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check_write(key)?;
        self.inner.set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.check_write(key)?;
        self.inner.remove(key)
    }
}
