//! BLE GATT transport.
//!
//! # GATT Service Structure
//!
//! ```text
//! Service: Provisioning
//! ├── Control (Write)         - One command frame per write
//! └── Report (Read, Notify)   - Status, error, custom data and AP list frames
//! ```
//!
//! Frames use the codec in [`super::frame`]. Reports are fragmented to the
//! link's ATT MTU before they are notified (see [`super::fragment`]).
//!
//! # Security Considerations
//!
//! WiFi credentials travel as plaintext at the application layer. Link-layer
//! encryption after pairing is the only protection, so provisioning should
//! happen in a physically secure environment.

use super::fragment::{Fragmenter, DEFAULT_ATT_MTU};
use super::frame::{self, decode_command};
use super::{
    ApRecord, ErrorCode, ProvisioningCommand, StatusReport, TransportError, TransportEvent,
    TransportSession,
};
use crate::event::EventSender;
use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{
    uuid128, BLEAdvertisementData, BLECharacteristic, BLEDevice, BLEError, NimbleProperties,
};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

/// Provisioning service UUID.
const PROVISIONING_SERVICE_UUID: BleUuid = uuid128!("0000ffff-b10f-4e5a-9c3d-5f0e1a2b3c40");

/// Control characteristic: peer writes command frames here.
const CONTROL_CHAR_UUID: BleUuid = uuid128!("0000ff01-b10f-4e5a-9c3d-5f0e1a2b3c40");

/// Report characteristic: device notifies report frames here.
const REPORT_CHAR_UUID: BleUuid = uuid128!("0000ff02-b10f-4e5a-9c3d-5f0e1a2b3c40");

fn ble_err(e: BLEError) -> TransportError {
    TransportError::Ble(format!("{:?}", e))
}

/// The connected peer.
#[derive(Debug, Clone, Copy)]
struct Link {
    conn_handle: u16,
    att_mtu: u16,
}

/// GATT provisioning service on the NimBLE stack.
pub struct BleTransport {
    report: Arc<NimbleMutex<BLECharacteristic>>,
    link: Arc<Mutex<Option<Link>>>,
    fragmenter: Fragmenter,
    device_name: String,
}

impl BleTransport {
    /// Register the provisioning service and wire its callbacks into `events`.
    ///
    /// Posts `InitFinished` once the service is ready.
    pub fn new(device_name: &str, events: EventSender) -> Result<Self, TransportError> {
        let device = BLEDevice::take();
        BLEDevice::set_device_name(device_name).map_err(ble_err)?;

        let link: Arc<Mutex<Option<Link>>> = Arc::new(Mutex::new(None));
        let server = device.get_server();
        server.advertise_on_disconnect(false);

        let connect_events = events.clone();
        let connect_link = link.clone();
        server.on_connect(move |_server, desc| {
            info!("BLE peer connected: {:?} (MTU {})", desc.address(), desc.mtu());
            *connect_link.lock().unwrap_or_else(|e| e.into_inner()) = Some(Link {
                conn_handle: desc.conn_handle(),
                att_mtu: desc.mtu(),
            });
            connect_events.post(TransportEvent::Connected);
        });

        let disconnect_events = events.clone();
        let disconnect_link = link.clone();
        server.on_disconnect(move |desc, reason| {
            info!("BLE peer disconnected: {:?} ({:?})", desc.address(), reason);
            *disconnect_link.lock().unwrap_or_else(|e| e.into_inner()) = None;
            disconnect_events.post(TransportEvent::Disconnected);
        });

        let service = server.create_service(PROVISIONING_SERVICE_UUID);

        let control = service
            .lock()
            .create_characteristic(CONTROL_CHAR_UUID, NimbleProperties::WRITE);
        let control_events = events.clone();
        let write_link = link.clone();
        control.lock().on_write(move |args| {
            // The MTU exchange usually completes after on_connect.
            if let Some(current) = write_link
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_mut()
            {
                current.att_mtu = args.desc().mtu();
            }
            let command = match decode_command(args.recv_data()) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Rejected control frame: {}", e);
                    ProvisioningCommand::ReportError(ErrorCode::DataFormatError)
                }
            };
            control_events.post(TransportEvent::Command(command));
        });

        let report = service.lock().create_characteristic(
            REPORT_CHAR_UUID,
            NimbleProperties::READ | NimbleProperties::NOTIFY,
        );

        info!("BLE provisioning service registered as {}", device_name);
        events.post(TransportEvent::InitFinished);

        Ok(Self {
            report,
            link,
            fragmenter: Fragmenter::for_att_mtu(DEFAULT_ATT_MTU)?,
            device_name: device_name.to_string(),
        })
    }

    fn notify(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let link = *self.link.lock().unwrap_or_else(|e| e.into_inner());
        let link = link.ok_or(TransportError::NotConnected)?;
        self.fragmenter.set_att_mtu(link.att_mtu)?;
        let fragments = self.fragmenter.fragment(frame);
        if fragments.len() > 1 {
            debug!(
                "Report of {} bytes sent as {} fragments (MTU {})",
                frame.len(),
                fragments.len(),
                link.att_mtu
            );
        }
        let mut report = self.report.lock();
        for fragment in &fragments {
            report.set_value(fragment).notify();
        }
        Ok(())
    }
}

impl TransportSession for BleTransport {
    fn start_advertising(&mut self) -> Result<(), TransportError> {
        let advertising = BLEDevice::take().get_advertising();
        advertising
            .lock()
            .set_data(
                BLEAdvertisementData::new()
                    .name(&self.device_name)
                    .add_service_uuid(PROVISIONING_SERVICE_UUID),
            )
            .map_err(ble_err)?;
        advertising.lock().start().map_err(ble_err)?;
        info!("BLE advertising started");
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), TransportError> {
        BLEDevice::take()
            .get_advertising()
            .lock()
            .stop()
            .map_err(ble_err)?;
        info!("BLE advertising stopped");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let link = *self.link.lock().unwrap_or_else(|e| e.into_inner());
        let link = link.ok_or(TransportError::NotConnected)?;
        BLEDevice::take()
            .get_server()
            .disconnect(link.conn_handle)
            .map_err(ble_err)
    }

    fn send_status_report(&mut self, report: &StatusReport) -> Result<(), TransportError> {
        self.notify(&frame::encode_status(report))
    }

    fn send_error_report(&mut self, code: ErrorCode) -> Result<(), TransportError> {
        self.notify(&frame::encode_error(code))
    }

    fn send_custom_data(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let frame = frame::encode_custom(data)?;
        self.notify(&frame)
    }

    fn send_ap_list(&mut self, entries: &[ApRecord]) -> Result<(), TransportError> {
        for frame in frame::encode_ap_list(entries) {
            self.notify(&frame)?;
        }
        Ok(())
    }
}
