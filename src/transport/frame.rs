//! Compact byte frames for the GATT control and report characteristics.
//!
//! # Inbound (control characteristic writes)
//!
//! ```text
//! [opcode: 1 byte][payload: N bytes]
//! ```
//!
//! | Opcode | Command                 | Payload           |
//! |--------|-------------------------|-------------------|
//! | 0x01   | SetWifiMode             | mode (1 byte)     |
//! | 0x02   | SetStationBssid         | 6 bytes           |
//! | 0x03   | SetStationSsid          | raw bytes         |
//! | 0x04   | SetStationPassword      | raw bytes         |
//! | 0x05   | SetSoftApSsid           | raw bytes         |
//! | 0x06   | SetSoftApPassword       | raw bytes         |
//! | 0x07   | SetSoftApMaxConnections | 1 byte            |
//! | 0x08   | SetSoftApAuthMode       | 1 byte            |
//! | 0x09   | SetSoftApChannel        | 1 byte            |
//! | 0x0A   | RequestConnect          | -                 |
//! | 0x0B   | RequestDisconnect       | -                 |
//! | 0x0C   | RequestWifiStatus       | -                 |
//! | 0x0D   | RequestWifiList         | -                 |
//! | 0x0E   | ReportError             | code (1 byte)     |
//! | 0x0F   | CustomData              | raw bytes         |
//! | 0x10   | Deauthenticate          | -                 |
//! | 0x11   | CloseTransport          | -                 |
//! | 0x12   | Username                | raw bytes         |
//! | 0x13.. | Certificate / key       | raw bytes         |
//!
//! Field lengths are *not* checked here; oversized fields must reach the
//! coordinator so it can report them.
//!
//! # Outbound (report characteristic notifications)
//!
//! ```text
//! status:   [0x01][mode][result][station_count][TLV...]
//! error:    [0x02][code]
//! custom:   [0x03][data...]
//! ap list:  [0x04]([ssid_len][rssi][ssid...])*
//! ```
//!
//! Each report frame is at most [`MAX_REPORT_LEN`] bytes. A scan list that
//! does not fit is sent as several AP list frames. On BLE every frame is
//! further split to the link MTU (see [`super::fragment`]).
//!
//! Status extra info uses `[tag][len][value]` entries: 0x01 BSSID,
//! 0x02 SSID, 0x03 RSSI, 0x04 max retry, 0x05 disconnect reason.

use super::{
    ApRecord, CertificateKind, ErrorCode, ProvisioningCommand, StatusReport, TransportError,
};
use crate::config::WifiMode;

/// Largest value a GATT attribute can hold.
pub const MAX_REPORT_LEN: usize = 512;

pub const OP_SET_WIFI_MODE: u8 = 0x01;
pub const OP_SET_STA_BSSID: u8 = 0x02;
pub const OP_SET_STA_SSID: u8 = 0x03;
pub const OP_SET_STA_PASSWORD: u8 = 0x04;
pub const OP_SET_AP_SSID: u8 = 0x05;
pub const OP_SET_AP_PASSWORD: u8 = 0x06;
pub const OP_SET_AP_MAX_CONN: u8 = 0x07;
pub const OP_SET_AP_AUTH_MODE: u8 = 0x08;
pub const OP_SET_AP_CHANNEL: u8 = 0x09;
pub const OP_CONNECT: u8 = 0x0A;
pub const OP_DISCONNECT: u8 = 0x0B;
pub const OP_GET_STATUS: u8 = 0x0C;
pub const OP_GET_WIFI_LIST: u8 = 0x0D;
pub const OP_REPORT_ERROR: u8 = 0x0E;
pub const OP_CUSTOM_DATA: u8 = 0x0F;
pub const OP_DEAUTHENTICATE: u8 = 0x10;
pub const OP_CLOSE: u8 = 0x11;
pub const OP_USERNAME: u8 = 0x12;
pub const OP_CA_CERT: u8 = 0x13;
pub const OP_CLIENT_CERT: u8 = 0x14;
pub const OP_SERVER_CERT: u8 = 0x15;
pub const OP_CLIENT_PRIVATE_KEY: u8 = 0x16;
pub const OP_SERVER_PRIVATE_KEY: u8 = 0x17;

pub const REPORT_STATUS: u8 = 0x01;
pub const REPORT_ERROR: u8 = 0x02;
pub const REPORT_CUSTOM: u8 = 0x03;
pub const REPORT_AP_LIST: u8 = 0x04;

const TAG_BSSID: u8 = 0x01;
const TAG_SSID: u8 = 0x02;
const TAG_RSSI: u8 = 0x03;
const TAG_MAX_RETRY: u8 = 0x04;
const TAG_DISCONNECT_REASON: u8 = 0x05;

/// Decode one control characteristic write.
pub fn decode_command(frame: &[u8]) -> Result<ProvisioningCommand, TransportError> {
    let (&opcode, payload) = frame
        .split_first()
        .ok_or_else(|| TransportError::Malformed("empty frame".into()))?;

    let bytes = || payload.to_vec();
    let command = match opcode {
        OP_SET_WIFI_MODE => {
            let raw = single_byte(opcode, payload)?;
            let mode = WifiMode::from_u8(raw)
                .map_err(|e| TransportError::Malformed(e.to_string()))?;
            ProvisioningCommand::SetWifiMode(mode)
        }
        OP_SET_STA_BSSID => ProvisioningCommand::SetStationBssid(bytes()),
        OP_SET_STA_SSID => ProvisioningCommand::SetStationSsid(bytes()),
        OP_SET_STA_PASSWORD => ProvisioningCommand::SetStationPassword(bytes()),
        OP_SET_AP_SSID => ProvisioningCommand::SetSoftApSsid(bytes()),
        OP_SET_AP_PASSWORD => ProvisioningCommand::SetSoftApPassword(bytes()),
        OP_SET_AP_MAX_CONN => {
            ProvisioningCommand::SetSoftApMaxConnections(single_byte(opcode, payload)?)
        }
        OP_SET_AP_AUTH_MODE => {
            ProvisioningCommand::SetSoftApAuthMode(single_byte(opcode, payload)?)
        }
        OP_SET_AP_CHANNEL => ProvisioningCommand::SetSoftApChannel(single_byte(opcode, payload)?),
        OP_CONNECT => ProvisioningCommand::RequestConnect,
        OP_DISCONNECT => ProvisioningCommand::RequestDisconnect,
        OP_GET_STATUS => ProvisioningCommand::RequestWifiStatus,
        OP_GET_WIFI_LIST => ProvisioningCommand::RequestWifiList,
        OP_REPORT_ERROR => {
            ProvisioningCommand::ReportError(ErrorCode::from_u8(single_byte(opcode, payload)?))
        }
        OP_CUSTOM_DATA => ProvisioningCommand::CustomData(bytes()),
        OP_DEAUTHENTICATE => ProvisioningCommand::Deauthenticate,
        OP_CLOSE => ProvisioningCommand::CloseTransport,
        OP_USERNAME => ProvisioningCommand::Username(bytes()),
        OP_CA_CERT => ProvisioningCommand::Certificate(CertificateKind::CaCert, bytes()),
        OP_CLIENT_CERT => ProvisioningCommand::Certificate(CertificateKind::ClientCert, bytes()),
        OP_SERVER_CERT => ProvisioningCommand::Certificate(CertificateKind::ServerCert, bytes()),
        OP_CLIENT_PRIVATE_KEY => {
            ProvisioningCommand::Certificate(CertificateKind::ClientPrivateKey, bytes())
        }
        OP_SERVER_PRIVATE_KEY => {
            ProvisioningCommand::Certificate(CertificateKind::ServerPrivateKey, bytes())
        }
        other => {
            return Err(TransportError::Malformed(format!(
                "unknown opcode 0x{:02x}",
                other
            )))
        }
    };
    Ok(command)
}

fn single_byte(opcode: u8, payload: &[u8]) -> Result<u8, TransportError> {
    match payload {
        [value] => Ok(*value),
        _ => Err(TransportError::Malformed(format!(
            "opcode 0x{:02x} expects 1 byte, got {}",
            opcode,
            payload.len()
        ))),
    }
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    // Values are bounded by SSID length (32), so the length always fits.
    out.push(tag);
    out.push(value.len().min(u8::MAX as usize) as u8);
    out.extend_from_slice(&value[..value.len().min(u8::MAX as usize)]);
}

fn checked(frame: Vec<u8>) -> Result<Vec<u8>, TransportError> {
    if frame.len() > MAX_REPORT_LEN {
        return Err(TransportError::PayloadTooLarge {
            len: frame.len(),
            max: MAX_REPORT_LEN,
        });
    }
    Ok(frame)
}

pub fn encode_status(report: &StatusReport) -> Vec<u8> {
    let mut out = vec![
        REPORT_STATUS,
        report.mode.as_u8(),
        report.result.as_u8(),
        report.station_count,
    ];
    let extra = &report.extra;
    if let Some(bssid) = &extra.bssid {
        push_tlv(&mut out, TAG_BSSID, bssid);
    }
    if let Some(ssid) = &extra.ssid {
        push_tlv(&mut out, TAG_SSID, ssid);
    }
    if let Some(rssi) = extra.rssi {
        push_tlv(&mut out, TAG_RSSI, &rssi.to_le_bytes());
    }
    if let Some(max_retry) = extra.max_retry {
        push_tlv(&mut out, TAG_MAX_RETRY, &[max_retry]);
    }
    if let Some(reason) = extra.disconnect_reason {
        push_tlv(&mut out, TAG_DISCONNECT_REASON, &[reason]);
    }
    out
}

pub fn encode_error(code: ErrorCode) -> Vec<u8> {
    vec![REPORT_ERROR, code.as_u8()]
}

pub fn encode_custom(data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::with_capacity(data.len() + 1);
    out.push(REPORT_CUSTOM);
    out.extend_from_slice(data);
    checked(out)
}

/// Encode a scan list as one or more `REPORT_AP_LIST` frames.
///
/// Entries are never split; a new frame starts when the next entry would
/// push the current one past [`MAX_REPORT_LEN`]. An empty list still yields
/// one frame.
pub fn encode_ap_list(entries: &[ApRecord]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut out = vec![REPORT_AP_LIST];
    for entry in entries {
        let ssid = &entry.ssid[..entry.ssid.len().min(u8::MAX as usize)];
        let entry_len = 2 + ssid.len();
        if out.len() + entry_len > MAX_REPORT_LEN {
            frames.push(std::mem::replace(&mut out, vec![REPORT_AP_LIST]));
        }
        out.push(ssid.len() as u8);
        out.extend_from_slice(&entry.rssi.to_le_bytes());
        out.extend_from_slice(ssid);
    }
    frames.push(out);
    frames
}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::transport::{ConnectionResult, ExtraInfo};
    use blufi_provisioner_macros::tap_test;

    #[tap_test]
    fn frame_rssi_is_twos_complement() {
        let frame = encode_status(&StatusReport {
            mode: WifiMode::Sta,
            result: ConnectionResult::ConnFail,
            station_count: 0,
            extra: ExtraInfo {
                rssi: Some(-128),
                ..Default::default()
            },
        });
        assert_eq!(&frame[4..], &[TAG_RSSI, 1, 0x80]);
    }

    #[tap_test]
    fn frame_password_decodes_on_target() -> crate::testing::TestResult {
        let mut frame = vec![OP_SET_STA_PASSWORD];
        frame.extend_from_slice(b"secret99");
        let command = decode_command(&frame)?;
        assert_eq!(command, ProvisioningCommand::SetStationPassword(b"secret99".to_vec()));
        Ok(())
    }
}
