//! JSON-lines transport for host simulation.
//!
//! Stands in for the BLE peer when running on a development machine:
//! every outbound report becomes one JSON object on its own line.

use super::{ApRecord, ConnectionResult, ErrorCode, StatusReport, TransportError, TransportSession};
use crate::config::{format_bssid, WifiMode};
use log::info;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Serialize)]
#[serde(tag = "report", rename_all = "snake_case")]
enum ReportLine {
    Status {
        mode: WifiMode,
        result: ConnectionResult,
        station_count: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        bssid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ssid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rssi: Option<i8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_retry: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        disconnect_reason: Option<u8>,
    },
    Error {
        code: u8,
        name: String,
    },
    Custom {
        text: String,
        len: usize,
    },
    ApList {
        entries: Vec<ApLine>,
    },
}

#[derive(Serialize)]
struct ApLine {
    ssid: String,
    rssi: i8,
}

/// Transport that writes reports to any `Write` sink.
pub struct ConsoleTransport<W> {
    out: W,
    device_name: String,
    advertising: bool,
}

impl ConsoleTransport<io::Stdout> {
    /// Report to standard output.
    pub fn stdout(device_name: &str) -> Self {
        Self::new(io::stdout(), device_name)
    }
}

impl<W: Write + Send> ConsoleTransport<W> {
    pub fn new(out: W, device_name: &str) -> Self {
        Self {
            out,
            device_name: device_name.to_string(),
            advertising: false,
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, line: &ReportLine) -> Result<(), TransportError> {
        serde_json::to_writer(&mut self.out, line).map_err(io::Error::from)?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> TransportSession for ConsoleTransport<W> {
    fn start_advertising(&mut self) -> Result<(), TransportError> {
        self.advertising = true;
        info!("Advertising as {}", self.device_name);
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), TransportError> {
        self.advertising = false;
        info!("Advertising stopped");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        info!("Closing peer connection");
        Ok(())
    }

    fn send_status_report(&mut self, report: &StatusReport) -> Result<(), TransportError> {
        let extra = &report.extra;
        self.emit(&ReportLine::Status {
            mode: report.mode,
            result: report.result,
            station_count: report.station_count,
            bssid: extra.bssid.as_ref().map(format_bssid),
            ssid: extra
                .ssid
                .as_ref()
                .map(|s| String::from_utf8_lossy(s).into_owned()),
            rssi: extra.rssi,
            max_retry: extra.max_retry,
            disconnect_reason: extra.disconnect_reason,
        })
    }

    fn send_error_report(&mut self, code: ErrorCode) -> Result<(), TransportError> {
        self.emit(&ReportLine::Error {
            code: code.as_u8(),
            name: format!("{:?}", code),
        })
    }

    fn send_custom_data(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.emit(&ReportLine::Custom {
            text: String::from_utf8_lossy(data).into_owned(),
            len: data.len(),
        })
    }

    fn send_ap_list(&mut self, entries: &[ApRecord]) -> Result<(), TransportError> {
        self.emit(&ReportLine::ApList {
            entries: entries
                .iter()
                .map(|e| ApLine {
                    ssid: String::from_utf8_lossy(&e.ssid).into_owned(),
                    rssi: e.rssi,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ExtraInfo;

    fn lines(transport: ConsoleTransport<Vec<u8>>) -> Vec<serde_json::Value> {
        let out = String::from_utf8(transport.into_inner()).unwrap();
        out.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_status_line() {
        let mut transport = ConsoleTransport::new(Vec::new(), "TEST");
        transport
            .send_status_report(&StatusReport {
                mode: WifiMode::Sta,
                result: ConnectionResult::NoIp,
                station_count: 0,
                extra: ExtraInfo {
                    bssid: Some([0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]),
                    ssid: Some(b"Home".to_vec()),
                    ..Default::default()
                },
            })
            .unwrap();

        let lines = lines(transport);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["report"], "status");
        assert_eq!(lines[0]["result"], "NoIp");
        assert_eq!(lines[0]["ssid"], "Home");
        assert_eq!(lines[0]["bssid"], "aa:bb:cc:00:11:22");
        assert!(lines[0].get("rssi").is_none());
    }

    #[test]
    fn test_error_and_ap_list_lines() {
        let mut transport = ConsoleTransport::new(Vec::new(), "TEST");
        transport
            .send_error_report(ErrorCode::DataFormatError)
            .unwrap();
        transport.send_ap_list(&[]).unwrap();

        let lines = lines(transport);
        assert_eq!(lines[0]["report"], "error");
        assert_eq!(lines[0]["code"], 9);
        assert_eq!(lines[1]["report"], "ap_list");
        assert_eq!(lines[1]["entries"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_advertising_flag() {
        let mut transport = ConsoleTransport::new(Vec::new(), "TEST");
        transport.start_advertising().unwrap();
        assert!(transport.is_advertising());
        transport.stop_advertising().unwrap();
        assert!(!transport.is_advertising());
    }
}
