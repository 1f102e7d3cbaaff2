//! Line-based peer simulator for host runs.
//!
//! Each input line plays the part of the provisioning peer: it becomes a
//! transport event (connect, disconnect, a command frame) posted to the
//! coordinator's mailbox. Reports come back through the console transport.
//!
//! # Example Session
//!
//! ```text
//! > ble-connect
//! > ssid HomeNetwork
//! > password secret99
//! > connect
//! {"report":"status","mode":"Sta","result":"ConnSuccess",...}
//! > scan
//! {"report":"ap_list","entries":[...]}
//! ```

use crate::config::{ConfigError, WifiMode};
use crate::coordinator::CODE_LEN;
use crate::transport::{ErrorCode, ProvisioningCommand, TransportEvent};

/// One parsed console line.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    /// Deliver to the coordinator.
    Event(TransportEvent),
    /// Push a code to the peer.
    Code([u8; CODE_LEN]),
    Help,
    Quit,
    /// Blank line.
    Empty,
}

impl ConsoleInput {
    /// Parse an input line.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self::Empty);
        }

        let mut parts = input.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let args = parts.next().unwrap_or("").trim();

        let command = match cmd.to_lowercase().as_str() {
            "ble-connect" | "attach" => return Ok(Self::Event(TransportEvent::Connected)),
            "ble-disconnect" | "detach" => return Ok(Self::Event(TransportEvent::Disconnected)),
            "help" | "h" | "?" => return Ok(Self::Help),
            "quit" | "exit" | "q" => return Ok(Self::Quit),
            "code" => return parse_code(args).map(Self::Code),

            "mode" => ProvisioningCommand::SetWifiMode(parse_mode(args)?),
            "ssid" => ProvisioningCommand::SetStationSsid(args.as_bytes().to_vec()),
            "password" | "psw" => ProvisioningCommand::SetStationPassword(args.as_bytes().to_vec()),
            "bssid" => ProvisioningCommand::SetStationBssid(parse_hex(args)?),
            "ap-ssid" => ProvisioningCommand::SetSoftApSsid(args.as_bytes().to_vec()),
            "ap-password" => ProvisioningCommand::SetSoftApPassword(args.as_bytes().to_vec()),
            "ap-max" => ProvisioningCommand::SetSoftApMaxConnections(parse_u8(args)?),
            "ap-auth" => ProvisioningCommand::SetSoftApAuthMode(parse_u8(args)?),
            "ap-channel" => ProvisioningCommand::SetSoftApChannel(parse_u8(args)?),
            "connect" => ProvisioningCommand::RequestConnect,
            "disconnect" => ProvisioningCommand::RequestDisconnect,
            "status" | "s" => ProvisioningCommand::RequestWifiStatus,
            "scan" | "list" => ProvisioningCommand::RequestWifiList,
            "error" => ProvisioningCommand::ReportError(ErrorCode::from_u8(parse_u8(args)?)),
            "custom" => ProvisioningCommand::CustomData(args.as_bytes().to_vec()),
            "username" => ProvisioningCommand::Username(args.as_bytes().to_vec()),
            "deauth" => ProvisioningCommand::Deauthenticate,
            "close" => ProvisioningCommand::CloseTransport,
            _ => {
                return Err(ConfigError::UnknownCommand(format!(
                    "{}. Type 'help' for commands.",
                    cmd
                )))
            }
        };
        Ok(Self::Event(TransportEvent::Command(command)))
    }
}

fn parse_u8(arg: &str) -> Result<u8, ConfigError> {
    arg.parse()
        .map_err(|_| ConfigError::InvalidFormat(format!("expected a number 0-255, got '{}'", arg)))
}

fn parse_mode(arg: &str) -> Result<WifiMode, ConfigError> {
    arg.parse()
        .or_else(|_| WifiMode::from_u8(parse_u8(arg)?))
}

/// Hex bytes, with or without `:` separators. Length is left to the receiver.
fn parse_hex(arg: &str) -> Result<Vec<u8>, ConfigError> {
    let digits: String = arg.chars().filter(|c| *c != ':').collect();
    if digits.len() % 2 != 0 {
        return Err(ConfigError::InvalidFormat(format!("odd hex length: {}", arg)));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| ConfigError::InvalidFormat(format!("bad hex: {}", arg)))
        })
        .collect()
}

fn parse_code(arg: &str) -> Result<[u8; CODE_LEN], ConfigError> {
    let bytes = arg.as_bytes();
    if bytes.len() != CODE_LEN || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(ConfigError::InvalidFormat(format!(
            "code must be {} digits",
            CODE_LEN
        )));
    }
    let mut code = [0u8; CODE_LEN];
    code.copy_from_slice(bytes);
    Ok(code)
}

/// Help text for the console.
pub const HELP_TEXT: &str = r#"
Peer connection:
  ble-connect            Attach a simulated peer
  ble-disconnect         Detach the peer

Station:
  ssid <name>            Set station SSID (max 32 bytes)
  password <text>        Set station password (max 64 bytes)
  bssid <hex>            Pin the AP BSSID, e.g. aa:bb:cc:dd:ee:ff
  connect | disconnect   Start or drop the station connection
  mode <null|sta|ap|apsta>

Soft-AP:
  ap-ssid <name>  ap-password <text>
  ap-max <1-4>    ap-auth <0-8>    ap-channel <1-13>

Other:
  status                 Request a status report
  scan                   Request an AP list
  custom <text>          Send custom data (AT+OTA=<url> stores an update URL)
  error <code>           Ask the device to report an error code
  code <6 digits>        Push a code to the peer
  deauth | username <n>  Not supported by the device
  close                  Ask the device to drop the peer
  help | quit
"#;
