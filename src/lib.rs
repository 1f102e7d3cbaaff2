//! BLE-to-WiFi provisioning coordinator.
//!
//! A peer connects over BLE, hands the device station credentials (and
//! optionally a soft-AP configuration), asks it to connect and gets status
//! reports back. Credentials that lead to an IP address are remembered and
//! used again on the next boot.
//!
//! Everything except the ESP32 adapters builds and tests on the host.
//!
//! # Modules
//!
//! - [`config`] - WiFi field types with per-field validation, runtime settings
//! - [`storage`] - Durable key/blob store and the provisioning records on top
//! - [`transport`] - Peer-facing commands, reports and the BLE/console adapters
//! - [`network`] - Network stack abstraction, connection session and retry policy
//! - [`event`] - Mailbox serializing transport and network events
//! - [`coordinator`] - The provisioning state machine

// Lets `#[tap_test]` expansions name this crate from inside it
extern crate self as blufi_provisioner;

pub mod config;
#[cfg(not(target_os = "espidf"))]
pub mod console;
pub mod coordinator;
pub mod event;
pub mod network;
pub mod storage;
#[cfg(feature = "tap-tests")]
pub mod testing;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, ProvisionerConfig, WifiMode};
pub use coordinator::{run_event_loop, Coordinator, ProvisioningError, ProvisioningState};
pub use event::{mailbox, Event, EventReceiver, EventSender};
