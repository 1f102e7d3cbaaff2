//! BLE-to-WiFi provisioning firmware.
//!
//! Runs on both ESP32 and host platforms:
//! - **ESP32**: `cargo espflash flash --bin provisioner --features esp32 --release`
//!   advertises the provisioning service over BLE and drives the WiFi driver.
//! - **Host**: `cargo run --bin provisioner` simulates both sides. Type peer
//!   commands on stdin (`help` lists them); reports come back as JSON lines.
//!
//! On boot, credentials saved by an earlier run are used to join the
//! network straight away, while the device stays open for provisioning.

use blufi_provisioner::config::ProvisionerConfig;
use blufi_provisioner::coordinator::{run_event_loop, Coordinator};
use blufi_provisioner::event::mailbox;
use blufi_provisioner::storage::{CredentialStore, ProvisioningStore, StoreError};
use log::{error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Bring the record layout up to date before the coordinator takes the store.
fn prepare_store<S: CredentialStore>(store: S) -> Result<S, StoreError> {
    let mut records = ProvisioningStore::new(store);
    let version = records.ensure_version()?;
    info!("Provisioning records at version {}", version);
    if let Some(url) = records.read_ota_url()? {
        info!("Pending OTA URL: {}", url);
    }
    Ok(records.into_inner())
}

fn start_from_persisted<S, N, T>(coordinator: &Coordinator<S, N, T>)
where
    S: CredentialStore,
    N: blufi_provisioner::network::NetworkStack,
    T: blufi_provisioner::transport::TransportSession,
{
    match coordinator.start_from_persisted() {
        Ok(true) => info!("Connecting with stored credentials"),
        Ok(false) => info!("No stored credentials"),
        Err(e) => warn!("Could not start from stored credentials: {}", e),
    }
}

#[cfg(feature = "esp32")]
async fn run(
    config: ProvisionerConfig,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    use blufi_provisioner::network::{subscribe_events, EspWifiStack};
    use blufi_provisioner::storage::NvsStore;
    use blufi_provisioner::transport::BleTransport;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let partition = EspDefaultNvsPartition::take()?;

    let store = prepare_store(NvsStore::with_partition(
        partition.clone(),
        &config.storage_namespace,
    )?)?;

    let (events, receiver) = mailbox();
    let _subscription = subscribe_events(&sysloop, events.clone())?;
    let stack = EspWifiStack::new(peripherals.modem, sysloop, Some(partition))?;
    let transport = BleTransport::new(&config.device_name, events)?;

    let coordinator = Arc::new(Coordinator::new(store, stack, transport, &config));
    start_from_persisted(&coordinator);

    run_event_loop(coordinator, receiver, cancel).await;
    Ok(())
}

#[cfg(not(feature = "esp32"))]
async fn run(
    config: ProvisionerConfig,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    use blufi_provisioner::console::{ConsoleInput, HELP_TEXT};
    use blufi_provisioner::network::{SimAccessPoint, SimulatedNetwork};
    use blufi_provisioner::storage::FileStore;
    use blufi_provisioner::transport::{ConsoleTransport, TransportEvent};
    use std::io::BufRead;

    let store = prepare_store(FileStore::open_or_default(config.storage_dir.as_deref())?)?;

    let (events, receiver) = mailbox();
    let stack = SimulatedNetwork::new(
        events.clone(),
        vec![
            SimAccessPoint::new("HomeNetwork", "secret99", -45),
            SimAccessPoint::new("CoffeeShop", "", -70),
            SimAccessPoint::new("Neighbour", "hunter22", -82),
        ],
    );
    let transport = ConsoleTransport::stdout(&config.device_name);

    let coordinator = Arc::new(Coordinator::new(store, stack, transport, &config));
    start_from_persisted(&coordinator);
    events.post(TransportEvent::InitFinished);

    let event_loop = tokio::spawn(run_event_loop(
        coordinator.clone(),
        receiver,
        cancel.clone(),
    ));

    info!("Type 'help' for peer commands");
    // A plain thread: a blocked stdin read must not hold up runtime shutdown.
    let stdin_cancel = cancel.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("stdin read failed: {}", e);
                    break;
                }
            };
            match ConsoleInput::parse(&line) {
                Ok(ConsoleInput::Event(event)) => {
                    if !events.post(event) {
                        break;
                    }
                }
                Ok(ConsoleInput::Code(code)) => {
                    if let Err(e) = coordinator.send_code(code) {
                        warn!("{}", e);
                    }
                }
                Ok(ConsoleInput::Help) => println!("{}", HELP_TEXT),
                Ok(ConsoleInput::Quit) => break,
                Ok(ConsoleInput::Empty) => {}
                Err(e) => println!("{}", e),
            }
        }
        stdin_cancel.cancel();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
    event_loop.await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    #[cfg(feature = "esp32")]
    let config = ProvisionerConfig::from_build_env();
    #[cfg(not(feature = "esp32"))]
    let config = ProvisionerConfig::from_env();

    info!(
        "=== Provisioner starting as {} (max retry {}) ===",
        config.device_name, config.max_connection_retry
    );

    if let Err(e) = run(config, CancellationToken::new()).await {
        error!("Provisioner failed: {}", e);
        std::process::exit(1);
    }
    info!("=== Provisioner stopped ===");
}
