//! Seed stored station credentials without a provisioning peer.
//!
//! Writes the same records a BLE peer would, so the next `provisioner` boot
//! joins the network straight away.
//!
//! ESP32 (credentials baked in at compile time):
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo espflash flash --bin configure-wifi --features esp32
//!
//! Host (file store under ~/.blufi-provisioner or BLUFI_STORAGE_DIR):
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo run --bin configure-wifi
//!
//! For open networks leave WIFI_PASSWORD empty. `WIFI_CLEAR=1` on the host
//! removes stored credentials instead.

use blufi_provisioner::config::{ConfigError, StationCredentials};
use blufi_provisioner::storage::{CredentialStore, ProvisioningStore};

/// Print error message and stop. On ESP32, pause so the monitor shows it.
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    #[cfg(feature = "esp32")]
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

fn validate(ssid: &str, password: &str) -> StationCredentials {
    if ssid.is_empty() {
        halt_with_error(
            "Error: WIFI_SSID not set.\n\n\
             Usage:\n  \
             WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo configure-wifi",
        );
    }
    match StationCredentials::new(ssid.as_bytes(), password.as_bytes()) {
        Ok(creds) => creds,
        Err(ConfigError::SsidTooLong { len, max }) => {
            halt_with_error(&format!("Error: SSID too long ({} bytes, max {})", len, max))
        }
        Err(ConfigError::PasswordTooLong { len, max }) => halt_with_error(&format!(
            "Error: Password too long ({} bytes, max {})",
            len, max
        )),
        Err(e) => halt_with_error(&format!("Error: {}", e)),
    }
}

fn save<S: CredentialStore>(store: S, creds: &StationCredentials) {
    let mut records = ProvisioningStore::new(store);
    let result = records
        .ensure_version()
        .and_then(|_| records.write_wifi_ssid(creds.ssid()))
        .and_then(|_| records.write_wifi_password(creds.password()));
    if let Err(e) = result {
        halt_with_error(&format!("Error saving credentials: {}", e));
    }

    println!("\n=== Credentials saved ===");
    println!("SSID: {}", creds.ssid_str());
    println!(
        "Password: {} ({} bytes)",
        if creds.is_open() { "(none)" } else { "****" },
        creds.password().len()
    );
}

#[cfg(feature = "esp32")]
fn main() {
    use blufi_provisioner::config::DEFAULT_STORAGE_NAMESPACE;
    use blufi_provisioner::storage::NvsStore;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    println!("\n=== WiFi Credential Seeding ===\n");

    let creds = validate(
        option_env!("WIFI_SSID").unwrap_or(""),
        option_env!("WIFI_PASSWORD").unwrap_or(""),
    );
    match NvsStore::open(DEFAULT_STORAGE_NAMESPACE) {
        Ok(store) => save(store, &creds),
        Err(e) => halt_with_error(&format!("Error opening NVS: {:?}", e)),
    }

    println!("\n=== Done - you can disconnect the device ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    use blufi_provisioner::config::ProvisionerConfig;
    use blufi_provisioner::storage::FileStore;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = ProvisionerConfig::from_env();
    let store = match FileStore::open_or_default(config.storage_dir.as_deref()) {
        Ok(store) => store,
        Err(e) => halt_with_error(&format!("Error opening store: {}", e)),
    };
    println!("Store: {}", store.dir().display());

    if std::env::var("WIFI_CLEAR").is_ok_and(|v| v == "1") {
        let mut records = ProvisioningStore::new(store);
        if let Err(e) = records.clear_wifi() {
            halt_with_error(&format!("Error clearing credentials: {}", e));
        }
        println!("=== Stored credentials cleared ===");
        return;
    }

    let ssid = std::env::var("WIFI_SSID").unwrap_or_default();
    let password = std::env::var("WIFI_PASSWORD").unwrap_or_default();
    let creds = validate(&ssid, &password);
    save(store, &creds);
}
