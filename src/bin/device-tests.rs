//! TAP test runner binary.
//!
//! Runs every `#[tap_test]` and prints TAP. `BLUFI_TAP_FILTER` narrows the
//! run to tests whose name contains it.
//!
//! # Usage
//!
//! ```bash
//! # Host (harness and codec tests only)
//! cargo run --bin device-tests --features tap-tests
//!
//! # Board, including NVS tests
//! cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//! ```

fn main() {
    #[cfg(feature = "esp32")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }
    #[cfg(not(feature = "esp32"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let success = blufi_provisioner::testing::run_all_tests();

    #[cfg(feature = "esp32")]
    {
        log::info!(
            "Tests complete ({}). Halting.",
            if success { "pass" } else { "fail" }
        );
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    #[cfg(not(feature = "esp32"))]
    std::process::exit(if success { 0 } else { 1 });
}
