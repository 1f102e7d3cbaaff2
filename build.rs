/// Settings baked into ESP32 images through `option_env!`.
const BUILD_ENV: &[&str] = &[
    "BLUFI_DEVICE_NAME",
    "BLUFI_MAX_RETRY",
    "BLUFI_RANGE_ERRORS",
    "WIFI_SSID",
    "WIFI_PASSWORD",
];

fn main() {
    for key in BUILD_ENV {
        println!("cargo:rerun-if-env-changed={}", key);
    }

    // ESP-IDF environment only for espidf targets (Xtensa and RISC-V alike)
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
