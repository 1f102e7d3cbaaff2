//! ESP-IDF Wi-Fi driver adapter.
//!
//! Commands go through `EspWifi` without blocking. Driver events arrive
//! through system event loop subscriptions and are posted into the
//! coordinator mailbox.

use super::{NetworkError, NetworkEvent, NetworkStack, ScanRecord};
use crate::config::{AuthMode, SoftApConfig, StationCredentials, WifiMode};
use crate::event::EventSender;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::config::ScanConfig;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
    WifiEvent,
};
use esp_idf_sys::{self as sys, esp, EspError};
use log::{debug, info};

fn auth_method(mode: AuthMode) -> AuthMethod {
    match mode {
        AuthMode::Open => AuthMethod::None,
        AuthMode::Wep => AuthMethod::WEP,
        AuthMode::WpaPsk => AuthMethod::WPA,
        AuthMode::Wpa2Psk => AuthMethod::WPA2Personal,
        AuthMode::WpaWpa2Psk => AuthMethod::WPAWPA2Personal,
        AuthMode::Wpa2Enterprise => AuthMethod::WPA2Enterprise,
        AuthMode::Wpa3Psk => AuthMethod::WPA3Personal,
        AuthMode::Wpa2Wpa3Psk => AuthMethod::WPA2WPA3Personal,
        AuthMode::WapiPsk => AuthMethod::WAPIPersonal,
    }
}

fn utf8_field<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str, NetworkError> {
    std::str::from_utf8(bytes)
        .map_err(|_| NetworkError::InvalidConfig(format!("{} is not valid UTF-8", what)))
}

/// Wi-Fi stack over `EspWifi`.
pub struct EspWifiStack {
    wifi: EspWifi<'static>,
    mode: WifiMode,
    client: ClientConfiguration,
    ap: AccessPointConfiguration,
}

impl EspWifiStack {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, NetworkError> {
        let wifi = EspWifi::new(modem, sysloop, nvs)?;
        Ok(Self {
            wifi,
            mode: WifiMode::Null,
            client: ClientConfiguration::default(),
            ap: AccessPointConfiguration::default(),
        })
    }

    fn configuration(&self) -> Configuration {
        match self.mode {
            WifiMode::Null => Configuration::None,
            WifiMode::Sta => Configuration::Client(self.client.clone()),
            WifiMode::Ap => Configuration::AccessPoint(self.ap.clone()),
            WifiMode::ApSta => Configuration::Mixed(self.client.clone(), self.ap.clone()),
        }
    }

    fn push_configuration(&mut self) -> Result<(), NetworkError> {
        if self.mode == WifiMode::Null {
            if self.wifi.is_started()? {
                self.wifi.stop()?;
            }
            return Ok(());
        }
        self.wifi.set_configuration(&self.configuration())?;
        if !self.wifi.is_started()? {
            self.wifi.start()?;
            info!("WiFi driver started in {} mode", self.mode);
        }
        Ok(())
    }
}

impl NetworkStack for EspWifiStack {
    fn set_mode(&mut self, mode: WifiMode) -> Result<(), NetworkError> {
        self.mode = mode;
        self.push_configuration()
    }

    fn mode(&self) -> Result<WifiMode, NetworkError> {
        Ok(self.mode)
    }

    fn set_station_config(&mut self, creds: &StationCredentials) -> Result<(), NetworkError> {
        self.client.ssid = utf8_field(creds.ssid(), "SSID")?
            .try_into()
            .map_err(|_| NetworkError::InvalidConfig("SSID too long".into()))?;
        self.client.password = utf8_field(creds.password(), "password")?
            .try_into()
            .map_err(|_| NetworkError::InvalidConfig("password too long".into()))?;
        self.client.bssid = creds.bssid();
        self.client.auth_method = auth_method(creds.auth_threshold());
        if self.mode.has_station() {
            self.push_configuration()?;
        }
        Ok(())
    }

    fn set_ap_config(&mut self, config: &SoftApConfig) -> Result<(), NetworkError> {
        self.ap.ssid = utf8_field(config.ssid(), "soft-AP SSID")?
            .try_into()
            .map_err(|_| NetworkError::InvalidConfig("soft-AP SSID too long".into()))?;
        self.ap.password = utf8_field(config.password(), "soft-AP password")?
            .try_into()
            .map_err(|_| NetworkError::InvalidConfig("soft-AP password too long".into()))?;
        self.ap.max_connections = u16::from(config.max_connections());
        self.ap.auth_method = auth_method(config.auth_mode());
        self.ap.channel = config.channel();
        if self.mode.has_ap() {
            self.push_configuration()?;
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<(), NetworkError> {
        self.wifi.connect()?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        self.wifi.disconnect()?;
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), NetworkError> {
        self.wifi.start_scan(&ScanConfig::default(), false)?;
        Ok(())
    }

    fn take_scan_results(&mut self) -> Result<Vec<ScanRecord>, NetworkError> {
        let results = self.wifi.get_scan_result()?;
        Ok(results
            .into_iter()
            .map(|ap| ScanRecord {
                ssid: ap.ssid.as_bytes().to_vec(),
                rssi: ap.signal_strength,
            })
            .collect())
    }

    fn ap_station_count(&self) -> usize {
        if !self.mode.has_ap() {
            return 0;
        }
        let mut list: sys::wifi_sta_list_t = Default::default();
        match esp!(unsafe { sys::esp_wifi_ap_get_sta_list(&mut list) }) {
            Ok(()) => usize::try_from(list.num).unwrap_or(0),
            Err(e) => {
                debug!("Failed to read soft-AP station list: {:?}", e);
                0
            }
        }
    }
}

/// Keeps the driver event subscriptions alive. Dropping it unsubscribes.
pub struct EventSubscription {
    _wifi: EspSubscription<'static, System>,
    _ip: EspSubscription<'static, System>,
}

/// Forward Wi-Fi and IP driver events into the mailbox.
pub fn subscribe_events(
    sysloop: &EspSystemEventLoop,
    sender: EventSender,
) -> Result<EventSubscription, EspError> {
    let wifi_sender = sender.clone();
    let wifi = sysloop.subscribe::<WifiEvent, _>(move |event| {
        if let Some(event) = network_event(&event) {
            wifi_sender.post(event);
        }
    })?;
    let ip = sysloop.subscribe::<IpEvent, _>(move |event| {
        if let IpEvent::DhcpIpAssigned(_) = event {
            sender.post(NetworkEvent::GotIp);
        }
    })?;
    info!("Subscribed to WiFi and IP events");
    Ok(EventSubscription {
        _wifi: wifi,
        _ip: ip,
    })
}

fn auth_mode(method: AuthMethod) -> AuthMode {
    match method {
        AuthMethod::None => AuthMode::Open,
        AuthMethod::WEP => AuthMode::Wep,
        AuthMethod::WPA => AuthMode::WpaPsk,
        AuthMethod::WPA2Personal => AuthMode::Wpa2Psk,
        AuthMethod::WPAWPA2Personal => AuthMode::WpaWpa2Psk,
        AuthMethod::WPA2Enterprise => AuthMode::Wpa2Enterprise,
        AuthMethod::WPA3Personal => AuthMode::Wpa3Psk,
        AuthMethod::WPA2WPA3Personal => AuthMode::Wpa2Wpa3Psk,
        AuthMethod::WAPIPersonal => AuthMode::WapiPsk,
        other => {
            debug!("No provisioning auth mode for {:?}", other);
            AuthMode::default()
        }
    }
}

fn network_event(event: &WifiEvent<'_>) -> Option<NetworkEvent> {
    match event {
        WifiEvent::StaStarted => Some(NetworkEvent::StaStarted),
        WifiEvent::StaConnected(connected) => Some(NetworkEvent::StaConnected {
            bssid: *connected.bssid(),
            ssid: connected.ssid().as_bytes().to_vec(),
            channel: connected.channel(),
            auth_mode: auth_mode(connected.auth_method()),
        }),
        WifiEvent::StaDisconnected(disconnected) => Some(NetworkEvent::StaDisconnected {
            rssi: disconnected.rssi(),
            reason: u8::try_from(disconnected.reason()).unwrap_or(u8::MAX),
        }),
        WifiEvent::ApStarted => Some(NetworkEvent::ApStarted),
        WifiEvent::ApStaConnected(joined) => Some(NetworkEvent::ApStationJoined {
            mac: *joined.mac(),
            aid: u8::try_from(joined.aid()).unwrap_or(u8::MAX),
        }),
        WifiEvent::ApStaDisconnected(left) => Some(NetworkEvent::ApStationLeft {
            mac: *left.mac(),
            aid: u8::try_from(left.aid()).unwrap_or(u8::MAX),
        }),
        WifiEvent::ScanDone(done) => Some(NetworkEvent::ScanDone {
            count: u16::from(done.number()),
        }),
        _ => None,
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use blufi_provisioner_macros::tap_test;

    #[tap_test]
    fn wifi_lifecycle_events_forwarded() {
        assert_eq!(
            network_event(&WifiEvent::StaStarted),
            Some(NetworkEvent::StaStarted)
        );
        assert_eq!(
            network_event(&WifiEvent::ApStarted),
            Some(NetworkEvent::ApStarted)
        );
        assert_eq!(network_event(&WifiEvent::StaStopped), None);
    }

    #[tap_test]
    fn wifi_auth_methods_mapped() {
        assert_eq!(auth_mode(AuthMethod::WPA2Personal), AuthMode::Wpa2Psk);
        assert_eq!(auth_mode(AuthMethod::None), AuthMode::Open);
        assert_eq!(auth_mode(auth_method(AuthMode::Wpa3Psk)), AuthMode::Wpa3Psk);
    }

    #[tap_test]
    fn event_subscription_registers() -> crate::testing::TestResult {
        let sysloop = EspSystemEventLoop::take()?;
        let (sender, _receiver) = crate::event::mailbox();
        let subscription = subscribe_events(&sysloop, sender)?;
        drop(subscription);
        Ok(())
    }
}
