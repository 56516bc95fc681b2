use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde_derive::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::indicator::{ACQUIRE_BLINK_INTERVAL, IndicatorColors, Rgb};
use crate::manager::LoopTiming;
use crate::scanner::PollerSettings;
use crate::wifi::SessionSettings;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub wifi: WifiConfig,
    pub webhook: WebhookConfig,
    pub sensor: Option<SensorConfig>,
    pub time: Option<TimeConfig>,
    pub indicator: Option<IndicatorConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WifiConfig {
    /// Tried in order; the first one that associates wins.
    pub networks: Vec<NetworkCandidate>,
    pub interface: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub check_interval_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NetworkCandidate {
    pub ssid: String,
    pub password: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SensorConfig {
    pub uid_path: Option<PathBuf>,
    pub firmware_path: Option<PathBuf>,
    pub scan_timeout_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct TimeConfig {
    pub ntp_server: Option<String>,
    pub utc_offset_seconds: Option<i32>,
    pub daylight_offset_seconds: Option<i32>,
    pub sync_retries: Option<u32>,
    pub sync_retry_interval_ms: Option<u64>,
    pub resync_interval_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct IndicatorConfig {
    pub brightness: Option<u8>,
    pub tag_present: Option<u32>,
    pub connected: Option<u32>,
    pub connecting: Option<u32>,
    pub error: Option<u32>,
    pub synced: Option<u32>,
}

/// Webhook target, parsed once when the configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            url: raw.to_string(),
            reason,
        };
        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(Endpoint { url })
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: AppConfig = toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wifi.networks.is_empty() {
            return Err(ConfigError::NoNetworks);
        }
        self.endpoint()?;

        let sensor = self.sensor();
        let time = self.time();
        let intervals = [
            ("wifi.connect_timeout_ms", self.wifi.connect_timeout_ms),
            ("wifi.check_interval_ms", self.wifi.check_interval_ms),
            ("webhook.timeout_ms", self.webhook.timeout_ms),
            ("sensor.scan_timeout_ms", sensor.scan_timeout_ms),
            ("sensor.poll_interval_ms", sensor.poll_interval_ms),
            ("time.sync_retry_interval_ms", time.sync_retry_interval_ms),
            ("time.resync_interval_seconds", time.resync_interval_seconds),
        ];
        for (name, value) in intervals {
            if value == Some(0) {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::parse(&self.webhook.url)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook.timeout_ms.unwrap_or(5000))
    }

    pub fn sensor(&self) -> SensorConfig {
        self.sensor.clone().unwrap_or_default()
    }

    pub fn time(&self) -> TimeConfig {
        self.time.clone().unwrap_or_default()
    }

    pub fn interface(&self) -> String {
        self.wifi
            .interface
            .clone()
            .unwrap_or_else(|| "wlan0".to_string())
    }

    pub fn uid_path(&self) -> PathBuf {
        self.sensor()
            .uid_path
            .unwrap_or_else(|| PathBuf::from("/run/tagwatch/uid"))
    }

    pub fn firmware_path(&self) -> PathBuf {
        self.sensor()
            .firmware_path
            .unwrap_or_else(|| PathBuf::from("/run/tagwatch/firmware"))
    }

    pub fn poller_settings(&self) -> PollerSettings {
        let sensor = self.sensor();
        PollerSettings {
            scan_timeout: Duration::from_millis(sensor.scan_timeout_ms.unwrap_or(100)),
            settle: Duration::from_millis(sensor.settle_ms.unwrap_or(100)),
        }
    }

    pub fn loop_timing(&self) -> LoopTiming {
        LoopTiming {
            poll_interval: Duration::from_millis(self.sensor().poll_interval_ms.unwrap_or(1000)),
            check_interval: Duration::from_millis(self.wifi.check_interval_ms.unwrap_or(5000)),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        let time = self.time();
        SessionSettings {
            connect_timeout: Duration::from_millis(self.wifi.connect_timeout_ms.unwrap_or(10_000)),
            blink_interval: ACQUIRE_BLINK_INTERVAL,
            ntp_server: time.ntp_server.unwrap_or_else(|| "pool.ntp.org".to_string()),
            utc_offset_seconds: time.utc_offset_seconds.unwrap_or(3600)
                + time.daylight_offset_seconds.unwrap_or(3600),
            sync_retries: time.sync_retries.unwrap_or(10),
            sync_retry_interval: Duration::from_millis(time.sync_retry_interval_ms.unwrap_or(500)),
            resync_interval: Duration::from_secs(time.resync_interval_seconds.unwrap_or(3600)),
        }
    }

    pub fn indicator_colors(&self) -> IndicatorColors {
        let c = self.indicator.clone().unwrap_or_default();
        let defaults = IndicatorColors::default();
        IndicatorColors {
            tag_present: c.tag_present.map(Rgb::from_hex).unwrap_or(defaults.tag_present),
            connected: c.connected.map(Rgb::from_hex).unwrap_or(defaults.connected),
            connecting: c.connecting.map(Rgb::from_hex).unwrap_or(defaults.connecting),
            error: c.error.map(Rgb::from_hex).unwrap_or(defaults.error),
            synced: c.synced.map(Rgb::from_hex).unwrap_or(defaults.synced),
        }
    }

    pub fn brightness(&self) -> u8 {
        self.indicator
            .as_ref()
            .and_then(|c| c.brightness)
            .unwrap_or(10)
    }
}
