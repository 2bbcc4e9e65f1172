use crate::prelude::*;
use crate::error;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Only this many inverters are ever polled; extra entries are ignored.
pub const MAX_INVERTERS: usize = 3;

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_username: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    #[serde(default = "Config::default_mqtt_topic_prefix")]
    pub mqtt_topic_prefix: String,
    #[serde(default = "Config::default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval_s: Duration,

    /// Bounds every serial write and every response read.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_connect_timeout")]
    pub connect_timeout_s: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_reconnect_backoff")]
    pub reconnect_backoff_s: Duration,

    #[serde(default = "Vec::new")]
    pub inverters: Vec<Inverter>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Inverter {
    #[serde(default = "Config::default_inverter_name")]
    pub name: String,

    #[serde(default)]
    pub port: String,

    #[serde(default = "Config::default_baudrate")]
    pub baudrate: u32,

    #[serde(default)]
    pub enabled: bool,
}

impl Inverter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enabled and pointing at an actual device path.
    pub fn active(&self) -> bool {
        self.enabled && !self.port.is_empty()
    }
} // }}}

/// Read-only handle to the loaded configuration, cheap to clone into tasks.
#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl ConfigWrapper {
    pub fn new(file: &str) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn inverters(&self) -> &[Inverter] {
        &self.config.inverters
    }

    /// The inverters that get a poll loop: the first `MAX_INVERTERS`
    /// entries, minus disabled ones and ones with no port.
    pub fn active_inverters(&self) -> Vec<Inverter> {
        self.config
            .inverters
            .iter()
            .take(MAX_INVERTERS)
            .filter(|i| i.active())
            .cloned()
            .collect()
    }

    pub fn mqtt_host(&self) -> &str {
        &self.config.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.config.mqtt_port
    }

    pub fn mqtt_credentials(&self) -> Option<(&str, &str)> {
        match self.config.mqtt_username.as_deref() {
            Some(u) if !u.is_empty() => {
                Some((u, self.config.mqtt_password.as_deref().unwrap_or("")))
            }
            _ => None,
        }
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.config.mqtt_client_id
    }

    /// Topic prefix with any trailing slashes removed.
    pub fn topic_prefix(&self) -> &str {
        self.config.mqtt_topic_prefix.trim_end_matches('/')
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval_s
    }

    pub fn response_timeout(&self) -> Duration {
        self.config.connect_timeout_s
    }

    pub fn reconnect_backoff(&self) -> Duration {
        self.config.reconnect_backoff_s
    }

    pub fn loglevel(&self) -> &str {
        &self.config.loglevel
    }

    /// Logs what was loaded from `file`. Called once logging is set up.
    pub fn log_summary(&self, file: &str) {
        let c = &self.config;

        info!("Configuration loaded from {}:", file);
        info!(
            "  Inverters: {} configured, {} active",
            self.inverters().len(),
            self.active_inverters().len()
        );
        for (i, inv) in self.inverters().iter().enumerate() {
            info!("    Inverter[{}]:", i);
            info!("      Name: {}", inv.name());
            info!("      Enabled: {}", inv.enabled());
            info!("      Port: {}", inv.port());
            info!("      Baudrate: {}", inv.baudrate());
        }
        if self.inverters().len() > MAX_INVERTERS {
            warn!(
                "  only the first {} inverters are used, ignoring {} more",
                MAX_INVERTERS,
                self.inverters().len() - MAX_INVERTERS
            );
        }
        info!("  MQTT:");
        info!("    Host: {}", self.mqtt_host());
        info!("    Port: {}", self.mqtt_port());
        info!("    Topic prefix: {}", self.topic_prefix());
        info!("  Poll interval: {}s", c.poll_interval_s.as_secs());
        info!("  Response timeout: {}s", c.connect_timeout_s.as_secs());
        info!("  Reconnect backoff: {}s", c.reconnect_backoff_s.as_secs());
        info!("  Log Level: {}", self.loglevel());
    }
}

impl Config {
    pub fn new(file: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file)
            .map_err(|err| crate::file_error!("error reading {}: {}", file, err))?;

        Self::from_json(&content)
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|err| error::Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), error::Error> {
        let invalid = |msg: String| Err(error::Error::Config(msg));

        if self.mqtt_host.is_empty() {
            return invalid("mqtt_host cannot be empty".to_string());
        }
        if self.mqtt_port == 0 {
            return invalid("mqtt_port must be between 1 and 65535".to_string());
        }
        if self.mqtt_topic_prefix.trim_end_matches('/').is_empty() {
            return invalid("mqtt_topic_prefix cannot be empty".to_string());
        }
        if self.poll_interval_s < Duration::from_secs(1) {
            return invalid("poll_interval_s must be at least 1".to_string());
        }
        if self.connect_timeout_s < Duration::from_secs(1) {
            return invalid("connect_timeout_s must be at least 1".to_string());
        }
        if self.reconnect_backoff_s < Duration::from_secs(1) {
            return invalid("reconnect_backoff_s must be at least 1".to_string());
        }
        if log::LevelFilter::from_str(&self.loglevel).is_err() {
            return invalid(format!("unknown loglevel {:?}", self.loglevel));
        }

        let active: Vec<&Inverter> = self
            .inverters
            .iter()
            .take(MAX_INVERTERS)
            .filter(|i| i.active())
            .collect();
        for (i, inv) in active.iter().enumerate() {
            if inv.name.is_empty() || inv.name.contains(&['/', '+', '#'][..]) {
                return invalid(format!(
                    "inverter name {:?} must be non-empty and free of '/', '+' and '#'",
                    inv.name
                ));
            }
            if inv.baudrate == 0 {
                return invalid(format!("inverter {}: baudrate must be positive", inv.name));
            }
            if active[..i].iter().any(|other| other.name == inv.name) {
                return invalid(format!("inverter name {:?} is used twice", inv.name));
            }
        }

        Ok(())
    }

    fn default_mqtt_host() -> String {
        "core-mosquitto".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_topic_prefix() -> String {
        "voltronic".to_string()
    }

    fn default_mqtt_client_id() -> String {
        "voltronic-bridge".to_string()
    }

    fn default_poll_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_connect_timeout() -> Duration {
        Duration::from_secs(3)
    }

    fn default_reconnect_backoff() -> Duration {
        Duration::from_secs(3)
    }

    fn default_inverter_name() -> String {
        "inv".to_string()
    }

    fn default_baudrate() -> u32 {
        2400
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
