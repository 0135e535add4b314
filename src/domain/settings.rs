use crate::domain::models::{
    BusCredentials, BusEndpoint, CharacteristicConfig, DeviceDescriptor, TopicConfig,
};
use crate::infrastructure::bluetooth::protocol;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_mqtt_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Skips discovery when set
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default)]
    pub notify_uuid: Option<String>,
    #[serde(default)]
    pub write_uuid: Option<String>,
    /// Scan and connect timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: None,
            name: default_device_name(),
            notify_uuid: None,
            write_uuid: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_device_name() -> String {
    "ESP32_BLE_DASH".to_string()
}
fn default_timeout_secs() -> f64 {
    10.0
}

/// Upper bound for the scan and connect timeout
const MAX_TIMEOUT: Duration = Duration::from_secs(86_400);

#[derive(Clone, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_bus_host")]
    pub host: String,
    #[serde(default = "default_bus_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_publish_topic")]
    pub publish_topic: String,
    #[serde(default = "default_subscribe_topic")]
    pub subscribe_topic: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            host: default_bus_host(),
            port: default_bus_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            publish_topic: default_publish_topic(),
            subscribe_topic: default_subscribe_topic(),
        }
    }
}

impl fmt::Debug for BusSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() {
                    &"<redacted>"
                } else {
                    &"<not set>"
                },
            )
            .field("client_id", &self.client_id)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("publish_topic", &self.publish_topic)
            .field("subscribe_topic", &self.subscribe_topic)
            .finish()
    }
}

fn default_bus_host() -> String {
    "localhost".to_string()
}
fn default_bus_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "ble-mqtt-bridge".to_string()
}
fn default_keep_alive_secs() -> u64 {
    60
}
fn default_publish_topic() -> String {
    "iot/ble/esp32/frame".to_string()
}
fn default_subscribe_topic() -> String {
    "iot/ble/esp32/cmd".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Pending bus → link writes held between the two schedulers
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_link_check_interval_ms")]
    pub link_check_interval_ms: u64,
    /// Read the notify characteristic once after connecting and publish it
    #[serde(default = "default_false")]
    pub publish_initial_value: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            link_check_interval_ms: default_link_check_interval_ms(),
            publish_initial_value: default_false(),
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}
fn default_link_check_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default, alias = "log")]
    pub log_settings: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("missing {0} characteristic UUID")]
    MissingCharacteristic(&'static str),

    #[error("invalid {field} characteristic UUID '{value}'")]
    InvalidUuid { field: &'static str, value: String },

    #[error("timeout must be a positive number of seconds up to one day, got {0}")]
    InvalidTimeout(f64),

    #[error("handoff queue capacity must be at least 1")]
    InvalidQueueCapacity,

    #[error("{0} topic must not be empty")]
    EmptyTopic(&'static str),

    #[error("device name must not be empty when no address is given")]
    EmptyDeviceName,
}

/// Validated, immutable startup configuration for one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub device: DeviceDescriptor,
    pub characteristics: CharacteristicConfig,
    pub topics: TopicConfig,
    pub endpoint: BusEndpoint,
    pub credentials: Option<BusCredentials>,
    pub timeout: Duration,
    pub queue_capacity: usize,
    pub link_check_interval: Duration,
    pub publish_initial_value: bool,
}

impl BridgeSettings {
    /// Load settings from `explicit` if given, otherwise from the default
    /// location when a file exists there, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("ble-mqtt-bridge");
        path.push("settings.json");
        Some(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings at {}", path.display()))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings at {}", path.display()))?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<BridgeConfig, SettingsError> {
        let device = &self.device;
        let bus = &self.bus;

        let notify = parse_characteristic("notify", device.notify_uuid.as_deref())?;
        let write = parse_characteristic("write", device.write_uuid.as_deref())?;

        let timeout = Duration::try_from_secs_f64(device.timeout_secs)
            .ok()
            .filter(|t| !t.is_zero() && *t <= MAX_TIMEOUT)
            .ok_or(SettingsError::InvalidTimeout(device.timeout_secs))?;
        if self.relay.queue_capacity == 0 {
            return Err(SettingsError::InvalidQueueCapacity);
        }
        if bus.publish_topic.trim().is_empty() {
            return Err(SettingsError::EmptyTopic("publish"));
        }
        if bus.subscribe_topic.trim().is_empty() {
            return Err(SettingsError::EmptyTopic("subscribe"));
        }

        let descriptor = match device.address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => {
                DeviceDescriptor::with_address(device.name.trim(), address)
            }
            _ => {
                if device.name.trim().is_empty() {
                    return Err(SettingsError::EmptyDeviceName);
                }
                DeviceDescriptor::by_name(device.name.trim())
            }
        };

        let credentials = bus.username.as_ref().map(|username| BusCredentials {
            username: username.clone(),
            password: bus.password.clone(),
        });

        Ok(BridgeConfig {
            device: descriptor,
            characteristics: CharacteristicConfig { notify, write },
            topics: TopicConfig {
                publish_topic: bus.publish_topic.clone(),
                subscribe_topic: bus.subscribe_topic.clone(),
            },
            endpoint: BusEndpoint {
                host: bus.host.clone(),
                port: bus.port,
                client_id: bus.client_id.clone(),
                keep_alive_secs: bus.keep_alive_secs,
            },
            credentials,
            timeout,
            queue_capacity: self.relay.queue_capacity,
            link_check_interval: Duration::from_millis(self.relay.link_check_interval_ms.max(10)),
            publish_initial_value: self.relay.publish_initial_value,
        })
    }
}

fn parse_characteristic(
    field: &'static str,
    value: Option<&str>,
) -> Result<uuid::Uuid, SettingsError> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or(SettingsError::MissingCharacteristic(field))?;
    protocol::parse_uuid(value).map_err(|_| SettingsError::InvalidUuid {
        field,
        value: value.to_string(),
    })
}
