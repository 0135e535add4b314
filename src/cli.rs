//! Command-line interface. Flags override values from the settings file.

use crate::domain::settings::BridgeSettings;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "ble-mqtt-bridge",
    version,
    about = "Relay BLE GATT notifications to MQTT and MQTT commands back to the peripheral"
)]
pub struct Cli {
    /// Peripheral address; skips discovery
    #[arg(long, conflicts_with = "name")]
    pub address: Option<String>,

    /// Advertised name to discover [default: ESP32_BLE_DASH]
    #[arg(long)]
    pub name: Option<String>,

    /// Notify characteristic UUID (link → bus)
    #[arg(long = "notify", value_name = "UUID")]
    pub notify_uuid: Option<String>,

    /// Write characteristic UUID (bus → link)
    #[arg(long = "write", value_name = "UUID")]
    pub write_uuid: Option<String>,

    /// Scan and connect timeout [default: 10]
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Broker host [default: localhost]
    #[arg(long = "bus-host", alias = "mqtt-host", value_name = "HOST")]
    pub bus_host: Option<String>,

    /// Broker port [default: 1883]
    #[arg(long = "bus-port", alias = "mqtt-port", value_name = "PORT")]
    pub bus_port: Option<u16>,

    #[arg(
        long = "bus-username",
        alias = "mqtt-username",
        env = "BRIDGE_BUS_USERNAME",
        value_name = "USER"
    )]
    pub bus_username: Option<String>,

    #[arg(
        long = "bus-password",
        alias = "mqtt-password",
        env = "BRIDGE_BUS_PASSWORD",
        hide_env_values = true,
        value_name = "PASSWORD"
    )]
    pub bus_password: Option<String>,

    /// Topic notifications are published to [default: iot/ble/esp32/frame]
    #[arg(long = "pub-topic", alias = "pub", value_name = "TOPIC")]
    pub pub_topic: Option<String>,

    /// Topic whose messages are written to the peripheral [default: iot/ble/esp32/cmd]
    #[arg(long = "sub-topic", alias = "sub", value_name = "TOPIC")]
    pub sub_topic: Option<String>,

    #[arg(long = "client-id", value_name = "ID")]
    pub client_id: Option<String>,

    /// MQTT keep-alive [default: 60]
    #[arg(long = "keep-alive", value_name = "SECONDS")]
    pub keep_alive: Option<u64>,

    /// Commands held while the link is busy [default: 64]
    #[arg(long = "queue-capacity", value_name = "N")]
    pub queue_capacity: Option<usize>,

    /// Read the notify characteristic once after connecting and publish it
    #[arg(long = "publish-initial")]
    pub publish_initial: bool,

    /// Settings file (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `info,ble_mqtt_bridge=trace`
    #[arg(long = "log-level", value_name = "FILTER")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Overlay every flag that was given onto `settings`.
    pub fn apply(&self, settings: &mut BridgeSettings) {
        let device = &mut settings.device;
        if let Some(address) = &self.address {
            device.address = Some(address.clone());
        }
        if let Some(name) = &self.name {
            // An explicit name always means discovery
            device.name = name.clone();
            device.address = None;
        }
        if let Some(uuid) = &self.notify_uuid {
            device.notify_uuid = Some(uuid.clone());
        }
        if let Some(uuid) = &self.write_uuid {
            device.write_uuid = Some(uuid.clone());
        }
        if let Some(timeout) = self.timeout {
            device.timeout_secs = timeout;
        }

        let bus = &mut settings.bus;
        if let Some(host) = &self.bus_host {
            bus.host = host.clone();
        }
        if let Some(port) = self.bus_port {
            bus.port = port;
        }
        if let Some(username) = &self.bus_username {
            bus.username = Some(username.clone());
        }
        if let Some(password) = &self.bus_password {
            bus.password = Some(password.clone());
        }
        if let Some(topic) = &self.pub_topic {
            bus.publish_topic = topic.clone();
        }
        if let Some(topic) = &self.sub_topic {
            bus.subscribe_topic = topic.clone();
        }
        if let Some(client_id) = &self.client_id {
            bus.client_id = client_id.clone();
        }
        if let Some(keep_alive) = self.keep_alive {
            bus.keep_alive_secs = keep_alive;
        }

        if let Some(capacity) = self.queue_capacity {
            settings.relay.queue_capacity = capacity;
        }
        if self.publish_initial {
            settings.relay.publish_initial_value = true;
        }
        if let Some(level) = &self.log_level {
            settings.log_settings.level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ble-mqtt-bridge").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_settings() {
        let cli = parse(&[
            "--name",
            "SENSOR_1",
            "--notify",
            "2a37",
            "--write",
            "2a38",
            "--bus-host",
            "broker.local",
            "--pub-topic",
            "a/b",
            "--queue-capacity",
            "8",
            "--publish-initial",
        ]);
        let mut settings = BridgeSettings::default();
        settings.device.address = Some("AA:BB:CC:DD:EE:FF".to_string());
        cli.apply(&mut settings);

        assert_eq!(settings.device.name, "SENSOR_1");
        assert_eq!(settings.device.address, None);
        assert_eq!(settings.device.notify_uuid.as_deref(), Some("2a37"));
        assert_eq!(settings.bus.host, "broker.local");
        assert_eq!(settings.bus.port, 1883);
        assert_eq!(settings.bus.publish_topic, "a/b");
        assert_eq!(settings.bus.subscribe_topic, "iot/ble/esp32/cmd");
        assert_eq!(settings.relay.queue_capacity, 8);
        assert!(settings.relay.publish_initial_value);
    }

    #[test]
    fn test_original_tool_aliases() {
        let cli = parse(&[
            "--mqtt-host",
            "10.0.0.2",
            "--mqtt-port",
            "8883",
            "--mqtt-username",
            "bridge",
            "--mqtt-password",
            "pw",
            "--pub",
            "out",
            "--sub",
            "in",
        ]);
        assert_eq!(cli.bus_host.as_deref(), Some("10.0.0.2"));
        assert_eq!(cli.bus_port, Some(8883));
        assert_eq!(cli.bus_username.as_deref(), Some("bridge"));
        assert_eq!(cli.bus_password.as_deref(), Some("pw"));
        assert_eq!(cli.pub_topic.as_deref(), Some("out"));
        assert_eq!(cli.sub_topic.as_deref(), Some("in"));
    }

    #[test]
    fn test_address_and_name_conflict() {
        let result = Cli::try_parse_from([
            "ble-mqtt-bridge",
            "--address",
            "AA:BB:CC:DD:EE:FF",
            "--name",
            "ESP32_BLE_DASH",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_absent_flags_keep_file_values() {
        let cli = parse(&[]);
        let mut settings = BridgeSettings::default();
        settings.bus.port = 8883;
        settings.device.address = Some("AA:BB:CC:DD:EE:FF".to_string());
        cli.apply(&mut settings);

        assert_eq!(settings.bus.port, 8883);
        assert_eq!(settings.device.address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert!(!settings.relay.publish_initial_value);
    }
}
