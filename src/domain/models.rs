use crate::domain::state::ConnectionState;
use std::fmt;
use uuid::Uuid;

/// A peripheral known by its advertised name, plus the address it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub logical_name: String,
    pub resolved_address: Option<String>,
}

impl DeviceDescriptor {
    /// Descriptor that still needs a discovery pass
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            logical_name: name.into(),
            resolved_address: None,
        }
    }

    /// Descriptor whose address was supplied up front
    pub fn with_address(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            logical_name: name.into(),
            resolved_address: Some(address.into()),
        }
    }

    /// Returns a resolved copy. An already-resolved descriptor is never rewritten.
    pub fn resolved(self, address: impl Into<String>) -> Self {
        match self.resolved_address {
            Some(_) => self,
            None => Self {
                logical_name: self.logical_name,
                resolved_address: Some(address.into()),
            },
        }
    }
}

/// One advertisement seen during a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
}

/// Characteristics the bridge talks to on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicConfig {
    /// Frames arrive here as notifications
    pub notify: Uuid,
    /// Commands from the bus are written here
    pub write: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    /// Link → bus
    pub publish_topic: String,
    /// Bus → link
    pub subscribe_topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEndpoint {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl fmt::Display for BusEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BusCredentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for BusCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusCredentials")
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() {
                    &"<redacted>"
                } else {
                    &"<not set>"
                },
            )
            .finish()
    }
}

/// Why a bus → link command never reached the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// State was outside Connected/NotifyActive/Relaying
    NotRelaying(ConnectionState),
    /// Handoff queue was at capacity
    QueueFull,
    /// Handoff queue already closed by shutdown
    QueueClosed,
    /// The link write itself failed
    WriteFailed(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRelaying(state) => write!(f, "bridge not relaying (state {})", state),
            Self::QueueFull => write!(f, "handoff queue full"),
            Self::QueueClosed => write!(f, "handoff queue closed"),
            Self::WriteFailed(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// Reports emitted by the bridge while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    StateChanged(ConnectionState),
    FramePublished { topic: String, text: String },
    PublishFailed { topic: String, reason: String },
    CommandWritten { seq: u64, len: usize },
    CommandDropped { seq: u64, reason: DropReason },
    LinkLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_keeps_existing_address() {
        let desc = DeviceDescriptor::with_address("ESP32_BLE_DASH", "AA:BB:CC:DD:EE:FF");
        let again = desc.clone().resolved("11:22:33:44:55:66");
        assert_eq!(again, desc);
    }

    #[test]
    fn test_resolved_fills_missing_address() {
        let desc = DeviceDescriptor::by_name("ESP32_BLE_DASH").resolved("AA:BB:CC:DD:EE:FF");
        assert_eq!(desc.resolved_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = BusCredentials {
            username: "bridge".to_string(),
            password: Some("hunter2".to_string()),
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
