//! MQTT Module
//!
//! Bus side of the bridge.
//!
//! - [`client`] - rumqttc implementation of [`BusTransport`], with its event
//!   loop on a dedicated thread
//! - [`session`] - [`BusSession`], topic callbacks and the cloneable
//!   [`BusPublisher`]
//!
//! Message callbacks run on the bus event-loop thread, never on the thread
//! that drives the link.

pub mod client;
pub mod session;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use client::MqttTransport;
pub use session::{BusPublisher, BusSession};

/// Receives `(topic, payload)` for every inbound message.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus not connected")]
    NotConnected,

    #[error("bus connect failed: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("bus disconnect failed: {0}")]
    Disconnect(String),
}

/// Publish/subscribe capabilities the bus session needs from a broker client.
#[async_trait]
pub trait BusTransport: Send + Sync + 'static {
    /// Connect and start delivering inbound messages to `on_message`.
    async fn connect(&self, on_message: MessageHandler) -> Result<(), BusError>;

    /// Queue one message. Must not block; callable from any thread.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn subscribe(&self, topic: &str) -> Result<(), BusError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError>;

    async fn disconnect(&self) -> Result<(), BusError>;
}

/// MQTT topic filter matching with `+` (one level) and `#` (remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::topic_matches;

    #[test]
    fn test_exact_topic() {
        assert!(topic_matches("iot/ble/esp32/cmd", "iot/ble/esp32/cmd"));
        assert!(!topic_matches("iot/ble/esp32/cmd", "iot/ble/esp32/frame"));
        assert!(!topic_matches("iot/ble/esp32", "iot/ble/esp32/cmd"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("iot/+/esp32/cmd", "iot/ble/esp32/cmd"));
        assert!(!topic_matches("iot/+/cmd", "iot/ble/esp32/cmd"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("iot/#", "iot/ble/esp32/cmd"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("iot/ble/#", "iot/ble"));
        assert!(!topic_matches("iot/wifi/#", "iot/ble/esp32/cmd"));
    }
}
