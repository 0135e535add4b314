//! Infrastructure Layer
//!
//! Adapters to the outside world: the BLE link, the MQTT bus and logging.

pub mod bluetooth;
pub mod logging;
pub mod mqtt;
