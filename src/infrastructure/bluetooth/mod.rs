//! Bluetooth Module
//!
//! Link side of the bridge: device discovery and the GATT session to the
//! peripheral.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      LinkSession                         │
//! │   (connection state, notify task, fail-fast writes)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ LinkTransport
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - name    │  │ - btleplug │  │ - UUIDs  │
//! │   lookup  │  │   GATT     │  │ - write  │
//! │           │  │            │  │   modes  │
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUID parsing and write modes
//! - [`scanner`] - Discovery pass and name → address resolution
//! - [`connection`] - btleplug implementation of [`LinkTransport`]
//! - [`service`] - [`LinkSession`], the session the bridge drives

pub mod connection;
pub mod error;
pub mod protocol;
pub mod scanner;
pub mod service;

use crate::domain::models::DiscoveredDevice;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::time::Duration;
use uuid::Uuid;

pub use error::{ConnectError, ReadError, ResolutionError, SubscribeError, TeardownError, WriteError};
pub use protocol::WriteMode;
pub use scanner::DeviceResolver;
pub use service::LinkSession;

/// Raw notification payloads for one characteristic, in arrival order.
/// The stream ends when the link goes away.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// One discovery pass over nearby advertisers.
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// Devices seen within `timeout`, in the order they were first seen
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, ResolutionError>;
}

/// GATT capabilities the link session needs from the wireless stack.
#[async_trait]
pub trait LinkTransport: Send + 'static {
    async fn connect(&mut self, address: &str, timeout: Duration) -> Result<(), ConnectError>;

    async fn subscribe(&mut self, characteristic: Uuid) -> Result<NotificationStream, SubscribeError>;

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), SubscribeError>;

    async fn write(
        &mut self,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), WriteError>;

    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>, ReadError>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), TeardownError>;
}
