//! Link Session Module
//!
//! The session the bridge drives: connect, notification delivery, writes and
//! teardown on top of any [`LinkTransport`].

use crate::domain::frame::Frame;
use crate::domain::models::{CharacteristicConfig, DeviceDescriptor};
use crate::infrastructure::bluetooth::{
    ConnectError, LinkTransport, ReadError, SubscribeError, WriteError, WriteMode,
};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One connection to one peripheral.
///
/// Notifications are consumed by a single task, so `on_frame` sees frames in
/// arrival order and never concurrently with itself.
pub struct LinkSession<L: LinkTransport> {
    transport: L,
    characteristics: CharacteristicConfig,
    connected: bool,
    /// A connect was attempted and the transport may hold a link
    link_opened: bool,
    notify_task: Option<JoinHandle<()>>,
}

impl<L: LinkTransport> LinkSession<L> {
    pub fn new(transport: L, characteristics: CharacteristicConfig) -> Self {
        Self {
            transport,
            characteristics,
            connected: false,
            link_opened: false,
            notify_task: None,
        }
    }

    /// Connect to the resolved address of `descriptor` within `timeout`.
    pub async fn connect(
        &mut self,
        descriptor: &DeviceDescriptor,
        timeout: Duration,
    ) -> Result<(), ConnectError> {
        if self.connected {
            return Err(ConnectError::AlreadyConnected);
        }
        let address = descriptor
            .resolved_address
            .as_deref()
            .ok_or_else(|| ConnectError::DeviceNotFound(descriptor.logical_name.clone()))?;

        self.link_opened = true;
        match tokio::time::timeout(timeout, self.transport.connect(address, timeout)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConnectError::Timeout {
                    address: address.to_string(),
                    timeout_secs: timeout.as_secs_f64(),
                })
            }
        }

        self.connected = true;
        info!("Link connected to {} ({})", descriptor.logical_name, address);
        Ok(())
    }

    /// Subscribe to the notify characteristic and hand every payload to
    /// `on_frame` as a [`Frame`]. Replaces any previous subscription.
    pub async fn enable_notify<F>(&mut self, on_frame: F) -> Result<(), SubscribeError>
    where
        F: Fn(Frame) + Send + 'static,
    {
        if !self.connected {
            return Err(SubscribeError::NotConnected);
        }
        self.stop_notify_task().await;

        let mut stream = self.transport.subscribe(self.characteristics.notify).await?;
        let handle = tokio::spawn(async move {
            while let Some(payload) = stream.next().await {
                on_frame(Frame::from(payload));
            }
            debug!("Notification stream ended");
        });
        self.notify_task = Some(handle);

        info!("Notifications enabled on {}", self.characteristics.notify);
        Ok(())
    }

    /// Stop delivering notifications. Once this returns `on_frame` is never
    /// called again, even if unsubscribing on the peripheral failed.
    pub async fn disable_notify(&mut self) -> Result<(), SubscribeError> {
        let had_task = self.notify_task.is_some();
        self.stop_notify_task().await;

        if !had_task {
            return Ok(());
        }
        if !self.connected {
            return Err(SubscribeError::NotConnected);
        }
        self.transport.unsubscribe(self.characteristics.notify).await
    }

    /// True once the notification stream has ended on its own.
    pub fn notifications_ended(&self) -> bool {
        self.notify_task
            .as_ref()
            .map_or(false, |handle| handle.is_finished())
    }

    async fn stop_notify_task(&mut self) {
        if let Some(handle) = self.notify_task.take() {
            handle.abort();
            // Wait until the task has actually stopped
            let _ = handle.await;
        }
    }

    /// Write `payload` to the write characteristic. Fails fast with
    /// [`WriteError::NotConnected`] when the link is down.
    pub async fn write(&mut self, payload: &[u8], require_ack: bool) -> Result<(), WriteError> {
        if !self.connected || !self.transport.is_connected().await {
            return Err(WriteError::NotConnected);
        }
        self.transport
            .write(
                self.characteristics.write,
                payload,
                WriteMode::from_require_ack(require_ack),
            )
            .await
    }

    /// One read of the notify characteristic.
    pub async fn read_current(&mut self) -> Result<Frame, ReadError> {
        if !self.connected {
            return Err(ReadError::NotConnected);
        }
        let value = self.transport.read(self.characteristics.notify).await?;
        Ok(Frame::from(value))
    }

    /// Whether the session is connected and the transport still reports a link.
    pub async fn is_connected(&self) -> bool {
        self.connected && self.transport.is_connected().await
    }

    /// Best-effort teardown. Always leaves the session disconnected.
    ///
    /// Also releases a link left behind by a connect that failed part way.
    pub async fn disconnect(&mut self) {
        self.stop_notify_task().await;

        if self.link_opened {
            match self.transport.disconnect().await {
                Ok(()) => info!("Link disconnected"),
                Err(e) => warn!("{}", e),
            }
        }
        self.connected = false;
        self.link_opened = false;
    }
}
