//! BLE Scanner Module
//!
//! Discovery pass over nearby advertisers and name → address resolution.

use crate::domain::models::{DeviceDescriptor, DiscoveredDevice};
use crate::infrastructure::bluetooth::connection::link_address;
use crate::infrastructure::bluetooth::{DeviceScanner, ResolutionError};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, PeripheralId};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// btleplug-backed scanner over a single adapter
pub struct BtleplugScanner {
    adapter: Adapter,
}

impl BtleplugScanner {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    async fn describe(&self, id: &PeripheralId) -> Option<DiscoveredDevice> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok().flatten();

        Some(DiscoveredDevice {
            name: properties.as_ref().and_then(|p| p.local_name.clone()),
            address: link_address(&peripheral),
            rssi: properties.and_then(|p| p.rssi),
        })
    }

    /// Insert or refresh a device, keeping first-seen order.
    fn record(seen: &mut Vec<DiscoveredDevice>, device: DiscoveredDevice) {
        match seen.iter_mut().find(|d| d.address == device.address) {
            Some(existing) => {
                if device.name.is_some() {
                    existing.name = device.name;
                }
                if device.rssi.is_some() {
                    existing.rssi = device.rssi;
                }
            }
            None => {
                debug!("Discovered {} ({:?})", device.address, device.name);
                seen.push(device);
            }
        }
    }
}

#[async_trait]
impl DeviceScanner for BtleplugScanner {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, ResolutionError> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| ResolutionError::Scan(e.to_string()))?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ResolutionError::Scan(e.to_string()))?;
        info!("Scanning for {:.1}s...", timeout.as_secs_f64());

        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();

        loop {
            let event = match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => break,
            };

            match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    if let Some(device) = self.describe(&id).await {
                        Self::record(&mut seen, device);
                    }
                }
                _ => {}
            }
        }

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        // Peripherals cached by the OS before the scan started never raise
        // DeviceDiscovered; fold them in after everything seen live.
        if let Ok(peripherals) = self.adapter.peripherals().await {
            for peripheral in peripherals {
                if let Some(device) = self.describe(&peripheral.id()).await {
                    Self::record(&mut seen, device);
                }
            }
        }

        Ok(seen)
    }
}

/// First device whose advertised name equals `name` exactly, in discovery order.
pub fn select_device<'a>(name: &str, devices: &'a [DiscoveredDevice]) -> Option<&'a DiscoveredDevice> {
    devices
        .iter()
        .find(|d| d.name.as_deref().map(str::trim) == Some(name))
}

/// Maps a logical device name to a link address with one discovery pass.
pub struct DeviceResolver<S: DeviceScanner> {
    scanner: S,
}

impl<S: DeviceScanner> DeviceResolver<S> {
    pub fn new(scanner: S) -> Self {
        Self { scanner }
    }

    /// Resolve `descriptor` to an address.
    ///
    /// A descriptor that already carries an address is returned untouched
    /// without scanning. Otherwise the first advertiser whose trimmed name
    /// matches exactly wins; when nothing matches, every device seen is
    /// logged and [`ResolutionError::NotFound`] is returned.
    pub async fn resolve(
        &self,
        descriptor: DeviceDescriptor,
        timeout: Duration,
    ) -> Result<DeviceDescriptor, ResolutionError> {
        if descriptor.resolved_address.is_some() {
            return Ok(descriptor);
        }

        let name = descriptor.logical_name.trim().to_string();
        info!("Resolving device '{}'", name);
        let devices = self.scanner.discover(timeout).await?;

        match select_device(&name, &devices) {
            Some(device) => {
                info!("Found '{}' at {}", name, device.address);
                Ok(descriptor.resolved(device.address.clone()))
            }
            None => {
                warn!("Device '{}' not found. Seen during scan:", name);
                for device in &devices {
                    warn!(
                        "  - {} {} rssi={}",
                        device.address,
                        device.name.as_deref().unwrap_or("<unnamed>"),
                        device
                            .rssi
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "?".to_string())
                    );
                }
                Err(ResolutionError::NotFound {
                    name,
                    timeout_secs: timeout.as_secs_f64(),
                })
            }
        }
    }
}
