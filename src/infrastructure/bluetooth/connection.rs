//! BLE Connection Module
//!
//! btleplug implementation of [`LinkTransport`]: peripheral lookup, GATT
//! service discovery and characteristic access.

use crate::infrastructure::bluetooth::{
    ConnectError, LinkTransport, NotificationStream, ReadError, SubscribeError, TeardownError,
    WriteError, WriteMode,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// First adapter reported by the platform manager.
pub async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .context("failed to initialize BLE manager")?;
    let adapters = manager
        .adapters()
        .await
        .context("failed to list BLE adapters")?;
    let adapter = adapters
        .into_iter()
        .next()
        .context("no BLE adapter found")?;

    if let Ok(info) = adapter.adapter_info().await {
        info!("Using BLE adapter: {}", info);
    }
    Ok(adapter)
}

impl From<WriteMode> for WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::Acknowledged => WriteType::WithResponse,
            WriteMode::BestEffort => WriteType::WithoutResponse,
        }
    }
}

/// Address the bridge reports and accepts for `peripheral`.
///
/// CoreBluetooth hides MAC addresses, so the platform id stands in when the
/// address is all zeros.
pub fn link_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        peripheral.id().to_string()
    } else {
        address.to_string()
    }
}

/// Whether `wanted` names the peripheral with MAC `address` or platform `id`.
fn address_matches(address: &str, id: &str, wanted: &str) -> bool {
    let wanted = wanted.trim();
    address.eq_ignore_ascii_case(wanted) || id.eq_ignore_ascii_case(wanted)
}

fn is_peripheral(peripheral: &Peripheral, wanted: &str) -> bool {
    address_matches(
        &peripheral.address().to_string(),
        &peripheral.id().to_string(),
        wanted,
    )
}

/// GATT link to one peripheral through btleplug
pub struct BtleplugLink {
    adapter: Adapter,
    peripheral: Option<Peripheral>,
}

impl BtleplugLink {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripheral: None,
        }
    }

    async fn known_peripheral(&self, address: &str) -> Result<Option<Peripheral>, ConnectError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| ConnectError::Transport(e.to_string()))?;
        Ok(peripherals.into_iter().find(|p| is_peripheral(p, address)))
    }

    /// Look `address` up among known peripherals, scanning until `deadline`
    /// when the platform has not seen it yet.
    async fn find_peripheral(&self, address: &str, deadline: Instant) -> Result<Peripheral, ConnectError> {
        if let Some(peripheral) = self.known_peripheral(address).await? {
            return Ok(peripheral);
        }

        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| ConnectError::Transport(e.to_string()))?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ConnectError::Transport(e.to_string()))?;
        debug!("{} not known yet, scanning for it", address);

        let found = loop {
            let id = match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id))) => id,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break None,
            };
            if let Ok(peripheral) = self.adapter.peripheral(&id).await {
                if is_peripheral(&peripheral, address) {
                    break Some(peripheral);
                }
            }
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match found {
            Some(peripheral) => Ok(peripheral),
            None => self
                .known_peripheral(address)
                .await?
                .ok_or_else(|| ConnectError::DeviceNotFound(address.to_string())),
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Option<(&Peripheral, Characteristic)> {
        let peripheral = self.peripheral.as_ref()?;
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .map(|c| (peripheral, c))
    }
}

#[async_trait]
impl LinkTransport for BtleplugLink {
    async fn connect(&mut self, address: &str, timeout: Duration) -> Result<(), ConnectError> {
        let deadline = Instant::now() + timeout;
        let peripheral = self.find_peripheral(address, deadline).await?;
        info!("Connecting to {}...", address);

        // Held from here on so a later disconnect releases a half-open link
        self.peripheral = Some(peripheral.clone());
        let attempt = async {
            peripheral.connect().await?;
            peripheral.discover_services().await
        };
        let failure = match tokio::time::timeout_at(deadline, attempt).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(ConnectError::Transport(e.to_string())),
            Err(_) => Some(ConnectError::Timeout {
                address: address.to_string(),
                timeout_secs: timeout.as_secs_f64(),
            }),
        };
        if let Some(error) = failure {
            if peripheral.is_connected().await.unwrap_or(false) {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Failed to release {} after connect error: {}", address, e);
                }
            }
            self.peripheral = None;
            return Err(error);
        }

        debug!(
            "Discovered {} characteristics on {}",
            peripheral.characteristics().len(),
            address
        );
        Ok(())
    }

    async fn subscribe(&mut self, characteristic: Uuid) -> Result<NotificationStream, SubscribeError> {
        if self.peripheral.is_none() {
            return Err(SubscribeError::NotConnected);
        }
        let (peripheral, target) = self
            .characteristic(characteristic)
            .ok_or(SubscribeError::CharacteristicNotFound(characteristic))?;

        // Open the stream first so nothing sent right after the CCCD write is lost.
        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| SubscribeError::Transport(e.to_string()))?;
        peripheral
            .subscribe(&target)
            .await
            .map_err(|e| SubscribeError::Transport(e.to_string()))?;

        Ok(notifications
            .filter_map(move |n| async move { (n.uuid == characteristic).then_some(n.value) })
            .boxed())
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), SubscribeError> {
        let (peripheral, target) = self
            .characteristic(characteristic)
            .ok_or(SubscribeError::CharacteristicNotFound(characteristic))?;
        peripheral
            .unsubscribe(&target)
            .await
            .map_err(|e| SubscribeError::Transport(e.to_string()))
    }

    async fn write(
        &mut self,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), WriteError> {
        if self.peripheral.is_none() {
            return Err(WriteError::NotConnected);
        }
        let (peripheral, target) = self
            .characteristic(characteristic)
            .ok_or(WriteError::CharacteristicNotFound(characteristic))?;
        peripheral
            .write(&target, payload, mode.into())
            .await
            .map_err(|e| WriteError::Transport(e.to_string()))
    }

    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>, ReadError> {
        if self.peripheral.is_none() {
            return Err(ReadError::NotConnected);
        }
        let (peripheral, target) = self
            .characteristic(characteristic)
            .ok_or(ReadError::CharacteristicNotFound(characteristic))?;
        peripheral
            .read(&target)
            .await
            .map_err(|e| ReadError::Transport(e.to_string()))
    }

    async fn is_connected(&self) -> bool {
        match &self.peripheral {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn disconnect(&mut self) -> Result<(), TeardownError> {
        match self.peripheral.take() {
            Some(peripheral) => peripheral
                .disconnect()
                .await
                .map_err(|e| TeardownError(e.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_matches_mac_or_platform_id() {
        let mac = "AA:BB:CC:DD:EE:FF";
        let id = "5c1b2f4e-8d3a-4b6c-9e7f-0a1b2c3d4e5f";

        assert!(address_matches(mac, id, "aa:bb:cc:dd:ee:ff"));
        assert!(address_matches("00:00:00:00:00:00", id, "5C1B2F4E-8D3A-4B6C-9E7F-0A1B2C3D4E5F"));
        assert!(address_matches(mac, id, " AA:BB:CC:DD:EE:FF "));
        assert!(!address_matches("00:00:00:00:00:00", id, mac));
    }
}
