//! # btleplug Transport
//!
//! `Connector`/`Link` implementation on top of btleplug.
//!
//! The adapter is resolved lazily on the first connection attempt so that all
//! btleplug objects live on the session thread's runtime. A device that the
//! adapter has not seen yet triggers a background scan; the attempt fails with
//! `DeviceNotFound` and the retry after backoff usually finds it.
//!
//! A peripheral is recorded as pending from the moment `connect` starts
//! opening it until a `BleLink` owns it, so an attempt that is dropped
//! halfway can still be disconnected through `abort_pending`.

use crate::error::ConnectionError;
use crate::link::{Connector, Link};
use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::OnceCell;
use uuid::Uuid;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Identifier shown to the user and accepted as a connection target.
///
/// The hardware address where the platform exposes one, otherwise
/// (macOS) the platform peripheral id.
pub fn device_identifier(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        peripheral.id().to_string()
    } else {
        address.to_string()
    }
}

pub fn matches_target(peripheral: &Peripheral, target: &str) -> bool {
    let target = target.trim();
    peripheral.address().to_string().eq_ignore_ascii_case(target)
        || peripheral.id().to_string().eq_ignore_ascii_case(target)
}

/// Characteristics of a discovered peripheral that support notifications
pub fn notify_characteristics(peripheral: &Peripheral) -> Vec<Uuid> {
    peripheral
        .characteristics()
        .into_iter()
        .filter(|c| c.properties.contains(CharPropFlags::NOTIFY))
        .map(|c| c.uuid)
        .collect()
}

#[derive(Default)]
pub struct BleConnector {
    adapter: OnceCell<Adapter>,
    pending: Mutex<Option<Peripheral>>,
}

impl BleConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, Option<Peripheral>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn adapter(&self) -> Result<&Adapter, ConnectionError> {
        self.adapter
            .get_or_try_init(|| async {
                let manager = Manager::new().await.map_err(|e| {
                    log::error!("Failed to create BLE manager: {}", e);
                    ConnectionError::NoAdapter
                })?;
                let adapters = manager.adapters().await.map_err(|e| {
                    log::error!("Failed to get adapters: {}", e);
                    ConnectionError::NoAdapter
                })?;
                adapters.into_iter().next().ok_or(ConnectionError::NoAdapter)
            })
            .await
    }

    async fn find_peripheral(
        &self,
        adapter: &Adapter,
        address: &str,
    ) -> Result<Peripheral, ConnectionError> {
        let peripherals = adapter.peripherals().await.map_err(|e| {
            ConnectionError::DeviceConnection {
                device_id: address.to_string(),
                reason: e.to_string(),
            }
        })?;

        if let Some(peripheral) = peripherals.into_iter().find(|p| matches_target(p, address)) {
            if let Err(e) = adapter.stop_scan().await {
                log::debug!("Failed to stop scan: {}", e);
            }
            return Ok(peripheral);
        }

        log::debug!("{} not known to the adapter yet, scanning", address);
        if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
            log::warn!("Failed to start scan: {}", e);
        }
        Err(ConnectionError::DeviceNotFound(address.to_string()))
    }
}

#[async_trait]
impl Connector for BleConnector {
    type Link = BleLink;

    async fn connect(
        &self,
        address: &str,
        characteristic: Uuid,
    ) -> Result<BleLink, ConnectionError> {
        let adapter = self.adapter().await?;
        let peripheral = self.find_peripheral(adapter, address).await?;

        *self.pending() = Some(peripheral.clone());
        let opened = open(&peripheral, address, characteristic).await;
        self.pending().take();

        match opened {
            Ok((characteristic, notifications)) => Ok(BleLink {
                peripheral,
                characteristic,
                notifications,
            }),
            Err(e) => {
                if let Err(release) = peripheral.disconnect().await {
                    log::debug!("Disconnect after failed attempt: {}", release);
                }
                Err(e)
            }
        }
    }

    async fn abort_pending(&self) {
        let pending = self.pending().take();
        let Some(peripheral) = pending else {
            return;
        };
        log::debug!("Disconnecting half-open {}", device_identifier(&peripheral));
        if let Err(e) = peripheral.disconnect().await {
            log::debug!("Disconnect of half-open peripheral failed: {}", e);
        }
    }
}

/// Connect if needed, then discover and subscribe.
async fn open(
    peripheral: &Peripheral,
    address: &str,
    characteristic: Uuid,
) -> Result<(Characteristic, NotificationStream), ConnectionError> {
    let device_error = |e: btleplug::Error| ConnectionError::DeviceConnection {
        device_id: address.to_string(),
        reason: e.to_string(),
    };

    if !peripheral.is_connected().await.map_err(device_error)? {
        peripheral.connect().await.map_err(device_error)?;
    }
    peripheral.discover_services().await.map_err(device_error)?;

    let Some(characteristic) = peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic && c.properties.contains(CharPropFlags::NOTIFY))
    else {
        let available: Vec<String> = notify_characteristics(peripheral)
            .iter()
            .map(Uuid::to_string)
            .collect();
        log::warn!(
            "{} has no notifiable {}; notify characteristics: [{}]",
            address,
            characteristic,
            available.join(", ")
        );
        return Err(ConnectionError::CharacteristicNotFound {
            device_id: address.to_string(),
            characteristic: characteristic.to_string(),
        });
    };

    let notifications = peripheral.notifications().await.map_err(device_error)?;
    peripheral.subscribe(&characteristic).await.map_err(device_error)?;

    Ok((characteristic, notifications))
}

/// A connected peripheral subscribed to one characteristic
pub struct BleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
    notifications: NotificationStream,
}

#[async_trait]
impl Link for BleLink {
    async fn next_notification(&mut self) -> Option<Vec<u8>> {
        while let Some(notification) = self.notifications.next().await {
            if notification.uuid == self.characteristic.uuid {
                return Some(notification.value);
            }
        }
        None
    }

    async fn is_connected(&mut self) -> Result<bool, ConnectionError> {
        self.peripheral
            .is_connected()
            .await
            .map_err(|e| ConnectionError::DeviceConnection {
                device_id: device_identifier(&self.peripheral),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if let Err(e) = self.peripheral.unsubscribe(&self.characteristic).await {
            log::debug!("Unsubscribe failed: {}", e);
        }
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| ConnectionError::DeviceConnection {
                device_id: device_identifier(&self.peripheral),
                reason: e.to_string(),
            })
    }
}
