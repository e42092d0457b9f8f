use crate::ble::{device_identifier, matches_target, notify_characteristics};
use crate::error::ScanError;
use crate::measurement::{HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID};
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub id: String,
    pub name: String,
    pub advertises_heart_rate: bool,
}

impl BluetoothDevice {
    pub fn new(id: String, name: String, advertises_heart_rate: bool) -> Self {
        Self {
            id,
            name,
            advertises_heart_rate,
        }
    }
}

impl fmt::Display for BluetoothDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)?;
        if self.advertises_heart_rate {
            write!(f, " [heart rate]")?;
        }
        Ok(())
    }
}

/// One line of a characteristic listing; the standard measurement is flagged.
pub fn describe_characteristic(uuid: Uuid) -> String {
    if uuid == HEART_RATE_MEASUREMENT_UUID {
        format!("{}  <- Heart Rate Measurement", uuid)
    } else {
        uuid.to_string()
    }
}

/// Pick the sensor to monitor: the first device advertising the Heart Rate
/// service, otherwise the first one whose name suggests a heart rate strap.
pub fn pick_heart_rate_device(devices: &[BluetoothDevice]) -> Option<&BluetoothDevice> {
    devices
        .iter()
        .find(|d| d.advertises_heart_rate)
        .or_else(|| {
            devices.iter().find(|d| {
                let name = d.name.to_lowercase();
                name.contains("heart") || name.contains("hrm") || name.contains("polar")
            })
        })
}

/// Scan on the first adapter for `duration` and return it with its findings
async fn scan_adapter(duration: Duration) -> Result<Adapter, ScanError> {
    let manager = Manager::new()
        .await
        .map_err(|e| ScanError::ManagerInit(e.to_string()))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| ScanError::ManagerInit(e.to_string()))?;

    let central = adapters.into_iter().next().ok_or(ScanError::NoAdapters)?;

    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| ScanError::ScanFailed(format!("Failed to start scan: {}", e)))?;

    log::info!("Scanning for {:?}...", duration);
    tokio::time::sleep(duration).await;

    central
        .stop_scan()
        .await
        .map_err(|e| ScanError::ScanFailed(format!("Failed to stop scan: {}", e)))?;

    Ok(central)
}

/// Scans for nearby Bluetooth devices for `duration`
pub async fn scan_devices(duration: Duration) -> Result<Vec<BluetoothDevice>, ScanError> {
    let central = scan_adapter(duration).await?;

    let peripherals = central
        .peripherals()
        .await
        .map_err(|e| ScanError::ScanFailed(format!("Failed to get peripherals: {}", e)))?;

    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Ok(Some(props)) = peripheral.properties().await {
            let name = props
                .local_name
                .unwrap_or_else(|| "Unknown device".to_string());
            let advertises_heart_rate = props.services.contains(&HEART_RATE_SERVICE_UUID);
            devices.push(BluetoothDevice::new(
                device_identifier(&peripheral),
                name,
                advertises_heart_rate,
            ));
        }
    }

    log::debug!("Scan found {} devices", devices.len());
    Ok(devices)
}

/// Connect to `address` long enough to list the characteristics it can notify on.
///
/// A device that was already connected is left connected.
pub async fn list_notify_characteristics(
    address: &str,
    duration: Duration,
) -> Result<Vec<Uuid>, ScanError> {
    let central = scan_adapter(duration).await?;

    let inspect_error = |reason: String| ScanError::Inspect {
        device_id: address.to_string(),
        reason,
    };

    let peripheral = central
        .peripherals()
        .await
        .map_err(|e| inspect_error(e.to_string()))?
        .into_iter()
        .find(|p| matches_target(p, address))
        .ok_or_else(|| inspect_error("not seen during scan".to_string()))?;

    let was_connected = peripheral
        .is_connected()
        .await
        .map_err(|e| inspect_error(e.to_string()))?;
    if !was_connected {
        peripheral
            .connect()
            .await
            .map_err(|e| inspect_error(e.to_string()))?;
    }

    let discovered = peripheral.discover_services().await;
    let characteristics = notify_characteristics(&peripheral);

    if !was_connected {
        if let Err(e) = peripheral.disconnect().await {
            log::debug!("Disconnect after listing failed: {}", e);
        }
    }

    discovered.map_err(|e| inspect_error(e.to_string()))?;
    Ok(characteristics)
}
