//! btleplug backend
//!
//! Scans, connects and writes through the platform bluetooth stack.

use std::time::Duration;

use btleplug::api::{
    Central as _, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
    Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use reptrap_proto::ble::SERVICE_UUID;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{Central, GattLink, TransportError};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A device seen while scanning
#[derive(Debug, Clone)]
pub struct TrapDevice {
    pub name: String,
    pub id: String,
    pub address: String,
    pub rssi: Option<i16>,
    /// Advertises the trap service
    pub is_trap: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

/// Scan for BLE devices
///
/// Returns everything seen during `duration`. Trap devices have `is_trap = true`.
pub async fn scan(adapter: &Adapter, duration: Duration) -> Result<Vec<TrapDevice>, TransportError> {
    let guard = ScanGuard::start(adapter, ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            devices.push(TrapDevice {
                name: props.local_name.unwrap_or_else(|| "Unknown".to_string()),
                id: peripheral.id().to_string(),
                address: peripheral.address().to_string(),
                rssi: props.rssi,
                is_trap: props.services.contains(&SERVICE_UUID),
            });
        }
    }

    guard.stop().await;
    Ok(devices)
}

/// Stops the scan when dropped, so a scan abandoned by a timeout does not
/// keep running
struct ScanGuard {
    adapter: Option<Adapter>,
}

impl ScanGuard {
    async fn start(adapter: &Adapter, filter: ScanFilter) -> Result<Self, TransportError> {
        adapter.start_scan(filter).await?;
        Ok(Self {
            adapter: Some(adapter.clone()),
        })
    }

    async fn stop(mut self) {
        if let Some(adapter) = self.adapter.take() {
            if let Err(error) = adapter.stop_scan().await {
                debug!(%error, "failed to stop scan cleanly");
            }
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let Some(adapter) = self.adapter.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = adapter.stop_scan().await;
            });
        }
    }
}

/// The platform adapter
#[derive(Debug, Clone)]
pub struct BtleCentral {
    adapter: Adapter,
}

impl BtleCentral {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    pub async fn default_adapter() -> Result<Self, TransportError> {
        Ok(Self::new(get_adapter().await?))
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Poll the scan results until `accept` picks a peripheral
    async fn find(
        &self,
        filter: ScanFilter,
        accept: impl Fn(&Peripheral, &[Uuid]) -> bool,
    ) -> Result<Peripheral, TransportError> {
        let guard = ScanGuard::start(&self.adapter, filter).await?;
        loop {
            for peripheral in self.adapter.peripherals().await? {
                let Some(services) = advertised_services(peripheral.properties().await) else {
                    debug!(id = %peripheral.id(), "skipping peripheral with unreadable properties");
                    continue;
                };
                if accept(&peripheral, &services) {
                    guard.stop().await;
                    return Ok(peripheral);
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn open(&self, peripheral: Peripheral) -> Result<BtleLink, TransportError> {
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        info!(id = %peripheral.id(), address = %peripheral.address(), "peripheral connected");
        Ok(BtleLink { peripheral })
    }
}

#[async_trait::async_trait]
impl Central for BtleCentral {
    type Link = BtleLink;

    async fn ensure_permission(&self) -> Result<(), TransportError> {
        let info = self.adapter.adapter_info().await?;
        debug!(adapter = %info, "bluetooth available");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn connect_known(&self, id: &str) -> Result<BtleLink, TransportError> {
        let peripheral = self
            .find(ScanFilter::default(), |peripheral, _| {
                is_known(
                    id,
                    &peripheral.id().to_string(),
                    &peripheral.address().to_string(),
                )
            })
            .await?;
        self.open(peripheral).await
    }

    #[instrument(skip(self))]
    async fn connect_first(&self, services: &[Uuid]) -> Result<BtleLink, TransportError> {
        let filter = ScanFilter {
            services: services.to_vec(),
        };
        let peripheral = self
            .find(filter, |_, advertised| {
                advertised.iter().any(|uuid| services.contains(uuid))
            })
            .await?;
        self.open(peripheral).await
    }
}

/// Services a peripheral advertises; `None` when its properties could not
/// be read
fn advertised_services(
    properties: Result<Option<PeripheralProperties>, btleplug::Error>,
) -> Option<Vec<Uuid>> {
    match properties {
        Ok(Some(props)) => Some(props.services),
        Ok(None) => Some(Vec::new()),
        Err(error) => {
            debug!(%error, "reading peripheral properties failed");
            None
        }
    }
}

/// Fixed identifiers are compared against both the platform id and the
/// address, ignoring case
fn is_known(wanted: &str, id: &str, address: &str) -> bool {
    wanted.eq_ignore_ascii_case(id) || wanted.eq_ignore_ascii_case(address)
}

/// A connected peripheral
#[derive(Debug, Clone)]
pub struct BtleLink {
    peripheral: Peripheral,
}

impl BtleLink {
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

#[async_trait::async_trait]
impl GattLink for BtleLink {
    type Service = Service;
    type Characteristic = Characteristic;

    async fn request_mtu(&self, mtu: u16) -> Result<(), TransportError> {
        // btleplug leaves MTU negotiation to the platform stack
        debug!(mtu, "mtu negotiation left to the platform");
        Ok(())
    }

    async fn discover_service(&self, uuid: Uuid) -> Result<Option<Service>, TransportError> {
        self.peripheral.discover_services().await?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .find(|service| service.uuid == uuid))
    }

    async fn discover_characteristic(
        &self,
        service: &Service,
        uuid: Uuid,
    ) -> Result<Option<Characteristic>, TransportError> {
        Ok(service
            .characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .cloned())
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<(), TransportError> {
        self.peripheral
            .write(characteristic, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_device_matches_address_or_platform_id() {
        assert!(is_known("dc:54:75:f1:e1:b6", "hci0/dev_DC_54_75_F1_E1_B6", "DC:54:75:F1:E1:B6"));
        assert!(is_known(
            "36C8E420-24EE-773D-7910-4FDFB981A17E",
            "36c8e420-24ee-773d-7910-4fdfb981a17e",
            "00:00:00:00:00:00"
        ));
        assert!(!is_known("DC:54:75:F1:E1:B6", "other", "00:11:22:33:44:55"));
    }

    #[test]
    fn unreadable_properties_skip_the_peripheral() {
        assert_eq!(advertised_services(Err(btleplug::Error::DeviceNotFound)), None);
        assert_eq!(advertised_services(Ok(None)), Some(Vec::new()));

        let props = PeripheralProperties {
            services: vec![SERVICE_UUID],
            ..PeripheralProperties::default()
        };
        assert_eq!(advertised_services(Ok(Some(props))), Some(vec![SERVICE_UUID]));
    }
}
