//! Transport seam between the session logic and a BLE stack
//!
//! [`crate::ble`] implements these traits on top of btleplug. Tests use an
//! in-memory device.

use uuid::Uuid;

use crate::TransportError;

/// An adapter able to reach the trap peripheral.
///
/// The session owns one of these; nothing else talks to the adapter.
#[async_trait::async_trait]
pub trait Central: Send + Sync {
    type Link: GattLink;

    /// Fails with [`TransportError::PermissionDenied`] when the OS refuses
    /// bluetooth access.
    async fn ensure_permission(&self) -> Result<(), TransportError>;

    /// Connect to the peripheral with this platform identifier (address or
    /// CoreBluetooth UUID).
    async fn connect_known(&self, id: &str) -> Result<Self::Link, TransportError>;

    /// Scan for peripherals advertising any of `services` and connect to the
    /// first one seen. Scanning stops once it is found.
    async fn connect_first(&self, services: &[Uuid]) -> Result<Self::Link, TransportError>;
}

/// A connected peripheral.
///
/// Writes are always acknowledged writes: a returned `Ok` means the device
/// accepted the bytes.
#[async_trait::async_trait]
pub trait GattLink: Send + Sync {
    type Service: Clone + Send + Sync + std::fmt::Debug;
    type Characteristic: Clone + Send + Sync + std::fmt::Debug;

    /// Best-effort; the peripheral may grant less.
    async fn request_mtu(&self, mtu: u16) -> Result<(), TransportError>;

    async fn discover_service(&self, uuid: Uuid) -> Result<Option<Self::Service>, TransportError>;

    async fn discover_characteristic(
        &self,
        service: &Self::Service,
        uuid: Uuid,
    ) -> Result<Option<Self::Characteristic>, TransportError>;

    async fn write(
        &self,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

pub type LinkOf<C> = <C as Central>::Link;
pub type ServiceOf<C> = <LinkOf<C> as GattLink>::Service;
pub type CharacteristicOf<C> = <LinkOf<C> as GattLink>::Characteristic;
