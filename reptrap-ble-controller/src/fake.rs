//! In-memory trap device used by the unit tests

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reptrap_proto::{CharacteristicRole, ble};
use uuid::Uuid;

use crate::{Central, GattLink, TransportError};

/// One acknowledged write, as the device saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Write {
    pub uuid: Uuid,
    pub data: Vec<u8>,
}

impl Write {
    pub fn role(&self) -> Option<CharacteristicRole> {
        CharacteristicRole::from_uuid(self.uuid)
    }
}

#[derive(Debug, Default)]
struct State {
    permission_denied: bool,
    unreachable: bool,
    connect_delay: Option<Duration>,
    hang_permission: bool,
    hang_disconnect: bool,
    discovery_delay: Option<Duration>,
    has_service: bool,
    characteristics: BTreeSet<Uuid>,
    failing_discovery: BTreeSet<Uuid>,
    failing_writes: BTreeSet<Uuid>,
    write_delay: Option<Duration>,
    connected: Option<String>,
    mtu_requests: Vec<u16>,
    characteristic_queries: usize,
    disconnects: usize,
    writes: Vec<Write>,
}

/// Shared handle to a fake device. Clones see the same state, so a test
/// keeps one clone and hands another to the session.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDevice {
    state: Arc<Mutex<State>>,
}

impl FakeDevice {
    /// A device exposing the service and every characteristic
    pub fn trap() -> Self {
        let device = Self::default();
        {
            let mut state = device.lock();
            state.has_service = true;
            state.characteristics = CharacteristicRole::ALL.iter().map(|r| r.uuid()).collect();
        }
        device
    }

    pub fn without(self, role: CharacteristicRole) -> Self {
        self.lock().characteristics.remove(&role.uuid());
        self
    }

    pub fn without_service(self) -> Self {
        self.lock().has_service = false;
        self
    }

    pub fn deny_permission(self) -> Self {
        self.lock().permission_denied = true;
        self
    }

    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    pub fn slow_connect(self, delay: Duration) -> Self {
        self.lock().connect_delay = Some(delay);
        self
    }

    /// The permission check never completes
    pub fn hang_permission(self) -> Self {
        self.lock().hang_permission = true;
        self
    }

    /// Disconnecting never completes
    pub fn hang_disconnect(self) -> Self {
        self.lock().hang_disconnect = true;
        self
    }

    /// Service and characteristic discovery both take `delay`
    pub fn slow_discovery(self, delay: Duration) -> Self {
        self.lock().discovery_delay = Some(delay);
        self
    }

    pub fn failing_discovery(self, role: CharacteristicRole) -> Self {
        self.lock().failing_discovery.insert(role.uuid());
        self
    }

    pub fn failing_writes(self, role: CharacteristicRole) -> Self {
        self.lock().failing_writes.insert(role.uuid());
        self
    }

    pub fn slow_writes(self, delay: Duration) -> Self {
        self.lock().write_delay = Some(delay);
        self
    }

    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    pub fn writes_to(&self, role: CharacteristicRole) -> Vec<Vec<u8>> {
        self.writes()
            .into_iter()
            .filter(|w| w.uuid == role.uuid())
            .map(|w| w.data)
            .collect()
    }

    pub fn connected_to(&self) -> Option<String> {
        self.lock().connected.clone()
    }

    pub fn mtu_requests(&self) -> Vec<u16> {
        self.lock().mtu_requests.clone()
    }

    pub fn characteristic_queries(&self) -> usize {
        self.lock().characteristic_queries
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn discovery_delay(&self) {
        let delay = self.lock().discovery_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn open(&self, id: String) -> Result<FakeDevice, TransportError> {
        let delay = self.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if state.unreachable {
            return Err(TransportError::DeviceNotFound);
        }
        state.connected = Some(id);
        Ok(self.clone())
    }
}

#[async_trait::async_trait]
impl Central for FakeDevice {
    type Link = FakeDevice;

    async fn ensure_permission(&self) -> Result<(), TransportError> {
        let hang = self.lock().hang_permission;
        if hang {
            std::future::pending::<()>().await;
        }
        if self.lock().permission_denied {
            return Err(TransportError::PermissionDenied);
        }
        Ok(())
    }

    async fn connect_known(&self, id: &str) -> Result<FakeDevice, TransportError> {
        self.open(id.to_string()).await
    }

    async fn connect_first(&self, services: &[Uuid]) -> Result<FakeDevice, TransportError> {
        if !services.contains(&ble::SERVICE_UUID) {
            return Err(TransportError::DeviceNotFound);
        }
        self.open("first-match".to_string()).await
    }
}

#[async_trait::async_trait]
impl GattLink for FakeDevice {
    type Service = Uuid;
    type Characteristic = Uuid;

    async fn request_mtu(&self, mtu: u16) -> Result<(), TransportError> {
        self.lock().mtu_requests.push(mtu);
        Ok(())
    }

    async fn discover_service(&self, uuid: Uuid) -> Result<Option<Uuid>, TransportError> {
        self.discovery_delay().await;
        let state = self.lock();
        Ok((state.has_service && uuid == ble::SERVICE_UUID).then_some(uuid))
    }

    async fn discover_characteristic(
        &self,
        _service: &Uuid,
        uuid: Uuid,
    ) -> Result<Option<Uuid>, TransportError> {
        self.lock().characteristic_queries += 1;
        self.discovery_delay().await;
        let state = self.lock();
        if state.failing_discovery.contains(&uuid) {
            return Err(TransportError::Other("attribute discovery failed".to_string()));
        }
        Ok(state.characteristics.contains(&uuid).then_some(uuid))
    }

    async fn write(&self, characteristic: &Uuid, data: &[u8]) -> Result<(), TransportError> {
        let delay = self.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if state.failing_writes.contains(characteristic) {
            return Err(TransportError::Other("write not permitted".to_string()));
        }
        state.writes.push(Write {
            uuid: *characteristic,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let hang = self.lock().hang_disconnect;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.lock();
        state.connected = None;
        state.disconnects += 1;
        Ok(())
    }
}
