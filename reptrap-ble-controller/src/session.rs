//! Session: the single connection to the trap peripheral
//!
//! Connecting walks `Disconnected -> Connecting -> ServiceDiscovery -> Ready`.
//! Any failure on the way lands in `Failed`; nothing is retried here.
//! Progress is published on a watch channel so late subscribers see the
//! current resolution rather than the transitions they missed.

use std::future::Future;
use std::time::Duration;

use reptrap_proto::{CharacteristicRole, ble};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionSettings;
use crate::link::{CharacteristicOf, LinkOf, ServiceOf};
use crate::registry::Registry;
use crate::{Central, Error, GattEntity, GattLink, PeripheralIdentity, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    ServiceDiscovery,
    Ready,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::ServiceDiscovery => "discovering services",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        })
    }
}

/// What observers see: the state plus everything resolved so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub service_resolved: bool,
    pub resolved: Vec<CharacteristicRole>,
}

impl SessionSnapshot {
    fn disconnected() -> Self {
        Self {
            state: SessionState::Disconnected,
            service_resolved: false,
            resolved: Vec::new(),
        }
    }

    pub fn is_resolved(&self, role: CharacteristicRole) -> bool {
        self.resolved.contains(&role)
    }
}

pub struct Session<C: Central> {
    central: C,
    identity: PeripheralIdentity,
    settings: SessionSettings,
    link: Option<LinkOf<C>>,
    service: Option<ServiceOf<C>>,
    registry: Registry<CharacteristicOf<C>>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<C: Central> Session<C> {
    pub fn new(central: C, identity: PeripheralIdentity, settings: SessionSettings) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::disconnected());
        Self {
            central,
            identity,
            settings,
            link: None,
            service: None,
            registry: Registry::new(),
            snapshot,
        }
    }

    pub fn identity(&self) -> &PeripheralIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// The receiver starts out holding the current snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn characteristic(&self, role: CharacteristicRole) -> Option<&CharacteristicOf<C>> {
        self.registry.get(role)
    }

    /// Read-only access to the resolved characteristics, for issuing writes
    pub fn endpoint(&self) -> Endpoint<'_, LinkOf<C>> {
        Endpoint {
            link: self.link.as_ref(),
            registry: &self.registry,
            write_timeout: self.settings.write_timeout,
        }
    }

    #[instrument(skip(self), fields(identity = %self.identity))]
    pub async fn connect(&mut self) -> Result<(), Error> {
        match self.state() {
            SessionState::Disconnected | SessionState::Failed => {}
            state => {
                return Err(Error::ConnectionFailed(format!("session is already {state}")));
            }
        }

        self.registry.clear();
        self.service = None;
        self.publish(SessionState::Connecting);

        match self.establish().await {
            Ok(()) => {
                self.publish(SessionState::Ready);
                info!(resolved = ?self.registry.resolved_roles(), "session ready");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "session failed");
                self.release().await;
                self.publish(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<(), Error> {
        let connect_timeout = self.settings.connect_timeout;
        bounded(
            "permission check",
            connect_timeout,
            self.central.ensure_permission(),
        )
        .await
        .map_err(Error::connecting)?;

        let link = match &self.identity {
            PeripheralIdentity::Fixed { id } => {
                bounded("connect", connect_timeout, self.central.connect_known(id)).await
            }
            PeripheralIdentity::Discover { services } => {
                bounded("scan", connect_timeout, self.central.connect_first(services)).await
            }
        }
        .map_err(Error::connecting)?;
        info!("connected");

        let discovery_timeout = self.settings.discovery_timeout;
        let mtu = self.settings.requested_mtu;
        match bounded("mtu request", discovery_timeout, link.request_mtu(mtu)).await {
            Ok(()) => debug!(mtu, "mtu requested"),
            Err(e) => warn!(mtu, error = %e, "mtu request not honoured"),
        }

        self.publish(SessionState::ServiceDiscovery);
        let link = &*self.link.insert(link);
        let service = bounded(
            "service discovery",
            discovery_timeout,
            link.discover_service(ble::SERVICE_UUID),
        )
        .await
        .map_err(Error::connecting)?
        .ok_or(Error::Unresolved(GattEntity::Service))?;
        let service = &*self.service.insert(service);
        self.snapshot.send_modify(|s| s.service_resolved = true);

        for role in CharacteristicRole::ALL {
            self.registry
                .resolve(link, service, role, discovery_timeout)
                .await;
            let resolved = self.registry.resolved_roles();
            self.snapshot.send_modify(|s| s.resolved = resolved);
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn disconnect(&mut self) {
        self.release().await;
        self.publish(SessionState::Disconnected);
        info!("disconnected");
    }

    async fn release(&mut self) {
        self.registry.clear();
        self.service = None;
        if let Some(link) = self.link.take() {
            let limit = self.settings.discovery_timeout;
            if let Err(e) = bounded("disconnect", limit, link.disconnect()).await {
                debug!(error = %e, "disconnect failed");
            }
        }
    }

    fn publish(&self, state: SessionState) {
        let snapshot = SessionSnapshot {
            state,
            service_resolved: self.service.is_some(),
            resolved: self.registry.resolved_roles(),
        };
        self.snapshot.send_replace(snapshot);
    }
}

async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?limit, "timed out");
            Err(TransportError::TimedOut(limit))
        }
    }
}

/// Borrowed view of a session's link and resolved characteristics.
///
/// Writes go through here; connection state cannot be changed from it.
pub struct Endpoint<'a, L: GattLink> {
    link: Option<&'a L>,
    registry: &'a Registry<L::Characteristic>,
    write_timeout: Duration,
}

impl<L: GattLink> Endpoint<'_, L> {
    pub fn is_resolved(&self, role: CharacteristicRole) -> bool {
        self.link.is_some() && self.registry.is_resolved(role)
    }

    /// Fails with the first role in `roles` that is not resolved
    pub fn require(&self, roles: &[CharacteristicRole]) -> Result<(), Error> {
        match roles.iter().find(|role| !self.is_resolved(**role)) {
            Some(role) => Err(Error::Unresolved(GattEntity::Characteristic(*role))),
            None => Ok(()),
        }
    }

    /// One acknowledged write, bounded by the write timeout
    pub async fn write(&self, role: CharacteristicRole, data: &[u8]) -> Result<(), Error> {
        let (Some(link), Some(characteristic)) = (self.link, self.registry.get(role)) else {
            return Err(Error::Unresolved(GattEntity::Characteristic(role)));
        };
        bounded("write", self.write_timeout, link.write(characteristic, data))
            .await
            .map_err(|e| Error::write(role, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDevice;

    fn settings() -> SessionSettings {
        SessionSettings {
            requested_mtu: ble::REQUESTED_MTU,
            connect_timeout: Duration::from_millis(200),
            discovery_timeout: Duration::from_millis(200),
            write_timeout: Duration::from_millis(200),
        }
    }

    fn session(device: &FakeDevice, identity: PeripheralIdentity) -> Session<FakeDevice> {
        Session::new(device.clone(), identity, settings())
    }

    #[tokio::test]
    async fn connects_to_fixed_device_and_resolves_everything() {
        let device = FakeDevice::trap();
        let mut session = session(&device, PeripheralIdentity::fixed("DC:54:75:F1:E1:B6"));

        session.connect().await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(device.connected_to().as_deref(), Some("DC:54:75:F1:E1:B6"));
        assert_eq!(device.mtu_requests(), vec![512]);
        let snapshot = session.snapshot();
        assert!(snapshot.service_resolved);
        assert_eq!(snapshot.resolved, CharacteristicRole::ALL.to_vec());
    }

    #[tokio::test]
    async fn discovery_filter_connects_to_first_match() {
        let device = FakeDevice::trap();
        let mut session = session(&device, PeripheralIdentity::discover());

        session.connect().await.unwrap();

        assert_eq!(device.connected_to().as_deref(), Some("first-match"));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn permission_denial_is_distinct() {
        let device = FakeDevice::trap().deny_permission();
        let mut session = session(&device, PeripheralIdentity::default());

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, Error::PermissionDenied));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(device.connected_to(), None);
    }

    #[tokio::test]
    async fn unreachable_device_fails_connection() {
        let device = FakeDevice::trap().unreachable();
        let mut session = session(&device, PeripheralIdentity::default());

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn connect_times_out() {
        let device = FakeDevice::trap().slow_connect(Duration::from_secs(10));
        let mut session = session(&device, PeripheralIdentity::default());

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed(ref m) if m.contains("timed out")));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn stalled_permission_check_fails_the_attempt() {
        let device = FakeDevice::trap().hang_permission();
        let mut session = session(&device, PeripheralIdentity::default());

        let err = tokio::time::timeout(Duration::from_secs(2), session.connect())
            .await
            .expect("connect must not hang")
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed(ref m) if m.contains("timed out")));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(device.connected_to(), None);
    }

    #[tokio::test]
    async fn service_discovery_timeout_fails_connection() {
        let device = FakeDevice::trap().slow_discovery(Duration::from_secs(10));
        let mut session = session(&device, PeripheralIdentity::default());

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed(ref m) if m.contains("timed out")));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.snapshot().service_resolved);
        assert_eq!(device.characteristic_queries(), 0);
    }

    #[tokio::test]
    async fn stalled_disconnect_still_returns() {
        let device = FakeDevice::trap().hang_disconnect();
        let mut session = session(&device, PeripheralIdentity::default());
        session.connect().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), session.disconnect())
            .await
            .expect("disconnect must not hang");

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.characteristic(CharacteristicRole::Command).is_none());
    }

    #[tokio::test]
    async fn missing_service_is_terminal() {
        let device = FakeDevice::trap().without_service();
        let mut session = session(&device, PeripheralIdentity::default());

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, Error::Unresolved(GattEntity::Service)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.snapshot().resolved.is_empty());
        assert_eq!(device.characteristic_queries(), 0);
        assert_eq!(device.disconnects(), 1);
    }

    #[tokio::test]
    async fn missing_characteristic_degrades_but_stays_ready() {
        let device = FakeDevice::trap().without(CharacteristicRole::Config);
        let mut session = session(&device, PeripheralIdentity::default());

        session.connect().await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.characteristic(CharacteristicRole::Config).is_none());
        assert!(session.characteristic(CharacteristicRole::Command).is_some());
    }

    #[tokio::test]
    async fn late_subscriber_sees_latest_resolution() {
        let device = FakeDevice::trap();
        let mut session = session(&device, PeripheralIdentity::default());
        session.connect().await.unwrap();

        let rx = session.subscribe();

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.state, SessionState::Ready);
        assert!(snapshot.is_resolved(CharacteristicRole::Command));
    }

    #[tokio::test]
    async fn second_connect_is_rejected_while_ready() {
        let device = FakeDevice::trap();
        let mut session = session(&device, PeripheralIdentity::default());
        session.connect().await.unwrap();

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn disconnect_clears_handles_and_allows_reconnect() {
        let device = FakeDevice::trap();
        let mut session = session(&device, PeripheralIdentity::default());
        session.connect().await.unwrap();

        session.disconnect().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.characteristic(CharacteristicRole::Command).is_none());
        assert!(!session.endpoint().is_resolved(CharacteristicRole::Command));
        assert_eq!(device.disconnects(), 1);

        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn endpoint_write_times_out() {
        let device = FakeDevice::trap().slow_writes(Duration::from_secs(10));
        let mut session = session(&device, PeripheralIdentity::default());
        session.connect().await.unwrap();

        let err = session
            .endpoint()
            .write(CharacteristicRole::Command, &[0x00])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::TransportWriteFailed { role: CharacteristicRole::Command, ref reason } if reason.contains("timed out")
        ));
        assert!(device.writes().is_empty());
    }
}
