//! Role to characteristic resolution, cached per connection

use std::collections::BTreeMap;
use std::time::Duration;

use reptrap_proto::CharacteristicRole;
use tracing::{debug, warn};

use crate::GattLink;

/// Outcome of resolving one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<H> {
    /// Not looked up yet
    Pending,
    /// Looked up and missing; stays missing until the registry is cleared
    Absent,
    Resolved(H),
}

#[derive(Debug)]
pub struct Registry<H> {
    entries: BTreeMap<CharacteristicRole, Resolution<H>>,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<H: Clone> Registry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution(&self, role: CharacteristicRole) -> Resolution<H> {
        self.entries
            .get(&role)
            .cloned()
            .unwrap_or(Resolution::Pending)
    }

    pub fn get(&self, role: CharacteristicRole) -> Option<&H> {
        match self.entries.get(&role) {
            Some(Resolution::Resolved(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn is_resolved(&self, role: CharacteristicRole) -> bool {
        self.get(role).is_some()
    }

    pub fn resolved_roles(&self) -> Vec<CharacteristicRole> {
        CharacteristicRole::ALL
            .into_iter()
            .filter(|role| self.is_resolved(*role))
            .collect()
    }

    /// Look the role up on the device once. Later calls return the cached
    /// outcome without touching the link.
    pub async fn resolve<L>(
        &mut self,
        link: &L,
        service: &L::Service,
        role: CharacteristicRole,
        limit: Duration,
    ) -> Option<&H>
    where
        L: GattLink<Characteristic = H>,
    {
        if matches!(self.resolution(role), Resolution::Pending) {
            let lookup = tokio::time::timeout(limit, link.discover_characteristic(service, role.uuid()));
            let outcome = match lookup.await {
                Ok(Ok(Some(handle))) => {
                    debug!(%role, "characteristic resolved");
                    Resolution::Resolved(handle)
                }
                Ok(Ok(None)) => {
                    warn!(%role, uuid = %role.uuid(), "characteristic not present on device");
                    Resolution::Absent
                }
                Ok(Err(e)) => {
                    warn!(%role, error = %e, "characteristic discovery failed");
                    Resolution::Absent
                }
                Err(_) => {
                    warn!(%role, ?limit, "characteristic discovery timed out");
                    Resolution::Absent
                }
            };
            self.entries.insert(role, outcome);
        }
        self.get(role)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
