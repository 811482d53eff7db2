//! User-facing connection status, derived from the session snapshot

use reptrap_proto::CharacteristicRole;
use tokio::sync::watch;

use crate::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
}

impl ConnectionStatus {
    /// Connected exactly when the command characteristic is resolved
    pub fn of(snapshot: &SessionSnapshot) -> Self {
        if snapshot.is_resolved(CharacteristicRole::Command) {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Connecting
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        })
    }
}

/// Read-only status signal, projected from the latest session snapshot
#[derive(Debug, Clone)]
pub struct StatusView {
    snapshots: watch::Receiver<SessionSnapshot>,
    reported: ConnectionStatus,
}

impl StatusView {
    pub fn new(snapshots: watch::Receiver<SessionSnapshot>) -> Self {
        let reported = ConnectionStatus::of(&snapshots.borrow());
        Self {
            snapshots,
            reported,
        }
    }

    pub fn current(&self) -> ConnectionStatus {
        ConnectionStatus::of(&self.snapshots.borrow())
    }

    /// Wait until the status differs from the one last returned here.
    /// `None` once the session is gone.
    pub async fn changed(&mut self) -> Option<ConnectionStatus> {
        loop {
            self.snapshots.changed().await.ok()?;
            let now = ConnectionStatus::of(&self.snapshots.borrow_and_update());
            if now != self.reported {
                self.reported = now;
                return Some(now);
            }
        }
    }
}
