use std::time::Duration;

use reptrap_proto::CharacteristicRole;

/// A GATT entity the controller expects to find on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattEntity {
    Service,
    Characteristic(CharacteristicRole),
}

impl std::fmt::Display for GattEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GattEntity::Service => f.write_str("trap service"),
            GattEntity::Characteristic(role) => write!(f, "{role} characteristic"),
        }
    }
}

/// Where in the firmware update sequence a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    Preflight,
    Fetch,
    AnnounceLength,
    SelectCrc,
    EnterUpdateMode,
    StreamChunk { offset: usize },
}

impl std::fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateStep::Preflight => f.write_str("preflight check"),
            UpdateStep::Fetch => f.write_str("firmware download"),
            UpdateStep::AnnounceLength => f.write_str("length announcement"),
            UpdateStep::SelectCrc => f.write_str("CRC mode selection"),
            UpdateStep::EnterUpdateMode => f.write_str("entering update mode"),
            UpdateStep::StreamChunk { offset } => write!(f, "chunk at offset {offset}"),
        }
    }
}

/// Failure reported by a [`crate::GattLink`] or [`crate::Central`]
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bluetooth permission denied")]
    PermissionDenied,
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("device not found")]
    DeviceNotFound,
    #[error("device not connected")]
    NotConnected,
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Other(String),
}

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::PermissionDenied => TransportError::PermissionDenied,
            btleplug::Error::DeviceNotFound => TransportError::DeviceNotFound,
            btleplug::Error::NotConnected => TransportError::NotConnected,
            btleplug::Error::TimedOut(after) => TransportError::TimedOut(after),
            other => TransportError::Other(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bluetooth permission not granted")]
    PermissionDenied,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("{0} not found on device")]
    Unresolved(GattEntity),
    #[error("write to {role} characteristic failed: {reason}")]
    TransportWriteFailed {
        role: CharacteristicRole,
        reason: String,
    },
    #[error("firmware download failed: {0}")]
    FirmwareFetchFailed(String),
    #[error("another device operation is in progress")]
    Busy,
    #[error("firmware update cancelled after {sent} of {total} bytes")]
    Cancelled { sent: usize, total: usize },
    #[error("firmware update failed at {step}: {source}")]
    UpdateFailed {
        step: UpdateStep,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Session-level mapping: permission stays distinct, everything else is
    /// a failed connection attempt.
    pub(crate) fn connecting(e: TransportError) -> Self {
        match e {
            TransportError::PermissionDenied => Error::PermissionDenied,
            other => Error::ConnectionFailed(other.to_string()),
        }
    }

    pub(crate) fn write(role: CharacteristicRole, e: TransportError) -> Self {
        Error::TransportWriteFailed {
            role,
            reason: e.to_string(),
        }
    }

    pub(crate) fn at(self, step: UpdateStep) -> Self {
        Error::UpdateFailed {
            step,
            source: Box::new(self),
        }
    }

    /// The underlying error, with any update step wrapping removed
    pub fn root(&self) -> &Error {
        match self {
            Error::UpdateFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// The update step that failed, if this came out of a firmware update
    pub fn step(&self) -> Option<UpdateStep> {
        match self {
            Error::UpdateFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}
