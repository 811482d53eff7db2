//! Trap trigger BLE controller
//!
//! Connects to a trap trigger device, fires its relay and pushes firmware
//! updates over BLE.
//!
//! # Example
//!
//! ```ignore
//! use reptrap_ble_controller::{BtleCentral, CancelHandle, Controller, ControllerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ControllerConfig::default();
//!     let mut controller = Controller::new(BtleCentral::default_adapter().await?, &config);
//!
//!     controller.connect().await?;
//!     controller.trigger().await?;
//!
//!     let source = controller.default_source();
//!     controller
//!         .update_firmware(&source, CancelHandle::new(), |stage| println!("{}", stage.message()))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod config;
pub mod controller;
pub mod error;
pub mod firmware;
pub mod link;
pub mod ota;
pub mod registry;
pub mod session;
pub mod status;
pub mod trigger;

#[cfg(test)]
mod fake;

pub use ble::{BtleCentral, BtleLink, TrapDevice};
pub use config::{ConfigError, ControllerConfig, PeripheralIdentity, SessionSettings, reptrap_home};
pub use controller::Controller;
pub use error::{Error, GattEntity, TransportError, UpdateStep};
pub use firmware::{FileFirmwareSource, FirmwareImage, FirmwareSource, HttpFirmwareSource};
pub use link::{Central, GattLink};
pub use ota::{CancelHandle, FirmwareUpdate, UpdateStage, UpdateTransfer};
pub use registry::{Registry, Resolution};
pub use session::{Endpoint, Session, SessionSnapshot, SessionState};
pub use status::{ConnectionStatus, StatusView};
