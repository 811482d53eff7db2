//! Single-write operations on a connected trap

use reptrap_proto::{CharacteristicRole, ble, config_payload};
use tracing::info;

use crate::session::Endpoint;
use crate::{Error, GattLink};

/// Fire the relay. Writes `0x00` to the command characteristic.
pub async fn trigger<L: GattLink>(endpoint: &Endpoint<'_, L>) -> Result<(), Error> {
    endpoint
        .write(CharacteristicRole::Command, &[ble::commands::TRIGGER])
        .await?;
    info!("trigger sent");
    Ok(())
}

/// Write a 16-bit configuration value
pub async fn send_config<L: GattLink>(endpoint: &Endpoint<'_, L>, value: u16) -> Result<(), Error> {
    endpoint
        .write(CharacteristicRole::Config, &config_payload(value))
        .await?;
    info!(value, "config value sent");
    Ok(())
}
