//! BLE GATT Service Protocol Constants for the trap trigger
//!
//! This module defines the service and characteristic UUIDs, the command
//! bytes, and the transfer limits used to trigger the device and to push a
//! new firmware image to it over BLE.

use uuid::Uuid;

/// BLE Service UUID: 00007017-0000-1000-8000-00805f9b34fb
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x00007017_0000_1000_8000_00805f9b34fb);

/// Command Characteristic UUID (write)
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x00007018_0000_1000_8000_00805f9b34fb);

/// Firmware Data Characteristic UUID (write, raw image chunks)
pub const FIRMWARE_UUID: Uuid = Uuid::from_u128(0x00007019_0000_1000_8000_00805f9b34fb);

/// CRC Mode Characteristic UUID (write)
pub const CRC_MODE_UUID: Uuid = Uuid::from_u128(0x0000701a_0000_1000_8000_00805f9b34fb);

/// File Length Characteristic UUID (write, decimal ASCII)
pub const FILE_LENGTH_UUID: Uuid = Uuid::from_u128(0x0000701b_0000_1000_8000_00805f9b34fb);

/// Config Characteristic UUID (write)
pub const CONFIG_UUID: Uuid = Uuid::from_u128(0x0000701d_0000_1000_8000_00805f9b34fb);

/// BLE Command bytes, written to the command characteristic
pub mod commands {
    /// Fire the relay once
    pub const TRIGGER: u8 = 0x00;

    /// Switch the device into firmware update mode.
    /// The device expects raw image chunks on the firmware characteristic next.
    pub const ENTER_UPDATE: u8 = 0x04;
}

/// CRC mode byte: ask the device to check the image CRC itself
pub const CRC_ENABLED: u8 = 0x01;

/// First byte of every config payload
pub const CONFIG_PREFIX: u8 = 0xA0;

/// MTU requested right after connecting. The peripheral may grant less.
pub const REQUESTED_MTU: u16 = 512;

/// ATT header bytes taken out of every write (opcode + handle)
pub const ATT_WRITE_OVERHEAD: u16 = 3;

/// Firmware bytes per write, assuming the requested MTU was granted
pub const CHUNK_SIZE: usize = (REQUESTED_MTU - ATT_WRITE_OVERHEAD) as usize;

/// Bluetooth address of the reference device, as BlueZ and WinRT report it
pub const DEFAULT_DEVICE_ADDRESS: &str = "DC:54:75:F1:E1:B6";

/// CoreBluetooth identifier of the reference device (macOS / iOS)
pub const DEFAULT_DEVICE_UUID: &str = "36c8e420-24ee-773d-7910-4fdfb981a17e";

/// Latest firmware image published for the ESP32-S3 trigger board
pub const FIRMWARE_URL: &str =
    "https://github.com/open-thngs/trap-a-rep-trigger/releases/latest/download/heimdall-esp32s3.bin";
