//! Trap trigger wire protocol - characteristic roles and payloads
//!
//! Everything here is plain data: no I/O, no async. The BLE controller
//! resolves [`CharacteristicRole`]s against a connected peripheral and
//! writes the payloads built by this crate.

pub mod ble;

use uuid::Uuid;

/// Logical name of a characteristic on the trap service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacteristicRole {
    Command,
    FirmwareData,
    CrcMode,
    FileLength,
    Config,
}

impl CharacteristicRole {
    /// Every role, in the order they are resolved after connecting
    pub const ALL: [CharacteristicRole; 5] = [
        CharacteristicRole::Command,
        CharacteristicRole::FirmwareData,
        CharacteristicRole::CrcMode,
        CharacteristicRole::FileLength,
        CharacteristicRole::Config,
    ];

    /// Roles a firmware update writes to
    pub const REQUIRED_FOR_UPDATE: [CharacteristicRole; 4] = [
        CharacteristicRole::FileLength,
        CharacteristicRole::CrcMode,
        CharacteristicRole::Command,
        CharacteristicRole::FirmwareData,
    ];

    pub fn uuid(self) -> Uuid {
        match self {
            CharacteristicRole::Command => ble::COMMAND_UUID,
            CharacteristicRole::FirmwareData => ble::FIRMWARE_UUID,
            CharacteristicRole::CrcMode => ble::CRC_MODE_UUID,
            CharacteristicRole::FileLength => ble::FILE_LENGTH_UUID,
            CharacteristicRole::Config => ble::CONFIG_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.uuid() == uuid)
    }

    pub fn name(self) -> &'static str {
        match self {
            CharacteristicRole::Command => "command",
            CharacteristicRole::FirmwareData => "firmware-data",
            CharacteristicRole::CrcMode => "crc-mode",
            CharacteristicRole::FileLength => "file-length",
            CharacteristicRole::Config => "config",
        }
    }
}

impl std::fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// File length announcement: decimal digits, no padding, no terminator
pub fn file_length_payload(len: usize) -> Vec<u8> {
    len.to_string().into_bytes()
}

/// Config write: prefix byte followed by the value big-endian
pub fn config_payload(value: u16) -> [u8; 3] {
    let [hi, lo] = value.to_be_bytes();
    [ble::CONFIG_PREFIX, hi, lo]
}

/// Largest firmware chunk that fits a single write at the given MTU
pub fn chunk_size_for_mtu(mtu: u16) -> usize {
    usize::from(mtu.saturating_sub(ble::ATT_WRITE_OVERHEAD)).max(1)
}

/// Number of writes needed to send `len` bytes in `chunk_size` pieces
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1))
}
