//! Device-side register map and the tool's guess at the device mode.

use std::fmt;

/// Holding register addresses and sizes shared by application firmware and
/// bootloader.
pub mod registers {
    /// Jump to bootloader; the bootloader comes up on its fixed line settings.
    pub const JUMP_TO_BOOTLOADER: u16 = 129;

    /// Jump to bootloader, keeping the current baud rate and framing.
    pub const JUMP_TO_BOOTLOADER_CURRENT_BAUD: u16 = 131;

    /// Reset UART settings and slave address to factory defaults.
    pub const UART_SETTINGS_RESET: u16 = 1000;

    /// Erase EEPROM (except the device signature).
    pub const EEPROM_ERASE: u16 = 1001;

    /// Erase the flash filesystem.
    pub const FLASHFS_ERASE: u16 = 1002;

    /// Info block start address.
    pub const INFO_BLOCK: u16 = 0x1000;

    /// Info block size in registers.
    pub const INFO_BLOCK_REGISTERS: u16 = 16;

    /// Data block start address.
    pub const DATA_BLOCK: u16 = 0x2000;

    /// Data block size in registers.
    pub const DATA_BLOCK_REGISTERS: u16 = 68;

    /// Firmware version string (application only).
    pub const FIRMWARE_VERSION: u16 = 250;

    /// Firmware version length in registers.
    pub const FIRMWARE_VERSION_REGISTERS: u16 = 15;

    /// Firmware signature string.
    pub const FIRMWARE_SIGNATURE: u16 = 290;

    /// Firmware signature length in registers.
    pub const FIRMWARE_SIGNATURE_REGISTERS: u16 = 12;

    /// Bootloader version string.
    pub const BOOTLOADER_VERSION: u16 = 330;

    /// Bootloader version length in registers.
    pub const BOOTLOADER_VERSION_REGISTERS: u16 = 8;

    /// Value written to command registers.
    pub const COMMAND_VALUE: u16 = 1;
}

/// Best guess at which firmware the device is running.
///
/// Only used to pick parameter sets for probing and for end-of-run
/// messages; protocol decisions rely on the device's answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceMode {
    /// Normal application firmware.
    Application,
    /// Bootloader, accepting firmware upload.
    Bootloader,
    /// Nothing known yet.
    #[default]
    Unknown,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => write!(f, "application"),
            Self::Bootloader => write!(f, "bootloader"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes_fit_one_request() {
        assert!(registers::DATA_BLOCK_REGISTERS <= crate::client::MAX_WRITE_REGISTERS);
        assert!(registers::INFO_BLOCK_REGISTERS <= crate::client::MAX_WRITE_REGISTERS);
    }

    #[test]
    fn test_default_mode_is_unknown() {
        assert_eq!(DeviceMode::default(), DeviceMode::Unknown);
    }
}
