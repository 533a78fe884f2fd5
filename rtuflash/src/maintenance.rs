//! Optional bootloader commands: UART reset and erases.

use std::fmt;
use std::time::Duration;

use log::{info, warn};

use crate::client::ModbusClient;
use crate::delay::Delay;
use crate::device::DeviceMode;
use crate::device::registers::{COMMAND_VALUE, EEPROM_ERASE, FLASHFS_ERASE, UART_SETTINGS_RESET};

/// Wait after each successful command; they may reset the line settings.
pub const COMMAND_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// A single-register maintenance command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceCommand {
    /// Reset UART settings and slave address to factory defaults.
    UartReset,
    /// Erase EEPROM.
    EepromErase,
    /// Erase the flash filesystem.
    FlashFsErase,
}

impl MaintenanceCommand {
    /// Every command, in execution order.
    pub const ALL: [Self; 3] = [Self::UartReset, Self::EepromErase, Self::FlashFsErase];

    /// Command register.
    pub fn register(self) -> u16 {
        match self {
            Self::UartReset => UART_SETTINGS_RESET,
            Self::EepromErase => EEPROM_ERASE,
            Self::FlashFsErase => FLASHFS_ERASE,
        }
    }
}

impl fmt::Display for MaintenanceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UartReset => write!(f, "UART settings reset"),
            Self::EepromErase => write!(f, "EEPROM erase"),
            Self::FlashFsErase => write!(f, "flash filesystem erase"),
        }
    }
}

/// Which maintenance commands to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Maintenance {
    /// Reset UART settings and slave address.
    pub reset_uart: bool,
    /// Erase EEPROM.
    pub erase_eeprom: bool,
    /// Erase the flash filesystem.
    pub erase_fs: bool,
}

impl Maintenance {
    /// Whether nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.commands().next().is_none()
    }

    /// Selected commands, in execution order.
    pub fn commands(&self) -> impl Iterator<Item = MaintenanceCommand> + '_ {
        MaintenanceCommand::ALL
            .into_iter()
            .filter(|command| self.selected(*command))
    }

    fn selected(&self, command: MaintenanceCommand) -> bool {
        match command {
            MaintenanceCommand::UartReset => self.reset_uart,
            MaintenanceCommand::EepromErase => self.erase_eeprom,
            MaintenanceCommand::FlashFsErase => self.erase_fs,
        }
    }

    /// Run the selected commands. Failures are logged and skipped.
    ///
    /// Returns the updated mode hypothesis: any acknowledged command means
    /// a bootloader answered.
    pub fn run<C, D>(&self, client: &mut C, delay: &mut D, mode: DeviceMode) -> DeviceMode
    where
        C: ModbusClient + ?Sized,
        D: Delay + ?Sized,
    {
        let mut mode = mode;
        for command in self.commands() {
            info!("Sending {command} command");
            match client.write_register(command.register(), COMMAND_VALUE) {
                Ok(()) => {
                    info!("{command} done");
                    mode = DeviceMode::Bootloader;
                    delay.delay(COMMAND_SETTLE_DELAY);
                },
                Err(e) => warn!("{command} failed: {e}"),
            }
        }
        mode
    }
}
