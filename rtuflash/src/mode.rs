//! Application to bootloader handoff.
//!
//! The jump is a single register write. What a failed write means depends
//! on the strategy: with the standard jump the device often reboots before
//! it answers, so only a "no such register" rejection stops the run. With
//! the current-baud jump there is nothing safe to fall back to.

use std::time::Duration;

use log::{info, warn};

use crate::client::{ModbusClient, ModbusError};
use crate::delay::Delay;
use crate::device::DeviceMode;
use crate::device::registers::{
    COMMAND_VALUE, JUMP_TO_BOOTLOADER, JUMP_TO_BOOTLOADER_CURRENT_BAUD,
};
use crate::error::{Error, Result};
use crate::policy::{ErrorClass, FatalReason, Phase, classify};

/// Wait after a jump for the bootloader to come up.
pub const JUMP_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// How to ask the application firmware to enter its bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpStrategy {
    /// Write the jump register over the device's line settings. The
    /// bootloader comes up on the fixed bootloader settings afterwards.
    StandardBaud {
        /// Jump register address.
        register: u16,
    },
    /// Write the current-baud jump register over the device's line
    /// settings. The bootloader keeps them.
    CurrentBaud,
}

impl JumpStrategy {
    /// Standard jump through the default register.
    pub const fn standard() -> Self {
        Self::StandardBaud {
            register: JUMP_TO_BOOTLOADER,
        }
    }

    /// Register the jump command is written to.
    pub fn register(&self) -> u16 {
        match self {
            Self::StandardBaud { register } => *register,
            Self::CurrentBaud => JUMP_TO_BOOTLOADER_CURRENT_BAUD,
        }
    }

    fn phase(&self) -> Phase {
        match self {
            Self::StandardBaud { .. } => Phase::StandardJump,
            Self::CurrentBaud => Phase::CurrentBaudJump,
        }
    }
}

/// Line settings the bootloader uses after a jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderLine {
    /// The fixed bootloader settings.
    Fixed,
    /// The same settings the application used.
    Device,
}

/// What to do after the jump write returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpDecision {
    /// Device acknowledged the jump.
    Entered,
    /// No acknowledgement, but the device most likely rebooted anyway.
    Assumed,
    /// Stop the run.
    Abort(FatalReason),
}

/// Decide how to continue after a jump write.
pub fn decide(
    strategy: JumpStrategy,
    result: &std::result::Result<(), ModbusError>,
) -> JumpDecision {
    match result {
        Ok(()) => JumpDecision::Entered,
        Err(e) => match classify(strategy.phase(), e) {
            ErrorClass::Fatal(reason) => JumpDecision::Abort(reason),
            ErrorClass::Transient => JumpDecision::Assumed,
        },
    }
}

/// Result of a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Mode hypothesis after the jump.
    pub mode: DeviceMode,
    /// Settings to reach the bootloader with.
    pub line: BootloaderLine,
}

/// Send the jump command and wait for the bootloader to come up.
pub fn jump_to_bootloader<C, D>(
    client: &mut C,
    strategy: JumpStrategy,
    delay: &mut D,
) -> Result<Transition>
where
    C: ModbusClient + ?Sized,
    D: Delay + ?Sized,
{
    let register = strategy.register();
    info!("Jumping to bootloader (register {register})");

    let result = client.write_register(register, COMMAND_VALUE);
    match decide(strategy, &result) {
        JumpDecision::Entered => info!("Device acknowledged jump to bootloader"),
        JumpDecision::Assumed => {
            if let Err(e) = &result {
                warn!("No confirmation of jump to bootloader ({e}), assuming the device rebooted");
            }
        },
        JumpDecision::Abort(reason) => {
            let detail = result
                .err()
                .map_or_else(|| reason.to_string(), |e| format!("{reason}: {e}"));
            return Err(match reason {
                FatalReason::UpgradeUnsupported => Error::DeviceNotSupported(detail),
                _ => Error::JumpFailed(detail),
            });
        },
    }

    delay.delay(JUMP_SETTLE_DELAY);

    Ok(Transition {
        mode: DeviceMode::Bootloader,
        line: match strategy {
            JumpStrategy::StandardBaud { .. } => BootloaderLine::Fixed,
            JumpStrategy::CurrentBaud => BootloaderLine::Device,
        },
    })
}
