//! Error types for rtuflash.

use std::io;
use thiserror::Error;

/// Result type for rtuflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rtuflash operations.
///
/// Variants are grouped by where the run stops: configuration problems are
/// caught before any I/O, port problems when a session is opened, and the
/// remaining variants are protocol-level aborts with an operator-facing
/// diagnostic.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (firmware file, serial port).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Invalid parameter or conflicting option selection.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The serial link could not be opened.
    #[error("Connection to {port} failed: {reason}")]
    PortOpen {
        /// Port name/path.
        port: String,
        /// Underlying failure.
        reason: String,
    },

    /// Firmware file could not be loaded.
    #[error("Error while reading firmware file {path}: {reason}")]
    ImageLoad {
        /// Path to the firmware file.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// Firmware image has an unusable layout.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// Jump register missing or rejected by the application firmware.
    #[error("Device probably doesn't support in-field firmware upgrade ({0})")]
    DeviceNotSupported(String),

    /// Jump with current baud rate failed; there is no safe fallback.
    #[error("Jump to bootloader failed: {0}")]
    JumpFailed(String),

    /// Info block register rejected: the device runs its application.
    #[error("Not in bootloader mode? Try repeating with a jump to bootloader ({0})")]
    NotInBootloader(String),

    /// Info block rejected by the bootloader.
    #[error("Data format is invalid or firmware signature doesn't match the device ({0})")]
    ImageRejected(String),

    /// Data block rejected by the bootloader.
    #[error("Firmware file is corrupted? Device rejected data block {block} ({reason})")]
    ImageCorrupted {
        /// One-based index of the rejected block.
        block: usize,
        /// Device response.
        reason: String,
    },

    /// Info block failed on every attempt with transient errors.
    #[error(
        "Error while sending info block after {attempts} attempts: {last}. \
         Check connection, jump to bootloader and try again"
    )]
    InfoBlockFailed {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        last: String,
    },

    /// Too many consecutive data block failures.
    #[error("Transfer aborted at data block {block} after {failures} consecutive errors: {last}")]
    TransferAborted {
        /// One-based index of the block being sent.
        block: usize,
        /// Consecutive failures counted.
        failures: u32,
        /// Last failure.
        last: String,
    },

    /// Device did not answer under any parameter set.
    #[error("Device does not respond: {0}")]
    ProbeFailed(String),
}

impl Error {
    /// Returns `true` for errors detected before any I/O took place.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns `true` when the link itself could not be established.
    pub fn is_port_error(&self) -> bool {
        match self {
            Self::PortOpen { .. } => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
