//! Error classification for failed exchanges.
//!
//! Every failed exchange is mapped once, here, to [`ErrorClass`]. Retry and
//! abort decisions elsewhere only look at the class, never at raw
//! exception codes.

use std::fmt;

use crate::client::{ExceptionCode, ModbusError};

/// What the failed exchange was trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Jump to bootloader, bootloader on fixed line settings.
    StandardJump,
    /// Jump to bootloader, keeping current line settings.
    CurrentBaudJump,
    /// UART reset or erase command.
    Maintenance,
    /// Info block write.
    InfoBlock,
    /// Data block write.
    DataBlock,
    /// Version/signature reads.
    Probe,
}

/// Why a failure can't be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalReason {
    /// Jump register missing: no in-field upgrade support.
    UpgradeUnsupported,
    /// Jump with current baud did not succeed.
    JumpFailed,
    /// Info block register missing: device runs its application.
    NotInBootloader,
    /// Bootloader rejected the info block (format or signature).
    ImageRejected,
    /// Bootloader rejected a data block.
    ImageCorrupted,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpgradeUnsupported => write!(f, "device doesn't support in-field upgrade"),
            Self::JumpFailed => write!(f, "jump to bootloader failed"),
            Self::NotInBootloader => write!(f, "device is not in bootloader mode"),
            Self::ImageRejected => write!(f, "image doesn't match the device"),
            Self::ImageCorrupted => write!(f, "image data rejected"),
        }
    }
}

/// Outcome class of a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying (noise, timeout, busy device).
    Transient,
    /// Stop the current phase now.
    Fatal(FatalReason),
}

impl ErrorClass {
    /// Whether the error aborts the phase.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Classify a failed exchange.
pub fn classify(phase: Phase, error: &ModbusError) -> ErrorClass {
    let exception = error.exception();
    // Some firmware reports an illegal value for a register it doesn't have.
    let register_missing = matches!(
        exception,
        Some(ExceptionCode::IllegalDataAddress | ExceptionCode::IllegalDataValue)
    );
    let device_failure = exception == Some(ExceptionCode::ServerDeviceFailure);

    match phase {
        Phase::StandardJump if register_missing => {
            ErrorClass::Fatal(FatalReason::UpgradeUnsupported)
        },
        Phase::CurrentBaudJump if register_missing => {
            ErrorClass::Fatal(FatalReason::UpgradeUnsupported)
        },
        Phase::CurrentBaudJump => ErrorClass::Fatal(FatalReason::JumpFailed),
        Phase::InfoBlock if device_failure => ErrorClass::Fatal(FatalReason::ImageRejected),
        Phase::InfoBlock if register_missing => ErrorClass::Fatal(FatalReason::NotInBootloader),
        Phase::DataBlock if device_failure => ErrorClass::Fatal(FatalReason::ImageCorrupted),
        _ => ErrorClass::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exception(code: ExceptionCode) -> ModbusError {
        ModbusError::Exception(code)
    }

    #[test]
    fn test_standard_jump() {
        assert_eq!(
            classify(Phase::StandardJump, &exception(ExceptionCode::IllegalDataAddress)),
            ErrorClass::Fatal(FatalReason::UpgradeUnsupported)
        );
        assert_eq!(
            classify(Phase::StandardJump, &exception(ExceptionCode::IllegalDataValue)),
            ErrorClass::Fatal(FatalReason::UpgradeUnsupported)
        );
        assert_eq!(
            classify(Phase::StandardJump, &ModbusError::NoResponse),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(Phase::StandardJump, &exception(ExceptionCode::ServerDeviceBusy)),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_current_baud_jump_is_always_fatal() {
        assert!(classify(Phase::CurrentBaudJump, &ModbusError::NoResponse).is_fatal());
        assert!(
            classify(
                Phase::CurrentBaudJump,
                &exception(ExceptionCode::ServerDeviceFailure)
            )
            .is_fatal()
        );
        assert_eq!(
            classify(Phase::CurrentBaudJump, &exception(ExceptionCode::IllegalDataAddress)),
            ErrorClass::Fatal(FatalReason::UpgradeUnsupported)
        );
    }

    #[test]
    fn test_info_block() {
        assert_eq!(
            classify(Phase::InfoBlock, &exception(ExceptionCode::ServerDeviceFailure)),
            ErrorClass::Fatal(FatalReason::ImageRejected)
        );
        assert_eq!(
            classify(Phase::InfoBlock, &exception(ExceptionCode::IllegalDataAddress)),
            ErrorClass::Fatal(FatalReason::NotInBootloader)
        );
        assert_eq!(
            classify(Phase::InfoBlock, &exception(ExceptionCode::IllegalDataValue)),
            ErrorClass::Fatal(FatalReason::NotInBootloader)
        );
        assert_eq!(
            classify(Phase::InfoBlock, &ModbusError::NoResponse),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_data_block() {
        assert_eq!(
            classify(Phase::DataBlock, &exception(ExceptionCode::ServerDeviceFailure)),
            ErrorClass::Fatal(FatalReason::ImageCorrupted)
        );
        assert_eq!(
            classify(Phase::DataBlock, &exception(ExceptionCode::IllegalDataAddress)),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(Phase::DataBlock, &ModbusError::NoResponse),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_maintenance_and_probe_never_fatal() {
        for code in [
            ExceptionCode::IllegalDataAddress,
            ExceptionCode::IllegalDataValue,
            ExceptionCode::ServerDeviceFailure,
        ] {
            assert!(!classify(Phase::Maintenance, &exception(code)).is_fatal());
            assert!(!classify(Phase::Probe, &exception(code)).is_fatal());
        }
    }
}
