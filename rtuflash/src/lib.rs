//! # rtuflash
//!
//! A library for updating firmware on Modbus RTU devices through their
//! bootloader.
//!
//! This crate provides:
//!
//! - A Modbus RTU client over a serial port (function codes 0x03, 0x06, 0x10),
//!   with frames built and checked by `rmodbus`
//! - Link sessions with separate application and bootloader parameters
//! - Jump to bootloader and bootloader maintenance commands
//! - Firmware transfer in fixed-size register blocks with bounded retry
//! - Version and signature readout
//!
//! ## Features
//!
//! - `native` (default): Serial ports via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use rtuflash::{FlashPlan, Flasher, LineSettings, LinkConfig, NativeConnector};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let link = LinkConfig::new("/dev/ttyUSB0", LineSettings::BOOTLOADER, 1)?;
//!     let plan = FlashPlan::new(link).with_standard_jump().with_firmware("fw.bin");
//!
//!     let mut flasher = Flasher::new(NativeConnector);
//!     flasher.run(&plan, |block, total| println!("Sending {block}/{total}"))?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod delay;
pub mod device;
pub mod error;
pub mod flasher;
pub mod host;
pub mod image;
pub mod link;
pub mod maintenance;
pub mod mode;
pub mod policy;
pub mod port;
pub mod probe;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use host::discover_ports;
#[cfg(feature = "native")]
pub use link::NativeConnector;
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    client::{ExceptionCode, ModbusClient, ModbusError, ModbusResult, RtuClient},
    delay::{Delay, ThreadDelay},
    device::DeviceMode,
    error::{Error, Result},
    flasher::{FlashPlan, Flasher, RunReport},
    image::FirmwareImage,
    link::{Connector, LineSettings, LinkConfig, LinkSession},
    maintenance::{Maintenance, MaintenanceCommand},
    mode::{BootloaderLine, JumpStrategy},
    policy::{ErrorClass, FatalReason, Phase, classify},
    port::{DataBits, Parity, Port, PortEnumerator, PortInfo, SerialConfig, StopBits},
    probe::{DeviceInfo, DeviceInfoProbe},
    transfer::{FirmwareTransfer, TransferPolicy, TransferReport},
};
