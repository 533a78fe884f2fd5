//! Read-only device diagnostics.
//!
//! Version and signature strings are stored one character per register,
//! in the low byte.

use log::{debug, info, warn};

use crate::client::{ModbusClient, ModbusResult};
use crate::device::DeviceMode;
use crate::device::registers::{
    BOOTLOADER_VERSION, BOOTLOADER_VERSION_REGISTERS, FIRMWARE_SIGNATURE,
    FIRMWARE_SIGNATURE_REGISTERS, FIRMWARE_VERSION, FIRMWARE_VERSION_REGISTERS,
};
use crate::error::{Error, Result};
use crate::link::{Connector, LineSettings, LinkConfig, LinkSession};

/// Strings read from a device. Each one is read independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Bootloader version.
    pub bootloader_version: Option<String>,
    /// Application firmware version; bootloaders don't have one.
    pub firmware_version: Option<String>,
    /// Firmware signature.
    pub signature: Option<String>,
    /// Mode guessed from which reads succeeded.
    pub mode: DeviceMode,
    /// Line settings the device answered on.
    pub line: Option<LineSettings>,
}

/// Decode a register range holding one ASCII character per register.
///
/// Stops at the first NUL and trims trailing whitespace.
pub fn decode_ascii(registers: &[u16]) -> String {
    registers
        .iter()
        .map(|r| r.to_le_bytes()[0])
        .take_while(|b| *b != 0)
        .map(char::from)
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn read_string<C>(client: &mut C, address: u16, count: u16) -> ModbusResult<String>
where
    C: ModbusClient + ?Sized,
{
    client
        .read_holding_registers(address, count)
        .map(|registers| decode_ascii(&registers))
}

fn read_optional<C>(client: &mut C, name: &str, address: u16, count: u16) -> Option<String>
where
    C: ModbusClient + ?Sized,
{
    match read_string(client, address, count) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Reading {name} failed: {e}");
            None
        },
    }
}

/// Liveness check: read the firmware signature, which both modes have.
pub fn probe<C>(client: &mut C) -> ModbusResult<()>
where
    C: ModbusClient + ?Sized,
{
    read_string(client, FIRMWARE_SIGNATURE, FIRMWARE_SIGNATURE_REGISTERS).map(|_| ())
}

/// Read bootloader version, firmware version and signature.
pub fn read_info<C>(client: &mut C) -> DeviceInfo
where
    C: ModbusClient + ?Sized,
{
    let bootloader_version = read_optional(
        client,
        "bootloader version",
        BOOTLOADER_VERSION,
        BOOTLOADER_VERSION_REGISTERS,
    );
    let firmware_version = read_optional(
        client,
        "firmware version",
        FIRMWARE_VERSION,
        FIRMWARE_VERSION_REGISTERS,
    );
    let signature = read_optional(
        client,
        "signature",
        FIRMWARE_SIGNATURE,
        FIRMWARE_SIGNATURE_REGISTERS,
    );

    let mode = match (&firmware_version, &signature) {
        (Some(_), _) => DeviceMode::Application,
        (None, Some(_)) => DeviceMode::Bootloader,
        (None, None) => DeviceMode::Unknown,
    };

    DeviceInfo {
        bootloader_version,
        firmware_version,
        signature,
        mode,
        line: None,
    }
}

/// Finds the device under device or bootloader parameters and reads its
/// info.
#[derive(Debug, Clone)]
pub struct DeviceInfoProbe {
    device: LinkConfig,
    bootloader: LinkConfig,
}

impl DeviceInfoProbe {
    /// Probe with the given parameter sets.
    pub fn new(device: LinkConfig, bootloader: LinkConfig) -> Self {
        Self { device, bootloader }
    }

    /// Parameter sets to try for a mode hypothesis, in order.
    pub fn candidates(&self, mode: DeviceMode) -> Vec<&LinkConfig> {
        match mode {
            DeviceMode::Application => vec![&self.device],
            DeviceMode::Bootloader => vec![&self.bootloader],
            DeviceMode::Unknown => vec![&self.device, &self.bootloader],
        }
    }

    /// Open a session per candidate until the device answers, then read its
    /// info. Each session is closed before the next one is opened.
    pub fn run<K: Connector>(&self, connector: &mut K, mode: DeviceMode) -> Result<DeviceInfo> {
        let mut last = String::new();
        for config in self.candidates(mode) {
            info!("Probing device at {}", config.line);
            let mut session = LinkSession::open(&mut *connector, config.clone())?;
            match probe(session.client()) {
                Ok(()) => {
                    let mut info = read_info(session.client());
                    info.line = Some(config.line);
                    session.close()?;
                    return Ok(info);
                },
                Err(e) => {
                    warn!("No answer at {}: {e}", config.line);
                    last = e.to_string();
                    session.close()?;
                },
            }
        }
        Err(Error::ProbeFailed(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeDevice};

    fn configs() -> (LinkConfig, LinkConfig) {
        let device_line = LineSettings::new(115200, 'E', 1).unwrap();
        let device = LinkConfig::new("/dev/ttyUSB0", device_line, 1).unwrap();
        let bootloader = device.for_bootloader(LineSettings::BOOTLOADER);
        (device, bootloader)
    }

    fn bootloader_device() -> FakeDevice {
        FakeDevice::application()
            .listening_on(LineSettings::BOOTLOADER)
            .with_string(BOOTLOADER_VERSION, BOOTLOADER_VERSION_REGISTERS, "1.2.0")
            .with_string(FIRMWARE_SIGNATURE, FIRMWARE_SIGNATURE_REGISTERS, "mr6cv3")
    }

    #[test]
    fn test_decode_ascii_uses_low_byte() {
        assert_eq!(decode_ascii(&[0x3141, 0x0042, 0xFF43]), "ABC");
        assert_eq!(decode_ascii(&[0x41, 0x42, 0, 0x43]), "AB");
        assert_eq!(decode_ascii(&[0x41, 0x20, 0x20]), "A");
        assert_eq!(decode_ascii(&[]), "");
    }

    #[test]
    fn test_read_info_tolerates_missing_firmware_version() {
        let (device, bootloader) = configs();
        let mut connector = FakeConnector::new(bootloader_device());
        let info = DeviceInfoProbe::new(device, bootloader)
            .run(&mut connector, DeviceMode::Bootloader)
            .unwrap();

        assert_eq!(info.bootloader_version.as_deref(), Some("1.2.0"));
        assert_eq!(info.firmware_version, None);
        assert_eq!(info.signature.as_deref(), Some("mr6cv3"));
        assert_eq!(info.mode, DeviceMode::Bootloader);
        assert_eq!(info.line, Some(LineSettings::BOOTLOADER));
    }

    #[test]
    fn test_application_info() {
        let (device, bootloader) = configs();
        let fake = FakeDevice::application()
            .with_string(FIRMWARE_VERSION, FIRMWARE_VERSION_REGISTERS, "2.4.1+wb3")
            .with_string(FIRMWARE_SIGNATURE, FIRMWARE_SIGNATURE_REGISTERS, "mr6cv3");
        let mut connector = FakeConnector::new(fake);
        let info = DeviceInfoProbe::new(device.clone(), bootloader)
            .run(&mut connector, DeviceMode::Application)
            .unwrap();

        assert_eq!(info.firmware_version.as_deref(), Some("2.4.1+wb3"));
        assert_eq!(info.bootloader_version, None);
        assert_eq!(info.mode, DeviceMode::Application);
        assert_eq!(connector.log().opened(), vec![device]);
    }

    #[test]
    fn test_unknown_mode_falls_back_to_bootloader_parameters() {
        let (device, bootloader) = configs();
        let mut connector = FakeConnector::new(bootloader_device());
        let info = DeviceInfoProbe::new(device.clone(), bootloader.clone())
            .run(&mut connector, DeviceMode::Unknown)
            .unwrap();
        assert_eq!(info.line, Some(LineSettings::BOOTLOADER));

        let log = connector.log();
        assert_eq!(log.opened(), vec![device, bootloader]);
        assert_eq!(log.reads()[0], (FIRMWARE_SIGNATURE, false));
        assert_eq!(log.max_open(), 1);
        assert_eq!(log.closed(), 2);
    }

    #[test]
    fn test_unknown_mode_stops_at_first_answer() {
        let (device, bootloader) = configs();
        let fake = FakeDevice::application()
            .with_string(FIRMWARE_SIGNATURE, FIRMWARE_SIGNATURE_REGISTERS, "mr6cv3");
        let mut connector = FakeConnector::new(fake);
        DeviceInfoProbe::new(device.clone(), bootloader)
            .run(&mut connector, DeviceMode::Unknown)
            .unwrap();
        assert_eq!(connector.log().opened(), vec![device]);
    }

    #[test]
    fn test_probe_fails_under_every_parameter_set() {
        let (device, bootloader) = configs();
        let elsewhere = LineSettings::new(38400, 'N', 1).unwrap();
        let fake = FakeDevice::application().listening_on(elsewhere);
        let mut connector = FakeConnector::new(fake);
        let err = DeviceInfoProbe::new(device, bootloader)
            .run(&mut connector, DeviceMode::Unknown)
            .unwrap_err();
        assert!(matches!(err, Error::ProbeFailed(_)));
        assert_eq!(connector.log().opened().len(), 2);
        assert_eq!(connector.log().closed(), 2);
    }

    #[test]
    fn test_open_failure_is_not_retried_under_other_parameters() {
        let (device, bootloader) = configs();
        let mut connector = FakeConnector::new(FakeDevice::application()).failing_open();
        let err = DeviceInfoProbe::new(device, bootloader)
            .run(&mut connector, DeviceMode::Unknown)
            .unwrap_err();
        assert!(err.is_port_error());
    }
}
