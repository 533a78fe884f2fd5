//! End-to-end run: jump, maintenance, then transfer or inspection.
//!
//! ```rust,no_run
//! use rtuflash::{FlashPlan, Flasher, LineSettings, LinkConfig, NativeConnector};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let link = LinkConfig::new("/dev/ttyRS485-1", LineSettings::BOOTLOADER, 1)?;
//!     let plan = FlashPlan::new(link)
//!         .with_standard_jump()
//!         .with_firmware("firmware.fw");
//!
//!     let mut flasher = Flasher::new(NativeConnector);
//!     let report = flasher.run(&plan, |block, total| println!("{block}/{total}"))?;
//!     println!("Device is in {} mode", report.mode);
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::delay::{Delay, ThreadDelay};
use crate::device::DeviceMode;
use crate::device::registers::JUMP_TO_BOOTLOADER;
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::link::{Connector, LineSettings, LinkConfig, LinkSession};
use crate::maintenance::Maintenance;
use crate::mode::{BootloaderLine, JumpStrategy, jump_to_bootloader};
use crate::probe::{DeviceInfo, DeviceInfoProbe};
use crate::transfer::{FirmwareTransfer, TransferPolicy, TransferReport};

/// What a run should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPlan {
    /// Device (application) link parameters.
    pub link: LinkConfig,
    /// Standard jump through this register.
    pub standard_jump: Option<u16>,
    /// Jump keeping the current baud rate.
    pub current_baud_jump: bool,
    /// Maintenance commands to send to the bootloader.
    pub maintenance: Maintenance,
    /// Firmware image to transfer.
    pub firmware: Option<PathBuf>,
    /// Read device info when no firmware is given.
    pub read_info: bool,
    /// Transfer retry policy.
    pub policy: TransferPolicy,
}

impl FlashPlan {
    /// Plan that does nothing beyond validating `link`.
    pub fn new(link: LinkConfig) -> Self {
        Self {
            link,
            standard_jump: None,
            current_baud_jump: false,
            maintenance: Maintenance::default(),
            firmware: None,
            read_info: false,
            policy: TransferPolicy::default(),
        }
    }

    /// Jump through the default register, sent over the device's line
    /// settings. The bootloader then listens on the fixed settings.
    #[must_use]
    pub fn with_standard_jump(self) -> Self {
        self.with_jump_register(JUMP_TO_BOOTLOADER)
    }

    /// Jump through `register`, sent over the device's line settings.
    /// The bootloader then listens on the fixed settings.
    #[must_use]
    pub fn with_jump_register(mut self, register: u16) -> Self {
        self.standard_jump = Some(register);
        self
    }

    /// Jump keeping the current line settings.
    #[must_use]
    pub fn with_current_baud_jump(mut self) -> Self {
        self.current_baud_jump = true;
        self
    }

    /// Maintenance commands to send.
    #[must_use]
    pub fn with_maintenance(mut self, maintenance: Maintenance) -> Self {
        self.maintenance = maintenance;
        self
    }

    /// Firmware to transfer.
    #[must_use]
    pub fn with_firmware(mut self, path: impl AsRef<Path>) -> Self {
        self.firmware = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read versions and signature instead of transferring firmware.
    #[must_use]
    pub fn with_read_info(mut self, read_info: bool) -> Self {
        self.read_info = read_info;
        self
    }

    /// Use a different transfer retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: TransferPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Selected jump, if any.
    pub fn jump(&self) -> Result<Option<JumpStrategy>> {
        match (self.standard_jump, self.current_baud_jump) {
            (Some(_), true) => Err(Error::Config(
                "Standard and current baud jumps can't be used together".to_string(),
            )),
            (Some(register), false) => Ok(Some(JumpStrategy::StandardBaud { register })),
            (None, true) => Ok(Some(JumpStrategy::CurrentBaud)),
            (None, false) => Ok(None),
        }
    }

    /// Check everything that can be checked without I/O.
    pub fn validate(&self) -> Result<()> {
        self.link.validate()?;
        self.jump()?;
        self.policy.validate()
    }

    /// Whether the run only reads device info.
    fn is_inspection(&self) -> bool {
        self.firmware.is_none() && self.maintenance.is_empty()
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RunReport {
    /// Mode hypothesis at the end of the run.
    pub mode: DeviceMode,
    /// Info read from the device.
    pub info: Option<DeviceInfo>,
    /// Transfer result.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub transfer: Option<TransferReport>,
}

/// Runs [`FlashPlan`]s over one connector.
pub struct Flasher<K: Connector, D: Delay = ThreadDelay> {
    connector: K,
    delay: D,
}

impl<K: Connector> Flasher<K, ThreadDelay> {
    /// Flasher that waits with real sleeps.
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            delay: ThreadDelay,
        }
    }
}

impl<K: Connector, D: Delay> Flasher<K, D> {
    /// Replace the delay implementation.
    pub fn with_delay<E: Delay>(self, delay: E) -> Flasher<K, E> {
        Flasher {
            connector: self.connector,
            delay,
        }
    }

    /// Connector used for sessions.
    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Execute `plan`. `progress` receives `(block, total)` during transfer.
    pub fn run<F>(&mut self, plan: &FlashPlan, progress: F) -> Result<RunReport>
    where
        F: FnMut(usize, usize),
    {
        plan.validate()?;
        let jump = plan.jump()?;

        // Load before touching the device so a bad file can't leave it
        // sitting in the bootloader.
        let image = plan
            .firmware
            .as_deref()
            .map(FirmwareImage::from_file)
            .transpose()?;
        if let Some(image) = &image {
            info!(
                "Firmware loaded: {} bytes, {} data blocks",
                image.len(),
                image.data_block_count()
            );
        }

        let mut report = RunReport::default();
        let mut bootloader_line = LineSettings::BOOTLOADER;

        if let Some(strategy) = jump {
            let mut session = LinkSession::open(&mut self.connector, plan.link.clone())?;
            let transition = jump_to_bootloader(session.client(), strategy, &mut self.delay);
            session.close()?;
            let transition = transition?;
            report.mode = transition.mode;
            if transition.line == BootloaderLine::Device {
                bootloader_line = plan.link.line;
            }
        }

        let bootloader = plan.link.for_bootloader(bootloader_line);
        debug!("Bootloader parameters: {}", bootloader.line);

        if plan.is_inspection() {
            if plan.read_info {
                let info = DeviceInfoProbe::new(plan.link.clone(), bootloader)
                    .run(&mut self.connector, report.mode)?;
                if report.mode == DeviceMode::Unknown {
                    report.mode = info.mode;
                }
                report.info = Some(info);
            }
            return Ok(report);
        }

        let mut session = LinkSession::open(&mut self.connector, bootloader)?;
        report.mode = plan
            .maintenance
            .run(session.client(), &mut self.delay, report.mode);

        if let Some(image) = &image {
            let transfer = FirmwareTransfer::new(image)
                .with_policy(plan.policy)
                .run(session.client(), &mut self.delay, progress)?;
            report.mode = DeviceMode::Bootloader;
            report.transfer = Some(transfer);
        }
        session.close()?;

        Ok(report)
    }
}
