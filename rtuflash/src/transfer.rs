//! Block transfer to the bootloader.
//!
//! A transfer writes the info block once, then every data block in offset
//! order. The info block is retried with a backoff; data blocks follow a
//! bounded-loss policy: after a run of consecutive failures the block is
//! given up and the transfer moves on, and a longer run aborts it.

use std::time::Duration;

use log::{debug, info, warn};

use crate::client::{ModbusClient, ModbusError};
use crate::delay::Delay;
use crate::device::registers::{DATA_BLOCK, INFO_BLOCK};
use crate::error::{Error, Result};
use crate::image::{DATA_BLOCK_SIZE, FirmwareImage, INFO_BLOCK_SIZE};
use crate::policy::{ErrorClass, FatalReason, Phase, classify};

/// Retry budgets and timeouts for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferPolicy {
    /// Info block attempts before giving up.
    pub info_attempts: u32,
    /// Wait between info block attempts.
    pub info_backoff: Duration,
    /// Consecutive data block failures after which the block is skipped.
    /// Zero never skips.
    pub skip_after: u32,
    /// Consecutive data block failures that abort the transfer.
    pub abort_after: u32,
    /// Response timeout for data blocks.
    pub data_block_timeout: Duration,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            info_attempts: 3,
            info_backoff: Duration::from_secs(3),
            skip_after: 3,
            abort_after: 6,
            data_block_timeout: Duration::from_secs(1),
        }
    }
}

/// Next step after a failed data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAction {
    /// Send the same block again.
    Retry,
    /// Give up on this block and move to the next one.
    Skip,
    /// Stop the transfer.
    Abort,
}

impl TransferPolicy {
    /// Check the budgets.
    pub fn validate(&self) -> Result<()> {
        if self.info_attempts == 0 {
            return Err(Error::Config(
                "Info block needs at least one attempt".to_string(),
            ));
        }
        if self.abort_after == 0 {
            return Err(Error::Config(
                "Data block abort limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Decide what to do given the consecutive failure count, including the
    /// failure that just happened.
    pub fn on_block_failure(&self, consecutive: u32) -> BlockAction {
        if consecutive >= self.abort_after {
            BlockAction::Abort
        } else if self.skip_after != 0 && consecutive % self.skip_after == 0 {
            BlockAction::Skip
        } else {
            BlockAction::Retry
        }
    }
}

/// Position within the data phase of a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferCursor {
    /// Zero-based index of the next block.
    pub block: usize,
    /// Failures since the last acknowledged block.
    pub consecutive_errors: u32,
}

impl TransferCursor {
    /// Cursor at the first data block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset of the next block in the image.
    pub fn offset(&self) -> usize {
        INFO_BLOCK_SIZE + self.block * DATA_BLOCK_SIZE
    }

    /// Block acknowledged.
    pub fn succeeded(&mut self) {
        self.consecutive_errors = 0;
        self.advance();
    }

    /// Block failed; returns the new consecutive count.
    pub fn failed(&mut self) -> u32 {
        self.consecutive_errors += 1;
        self.consecutive_errors
    }

    /// Move past the current block.
    pub fn advance(&mut self) {
        self.block += 1;
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Data blocks in the image.
    pub blocks: usize,
    /// One-based indices of blocks given up after repeated failures.
    pub skipped: Vec<usize>,
}

/// Sends a firmware image over an open bootloader session.
#[derive(Debug)]
pub struct FirmwareTransfer<'a> {
    image: &'a FirmwareImage,
    policy: TransferPolicy,
}

impl<'a> FirmwareTransfer<'a> {
    /// Transfer with the default policy.
    pub fn new(image: &'a FirmwareImage) -> Self {
        Self {
            image,
            policy: TransferPolicy::default(),
        }
    }

    /// Use a different retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: TransferPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Policy in use.
    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    /// Run the transfer. `progress` gets `(block, total)` after every data
    /// block attempt, with `block` one-based.
    pub fn run<C, D, F>(
        &self,
        client: &mut C,
        delay: &mut D,
        mut progress: F,
    ) -> Result<TransferReport>
    where
        C: ModbusClient + ?Sized,
        D: Delay + ?Sized,
        F: FnMut(usize, usize),
    {
        self.policy.validate()?;
        self.send_info_block(client, delay)?;

        client.set_response_timeout(self.policy.data_block_timeout)?;
        self.send_data_blocks(client, &mut progress)
    }

    fn send_info_block<C, D>(&self, client: &mut C, delay: &mut D) -> Result<()>
    where
        C: ModbusClient + ?Sized,
        D: Delay + ?Sized,
    {
        info!("Sending info block");
        let words = self.image.info_block();
        let attempts = self.policy.info_attempts;
        let mut last = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                delay.delay(self.policy.info_backoff);
                info!("Info block attempt {attempt}/{attempts}");
            }
            match client.write_registers(INFO_BLOCK, &words) {
                Ok(()) => {
                    debug!("Info block accepted");
                    return Ok(());
                },
                Err(e) => match classify(Phase::InfoBlock, &e) {
                    ErrorClass::Fatal(reason) => return Err(fatal(reason, 0, &e)),
                    ErrorClass::Transient => {
                        warn!("Error while sending info block (attempt {attempt}/{attempts}): {e}");
                        last = e.to_string();
                    },
                },
            }
        }

        Err(Error::InfoBlockFailed { attempts, last })
    }

    fn send_data_blocks<C, F>(&self, client: &mut C, progress: &mut F) -> Result<TransferReport>
    where
        C: ModbusClient + ?Sized,
        F: FnMut(usize, usize),
    {
        let total = self.image.data_block_count();
        info!("Sending {total} data blocks");

        let mut cursor = TransferCursor::new();
        let mut report = TransferReport {
            blocks: total,
            skipped: Vec::new(),
        };

        while let Some(block) = self.image.data_block(cursor.block) {
            let number = block.index + 1;
            match client.write_registers(DATA_BLOCK, &block.words) {
                Ok(()) => cursor.succeeded(),
                Err(e) => {
                    if let ErrorClass::Fatal(reason) = classify(Phase::DataBlock, &e) {
                        return Err(fatal(reason, number, &e));
                    }
                    let failures = cursor.failed();
                    warn!("Error while sending data block {number}/{total}: {e}");
                    match self.policy.on_block_failure(failures) {
                        BlockAction::Retry => {},
                        BlockAction::Skip => {
                            let offset = cursor.offset();
                            warn!(
                                "Giving up on data block {number} (offset {offset:#x}) \
                                 after {failures} errors"
                            );
                            report.skipped.push(number);
                            cursor.advance();
                        },
                        BlockAction::Abort => {
                            return Err(Error::TransferAborted {
                                block: number,
                                failures,
                                last: e.to_string(),
                            });
                        },
                    }
                },
            }
            progress(number, total);
        }

        info!("Firmware transfer complete");
        Ok(report)
    }
}

fn fatal(reason: FatalReason, block: usize, e: &ModbusError) -> Error {
    let detail = e.to_string();
    match reason {
        FatalReason::NotInBootloader => Error::NotInBootloader(detail),
        FatalReason::ImageRejected => Error::ImageRejected(detail),
        FatalReason::ImageCorrupted => Error::ImageCorrupted {
            block,
            reason: detail,
        },
        FatalReason::UpgradeUnsupported => Error::DeviceNotSupported(detail),
        FatalReason::JumpFailed => Error::JumpFailed(detail),
    }
}
