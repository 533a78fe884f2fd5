//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod info;

use anyhow::Result;
use rtuflash::FlashPlan;

use crate::config::Config;
use crate::{Cli, JumpArgs, MaintenanceArgs, link_config, transfer_policy};

/// Build a plan from the global options, config file and command flags.
///
/// Conflicting jumps are left for [`FlashPlan::validate`] to reject.
pub(crate) fn build_plan(
    cli: &Cli,
    config: &Config,
    jump: &JumpArgs,
    maintenance: &MaintenanceArgs,
) -> Result<FlashPlan> {
    let mut plan = FlashPlan::new(link_config(cli, config)?)
        .with_policy(transfer_policy(config)?)
        .with_maintenance(maintenance.into());

    if jump.jump || jump.jump_register.is_some() {
        plan = match jump.jump_register.or(config.flash.jump_register) {
            Some(register) => plan.with_jump_register(register),
            None => plan.with_standard_jump(),
        };
    }
    if jump.jump_current_baud {
        plan = plan.with_current_baud_jump();
    }
    Ok(plan)
}
