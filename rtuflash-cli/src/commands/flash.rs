//! Flash and prepare command implementations.

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use rtuflash::{DeviceMode, FlashPlan, Flasher, NativeConnector, RunReport};
use std::path::Path;

use super::build_plan;
use crate::config::Config;
use crate::{Cli, CliError, JumpArgs, MaintenanceArgs, use_fancy_output};

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(concat!(
                "{spinner:.green} [{elapsed_precise}] ",
                "[{bar:40.cyan/blue}] {pos}/{len} blocks {msg}"
            ))
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

fn announce(cli: &Cli, plan: &FlashPlan) {
    if cli.quiet {
        return;
    }
    eprintln!(
        "{} Using {} at {}, slave {}",
        style("ℹ").blue(),
        style(&plan.link.port).cyan(),
        plan.link.line,
        plan.link.slave_id
    );
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    jump: &JumpArgs,
    maintenance: &MaintenanceArgs,
) -> Result<()> {
    let plan = build_plan(cli, config, jump, maintenance)?.with_firmware(firmware);
    announce(cli, &plan);
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware from {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    let pb = progress_bar(cli);
    let mut flasher = Flasher::new(NativeConnector);
    let result = flasher.run(&plan, |block, total| {
        pb.set_length(total as u64);
        pb.set_position(block as u64);
    });
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            pb.abandon();
            return Err(e.into());
        },
    };
    pb.finish_with_message("done");

    let skipped = report
        .transfer
        .as_ref()
        .map(|t| t.skipped.as_slice())
        .unwrap_or_default();
    if !skipped.is_empty() {
        warn!(
            "{} data block(s) were given up after repeated errors: {skipped:?}",
            skipped.len()
        );
    }

    if !cli.quiet {
        eprintln!(
            "\n{} Firmware transfer complete",
            style("🎉").green().bold()
        );
    }
    Ok(())
}

/// Prepare command implementation: jump and maintenance without a transfer.
pub(crate) fn cmd_prepare(
    cli: &Cli,
    config: &Config,
    jump: &JumpArgs,
    maintenance: &MaintenanceArgs,
) -> Result<()> {
    let plan = build_plan(cli, config, jump, maintenance)?;
    if plan.jump()?.is_none() && plan.maintenance.is_empty() {
        return Err(CliError::Usage(
            "Nothing to do: select a jump (-j, -J) or a maintenance command (-u, -e, -E)"
                .to_string(),
        )
        .into());
    }
    announce(cli, &plan);

    let mut flasher = Flasher::new(NativeConnector);
    let report = flasher.run(&plan, |_, _| {})?;
    if !cli.quiet {
        eprintln!("{}", next_step_hint(&report));
    }
    Ok(())
}

/// What the operator should do after `prepare`.
pub(crate) fn next_step_hint(report: &RunReport) -> String {
    match report.mode {
        DeviceMode::Bootloader => format!(
            "{} Device is in bootloader mode. Flash firmware with: rtuflash flash <FIRMWARE>",
            style("✓").green()
        ),
        DeviceMode::Application => format!(
            "{} Device is still running its application firmware",
            style("⚠").yellow()
        ),
        DeviceMode::Unknown => format!(
            "{} Device mode is unknown; check with: rtuflash info",
            style("ℹ").blue()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(mode: DeviceMode) -> RunReport {
        RunReport {
            mode,
            ..RunReport::default()
        }
    }

    #[test]
    fn test_next_step_hint_bootloader() {
        console::set_colors_enabled(false);
        let hint = next_step_hint(&report(DeviceMode::Bootloader));
        assert!(hint.contains("bootloader mode"));
        assert!(hint.contains("rtuflash flash"));
    }

    #[test]
    fn test_next_step_hint_application_and_unknown() {
        console::set_colors_enabled(false);
        assert!(next_step_hint(&report(DeviceMode::Application)).contains("application"));
        assert!(next_step_hint(&report(DeviceMode::Unknown)).contains("rtuflash info"));
    }
}
