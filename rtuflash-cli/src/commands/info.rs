//! Device info and port listing command implementations.

use anyhow::Result;
use console::style;
use rtuflash::{DeviceInfo, Flasher, NativeConnector, PortInfo, discover_ports};

use super::build_plan;
use crate::config::Config;
use crate::{Cli, JumpArgs, MaintenanceArgs};

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, jump: &JumpArgs, json: bool) -> Result<()> {
    let plan = build_plan(cli, config, jump, &MaintenanceArgs::default())?.with_read_info(true);

    let mut flasher = Flasher::new(NativeConnector);
    let report = flasher.run(&plan, |_, _| {})?;
    let info = report.info.unwrap_or_default();

    if json {
        println!("{}", info_json(&info)?);
        return Ok(());
    }

    eprintln!("\n{}", style("Device Information").bold().underlined());
    eprintln!("  Mode:               {}", style(info.mode).cyan());
    if let Some(line) = info.line {
        eprintln!("  Answered at:        {line}");
    }
    eprintln!(
        "  Bootloader version: {}",
        display_value(info.bootloader_version.as_deref())
    );
    eprintln!(
        "  Firmware version:   {}",
        display_value(info.firmware_version.as_deref())
    );
    eprintln!(
        "  Signature:          {}",
        display_value(info.signature.as_deref())
    );
    Ok(())
}

fn display_value(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        Some(_) => style("(empty)").dim().to_string(),
        None => style("(unavailable)").dim().to_string(),
    }
}

/// JSON envelope for `info --json`.
pub(crate) fn info_json(info: &DeviceInfo) -> Result<String> {
    let output = serde_json::json!({
        "ok": true,
        "data": {
            "mode": info.mode.to_string(),
            "line": info.line.map(|l| l.to_string()),
            "bootloader_version": info.bootloader_version,
            "firmware_version": info.firmware_version,
            "signature": info.signature,
        }
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = discover_ports()?;

    if json {
        println!("{}", ports_json(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }
    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = match port.product.as_deref() {
            Some(product) if !product.is_empty() => format!(" - {}", style(product).dim()),
            _ => String::new(),
        };
        eprintln!(
            "  {} {}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan()
        );
    }
    Ok(())
}

/// JSON envelope for `list-ports --json`.
pub(crate) fn ports_json(ports: &[PortInfo]) -> Result<String> {
    let output = serde_json::json!({
        "ok": true,
        "data": {
            "ports": ports,
        }
    });
    Ok(serde_json::to_string_pretty(&output)?)
}
