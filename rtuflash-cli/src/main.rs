//! rtuflash CLI - Command-line tool for updating firmware on Modbus RTU
//! devices.
//!
//! ## Features
//!
//! - Jump from application firmware to the bootloader
//! - UART settings reset, EEPROM and flash filesystem erase
//! - Firmware transfer with progress display
//! - Version and signature readout
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use rtuflash::link::{DEFAULT_RESPONSE_TIMEOUT, DEFAULT_SLAVE_ID, timeout_from_secs};
use rtuflash::{LineSettings, LinkConfig, Maintenance, TransferPolicy};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if progress bars and symbols should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// rtuflash - Firmware update tool for Modbus RTU devices.
///
/// Environment variables:
///   RTUFLASH_PORT       - Default serial port
///   RTUFLASH_SLAVE_ID   - Default slave address (default: 1)
///   RTUFLASH_BAUD       - Default device baud rate (default: 9600)
#[derive(Parser)]
#[command(name = "rtuflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    rtuflash -p /dev/ttyRS485-1 -a 12 flash -j firmware.fw\n  \
    rtuflash -p /dev/ttyRS485-1 -a 12 flash firmware.fw\n  \
    rtuflash -p COM3 -a 12 -b 115200 info")]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port the device is connected to.
    #[arg(short, long, global = true, env = "RTUFLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Modbus slave address, 0-247 [default: 1].
    #[arg(short = 'a', long, global = true, env = "RTUFLASH_SLAVE_ID")]
    pub(crate) slave_id: Option<u32>,

    /// Device baud rate [default: 9600].
    #[arg(short, long, global = true, env = "RTUFLASH_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Device parity: N, E or O [default: N].
    #[arg(long, global = true)]
    pub(crate) parity: Option<char>,

    /// Device stop bits: 1 or 2 [default: 2].
    #[arg(short, long, global = true)]
    pub(crate) stop_bits: Option<u8>,

    /// Use the stop bits for receiving too (otherwise 1).
    #[arg(long, global = true)]
    pub(crate) force_stop_bits: bool,

    /// Response timeout in seconds [default: 1.0].
    #[arg(short, long, global = true)]
    pub(crate) timeout: Option<f64>,

    /// Log raw Modbus frames.
    #[arg(short = 'D', long, global = true)]
    pub(crate) debug: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Jump to bootloader options.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct JumpArgs {
    /// Jump to bootloader; it comes up at 9600 8N2.
    #[arg(short = 'j', long)]
    pub(crate) jump: bool,

    /// Jump to bootloader keeping the device baud rate and framing.
    #[arg(short = 'J', long)]
    pub(crate) jump_current_baud: bool,

    /// Jump register for legacy firmware (implies --jump).
    #[arg(long, value_name = "REGISTER")]
    pub(crate) jump_register: Option<u16>,
}

/// Bootloader maintenance options.
#[derive(Args, Debug, Clone, Default)]
#[allow(clippy::struct_field_names)]
pub(crate) struct MaintenanceArgs {
    /// Reset UART settings and slave address to factory defaults.
    #[arg(short = 'u', long)]
    pub(crate) reset_uart: bool,

    /// Erase EEPROM (except the device signature).
    #[arg(short = 'e', long)]
    pub(crate) erase_eeprom: bool,

    /// Erase the flash filesystem.
    #[arg(short = 'E', long)]
    pub(crate) erase_fs: bool,
}

impl From<&MaintenanceArgs> for Maintenance {
    fn from(args: &MaintenanceArgs) -> Self {
        Self {
            reset_uart: args.reset_uart,
            erase_eeprom: args.erase_eeprom,
            erase_fs: args.erase_fs,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Transfer a firmware image to the device bootloader.
    Flash {
        /// Path to the firmware file.
        firmware: PathBuf,

        #[command(flatten)]
        jump: JumpArgs,

        #[command(flatten)]
        maintenance: MaintenanceArgs,
    },

    /// Jump to bootloader and/or run maintenance commands without flashing.
    Prepare {
        #[command(flatten)]
        jump: JumpArgs,

        #[command(flatten)]
        maintenance: MaintenanceArgs,
    },

    /// Read bootloader version, firmware version and signature.
    Info {
        #[command(flatten)]
        jump: JumpArgs,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// CLI-level failures with their own exit codes.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Missing or unusable command-line input.
    #[error("{0}")]
    Usage(String),
    /// Invalid configuration value.
    #[error("{0}")]
    Config(String),
}

/// Process exit codes.
pub(crate) mod exit_code {
    pub(crate) const FAILURE: u8 = 1;
    pub(crate) const USAGE: u8 = 2;
    pub(crate) const CONFIG: u8 = 3;
    pub(crate) const DEVICE: u8 = 4;
}

/// Map an error to the process exit code.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => exit_code::USAGE,
            CliError::Config(_) => exit_code::CONFIG,
        };
    }
    if let Some(lib_err) = err.downcast_ref::<rtuflash::Error>() {
        if lib_err.is_config() {
            return exit_code::CONFIG;
        }
        if lib_err.is_port_error() || matches!(lib_err, rtuflash::Error::ProbeFailed(_)) {
            return exit_code::DEVICE;
        }
    }
    exit_code::FAILURE
}

/// Device link parameters from flags, environment and config file.
pub(crate) fn link_config(cli: &Cli, config: &Config) -> Result<LinkConfig> {
    let conn = &config.connection;
    let port = cli
        .port
        .clone()
        .or_else(|| conn.port.clone())
        .ok_or_else(|| {
            CliError::Usage("A port should be specified: rtuflash -p <PORT> <COMMAND>".to_string())
        })?;

    let defaults = LineSettings::default();
    let line = LineSettings::new(
        cli.baud.or(conn.baud).unwrap_or(defaults.baud_rate),
        cli.parity.or(conn.parity).unwrap_or(defaults.parity.as_char()),
        cli.stop_bits
            .or(conn.stop_bits)
            .unwrap_or(defaults.stop_bits.count()),
    )?;
    let timeout = match cli.timeout.or(conn.timeout) {
        Some(secs) => timeout_from_secs(secs)?,
        None => DEFAULT_RESPONSE_TIMEOUT,
    };
    let slave_id = cli
        .slave_id
        .or(conn.slave_id)
        .unwrap_or_else(|| u32::from(DEFAULT_SLAVE_ID));
    let force_stop_bits = cli.force_stop_bits || conn.force_stop_bits.unwrap_or(false);

    Ok(LinkConfig::new(port, line, slave_id)?
        .with_response_timeout(timeout)
        .with_stop_bits_forced(force_stop_bits)
        .with_debug(cli.debug))
}

/// Transfer policy with config file overrides.
pub(crate) fn transfer_policy(config: &Config) -> Result<TransferPolicy> {
    let flash = &config.flash;
    let defaults = TransferPolicy::default();
    let data_block_timeout = match flash.data_block_timeout {
        Some(secs) => timeout_from_secs(secs)?,
        None => defaults.data_block_timeout,
    };
    let policy = TransferPolicy {
        info_attempts: flash.info_attempts.unwrap_or(defaults.info_attempts),
        skip_after: flash.skip_after.unwrap_or(defaults.skip_after),
        abort_after: flash.abort_after.unwrap_or(defaults.abort_after),
        data_block_timeout,
        ..defaults
    };
    policy.validate()?;
    Ok(policy)
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = if cli.debug {
        format!("{level},rtuflash=trace")
    } else {
        level.to_string()
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(filter))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 || cli.debug {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            firmware,
            jump,
            maintenance,
        } => commands::flash::cmd_flash(cli, &config, firmware, jump, maintenance),
        Commands::Prepare { jump, maintenance } => {
            commands::flash::cmd_prepare(cli, &config, jump, maintenance)
        },
        Commands::Info { jump, json } => commands::info::cmd_info(cli, &config, jump, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "Specify a shell type, e.g.: rtuflash completions bash \
                         (or use rtuflash completions --install)"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);
    debug!(
        "rtuflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&e))
        },
    }
}
