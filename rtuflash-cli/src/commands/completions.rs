//! Shell completion generation and installation.

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use console::style;
use directories::BaseDirs;
use std::env;
use std::fs;
use std::io;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::Cli;

const BIN_NAME: &str = "rtuflash";

/// Line added to `.zshrc` so zsh finds `~/.zfunc/_rtuflash`.
const ZSH_FPATH_LINE: &str = "fpath=(~/.zfunc $fpath)";

fn generate_script(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, BIN_NAME, out);
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    generate_script(shell, &mut io::stdout());
}

/// Detect the user's current shell from environment.
pub(crate) fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }
    None
}

/// Match the file name of a shell binary path.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let shell_name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match shell_name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// Directories completion scripts are installed under.
#[derive(Debug, Clone)]
struct InstallDirs {
    home: PathBuf,
    config: PathBuf,
    data: PathBuf,
    powershell_profile: Option<PathBuf>,
}

impl InstallDirs {
    fn from_env() -> Result<Self> {
        let base = BaseDirs::new().context("Could not determine home directory")?;
        Ok(Self {
            home: base.home_dir().to_path_buf(),
            config: base.config_dir().to_path_buf(),
            data: base.data_dir().to_path_buf(),
            powershell_profile: env::var_os("PROFILE").map(PathBuf::from),
        })
    }
}

/// Where the completion script for `shell` goes.
fn completion_install_path(shell: Shell, dirs: &InstallDirs) -> Result<PathBuf> {
    let path = match shell {
        Shell::Bash => dirs
            .data
            .join("bash-completion")
            .join("completions")
            .join(BIN_NAME),
        Shell::Zsh => dirs.home.join(".zfunc").join(format!("_{BIN_NAME}")),
        Shell::Fish => dirs
            .config
            .join("fish")
            .join("completions")
            .join(format!("{BIN_NAME}.fish")),
        Shell::PowerShell => {
            let dir = match dirs.powershell_profile.as_deref().and_then(Path::parent) {
                Some(parent) => parent.to_path_buf(),
                None => dirs.config.join("powershell").join("completions"),
            };
            dir.join(format!("{BIN_NAME}.ps1"))
        },
        Shell::Elvish => dirs
            .config
            .join("elvish")
            .join("lib")
            .join(format!("{BIN_NAME}.elv")),
        _ => anyhow::bail!("Unsupported shell for auto-install"),
    };
    Ok(path)
}

fn ensure_zsh_fpath(zshrc: &Path) -> Result<bool> {
    let present = fs::read_to_string(zshrc).is_ok_and(|content| content.contains(ZSH_FPATH_LINE));
    if present {
        return Ok(false);
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(zshrc)
        .with_context(|| format!("Failed to update {}", zshrc.display()))?;
    writeln!(file, "\n# {BIN_NAME} completions")?;
    writeln!(file, "{ZSH_FPATH_LINE}")?;
    writeln!(file, "autoload -Uz compinit && compinit")?;
    Ok(true)
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => detect_shell_type().context(
            "Could not detect your shell. Please specify it explicitly:\n  \
             rtuflash completions --install bash",
        )?,
    };

    let dirs = InstallDirs::from_env()?;
    let path = completion_install_path(shell, &dirs)?;

    let mut buf = Vec::new();
    generate_script(shell, &mut buf);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &buf)
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓").green().bold(),
        style(shell).cyan(),
        style(path.display()).yellow()
    );

    match shell {
        Shell::Bash => {
            eprintln!("\nCompletions will be loaded automatically on new terminals.");
            eprintln!(
                "To activate now: {}",
                style(format!("source {}", path.display())).cyan()
            );
        },
        Shell::Zsh => {
            let zshrc = dirs.home.join(".zshrc");
            if ensure_zsh_fpath(&zshrc)? {
                eprintln!(
                    "{} Added fpath to {}",
                    style("✓").green().bold(),
                    style(zshrc.display()).yellow()
                );
            }
            eprintln!("\nRestart your shell or run: {}", style("exec zsh").cyan());
        },
        Shell::PowerShell => {
            eprintln!("\nAdd this to your PowerShell profile to load on startup:");
            eprintln!(
                "  {}",
                style(format!("Import-Module {}", path.display())).cyan()
            );
        },
        _ => {
            eprintln!("\nCompletions will be loaded automatically on new {shell} sessions.");
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs() -> InstallDirs {
        InstallDirs {
            home: PathBuf::from("/home/op"),
            config: PathBuf::from("/home/op/.config"),
            data: PathBuf::from("/home/op/.local/share"),
            powershell_profile: None,
        }
    }

    #[test]
    fn test_shell_from_path() {
        assert_eq!(shell_from_path("/bin/bash"), Some(Shell::Bash));
        assert_eq!(shell_from_path("/usr/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_path("/usr/local/bin/fish"), Some(Shell::Fish));
        assert_eq!(shell_from_path("/usr/bin/elvish"), Some(Shell::Elvish));
        assert_eq!(shell_from_path("/usr/bin/pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_path("bash"), Some(Shell::Bash));
    }

    #[test]
    fn test_shell_from_path_unknown() {
        assert_eq!(shell_from_path("/usr/bin/tcsh"), None);
        assert_eq!(shell_from_path(""), None);
    }

    #[test]
    fn test_install_paths() {
        let dirs = dirs();
        let cases = [
            (Shell::Bash, "/home/op/.local/share/bash-completion/completions/rtuflash"),
            (Shell::Zsh, "/home/op/.zfunc/_rtuflash"),
            (Shell::Fish, "/home/op/.config/fish/completions/rtuflash.fish"),
            (Shell::Elvish, "/home/op/.config/elvish/lib/rtuflash.elv"),
            (Shell::PowerShell, "/home/op/.config/powershell/completions/rtuflash.ps1"),
        ];
        for (shell, expected) in cases {
            assert_eq!(
                completion_install_path(shell, &dirs).unwrap(),
                PathBuf::from(expected),
                "{shell}"
            );
        }
    }

    #[test]
    fn test_powershell_path_follows_profile() {
        let mut dirs = dirs();
        dirs.powershell_profile = Some(PathBuf::from("/home/op/Documents/PowerShell/profile.ps1"));
        assert_eq!(
            completion_install_path(Shell::PowerShell, &dirs).unwrap(),
            PathBuf::from("/home/op/Documents/PowerShell/rtuflash.ps1")
        );
    }

    #[test]
    fn test_zsh_fpath_added_once() {
        let dir = tempfile::tempdir().unwrap();
        let zshrc = dir.path().join(".zshrc");
        fs::write(&zshrc, "export EDITOR=vim\n").unwrap();

        assert!(ensure_zsh_fpath(&zshrc).unwrap());
        assert!(!ensure_zsh_fpath(&zshrc).unwrap());

        let content = fs::read_to_string(&zshrc).unwrap();
        assert!(content.starts_with("export EDITOR=vim"));
        assert_eq!(content.matches(ZSH_FPATH_LINE).count(), 1);
    }

    #[test]
    fn test_generated_scripts_name_the_binary() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
            let mut buf = Vec::new();
            generate_script(shell, &mut buf);
            assert!(String::from_utf8(buf).unwrap().contains(BIN_NAME), "{shell}");
        }
    }

    #[test]
    fn test_generated_scripts_list_subcommands() {
        let mut buf = Vec::new();
        generate_script(Shell::Bash, &mut buf);
        let script = String::from_utf8(buf).unwrap();
        for subcommand in ["flash", "prepare", "info", "list-ports"] {
            assert!(script.contains(subcommand), "{subcommand}");
        }
    }
}
