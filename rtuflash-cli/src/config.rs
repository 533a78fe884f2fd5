//! Configuration file support for rtuflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RTUFLASH_*)
//! 3. Local config file (./rtuflash.toml)
//! 4. Global config file (~/.config/rtuflash/config.toml)
//!
//! A file that can't be read or parsed is reported with a warning and
//! skipped.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "rtuflash.toml";

/// Device link defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port (e.g., "/dev/ttyRS485-1" or "COM3").
    pub port: Option<String>,
    /// Modbus slave address.
    pub slave_id: Option<u32>,
    /// Device baud rate.
    pub baud: Option<u32>,
    /// Device parity (N, E or O).
    pub parity: Option<char>,
    /// Device stop bits.
    pub stop_bits: Option<u8>,
    /// Use the stop bits for receiving as well.
    pub force_stop_bits: Option<bool>,
    /// Response timeout in seconds.
    pub timeout: Option<f64>,
}

/// Transfer defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Jump register for legacy firmware.
    pub jump_register: Option<u16>,
    /// Info block attempts.
    pub info_attempts: Option<u32>,
    /// Consecutive data block failures before a block is skipped.
    pub skip_after: Option<u32>,
    /// Consecutive data block failures that abort the transfer.
    pub abort_after: Option<u32>,
    /// Data block response timeout in seconds.
    pub data_block_timeout: Option<f64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Device link defaults.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Transfer defaults.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| warn!("Failed to parse config file {}: {e}", path.display()))
                .ok(),
            Err(e) => {
                warn!("Failed to read config file {}: {e}", path.display());
                None
            },
        }
    }

    /// Parse TOML configuration text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Global config directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rtuflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Global config file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Overlay every value set in `other`.
    fn merge(&mut self, other: Self) {
        let c = other.connection;
        merge_opt(&mut self.connection.port, c.port);
        merge_opt(&mut self.connection.slave_id, c.slave_id);
        merge_opt(&mut self.connection.baud, c.baud);
        merge_opt(&mut self.connection.parity, c.parity);
        merge_opt(&mut self.connection.stop_bits, c.stop_bits);
        merge_opt(&mut self.connection.force_stop_bits, c.force_stop_bits);
        merge_opt(&mut self.connection.timeout, c.timeout);

        let f = other.flash;
        merge_opt(&mut self.flash.jump_register, f.jump_register);
        merge_opt(&mut self.flash.info_attempts, f.info_attempts);
        merge_opt(&mut self.flash.skip_after, f.skip_after);
        merge_opt(&mut self.flash.abort_after, f.abort_after);
        merge_opt(&mut self.flash.data_block_timeout, f.data_block_timeout);
    }
}

fn merge_opt<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.flash.jump_register.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let config = Config::parse(
            r#"
[connection]
port = "/dev/ttyRS485-1"
slave_id = 12
baud = 115200
parity = "E"
stop_bits = 1
force_stop_bits = true
timeout = 2.5

[flash]
jump_register = 200
abort_after = 9
"#,
        )
        .unwrap();

        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyRS485-1"));
        assert_eq!(config.connection.slave_id, Some(12));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.connection.parity, Some('E'));
        assert_eq!(config.connection.stop_bits, Some(1));
        assert_eq!(config.connection.force_stop_bits, Some(true));
        assert_eq!(config.connection.timeout, Some(2.5));
        assert_eq!(config.flash.jump_register, Some(200));
        assert_eq!(config.flash.abort_after, Some(9));
        assert_eq!(config.flash.info_attempts, None);
    }

    #[test]
    fn test_config_from_empty_toml() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::parse("invalid toml [[[").is_err());
        assert!(Config::parse("[connection]\nbaud = \"fast\"").is_err());
    }

    #[test]
    fn test_merge_overrides_only_set_values() {
        let mut config = Config::parse("[connection]\nport = \"COM3\"\nbaud = 19200").unwrap();
        config.merge(Config::parse("[connection]\nbaud = 38400").unwrap());
        assert_eq!(config.connection.port.as_deref(), Some("COM3"));
        assert_eq!(config.connection.baud, Some(38400));
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyUSB0".to_string());
        config.flash.skip_after = Some(2);
        let text = toml::to_string(&config).unwrap();
        assert_eq!(Config::parse(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[connection]\nslave_id = 7\n").unwrap();
        assert_eq!(Config::load_from_path(&path).connection.slave_id, Some(7));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();
        assert_eq!(Config::load_from_path(&path), Config::default());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/rtuflash.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_global_config_path_ends_with_file_name() {
        if let Some(path) = Config::global_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
