//! Port abstraction for serial communication.
//!
//! The Modbus RTU client is written against the [`Port`] trait rather than a
//! concrete serial port, which keeps framing and recovery logic testable
//! with in-memory ports.
//!
//! ```text
//! +------------------+
//! |  Modbus RTU      |
//! |  (RtuClient)     |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |   Port Trait     |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! A port is opened with a fixed [`SerialConfig`]. There is deliberately no
//! way to change baud rate, parity or stop bits on an open port: switching
//! parameter sets means closing the port and opening a new one.

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyRS485-1", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits used when transmitting.
    pub stop_bits: StopBits,
    /// Stop bits expected when receiving.
    ///
    /// Most UART drivers apply a single stop-bit setting to both
    /// directions; in that case the transmit setting wins and receivers
    /// accept frames with extra stop bits anyway.
    pub rx_stop_bits: StopBits,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            timeout: Duration::from_millis(1000),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::Two,
            rx_stop_bits: StopBits::One,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Receive stop bits that differ from the transmit setting and so
    /// can't be applied to a single-setting UART.
    pub fn unapplied_rx_stop_bits(&self) -> Option<StopBits> {
        (self.rx_stop_bits != self.stop_bits).then_some(self.rx_stop_bits)
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl Parity {
    /// All parity modes accepted on the command line.
    pub const ALL: [Self; 3] = [Self::None, Self::Even, Self::Odd];

    /// Parse the conventional single-letter form (`N`, `E`, `O`).
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(Self::None),
            'E' => Some(Self::Even),
            'O' => Some(Self::Odd),
            _ => None,
        }
    }

    /// Single-letter form (`N`, `E`, `O`).
    pub fn as_char(self) -> char {
        match self {
            Self::None => 'N',
            Self::Even => 'E',
            Self::Odd => 'O',
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

impl StopBits {
    /// Convert a numeric stop-bit count.
    pub fn from_count(count: u8) -> Option<Self> {
        match count {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            _ => None,
        }
    }

    /// Numeric stop-bit count.
    pub fn count(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Unified port trait for serial communication.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

/// Normalise a user-supplied port name for the host platform.
///
/// On Windows, `COM12`, `COM12:` and `\\.\COM12` all refer to the same
/// device, but only the `\\.\` form works for ports above `COM9`. Other
/// platforms use the name as given.
pub fn normalize_port_name(name: &str) -> String {
    if cfg!(windows) {
        normalize_windows_port_name(name)
    } else {
        name.to_string()
    }
}

fn normalize_windows_port_name(name: &str) -> String {
    let stripped = name
        .trim_start_matches(['.', '\\'])
        .trim_end_matches(':');
    format!(r"\\.\{stripped}")
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
