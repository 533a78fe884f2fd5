//! Link parameters and sessions.
//!
//! A [`LinkSession`] owns one open Modbus client configured from a
//! [`LinkConfig`]. Sessions hold the [`Connector`] mutably borrowed, so a
//! second session can't be opened until the first one is closed or
//! dropped. Moving between application and bootloader parameters always
//! means close-then-reopen.

use std::fmt;
use std::time::Duration;

use log::{debug, warn};

use crate::client::{MAX_SLAVE_ID, ModbusClient};
use crate::error::{Error, Result};
use crate::port::{DataBits, Parity, SerialConfig, StopBits};

/// Baud rates devices can be configured for.
pub const ALLOWED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Stop-bit counts accepted from the operator.
pub const ALLOWED_STOP_BITS: [u8; 2] = [1, 2];

/// Parity letters accepted from the operator.
pub const ALLOWED_PARITY: [char; 3] = ['N', 'E', 'O'];

/// Default slave address.
pub const DEFAULT_SLAVE_ID: u8 = 1;

/// Default response timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Minimum response timeout while talking to a bootloader.
///
/// Info block processing includes a flash erase.
pub const BOOTLOADER_MIN_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// UART framing for one side of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineSettings {
    /// Baud rate.
    pub baud_rate: u32,
    /// Parity.
    pub parity: Parity,
    /// Data bits.
    pub data_bits: DataBits,
    /// Stop bits.
    pub stop_bits: StopBits,
}

impl LineSettings {
    /// Fixed settings every bootloader listens on: 9600 8N2.
    pub const BOOTLOADER: Self = Self {
        baud_rate: 9600,
        parity: Parity::None,
        data_bits: DataBits::Eight,
        stop_bits: StopBits::Two,
    };

    /// Build settings from operator values, rejecting anything outside the
    /// allowed sets.
    pub fn new(baud_rate: u32, parity: char, stop_bits: u8) -> Result<Self> {
        let parity = Parity::from_char(parity)
            .ok_or_else(|| Error::Config(format!("Parity ({parity}) is not supported")))?;
        let stop_bits = StopBits::from_count(stop_bits)
            .ok_or_else(|| Error::Config(format!("Stopbits ({stop_bits}) are not supported")))?;
        let settings = Self {
            baud_rate,
            parity,
            data_bits: DataBits::Eight,
            stop_bits,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings against the allowed sets.
    pub fn validate(&self) -> Result<()> {
        if !ALLOWED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(Error::Config(format!(
                "Baudrate ({}) is not supported",
                self.baud_rate
            )));
        }
        if self.data_bits != DataBits::Eight {
            return Err(Error::Config(
                "Modbus RTU requires 8 data bits".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::BOOTLOADER
    }
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data_bits = match self.data_bits {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            data_bits,
            self.parity.as_char(),
            self.stop_bits.count()
        )
    }
}

/// Everything needed to open a session to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Port name/path.
    pub port: String,
    /// UART framing.
    pub line: LineSettings,
    /// Use the line's stop bits for receiving too. Otherwise receive with 1.
    pub stop_bits_forced: bool,
    /// Slave address, 0..=247.
    pub slave_id: u8,
    /// How long to wait for each response.
    pub response_timeout: Duration,
    /// Log raw frames.
    pub debug: bool,
}

impl LinkConfig {
    /// Create a validated configuration with default timeout.
    pub fn new(port: impl Into<String>, line: LineSettings, slave_id: u32) -> Result<Self> {
        let slave_id = u8::try_from(slave_id)
            .ok()
            .filter(|id| *id <= MAX_SLAVE_ID)
            .ok_or_else(|| {
                Error::Config(format!(
                    "Incorrect slave id {slave_id}, choose from 0 to {MAX_SLAVE_ID}"
                ))
            })?;
        let config = Self {
            port: port.into(),
            line,
            stop_bits_forced: false,
            slave_id,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            debug: false,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Apply the stop bits to the receive side as well.
    #[must_use]
    pub fn with_stop_bits_forced(mut self, forced: bool) -> Self {
        self.stop_bits_forced = forced;
        self
    }

    /// Enable raw frame logging.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Parameters for talking to the bootloader over `line`.
    ///
    /// Port, slave address and flags are kept; the response timeout is
    /// raised to [`BOOTLOADER_MIN_RESPONSE_TIMEOUT`] if shorter.
    #[must_use]
    pub fn for_bootloader(&self, line: LineSettings) -> Self {
        Self {
            line,
            response_timeout: self.response_timeout.max(BOOTLOADER_MIN_RESPONSE_TIMEOUT),
            ..self.clone()
        }
    }

    /// Stop bits expected on received frames.
    pub fn rx_stop_bits(&self) -> StopBits {
        if self.stop_bits_forced {
            self.line.stop_bits
        } else {
            StopBits::One
        }
    }

    /// Check every parameter; called again when a session is opened.
    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(Error::Config("A port should be specified".to_string()));
        }
        if self.slave_id > MAX_SLAVE_ID {
            return Err(Error::Config(format!(
                "Incorrect slave id {}, choose from 0 to {MAX_SLAVE_ID}",
                self.slave_id
            )));
        }
        self.line.validate()
    }

    /// Serial port configuration for this link.
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port_name: crate::port::normalize_port_name(&self.port),
            baud_rate: self.line.baud_rate,
            timeout: self.response_timeout,
            data_bits: self.line.data_bits,
            parity: self.line.parity,
            stop_bits: self.line.stop_bits,
            rx_stop_bits: self.rx_stop_bits(),
        }
    }
}

/// Parse a response timeout given in (fractional) seconds.
pub fn timeout_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Config(format!("Invalid response timeout {secs} s")))
}

/// Opens Modbus clients. Implemented for real serial ports by
/// [`NativeConnector`] and by scripted fakes in tests.
pub trait Connector {
    /// Client type produced by this connector.
    type Client: ModbusClient;

    /// Open the transport described by `config`.
    fn connect(&mut self, config: &LinkConfig) -> Result<Self::Client>;
}

/// One open link to a device.
pub struct LinkSession<'a, K: Connector> {
    client: K::Client,
    config: LinkConfig,
    closed: bool,
    _connector: std::marker::PhantomData<&'a mut K>,
}

impl<'a, K: Connector> LinkSession<'a, K> {
    /// Open a session. Misconfiguration and open failures are not retried.
    pub fn open(connector: &'a mut K, config: LinkConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            "Opening {} at {} (rx stop bits {}), slave {}, timeout {:?}",
            config.port,
            config.line,
            config.rx_stop_bits().count(),
            config.slave_id,
            config.response_timeout
        );
        let mut client = connector.connect(&config)?;
        client.set_response_timeout(config.response_timeout)?;
        Ok(Self {
            client,
            config,
            closed: false,
            _connector: std::marker::PhantomData,
        })
    }

    /// Parameters this session was opened with.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Client for register operations.
    pub fn client(&mut self) -> &mut K::Client {
        &mut self.client
    }

    /// Change the response timeout for subsequent exchanges.
    pub fn set_response_timeout(&mut self, timeout: Duration) -> Result<()> {
        debug!("Response timeout set to {timeout:?}");
        self.client.set_response_timeout(timeout)
    }

    /// Release the transport.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        debug!("Closing {}", self.config.port);
        self.client.close()
    }
}

impl<K: Connector> fmt::Debug for LinkSession<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSession")
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<K: Connector> Drop for LinkSession<'_, K> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.client.close() {
                warn!("Failed to close {}: {e}", self.config.port);
            }
        }
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Connector, Error, LinkConfig, Result};
    use crate::client::RtuClient;
    use crate::port::{NativePort, Port};

    /// Opens serial ports through the `serialport` crate.
    #[derive(Debug, Default)]
    pub struct NativeConnector;

    impl Connector for NativeConnector {
        type Client = RtuClient<NativePort>;

        fn connect(&mut self, config: &LinkConfig) -> Result<Self::Client> {
            let serial = config.serial_config();
            let mut port = NativePort::open(&serial).map_err(|e| Error::PortOpen {
                port: serial.port_name.clone(),
                reason: e.to_string(),
            })?;
            port.clear_buffers()?;
            Ok(RtuClient::new(port, config.slave_id).with_debug(config.debug))
        }
    }
}

#[cfg(feature = "native")]
pub use native_impl::NativeConnector;
