//! Modbus RTU client.
//!
//! [`ModbusClient`] is the seam between the bootloader protocol and the
//! wire: everything above it only sees register reads/writes and typed
//! outcomes ([`ModbusError`]). [`RtuClient`] implements it over any
//! [`Port`].

use std::fmt;
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use log::{Level, debug, log};
use rmodbus::client::ModbusRequest;
use rmodbus::{ModbusProto, guess_response_frame_len};
use thiserror::Error;

use crate::port::Port;

/// Highest unicast slave address.
pub const MAX_SLAVE_ID: u8 = 247;

/// Slave address that every device accepts and none answers.
pub const BROADCAST_SLAVE_ID: u8 = 0;

/// Maximum register count for a single read request.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum register count for a single write-multiple request.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Bytes needed before the response length is known.
const RESPONSE_HEADER_LEN: usize = 3;

/// Result of a single Modbus exchange.
pub type ModbusResult<T> = std::result::Result<T, ModbusError>;

/// Modbus exception codes reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// The function code is not supported.
    IllegalFunction,
    /// The register address does not exist.
    IllegalDataAddress,
    /// The value is not accepted for this register.
    IllegalDataValue,
    /// Unrecoverable error while processing the request.
    ServerDeviceFailure,
    /// Request accepted, processing takes long.
    Acknowledge,
    /// Device is busy with a long-running command.
    ServerDeviceBusy,
    /// Memory parity error.
    MemoryParityError,
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "Illegal function"),
            Self::IllegalDataAddress => write!(f, "Illegal data address"),
            Self::IllegalDataValue => write!(f, "Illegal data value"),
            Self::ServerDeviceFailure => write!(f, "Slave device or server failure"),
            Self::Acknowledge => write!(f, "Acknowledge"),
            Self::ServerDeviceBusy => write!(f, "Slave device or server is busy"),
            Self::MemoryParityError => write!(f, "Memory parity error"),
        }
    }
}

/// Failed Modbus exchange.
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Nothing (or not enough) came back within the response timeout.
    #[error("Connection timed out")]
    NoResponse,

    /// The device answered with an exception response.
    #[error("{0}")]
    Exception(ExceptionCode),

    /// The response could not be decoded.
    #[error("Invalid response: {0}")]
    Frame(String),

    /// The request cannot be expressed in one frame.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Port I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModbusError {
    /// Exception code reported by the device, if any.
    pub fn exception(&self) -> Option<ExceptionCode> {
        match self {
            Self::Exception(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<rmodbus::ErrorKind> for ModbusError {
    fn from(kind: rmodbus::ErrorKind) -> Self {
        use rmodbus::ErrorKind as Kind;

        let code = match kind {
            Kind::IllegalFunction => ExceptionCode::IllegalFunction,
            Kind::IllegalDataAddress => ExceptionCode::IllegalDataAddress,
            Kind::IllegalDataValue => ExceptionCode::IllegalDataValue,
            Kind::SlaveDeviceFailure => ExceptionCode::ServerDeviceFailure,
            Kind::Acknowledge => ExceptionCode::Acknowledge,
            Kind::SlaveDeviceBusy => ExceptionCode::ServerDeviceBusy,
            Kind::MemoryParityError => ExceptionCode::MemoryParityError,
            other => return Self::Frame(other.to_string()),
        };
        Self::Exception(code)
    }
}

/// Register-level operations against one slave.
pub trait ModbusClient {
    /// Read `count` holding registers starting at `address`.
    fn read_holding_registers(&mut self, address: u16, count: u16) -> ModbusResult<Vec<u16>>;

    /// Write one holding register.
    fn write_register(&mut self, address: u16, value: u16) -> ModbusResult<()>;

    /// Write consecutive holding registers starting at `address`.
    fn write_registers(&mut self, address: u16, values: &[u16]) -> ModbusResult<()>;

    /// Change how long to wait for a response.
    fn set_response_timeout(&mut self, timeout: Duration) -> crate::Result<()>;

    /// Current response timeout.
    fn response_timeout(&self) -> Duration;

    /// Release the underlying transport.
    fn close(&mut self) -> crate::Result<()>;
}

/// Modbus RTU client over a [`Port`].
///
/// Frames are built and checked by `rmodbus`; this type owns the port,
/// the response deadline and the recovery after a failed exchange: the
/// client discards whatever is left in the port buffers before sending
/// the next request, so a late or partial answer can't be mistaken for
/// the next response.
pub struct RtuClient<P: Port> {
    port: P,
    slave: u8,
    response_timeout: Duration,
    needs_recovery: bool,
    frame_log_level: Level,
}

impl<P: Port> RtuClient<P> {
    /// Wrap an opened port. The port's current timeout becomes the response timeout.
    pub fn new(port: P, slave: u8) -> Self {
        let response_timeout = port.timeout();
        Self {
            port,
            slave,
            response_timeout,
            needs_recovery: false,
            frame_log_level: Level::Trace,
        }
    }

    /// Log raw frames at debug level instead of trace.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.frame_log_level = if debug { Level::Debug } else { Level::Trace };
        self
    }

    /// Slave address requests are sent to.
    pub fn slave(&self) -> u8 {
        self.slave
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the client and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    fn request(&self) -> ModbusRequest {
        ModbusRequest::new(self.slave, ModbusProto::Rtu)
    }

    /// Send `frame` and return the checked response, or `None` when no
    /// answer is expected.
    fn exchange(
        &mut self,
        request: &mut ModbusRequest,
        frame: &[u8],
        expects_response: bool,
    ) -> ModbusResult<Option<Vec<u8>>> {
        if self.needs_recovery {
            debug!("Flushing {} after failed exchange", self.port.name());
            if let Err(e) = self.port.clear_buffers() {
                debug!("Flush failed: {e}");
            }
            self.needs_recovery = false;
        }

        let result = self.try_exchange(request, frame, expects_response);
        if matches!(
            result,
            Err(ModbusError::NoResponse | ModbusError::Frame(_) | ModbusError::Io(_))
        ) {
            self.needs_recovery = true;
        }
        result
    }

    fn try_exchange(
        &mut self,
        request: &mut ModbusRequest,
        frame: &[u8],
        expects_response: bool,
    ) -> ModbusResult<Option<Vec<u8>>> {
        log!(self.frame_log_level, "[{:03}] >> {}", self.slave, hex(frame));

        std::io::Write::write_all(&mut self.port, frame)?;
        std::io::Write::flush(&mut self.port)?;

        if !expects_response {
            return Ok(None);
        }

        let deadline = Instant::now() + self.response_timeout;
        let mut response = vec![0u8; RESPONSE_HEADER_LEN];
        self.read_into(&mut response, 0, deadline)?;

        let total = guess_response_frame_len(&response, ModbusProto::Rtu)? as usize;
        response.resize(total.max(RESPONSE_HEADER_LEN), 0);
        self.read_into(&mut response, RESPONSE_HEADER_LEN, deadline)?;

        log!(self.frame_log_level, "[{:03}] << {}", self.slave, hex(&response));

        if response[0] != self.slave {
            return Err(ModbusError::Frame(format!(
                "response from unexpected slave {}",
                response[0]
            )));
        }
        request.parse_ok(&response)?;
        Ok(Some(response))
    }

    /// Fill `buf[filled..]` from the port, giving up at `deadline`.
    fn read_into(
        &mut self,
        buf: &mut [u8],
        mut filled: usize,
        deadline: Instant,
    ) -> ModbusResult<()> {
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => {
                    if Instant::now() >= deadline {
                        return Err(ModbusError::NoResponse);
                    }
                },
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(ModbusError::NoResponse);
                },
                Err(e) => return Err(ModbusError::Io(e)),
            }
        }
        Ok(())
    }
}

fn invalid_request(kind: rmodbus::ErrorKind) -> ModbusError {
    ModbusError::InvalidRequest(kind.to_string())
}

impl<P: Port> ModbusClient for RtuClient<P> {
    fn read_holding_registers(&mut self, address: u16, count: u16) -> ModbusResult<Vec<u16>> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(ModbusError::InvalidRequest(format!(
                "cannot read {count} registers in one request"
            )));
        }
        let mut request = self.request();
        let mut frame = Vec::new();
        request
            .generate_get_holdings(address, count, &mut frame)
            .map_err(invalid_request)?;

        let response = self
            .exchange(&mut request, &frame, true)?
            .ok_or(ModbusError::NoResponse)?;
        let mut values: Vec<u16> = Vec::with_capacity(usize::from(count));
        request.parse_u16(&response, &mut values)?;
        if values.len() != usize::from(count) {
            self.needs_recovery = true;
            return Err(ModbusError::Frame(format!(
                "expected {count} registers, got {}",
                values.len()
            )));
        }
        Ok(values)
    }

    fn write_register(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        let mut request = self.request();
        let mut frame = Vec::new();
        request
            .generate_set_holding(address, value, &mut frame)
            .map_err(invalid_request)?;
        let expects_response = self.slave != BROADCAST_SLAVE_ID;
        self.exchange(&mut request, &frame, expects_response)?;
        Ok(())
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        if values.is_empty() || values.len() > usize::from(MAX_WRITE_REGISTERS) {
            return Err(ModbusError::InvalidRequest(format!(
                "cannot write {} registers in one request",
                values.len()
            )));
        }
        let mut request = self.request();
        let mut frame = Vec::new();
        request
            .generate_set_holdings_bulk(address, values, &mut frame)
            .map_err(invalid_request)?;
        let expects_response = self.slave != BROADCAST_SLAVE_ID;
        self.exchange(&mut request, &frame, expects_response)?;
        Ok(())
    }

    fn set_response_timeout(&mut self, timeout: Duration) -> crate::Result<()> {
        self.port.set_timeout(timeout)?;
        self.response_timeout = timeout;
        Ok(())
    }

    fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    fn close(&mut self) -> crate::Result<()> {
        self.port.close()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
