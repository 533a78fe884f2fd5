//! Scripted fakes for exercising sessions and the bootloader protocol
//! without hardware.
//!
//! A [`FakeConnector`] hands out [`FakeClient`]s that answer from a shared
//! [`FakeDevice`] script and append every open, close, write, read and
//! delay to one timeline ([`Log`]).

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::client::{ExceptionCode, ModbusClient, ModbusError, ModbusResult};
use crate::delay::Delay;
use crate::error::{Error, Result};
use crate::link::{Connector, LineSettings, LinkConfig};

/// Scripted answer to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Ok,
    Silent,
    Reject(ExceptionCode),
}

impl Reply {
    fn into_result(self) -> ModbusResult<()> {
        match self {
            Self::Ok => Ok(()),
            Self::Silent => Err(ModbusError::NoResponse),
            Self::Reject(code) => Err(ModbusError::Exception(code)),
        }
    }
}

/// Device behaviour.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDevice {
    write_replies: HashMap<u16, VecDeque<Reply>>,
    registers: HashMap<u16, Vec<u16>>,
    listens_on: Option<LineSettings>,
}

impl FakeDevice {
    /// Answers on any line settings; every write succeeds.
    pub(crate) fn application() -> Self {
        Self::default()
    }

    /// Only answers when the session uses `line`.
    pub(crate) fn listening_on(mut self, line: LineSettings) -> Self {
        self.listens_on = Some(line);
        self
    }

    /// Queue replies for writes to `address`. Writes past the queue succeed.
    pub(crate) fn replies(
        mut self,
        address: u16,
        replies: impl IntoIterator<Item = Reply>,
    ) -> Self {
        self.write_replies
            .entry(address)
            .or_default()
            .extend(replies);
        self
    }

    /// Store `text` one character per register, zero padded to `count`.
    pub(crate) fn with_string(mut self, address: u16, count: u16, text: &str) -> Self {
        let mut values: Vec<u16> = text.bytes().map(u16::from).collect();
        values.resize(usize::from(count), 0);
        self.registers.insert(address, values);
        self
    }
}

/// Something that happened on the fake link.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Open(LinkConfig),
    Close,
    Timeout(Duration),
    Write {
        address: u16,
        values: Vec<u16>,
        timeout: Duration,
        ok: bool,
    },
    Read {
        address: u16,
        ok: bool,
    },
    Delay(Duration),
}

/// Timeline of events.
#[derive(Debug, Clone, Default)]
pub(crate) struct Log {
    pub(crate) events: Vec<Event>,
}

impl Log {
    pub(crate) fn opened(&self) -> Vec<LinkConfig> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Open(config) => Some(config.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn closed(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Close))
            .count()
    }

    pub(crate) fn timeouts(&self) -> Vec<Duration> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Timeout(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    /// `(values, timeout, ok)` of every write to `address`, in order.
    pub(crate) fn writes_to(&self, address: u16) -> Vec<(Vec<u16>, Duration, bool)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Write {
                    address: a,
                    values,
                    timeout,
                    ok,
                } if *a == address => Some((values.clone(), *timeout, *ok)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn write_addresses(&self) -> Vec<u16> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Write { address, .. } => Some(*address),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn reads(&self) -> Vec<(u16, bool)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Read { address, ok } => Some((*address, *ok)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn delays(&self) -> Vec<Duration> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Delay(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Highest number of sessions open at the same time.
    pub(crate) fn max_open(&self) -> usize {
        let mut open = 0usize;
        let mut max = 0usize;
        for event in &self.events {
            match event {
                Event::Open(_) => {
                    open += 1;
                    max = max.max(open);
                },
                Event::Close => open = open.saturating_sub(1),
                _ => {},
            }
        }
        max
    }
}

#[derive(Debug, Default)]
struct Shared {
    device: FakeDevice,
    log: Log,
}

/// Connector producing [`FakeClient`]s.
pub(crate) struct FakeConnector {
    shared: Rc<RefCell<Shared>>,
    fail_open: bool,
}

/// Route `log` output through the test harness; honours `RUST_LOG`.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

impl FakeConnector {
    pub(crate) fn new(device: FakeDevice) -> Self {
        init_logging();
        Self {
            shared: Rc::new(RefCell::new(Shared {
                device,
                log: Log::default(),
            })),
            fail_open: false,
        }
    }

    /// Every open fails like a missing port.
    pub(crate) fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Delay that records into this connector's timeline.
    pub(crate) fn delay(&self) -> FakeDelay {
        FakeDelay {
            shared: Rc::clone(&self.shared),
        }
    }

    pub(crate) fn log(&self) -> Log {
        self.shared.borrow().log.clone()
    }
}

impl Connector for FakeConnector {
    type Client = FakeClient;

    fn connect(&mut self, config: &LinkConfig) -> Result<FakeClient> {
        if self.fail_open {
            return Err(Error::PortOpen {
                port: config.port.clone(),
                reason: "No such file or directory".to_string(),
            });
        }
        self.shared
            .borrow_mut()
            .log
            .events
            .push(Event::Open(config.clone()));
        Ok(FakeClient {
            shared: Rc::clone(&self.shared),
            line: config.line,
            timeout: config.response_timeout,
        })
    }
}

/// Client answering from the shared [`FakeDevice`].
pub(crate) struct FakeClient {
    shared: Rc<RefCell<Shared>>,
    line: LineSettings,
    timeout: Duration,
}

impl FakeClient {
    fn reachable(&self, shared: &Shared) -> bool {
        shared
            .device
            .listens_on
            .is_none_or(|line| line == self.line)
    }

    fn write(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let mut shared = self.shared.borrow_mut();
        let result = if self.reachable(&shared) {
            shared
                .device
                .write_replies
                .get_mut(&address)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Reply::Ok)
                .into_result()
        } else {
            Err(ModbusError::NoResponse)
        };
        shared.log.events.push(Event::Write {
            address,
            values: values.to_vec(),
            timeout: self.timeout,
            ok: result.is_ok(),
        });
        result
    }
}

impl ModbusClient for FakeClient {
    fn read_holding_registers(&mut self, address: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let mut shared = self.shared.borrow_mut();
        let result = if !self.reachable(&shared) {
            Err(ModbusError::NoResponse)
        } else {
            match shared.device.registers.get(&address) {
                Some(values) if values.len() == usize::from(count) => Ok(values.clone()),
                _ => Err(ModbusError::Exception(ExceptionCode::IllegalDataAddress)),
            }
        };
        shared.log.events.push(Event::Read {
            address,
            ok: result.is_ok(),
        });
        result
    }

    fn write_register(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        self.write(address, &[value])
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> ModbusResult<()> {
        self.write(address, values)
    }

    fn set_response_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.shared
            .borrow_mut()
            .log
            .events
            .push(Event::Timeout(timeout));
        Ok(())
    }

    fn response_timeout(&self) -> Duration {
        self.timeout
    }

    fn close(&mut self) -> Result<()> {
        self.shared.borrow_mut().log.events.push(Event::Close);
        Ok(())
    }
}

/// Delay that records instead of sleeping.
pub(crate) struct FakeDelay {
    shared: Rc<RefCell<Shared>>,
}

impl Delay for FakeDelay {
    fn delay(&mut self, duration: Duration) {
        self.shared
            .borrow_mut()
            .log
            .events
            .push(Event::Delay(duration));
    }
}
