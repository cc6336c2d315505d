//! Serial port with a read deadline.
//!
//! Modem drivers block on every byte of an answer. Wrapped in a
//! [`DeadlineSerial`], a read that keeps waiting for longer than the current
//! [`ReadTimeout`] fails with [`SerialError::TimedOut`] instead, so a silent
//! modem cannot stall the controller.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use embedded_hal::serial::{Read, Write};
use log::debug;

use crate::clock::{Duration, Instant, MillisClock};

/// Timeout for a single byte, adjustable while the port is in use.
///
/// Only needs atomic loads and stores, which Cortex-M0+ supports.
#[derive(Debug)]
pub struct ReadTimeout(AtomicU32);

impl ReadTimeout {
    pub const fn new(ms: u32) -> Self {
        Self(AtomicU32::new(ms))
    }

    pub fn get(&self) -> Duration {
        Duration::from_ticks(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, timeout: Duration) {
        self.0.store(timeout.ticks(), Ordering::Relaxed);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SerialError<E> {
    /// No byte arrived within the read timeout.
    TimedOut,
    /// Error of the underlying port.
    Port(E),
}

impl<E: fmt::Debug> fmt::Display for SerialError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "Serial read timed out"),
            Self::Port(e) => write!(f, "Serial port error: {:?}", e),
        }
    }
}

pub struct DeadlineSerial<'a, S, K> {
    serial: S,
    clock: K,
    timeout: &'a ReadTimeout,
    waiting_since: Option<Instant>,
}

impl<'a, S, K: MillisClock> DeadlineSerial<'a, S, K> {
    pub fn new(serial: S, clock: K, timeout: &'a ReadTimeout) -> Self {
        Self {
            serial,
            clock,
            timeout,
            waiting_since: None,
        }
    }

    pub fn free(self) -> (S, K) {
        (self.serial, self.clock)
    }
}

impl<'a, S: Read<u8>, K: MillisClock> Read<u8> for DeadlineSerial<'a, S, K> {
    type Error = SerialError<S::Error>;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        match self.serial.read() {
            Ok(byte) => {
                self.waiting_since = None;
                Ok(byte)
            }
            Err(nb::Error::Other(e)) => {
                self.waiting_since = None;
                Err(nb::Error::Other(SerialError::Port(e)))
            }
            Err(nb::Error::WouldBlock) => {
                let since = match self.waiting_since {
                    Some(since) => since,
                    None => {
                        let now = self.clock.now();
                        self.waiting_since = Some(now);
                        now
                    }
                };
                let timeout = self.timeout.get();
                if self.clock.elapsed_since(since) > timeout {
                    self.waiting_since = None;
                    debug!("No answer within {} ms", timeout.ticks());
                    Err(nb::Error::Other(SerialError::TimedOut))
                } else {
                    Err(nb::Error::WouldBlock)
                }
            }
        }
    }
}

impl<'a, S: Write<u8>, K> Write<u8> for DeadlineSerial<'a, S, K> {
    type Error = SerialError<S::Error>;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.serial.write(word).map_err(|e| e.map(SerialError::Port))
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.serial.flush().map_err(|e| e.map(SerialError::Port))
    }
}
