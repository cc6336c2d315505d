//! Digital lines between the MCU and the modem.
//!
//! The controller only ever needs two primitives: drive an output to a level
//! and read the level of an input. Any `embedded-hal` pin provides them
//! through the blanket impls below, so board code can hand over its HAL pins
//! (usually the type-erased `downgrade()`d variants) directly.

use core::fmt::{self, Debug};

use embedded_hal::digital::v2::{InputPin, OutputPin};
use log::warn;

/// Logic level of a digital line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Return the opposite level.
    pub fn inverted(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }

    pub fn is_high(self) -> bool {
        self == Self::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// A line the MCU drives.
pub trait OutputLine {
    fn drive(&mut self, level: Level);
}

/// A line the MCU reads.
pub trait InputLine {
    fn read(&mut self) -> Level;
}

impl<P> OutputLine for P
where
    P: OutputPin,
    P::Error: Debug,
{
    fn drive(&mut self, level: Level) {
        let result = match level {
            Level::High => self.set_high(),
            Level::Low => self.set_low(),
        };
        if let Err(e) = result {
            warn!("Could not drive pin {}: {:?}", level, e);
        }
    }
}

impl<P> InputLine for P
where
    P: InputPin,
    P::Error: Debug,
{
    /// A read error is reported as `Low`.
    fn read(&mut self) -> Level {
        match self.is_high() {
            Ok(high) => Level::from(high),
            Err(e) => {
                warn!("Could not read pin: {:?}", e);
                Level::Low
            }
        }
    }
}
