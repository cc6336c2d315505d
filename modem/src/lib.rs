#![cfg_attr(not(test), no_std)]
//! # Modem power control
//!
//! Powers, wakes, checks, sleeps and resets the logger's communication
//! module. The electrical behavior of a module (warm-up time, wake pulse
//! polarity, status pin, shutdown time) is described by a [`ModemConfig`],
//! everything that depends on the radio model lives behind the
//! [`ModemCapability`] trait.
//!
//! All waits are bounded spin-waits on a monotonic millisecond clock
//! ([`MillisClock`]). Nothing in here blocks longer than the configured
//! budgets.
//!
//! Typical use by the logger:
//!
//! ```text
//! boot:        controller.ensure_ready()      validate once, restore posture
//! duty cycle:  controller.wake()              power, wake, check, LED on
//!              ... transfer via capability ...
//!              controller.stand_by()          sleep, graceful power-off
//! ```

pub mod capability;
pub mod clock;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod duty_cycle;
pub mod error;
pub mod network_time;
pub mod pins;
pub mod serial;

#[cfg(test)]
mod testing;

pub use capability::{ModemCapability, ModemSignals};
pub use clock::{Duration, Instant, MillisClock};
pub use config::{ConfigurationError, ModemConfig, PinRole};
pub use controller::{DeviceId, ModemController, ModemLines, ModemState};
pub use diagnostics::{BatteryStats, ModemDiagnostics, PollMask, SignalQuality};
pub use duty_cycle::{transmit_backlog, Backlog, CycleOutcome};
pub use error::ModemError;
pub use pins::Level;
pub use serial::{DeadlineSerial, ReadTimeout, SerialError};
