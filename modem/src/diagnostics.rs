//! Cached modem metadata (signal strength, battery, temperature).
//!
//! Polling the modem costs time and power, so values are only requested for
//! the metadata enabled in the [`PollMask`] and the last successful result
//! is cached until the next poll.

use bitfield::Bit;

/// Value used by metadata producers for a reading that is not available.
pub const UNKNOWN: i16 = -9999;

/// Signal quality as reported by the radio.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SignalQuality {
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Signal strength in percent
    pub percent: i16,
}

/// Battery status as reported by the radio.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BatteryStats {
    /// Charge state (module specific, e.g. 0 = not charging, 1 = charging)
    pub state: u8,
    /// Charge in percent
    pub percent: u8,
    /// Voltage in millivolts
    pub voltage_mv: u16,
}

/// Selects which metadata is polled from the modem.
///
/// Bit | Metadata
/// ----|----------------
///  0  | RSSI
///  1  | Signal percent
///  2  | Battery state
///  3  | Battery percent
///  4  | Battery voltage
///  5  | Temperature
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PollMask(u8);

impl PollMask {
    pub const RSSI: usize = 0;
    pub const SIGNAL_PERCENT: usize = 1;
    pub const BATTERY_STATE: usize = 2;
    pub const BATTERY_PERCENT: usize = 3;
    pub const BATTERY_VOLTAGE: usize = 4;
    pub const TEMPERATURE: usize = 5;

    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b0011_1111)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b0011_1111)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Enable polling for the metadata at `bit`.
    pub fn enable(&mut self, bit: usize) {
        self.0.set_bit(bit, true);
    }

    pub fn is_enabled(&self, bit: usize) -> bool {
        self.0.bit(bit)
    }

    fn wants_signal(&self) -> bool {
        self.is_enabled(Self::RSSI) || self.is_enabled(Self::SIGNAL_PERCENT)
    }

    fn wants_battery(&self) -> bool {
        self.is_enabled(Self::BATTERY_STATE)
            || self.is_enabled(Self::BATTERY_PERCENT)
            || self.is_enabled(Self::BATTERY_VOLTAGE)
    }

    fn wants_temperature(&self) -> bool {
        self.is_enabled(Self::TEMPERATURE)
    }
}

/// Last known modem metadata. `None` until the first successful poll.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct ModemDiagnostics {
    pub rssi: Option<i16>,
    pub signal_percent: Option<i16>,
    pub temperature_c: Option<f32>,
    pub battery_state: Option<u8>,
    pub battery_percent: Option<u8>,
    pub battery_voltage_mv: Option<u16>,
}

impl ModemDiagnostics {
    /// Store a signal quality reading, only the fields enabled in `mask`.
    pub fn record_signal(&mut self, quality: SignalQuality, mask: PollMask) {
        if mask.is_enabled(PollMask::RSSI) {
            self.rssi = Some(quality.rssi);
        }
        if mask.is_enabled(PollMask::SIGNAL_PERCENT) {
            self.signal_percent = Some(quality.percent);
        }
    }

    /// Store a battery reading, only the fields enabled in `mask`.
    pub fn record_battery(&mut self, stats: BatteryStats, mask: PollMask) {
        if mask.is_enabled(PollMask::BATTERY_STATE) {
            self.battery_state = Some(stats.state);
        }
        if mask.is_enabled(PollMask::BATTERY_PERCENT) {
            self.battery_percent = Some(stats.percent);
        }
        if mask.is_enabled(PollMask::BATTERY_VOLTAGE) {
            self.battery_voltage_mv = Some(stats.voltage_mv);
        }
    }

    pub fn record_temperature(&mut self, temperature_c: f32) {
        self.temperature_c = Some(temperature_c);
    }

    /// RSSI, or [`UNKNOWN`] if it was never polled.
    pub fn rssi_or_unknown(&self) -> i16 {
        self.rssi.unwrap_or(UNKNOWN)
    }

    /// Signal percent, or [`UNKNOWN`] if it was never polled.
    pub fn signal_percent_or_unknown(&self) -> i16 {
        self.signal_percent.unwrap_or(UNKNOWN)
    }
}

/// Which polls a mask requires, in the order they are performed.
pub(crate) struct PollPlan {
    pub signal: bool,
    pub battery: bool,
    pub temperature: bool,
}

impl From<PollMask> for PollPlan {
    fn from(mask: PollMask) -> Self {
        Self {
            signal: mask.wants_signal(),
            battery: mask.wants_battery(),
            temperature: mask.wants_temperature(),
        }
    }
}
