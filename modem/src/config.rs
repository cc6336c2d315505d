//! Static description of a modem's wiring and timing.
//!
//! A [`ModemConfig`] is built once (usually from the EEPROM configuration)
//! and never changes afterwards. Pins are identified by their board pin
//! number, a negative number means the signal is not connected to the MCU.

use core::fmt;

use crate::clock::Duration;
use crate::pins::Level;

/// Board pin identifier. Negative values mean "not controlled by firmware".
pub type PinId = i8;

/// Sentinel for a signal that is not connected to the MCU.
pub const UNASSIGNED: PinId = -1;

/// The role a pin plays in the modem wiring.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinRole {
    Power,
    Status,
    Reset,
    SleepRequest,
    Led,
}

impl PinRole {
    pub const ALL: [PinRole; 5] = [
        PinRole::Power,
        PinRole::Status,
        PinRole::Reset,
        PinRole::SleepRequest,
        PinRole::Led,
    ];
}

impl fmt::Display for PinRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Power => write!(f, "power"),
            Self::Status => write!(f, "status"),
            Self::Reset => write!(f, "reset"),
            Self::SleepRequest => write!(f, "sleep request"),
            Self::Led => write!(f, "LED"),
        }
    }
}

/// Which board pin is wired to which modem signal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PinAssignments {
    /// Switches the modem supply (active high)
    pub power: PinId,
    /// Modem status output, read by the MCU
    pub status: PinId,
    /// Hard reset input of the modem
    pub reset: PinId,
    /// Sleep request / wake input of the modem
    pub sleep_request: PinId,
    /// LED indicating modem activity
    pub led: PinId,
}

impl Default for PinAssignments {
    fn default() -> Self {
        Self {
            power: UNASSIGNED,
            status: UNASSIGNED,
            reset: UNASSIGNED,
            sleep_request: UNASSIGNED,
            led: UNASSIGNED,
        }
    }
}

impl PinAssignments {
    /// Return the raw identifier for `role` (negative if unassigned).
    pub fn id(&self, role: PinRole) -> PinId {
        match role {
            PinRole::Power => self.power,
            PinRole::Status => self.status,
            PinRole::Reset => self.reset,
            PinRole::SleepRequest => self.sleep_request,
            PinRole::Led => self.led,
        }
    }

    /// Return the pin number for `role`, or `None` if it is unassigned.
    pub fn get(&self, role: PinRole) -> Option<u8> {
        let id = self.id(role);
        if id < 0 {
            None
        } else {
            Some(id as u8)
        }
    }

    pub fn is_assigned(&self, role: PinRole) -> bool {
        self.get(role).is_some()
    }
}

/// Active levels of the modem signals.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SignalLevels {
    /// Level of the status pin while the modem is awake
    pub status_active: Level,
    /// Level on the reset pin that resets the modem
    pub reset_active: Level,
    /// Level on the sleep request pin that wakes the modem
    pub wake_active: Level,
}

impl Default for SignalLevels {
    /// Most cellular modules: status high when on, reset and wake pulled low.
    fn default() -> Self {
        Self {
            status_active: Level::High,
            reset_active: Level::Low,
            wake_active: Level::Low,
        }
    }
}

/// Pulse widths in milliseconds.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PulseWidths {
    pub reset_ms: i32,
    /// Zero if the wake level must be held instead of pulsed
    pub wake_ms: i32,
}

/// Timing budgets in milliseconds. Zero means "no wait required".
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TimingBudgets {
    /// Power-on until the modem accepts a wake command
    pub wake_delay_ms: i32,
    /// Wake command until the status pin is valid
    pub status_settle_ms: i32,
    /// Sleep command until the modem finished shutting down
    pub disconnect_ms: i32,
    /// Wake command until the modem answers commands
    pub at_response_ms: i32,
}

/// Validated, immutable modem configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ModemConfig {
    pins: PinAssignments,
    levels: SignalLevels,
    reset_pulse: Duration,
    wake_pulse: Duration,
    wake_delay: Duration,
    status_settle: Duration,
    disconnect_budget: Duration,
    at_response_timeout: Duration,
}

fn non_negative(name: &'static str, value_ms: i32) -> Result<Duration, ConfigurationError> {
    if value_ms < 0 {
        Err(ConfigurationError::NegativeDuration {
            name,
            value_ms,
        })
    } else {
        Ok(Duration::from_ticks(value_ms as u32))
    }
}

impl ModemConfig {
    /// Validate the raw configuration values.
    ///
    /// Fails if a pulse width or budget is negative, or if one pin number is
    /// assigned to more than one signal.
    pub fn configure(
        pins: PinAssignments,
        levels: SignalLevels,
        pulses: PulseWidths,
        budgets: TimingBudgets,
    ) -> Result<Self, ConfigurationError> {
        for (i, &first) in PinRole::ALL.iter().enumerate() {
            for &second in &PinRole::ALL[i + 1..] {
                match (pins.get(first), pins.get(second)) {
                    (Some(a), Some(b)) if a == b => {
                        return Err(ConfigurationError::DuplicatePin {
                            first,
                            second,
                            pin: a,
                        })
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            pins,
            levels,
            reset_pulse: non_negative("reset pulse", pulses.reset_ms)?,
            wake_pulse: non_negative("wake pulse", pulses.wake_ms)?,
            wake_delay: non_negative("wake delay", budgets.wake_delay_ms)?,
            status_settle: non_negative("status settle time", budgets.status_settle_ms)?,
            disconnect_budget: non_negative("disconnect time", budgets.disconnect_ms)?,
            at_response_timeout: non_negative("AT response time", budgets.at_response_ms)?,
        })
    }

    /// Return a copy with a different active status level.
    pub fn with_status_level(mut self, level: Level) -> Self {
        self.levels.status_active = level;
        self
    }

    /// Return a copy with a different wake level.
    pub fn with_wake_level(mut self, level: Level) -> Self {
        self.levels.wake_active = level;
        self
    }

    /// Return a copy with a different reset level.
    pub fn with_reset_level(mut self, level: Level) -> Self {
        self.levels.reset_active = level;
        self
    }

    pub fn pins(&self) -> &PinAssignments {
        &self.pins
    }

    pub fn levels(&self) -> &SignalLevels {
        &self.levels
    }

    pub fn reset_pulse(&self) -> Duration {
        self.reset_pulse
    }

    pub fn wake_pulse(&self) -> Duration {
        self.wake_pulse
    }

    pub fn wake_delay(&self) -> Duration {
        self.wake_delay
    }

    pub fn status_settle(&self) -> Duration {
        self.status_settle
    }

    pub fn disconnect_budget(&self) -> Duration {
        self.disconnect_budget
    }

    pub fn at_response_timeout(&self) -> Duration {
        self.at_response_timeout
    }
}

/// Invalid modem configuration. The controller must not be used.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A pulse width or timing budget is negative.
    NegativeDuration { name: &'static str, value_ms: i32 },
    /// The same pin is assigned to two signals.
    DuplicatePin {
        first: PinRole,
        second: PinRole,
        pin: u8,
    },
    /// A pin is assigned, but no line was handed to the controller.
    MissingLine(PinRole),
    /// A line was handed to the controller for an unassigned pin.
    UnassignedLine(PinRole),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeDuration { name, value_ms } => {
                write!(f, "Negative {} ({} ms)", name, value_ms)
            }
            Self::DuplicatePin { first, second, pin } => write!(
                f,
                "Pin {} is assigned to both the {} and the {} signal",
                pin, first, second
            ),
            Self::MissingLine(role) => write!(f, "No line provided for the {} pin", role),
            Self::UnassignedLine(role) => {
                write!(f, "Line provided for the unassigned {} pin", role)
            }
        }
    }
}
