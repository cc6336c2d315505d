use core::fmt;

/// Runtime failures of the modem power sequences.
///
/// None of these are fatal: the logger skips the current transmission and
/// tries again on the next duty cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModemError {
    /// The modem did not become responsive within its budget, even after a
    /// hard reset (if one was possible).
    Unresponsive,
    /// A hard reset was requested, but no reset pin is assigned.
    NoResetCapability,
    /// The status pin still reported "active" when the disconnect budget
    /// expired. Power was removed anyway.
    GracefulShutdownIncomplete,
    /// The radio specific setup reported a failure.
    SetupFailed,
    /// The radio specific sleep sequence reported a failure.
    SleepFailed,
}

impl fmt::Display for ModemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresponsive => write!(f, "Modem is not responsive"),
            Self::NoResetCapability => write!(f, "No pin available to reset the modem"),
            Self::GracefulShutdownIncomplete => {
                write!(f, "Modem did not finish shutting down in time")
            }
            Self::SetupFailed => write!(f, "Modem setup failed"),
            Self::SleepFailed => write!(f, "Modem sleep sequence failed"),
        }
    }
}
