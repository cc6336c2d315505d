//! The radio specific part of modem control.
//!
//! Every radio family wakes, sleeps and gets configured differently, the
//! [`ModemController`](crate::ModemController) does not care how. It calls
//! into a [`ModemCapability`] and hands it a [`ModemSignals`] view of the
//! pins it owns, so the capability can pulse the wake line or look at the
//! status pin without owning them.

use crate::clock::{Duration, Instant};
use crate::diagnostics::{BatteryStats, SignalQuality};

/// Access to the modem signals owned by the controller.
pub trait ModemSignals {
    /// Whether the status pin reports the modem as active. `None` if there
    /// is no status pin.
    fn status_active(&mut self) -> Option<bool>;

    /// Whether the modem is powered. `None` if power is not controlled by
    /// the firmware.
    fn is_powered(&self) -> Option<bool>;

    /// Drive the sleep request pin to its wake level and leave it there.
    /// Returns `false` if there is no sleep request pin.
    fn assert_wake(&mut self) -> bool;

    /// Drive the sleep request pin to its sleep (not waking) level.
    /// Returns `false` if there is no sleep request pin.
    fn release_wake(&mut self) -> bool;

    /// Hold the wake level for the configured wake pulse width, then
    /// release. Returns `false` if there is no sleep request pin.
    fn pulse_wake(&mut self) -> bool;

    /// Spin for `duration`.
    fn wait(&mut self, duration: Duration);

    fn now(&mut self) -> Instant;
}

/// Behavior of one radio family.
///
/// The sequences return whether the radio specific part succeeded. A
/// successful wake sequence does _not_ mean the modem is responsive, the
/// controller checks that separately with [`is_awake_now`].
///
/// [`is_awake_now`]: ModemCapability::is_awake_now
pub trait ModemCapability {
    /// Human readable model name.
    fn name(&self) -> &str;

    /// Check whether the modem is awake right now, using all means available
    /// (status pin, command query).
    ///
    /// Most modules are woken and put to sleep by identical pulses, so this
    /// must be reliable: waking an awake module turns it off.
    fn is_awake_now(&mut self, signals: &mut dyn ModemSignals) -> bool;

    fn perform_wake_sequence(&mut self, signals: &mut dyn ModemSignals) -> bool;

    fn perform_sleep_sequence(&mut self, signals: &mut dyn ModemSignals) -> bool;

    /// One-time setup after the modem became responsive (e.g. network keys,
    /// data rate).
    fn perform_extra_setup(&mut self, signals: &mut dyn ModemSignals) -> bool;

    fn is_internet_reachable(&mut self) -> bool;

    /// Current time from the network, in seconds since the Unix epoch.
    fn time_from_network(&mut self) -> Option<u32> {
        None
    }

    fn poll_signal_quality(&mut self) -> Option<SignalQuality> {
        None
    }

    fn poll_battery(&mut self) -> Option<BatteryStats> {
        None
    }

    /// Chip temperature in °C.
    fn poll_temperature(&mut self) -> Option<f32> {
        None
    }

    fn serial_number(&self) -> &str {
        ""
    }

    fn hardware_version(&self) -> &str {
        ""
    }

    fn firmware_version(&self) -> &str {
        ""
    }
}

/// Lets the orchestrator keep ownership of the capability.
impl<T: ModemCapability + ?Sized> ModemCapability for &mut T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_awake_now(&mut self, signals: &mut dyn ModemSignals) -> bool {
        (**self).is_awake_now(signals)
    }

    fn perform_wake_sequence(&mut self, signals: &mut dyn ModemSignals) -> bool {
        (**self).perform_wake_sequence(signals)
    }

    fn perform_sleep_sequence(&mut self, signals: &mut dyn ModemSignals) -> bool {
        (**self).perform_sleep_sequence(signals)
    }

    fn perform_extra_setup(&mut self, signals: &mut dyn ModemSignals) -> bool {
        (**self).perform_extra_setup(signals)
    }

    fn is_internet_reachable(&mut self) -> bool {
        (**self).is_internet_reachable()
    }

    fn time_from_network(&mut self) -> Option<u32> {
        (**self).time_from_network()
    }

    fn poll_signal_quality(&mut self) -> Option<SignalQuality> {
        (**self).poll_signal_quality()
    }

    fn poll_battery(&mut self) -> Option<BatteryStats> {
        (**self).poll_battery()
    }

    fn poll_temperature(&mut self) -> Option<f32> {
        (**self).poll_temperature()
    }

    fn serial_number(&self) -> &str {
        (**self).serial_number()
    }

    fn hardware_version(&self) -> &str {
        (**self).hardware_version()
    }

    fn firmware_version(&self) -> &str {
        (**self).firmware_version()
    }
}
