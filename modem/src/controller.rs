//! The modem power-state machine.
//!
//! ```text
//! Unpowered -> Powering -> AwaitingWake -> Responsive -> InUse
//!                               |               |          |
//!                               +--> Faulted <--+          v
//!                                                      Sleeping -> Unpowered | SoftSleptPowered
//! ```
//!
//! Every wait is a spin-wait on the controller clock, bounded by one of the
//! budgets in the [`ModemConfig`].

use core::fmt;

use log::{debug, info, warn};

use crate::capability::{ModemCapability, ModemSignals};
use crate::clock::{Duration, Instant, MillisClock};
use crate::config::{ConfigurationError, ModemConfig, PinRole};
use crate::diagnostics::{ModemDiagnostics, PollMask, PollPlan};
use crate::error::ModemError;
use crate::network_time::{self, MIN_TIME_REQUEST_INTERVAL};
use crate::pins::{InputLine, Level, OutputLine};

/// Grace period on top of the AT response timeout.
pub const RESPONSE_BUFFER: Duration = Duration::from_ticks(500);

/// Where the modem is in its power cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModemState {
    Unpowered,
    Powering,
    AwaitingWake,
    Responsive,
    InUse,
    Sleeping,
    SoftSleptPowered,
    /// Did not become responsive in time, even after a hard reset
    Faulted,
}

impl fmt::Display for ModemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unpowered => "unpowered",
            Self::Powering => "powering",
            Self::AwaitingWake => "awaiting wake",
            Self::Responsive => "responsive",
            Self::InUse => "in use",
            Self::Sleeping => "sleeping",
            Self::SoftSleptPowered => "asleep (powered)",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// The physical lines between MCU and modem. `None` for signals that are
/// not connected.
pub struct ModemLines<O, I> {
    pub power: Option<O>,
    pub status: Option<I>,
    pub reset: Option<O>,
    pub sleep_request: Option<O>,
    pub led: Option<O>,
}

impl<O, I> ModemLines<O, I> {
    /// No line connected.
    pub fn none() -> Self {
        Self {
            power: None,
            status: None,
            reset: None,
            sleep_request: None,
            led: None,
        }
    }

    fn has(&self, role: PinRole) -> bool {
        match role {
            PinRole::Power => self.power.is_some(),
            PinRole::Status => self.status.is_some(),
            PinRole::Reset => self.reset.is_some(),
            PinRole::SleepRequest => self.sleep_request.is_some(),
            PinRole::Led => self.led.is_some(),
        }
    }
}

impl<O, I> Default for ModemLines<O, I> {
    fn default() -> Self {
        Self::none()
    }
}

struct RuntimeState {
    powered_since: Option<Instant>,
    pin_modes_initialized: bool,
    has_completed_setup: bool,
    mode: ModemState,
    last_time_request: Option<Instant>,
}

/// Identification of the attached modem, as reported by the capability.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceId<'a> {
    pub name: &'a str,
    pub serial_number: &'a str,
    pub hardware_version: &'a str,
    pub firmware_version: &'a str,
}

impl fmt::Display for DeviceId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Sn {} HwVer {} FwVer {}",
            self.name, self.serial_number, self.hardware_version, self.firmware_version
        )
    }
}

/// The pins and clock as seen by a capability during a sequence.
struct Signals<'a, O, I, K> {
    lines: &'a mut ModemLines<O, I>,
    clock: &'a mut K,
    config: &'a ModemConfig,
    powered: Option<bool>,
}

impl<O: OutputLine, I: InputLine, K: MillisClock> ModemSignals for Signals<'_, O, I, K> {
    fn status_active(&mut self) -> Option<bool> {
        let active = self.config.levels().status_active;
        self.lines.status.as_mut().map(|pin| pin.read() == active)
    }

    fn is_powered(&self) -> Option<bool> {
        self.powered
    }

    fn assert_wake(&mut self) -> bool {
        let wake = self.config.levels().wake_active;
        match self.lines.sleep_request.as_mut() {
            Some(pin) => {
                pin.drive(wake);
                true
            }
            None => false,
        }
    }

    fn release_wake(&mut self) -> bool {
        let sleep = self.config.levels().wake_active.inverted();
        match self.lines.sleep_request.as_mut() {
            Some(pin) => {
                pin.drive(sleep);
                true
            }
            None => false,
        }
    }

    fn pulse_wake(&mut self) -> bool {
        let wake = self.config.levels().wake_active;
        let width = self.config.wake_pulse();
        match self.lines.sleep_request.as_mut() {
            Some(pin) => {
                debug!("Sending a {} ms {} wake pulse", width.ticks(), wake);
                pin.drive(wake);
                self.clock.spin_for(width);
                pin.drive(wake.inverted());
                true
            }
            None => false,
        }
    }

    fn wait(&mut self, duration: Duration) {
        self.clock.spin_for(duration);
    }

    fn now(&mut self) -> Instant {
        self.clock.now()
    }
}

/// Controls power, wake, sleep and reset of one modem.
///
/// - `C`: radio specific behavior
/// - `K`: millisecond clock
/// - `O`, `I`: output and input line types
pub struct ModemController<C, K, O, I> {
    config: ModemConfig,
    lines: ModemLines<O, I>,
    capability: C,
    clock: K,
    state: RuntimeState,
    poll_mask: PollMask,
    diagnostics: ModemDiagnostics,
}

impl<C, K, O, I> ModemController<C, K, O, I>
where
    C: ModemCapability,
    K: MillisClock,
    O: OutputLine,
    I: InputLine,
{
    /// Create a controller.
    ///
    /// Every pin assigned in `config` needs a line in `lines` and vice versa.
    /// Pins are not touched until the first operation.
    pub fn new(
        config: ModemConfig,
        lines: ModemLines<O, I>,
        capability: C,
        clock: K,
    ) -> Result<Self, ConfigurationError> {
        for &role in PinRole::ALL.iter() {
            match (config.pins().is_assigned(role), lines.has(role)) {
                (true, false) => return Err(ConfigurationError::MissingLine(role)),
                (false, true) => return Err(ConfigurationError::UnassignedLine(role)),
                _ => {}
            }
        }
        Ok(Self {
            config,
            lines,
            capability,
            clock,
            state: RuntimeState {
                powered_since: None,
                pin_modes_initialized: false,
                has_completed_setup: false,
                mode: ModemState::Unpowered,
                last_time_request: None,
            },
            poll_mask: PollMask::none(),
            diagnostics: ModemDiagnostics::default(),
        })
    }

    /// Give back the capability, clock and lines.
    pub fn release(self) -> (C, K, ModemLines<O, I>) {
        (self.capability, self.clock, self.lines)
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn state(&self) -> ModemState {
        self.state.mode
    }

    /// When power was last switched on. Always `None` if the power is not
    /// controlled by the firmware.
    pub fn powered_since(&self) -> Option<Instant> {
        self.state.powered_since
    }

    /// Whether the modem is powered. A modem without power pin counts as
    /// always powered.
    pub fn is_powered(&self) -> bool {
        self.power_tracking().unwrap_or(true)
    }

    pub fn has_completed_setup(&self) -> bool {
        self.state.has_completed_setup
    }

    pub fn pin_modes_initialized(&self) -> bool {
        self.state.pin_modes_initialized
    }

    pub fn capability(&self) -> &C {
        &self.capability
    }

    /// Access the radio for data transfer.
    pub fn capability_mut(&mut self) -> &mut C {
        &mut self.capability
    }

    pub fn modem_name(&self) -> &str {
        self.capability.name()
    }

    pub fn device_id(&self) -> DeviceId<'_> {
        DeviceId {
            name: self.capability.name(),
            serial_number: self.capability.serial_number(),
            hardware_version: self.capability.hardware_version(),
            firmware_version: self.capability.firmware_version(),
        }
    }

    pub fn diagnostics(&self) -> &ModemDiagnostics {
        &self.diagnostics
    }

    pub fn poll_mask(&self) -> PollMask {
        self.poll_mask
    }

    /// Add the metadata in `mask` to what [`update_diagnostics`] polls.
    ///
    /// [`update_diagnostics`]: Self::update_diagnostics
    pub fn enable_polling(&mut self, mask: PollMask) {
        self.poll_mask = PollMask::from_bits(self.poll_mask.bits() | mask.bits());
    }

    /// Replace what [`update_diagnostics`] polls with `mask`.
    ///
    /// [`update_diagnostics`]: Self::update_diagnostics
    pub fn set_polling(&mut self, mask: PollMask) {
        self.poll_mask = mask;
    }

    /// Ask the modem whether it can reach the network.
    pub fn is_internet_reachable(&mut self) -> bool {
        self.capability.is_internet_reachable()
    }

    fn power_tracking(&self) -> Option<bool> {
        self.lines
            .power
            .as_ref()
            .map(|_| self.state.powered_since.is_some())
    }

    fn with_capability<R>(
        &mut self,
        f: impl FnOnce(&mut C, &mut dyn ModemSignals) -> R,
    ) -> R {
        let powered = self.power_tracking();
        let mut signals = Signals {
            lines: &mut self.lines,
            clock: &mut self.clock,
            config: &self.config,
            powered,
        };
        f(&mut self.capability, &mut signals)
    }

    fn check_awake(&mut self) -> bool {
        self.with_capability(|modem, signals| modem.is_awake_now(signals))
    }

    fn status_active(&mut self) -> Option<bool> {
        let active = self.config.levels().status_active;
        self.lines.status.as_mut().map(|pin| pin.read() == active)
    }

    /// Evaluate `condition` until it succeeds or `budget` has passed since
    /// `start`. The condition is evaluated at least once.
    fn poll_until(
        &mut self,
        start: Instant,
        budget: Duration,
        mut condition: impl FnMut(&mut Self) -> bool,
    ) -> bool {
        loop {
            if condition(self) {
                return true;
            }
            if self.clock.elapsed_since(start) >= budget {
                return false;
            }
        }
    }

    /// Poll the status pin until it reports `active`. `None` without a
    /// status pin.
    fn wait_for_status(&mut self, active: bool, start: Instant, budget: Duration) -> Option<bool> {
        self.lines.status.as_ref()?;
        Some(self.poll_until(start, budget, |c| c.status_active() == Some(active)))
    }

    /// Set the idle levels of the modem outputs. Only has an effect once.
    pub fn init_pin_modes(&mut self) {
        if self.state.pin_modes_initialized {
            return;
        }
        let levels = *self.config.levels();
        let pins = *self.config.pins();
        if let Some(pin) = self.lines.sleep_request.as_mut() {
            debug!(
                "Initializing sleep request pin {} to {}",
                pins.sleep_request,
                levels.wake_active.inverted()
            );
            pin.drive(levels.wake_active.inverted());
        }
        if let Some(pin) = self.lines.reset.as_mut() {
            debug!(
                "Initializing reset pin {} to {}",
                pins.reset,
                levels.reset_active.inverted()
            );
            pin.drive(levels.reset_active.inverted());
        }
        if let Some(pin) = self.lines.led.as_mut() {
            pin.drive(Level::Low);
        }
        self.state.pin_modes_initialized = true;
    }

    /// Switch the modem supply on.
    ///
    /// The sleep request line is released first, so the modem does not see
    /// a wake request while its supply ramps up.
    pub fn power_up(&mut self) {
        self.init_pin_modes();
        let wake = self.config.levels().wake_active;
        match self.lines.power.as_mut() {
            Some(power) => {
                if let Some(sleep_request) = self.lines.sleep_request.as_mut() {
                    sleep_request.drive(wake.inverted());
                }
                info!(
                    "Powering {} with pin {}",
                    self.capability.name(),
                    self.config.pins().power
                );
                power.drive(Level::High);
                self.state.powered_since = Some(self.clock.now());
                self.state.mode = ModemState::Powering;
            }
            None => debug!(
                "Power to {} is not controlled by this processor",
                self.capability.name()
            ),
        }
    }

    /// Cut the modem supply without shutting the modem down first.
    pub fn power_down(&mut self) {
        match self.lines.power.as_mut() {
            Some(power) => {
                info!(
                    "Turning off power to {} with pin {}",
                    self.capability.name(),
                    self.config.pins().power
                );
                power.drive(Level::Low);
                self.state.powered_since = None;
                self.state.mode = ModemState::Unpowered;
                self.led_off();
            }
            None => debug!(
                "Power to {} is not controlled by this processor",
                self.capability.name()
            ),
        }
    }

    pub fn led_on(&mut self) {
        if let Some(led) = self.lines.led.as_mut() {
            led.drive(Level::High);
        }
    }

    pub fn led_off(&mut self) {
        if let Some(led) = self.lines.led.as_mut() {
            led.drive(Level::Low);
        }
    }

    /// Pulse the reset line for the configured width.
    ///
    /// Succeeds without checking the modem. Whether the reset helped shows
    /// in the next check.
    pub fn hard_reset(&mut self) -> Result<(), ModemError> {
        self.init_pin_modes();
        let active = self.config.levels().reset_active;
        let width = self.config.reset_pulse();
        match self.lines.reset.as_mut() {
            Some(reset) => {
                info!(
                    "Doing a hard reset on {}: pin {} {} for {} ms",
                    self.capability.name(),
                    self.config.pins().reset,
                    active,
                    width.ticks()
                );
                reset.drive(active);
                self.clock.spin_for(width);
                reset.drive(active.inverted());
                Ok(())
            }
            None => {
                warn!("No pin has been provided to reset {}", self.capability.name());
                Err(ModemError::NoResetCapability)
            }
        }
    }

    fn wait_for_wake_delay(&mut self) {
        if self.lines.power.is_none() {
            return;
        }
        if let Some(since) = self.state.powered_since {
            let delay = self.config.wake_delay();
            if self.clock.elapsed_since(since) < delay {
                debug!(
                    "Waiting up to {} ms for {} to warm up",
                    delay.ticks(),
                    self.capability.name()
                );
                while self.clock.elapsed_since(since) < delay { /* wait */ }
            }
        }
    }

    /// Wake the modem and wait until it answers, with one hard reset as
    /// fallback. Expects the wake delay to have passed.
    fn bring_up(&mut self) -> Result<(), ModemError> {
        self.state.mode = ModemState::AwaitingWake;
        if self.check_awake() {
            info!(
                "{} was already awake, not sending a wake signal",
                self.capability.name()
            );
            return Ok(());
        }

        let budget = self.config.at_response_timeout() + RESPONSE_BUFFER;
        let start = self.clock.now();
        debug!("Running wake sequence for {}", self.capability.name());
        if !self.with_capability(|modem, signals| modem.perform_wake_sequence(signals)) {
            warn!("Wake sequence for {} failed", self.capability.name());
        }

        let settle = if self.config.status_settle() < budget {
            self.config.status_settle()
        } else {
            budget
        };
        if let Some(false) = self.wait_for_status(true, start, settle) {
            debug!(
                "Status pin {} did not become active within {} ms",
                self.config.pins().status,
                settle.ticks()
            );
        }

        if self.poll_until(start, budget, Self::check_awake) {
            return Ok(());
        }
        warn!(
            "{} did not respond within {} ms",
            self.capability.name(),
            budget.ticks()
        );

        if let Err(e) = self.hard_reset() {
            warn!("Cannot recover {}: {}", self.capability.name(), e);
            return Err(ModemError::Unresponsive);
        }
        let start = self.clock.now();
        if self.poll_until(start, budget, Self::check_awake) {
            info!("{} responded after hard reset", self.capability.name());
            Ok(())
        } else {
            warn!(
                "{} still unresponsive after hard reset",
                self.capability.name()
            );
            Err(ModemError::Unresponsive)
        }
    }

    fn mark_responsive(&mut self) {
        self.state.mode = ModemState::Responsive;
        self.led_on();
    }

    fn mark_faulted(&mut self) {
        self.state.mode = ModemState::Faulted;
        self.led_off();
    }

    fn run_extra_setup(&mut self) -> Result<(), ModemError> {
        self.state.mode = ModemState::InUse;
        if self.with_capability(|modem, signals| modem.perform_extra_setup(signals)) {
            self.state.has_completed_setup = true;
            info!("Extra setup for {} succeeded", self.capability.name());
            Ok(())
        } else {
            self.state.has_completed_setup = false;
            warn!("Extra setup for {} failed", self.capability.name());
            Err(ModemError::SetupFailed)
        }
    }

    /// Power up and wake the modem for use.
    ///
    /// Returns whether the modem is responsive and its setup (run on the
    /// first successful wake) succeeded.
    pub fn wake(&mut self) -> bool {
        self.init_pin_modes();
        if !self.is_powered() {
            self.power_up();
        }
        self.wait_for_wake_delay();
        if let Err(e) = self.bring_up() {
            warn!("Could not wake {}: {}", self.capability.name(), e);
            self.mark_faulted();
            return false;
        }
        self.mark_responsive();
        if self.state.has_completed_setup {
            return true;
        }
        self.run_extra_setup().is_ok()
    }

    /// Check that the modem can be brought up and configured, then return
    /// it to the power state it was found in.
    pub fn ensure_ready(&mut self) -> bool {
        // Keeps a wake triggered from here from running the setup itself
        self.state.has_completed_setup = true;
        info!("Setting up {}", self.capability.name());
        self.log_timing();
        self.init_pin_modes();

        let was_powered = self.is_powered();
        if !was_powered {
            self.power_up();
        }

        let was_awake = self.check_awake();
        let woken = if was_awake {
            debug!("{} is already awake", self.capability.name());
            Ok(())
        } else {
            self.wait_for_wake_delay();
            self.bring_up()
        };
        let result = match woken {
            Ok(()) => {
                self.mark_responsive();
                self.run_extra_setup()
            }
            Err(e) => {
                self.mark_faulted();
                Err(e)
            }
        };
        match result {
            Ok(()) => info!("{} setup complete", self.capability.name()),
            Err(e) => {
                warn!("{} setup failed: {}", self.capability.name(), e);
                self.state.has_completed_setup = false;
            }
        }

        if !was_powered {
            debug!("Powering {} down again", self.capability.name());
            if let Err(e) = self.sleep_power_down() {
                warn!("{}", e);
            }
        } else if !was_awake {
            debug!("Putting {} back to sleep", self.capability.name());
            if let Err(e) = self.sleep_sequence() {
                warn!("{}", e);
            }
        } else {
            debug!("Leaving {} on", self.capability.name());
        }

        result.is_ok()
    }

    fn log_timing(&self) {
        debug!(
            "{} warms up in {} ms, indicates status in {} ms, answers within {} ms \
             and takes up to {} ms to shut down",
            self.capability.name(),
            self.config.wake_delay().ticks(),
            self.config.status_settle().ticks(),
            self.config.at_response_timeout().ticks(),
            self.config.disconnect_budget().ticks()
        );
    }

    /// Returns `Ok(true)` if a sleep sequence was issued, `Ok(false)` if the
    /// modem was not awake.
    fn sleep_sequence(&mut self) -> Result<bool, ModemError> {
        if !self.check_awake() {
            debug!(
                "{} is not awake, no sleep sequence required",
                self.capability.name()
            );
            self.led_off();
            self.state.mode = if self.is_powered() {
                ModemState::SoftSleptPowered
            } else {
                ModemState::Unpowered
            };
            return Ok(false);
        }
        self.state.mode = ModemState::Sleeping;
        info!("Putting {} to sleep", self.capability.name());
        let slept = self.with_capability(|modem, signals| modem.perform_sleep_sequence(signals));
        self.led_off();
        self.state.mode = ModemState::SoftSleptPowered;
        if slept {
            Ok(true)
        } else {
            Err(ModemError::SleepFailed)
        }
    }

    /// Put the modem to sleep, leaving it powered.
    pub fn sleep(&mut self) -> bool {
        self.init_pin_modes();
        match self.sleep_sequence() {
            Ok(_) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// Put the modem to sleep, wait for it to shut down and cut its power.
    ///
    /// Power is removed even if the modem did not shut down in time.
    pub fn sleep_power_down(&mut self) -> Result<(), ModemError> {
        self.init_pin_modes();
        let start = self.clock.now();
        info!("Turning {} off", self.capability.name());
        let slept = self.sleep_sequence();

        if self.lines.power.is_none() {
            debug!(
                "Power to {} is not controlled by this processor, not waiting for shutdown",
                self.capability.name()
            );
            return slept.map(|_| ());
        }

        let shutdown = if matches!(slept, Ok(false)) {
            Ok(())
        } else {
            self.wait_for_shutdown(start)
        };
        self.power_down();
        slept.map(|_| ()).and(shutdown)
    }

    fn wait_for_shutdown(&mut self, start: Instant) -> Result<(), ModemError> {
        let budget = self.config.disconnect_budget();
        match self.wait_for_status(false, start, budget) {
            Some(true) => {
                debug!(
                    "{} shut down after {} ms",
                    self.capability.name(),
                    self.clock.elapsed_since(start).ticks()
                );
                Ok(())
            }
            Some(false) => {
                warn!(
                    "{} did not shut down within {} ms",
                    self.capability.name(),
                    budget.ticks()
                );
                Err(ModemError::GracefulShutdownIncomplete)
            }
            None => {
                if budget.ticks() > 0 {
                    debug!(
                        "Waiting {} ms for {} to shut down",
                        budget.ticks(),
                        self.capability.name()
                    );
                    while self.clock.elapsed_since(start) < budget { /* wait */ }
                }
                Ok(())
            }
        }
    }

    /// Return the modem to its lowest power state.
    ///
    /// Only a failed sleep sequence counts as failure. A modem that did not
    /// finish shutting down in time has its power cut anyway.
    pub fn stand_by(&mut self) -> bool {
        match self.sleep_power_down() {
            Ok(()) => true,
            Err(ModemError::GracefulShutdownIncomplete) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// Poll the metadata enabled in the poll mask and cache the results.
    ///
    /// Returns `false` if any poll failed. Values of failed polls keep their
    /// previous value.
    pub fn update_diagnostics(&mut self) -> bool {
        let mask = self.poll_mask;
        let plan = PollPlan::from(mask);
        let mut success = true;
        if plan.signal {
            match self.capability.poll_signal_quality() {
                Some(quality) => self.diagnostics.record_signal(quality, mask),
                None => success = false,
            }
        }
        if plan.battery {
            match self.capability.poll_battery() {
                Some(stats) => self.diagnostics.record_battery(stats, mask),
                None => success = false,
            }
        }
        if plan.temperature {
            match self.capability.poll_temperature() {
                Some(temperature) => self.diagnostics.record_temperature(temperature),
                None => success = false,
            }
        }
        if !success {
            debug!("Some diagnostics of {} are unavailable", self.capability.name());
        }
        success
    }

    /// Ask the network for the time, up to `retries` times.
    ///
    /// Requests are spaced by at least [`MIN_TIME_REQUEST_INTERVAL`], answers
    /// outside the plausible range are discarded.
    pub fn time_from_network(&mut self, retries: u8) -> Option<u32> {
        for attempt in 1..=retries {
            if let Some(last) = self.state.last_time_request {
                while self.clock.elapsed_since(last) < MIN_TIME_REQUEST_INTERVAL { /* wait */ }
            }
            self.state.last_time_request = Some(self.clock.now());
            debug!("Requesting time from the network (attempt {})", attempt);
            match self.capability.time_from_network() {
                Some(epoch) if network_time::is_epoch_sane(epoch) => return Some(epoch),
                Some(epoch) => warn!("Discarding implausible network time {}", epoch),
                None => debug!("No time from the network"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    use crate::config::{PinAssignments, SignalLevels, TimingBudgets, UNASSIGNED};
    use crate::diagnostics::{BatteryStats, SignalQuality};
    use crate::testing::{budgets, build, build_with_levels, full_wiring, ModemModel};

    fn no_power_pin() -> PinAssignments {
        PinAssignments {
            power: UNASSIGNED,
            ..full_wiring()
        }
    }

    fn no_reset_pin() -> PinAssignments {
        PinAssignments {
            reset: UNASSIGNED,
            ..full_wiring()
        }
    }

    #[test]
    fn test_new_rejects_missing_line() {
        let (controller, _rig) =
            build(full_wiring(), budgets(0, 0, 0), ModemModel::cooperative());
        let (modem, clock, mut lines) = controller.release();
        lines.reset = None;
        let config = ModemConfig::configure(
            full_wiring(),
            Default::default(),
            Default::default(),
            Default::default(),
        )
        .unwrap();
        let result = ModemController::new(config, lines, modem, clock);
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingLine(PinRole::Reset))
        ));
    }

    #[test]
    fn test_new_rejects_unassigned_line() {
        let (controller, _rig) =
            build(full_wiring(), budgets(0, 0, 0), ModemModel::cooperative());
        let (modem, clock, lines) = controller.release();
        let config = ModemConfig::configure(
            no_power_pin(),
            Default::default(),
            Default::default(),
            Default::default(),
        )
        .unwrap();
        let result = ModemController::new(config, lines, modem, clock);
        assert!(matches!(
            result,
            Err(ConfigurationError::UnassignedLine(PinRole::Power))
        ));
    }

    #[test]
    fn test_pins_untouched_until_first_operation() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 0, 0), ModemModel::cooperative());
        assert!(rig.journal.borrow().is_empty());
        assert!(!controller.pin_modes_initialized());

        controller.init_pin_modes();
        controller.init_pin_modes();
        assert!(controller.pin_modes_initialized());
        let sleep_request = rig.sleep_request.as_ref().unwrap();
        let reset = rig.reset.as_ref().unwrap();
        // wake and reset are active low by default
        assert_eq!(sleep_request.events().len(), 1);
        assert_eq!(sleep_request.level(), Some(Level::High));
        assert_eq!(reset.events().len(), 1);
        assert_eq!(reset.level(), Some(Level::High));
        assert_eq!(rig.led.as_ref().unwrap().level(), Some(Level::Low));
        assert_eq!(rig.power.as_ref().unwrap().level(), None);
    }

    #[test]
    fn test_power_up_releases_wake_before_power() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 0, 0), ModemModel::cooperative());
        controller.power_up();
        assert_eq!(controller.state(), ModemState::Powering);
        assert!(controller.powered_since().is_some());

        let journal = rig.journal.borrow();
        let power_on = journal
            .iter()
            .position(|&(name, _, level)| name == "power" && level == Level::High)
            .unwrap();
        let (name, _, level) = journal[power_on - 1];
        assert_eq!(name, "sleep request");
        assert_eq!(level, Level::High);
    }

    #[test]
    fn test_power_down_clears_powered_since() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 0, 0), ModemModel::cooperative());
        controller.power_up();
        controller.power_down();
        assert_eq!(controller.powered_since(), None);
        assert_eq!(controller.state(), ModemState::Unpowered);
        assert_eq!(rig.power.as_ref().unwrap().level(), Some(Level::Low));
        assert!(!rig.model.borrow().powered);
    }

    #[test]
    fn test_no_wake_delay_without_power_pin() {
        let (mut controller, rig) = build(
            no_power_pin(),
            budgets(10_000, 1000, 0),
            ModemModel::cooperative(),
        );
        let start = rig.clock.now_ms();
        assert!(controller.ensure_ready());
        assert!(rig.elapsed_since(start) < 10_000);
        assert_eq!(controller.powered_since(), None);
    }

    #[rstest]
    #[case(full_wiring(), true)]
    #[case(full_wiring(), false)]
    #[case(no_power_pin(), true)]
    #[case(no_power_pin(), false)]
    fn test_awake_modem_is_never_woken(#[case] pins: PinAssignments, #[case] via_setup: bool) {
        let model = ModemModel {
            awake: true,
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(pins, budgets(500, 1000, 0), model);
        if via_setup {
            assert!(controller.ensure_ready());
        } else {
            assert!(controller.wake());
        }
        assert_eq!(rig.model.borrow().wake_sequences, 0);
        assert!(rig
            .sleep_request
            .as_ref()
            .unwrap()
            .pulses(Level::Low)
            .is_empty());
    }

    #[rstest]
    #[case(full_wiring(), true)]
    #[case(no_power_pin(), false)]
    fn test_stand_by_after_ensure_ready(#[case] pins: PinAssignments, #[case] controlled: bool) {
        let (mut controller, _rig) = build(pins, budgets(100, 1000, 500), ModemModel::cooperative());
        assert!(controller.ensure_ready());
        assert!(controller.wake());
        if controlled {
            assert!(controller.powered_since().is_some());
        }
        assert!(controller.stand_by());
        assert_eq!(controller.powered_since(), None);
        assert!(!controller.is_powered() || !controlled);
    }

    #[rstest]
    #[case(no_reset_pin())]
    #[case(PinAssignments { status: UNASSIGNED, ..no_reset_pin() })]
    fn test_unresponsive_without_reset_fails_in_budget(#[case] pins: PinAssignments) {
        let model = ModemModel {
            wakes_on_request: false,
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(pins, budgets(300, 1000, 0), model);
        let start = rig.clock.now_ms();
        assert!(!controller.ensure_ready());
        let elapsed = rig.elapsed_since(start);
        assert!(elapsed >= 300 + 1000, "gave up after {} ms", elapsed);
        assert!(elapsed <= 300 + 1000 + 500 + 20, "took {} ms", elapsed);
        assert!(!controller.has_completed_setup());
        assert_eq!(rig.model.borrow().setups, 0);
        assert_eq!(controller.powered_since(), None);
    }

    #[test]
    fn test_hard_reset_recovers_unresponsive_modem() {
        let model = ModemModel {
            wakes_on_request: false,
            wakes_after_reset: true,
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(full_wiring(), budgets(300, 1000, 0), model);
        assert!(controller.ensure_ready());
        assert_eq!(rig.model.borrow().resets, 1);

        let pulses = rig.reset.as_ref().unwrap().pulses(Level::Low);
        assert_eq!(pulses.len(), 1);
        assert!(
            (200..=202).contains(&pulses[0]),
            "reset pulse was {} ms",
            pulses[0]
        );
        assert!(controller.has_completed_setup());
    }

    #[test]
    fn test_unresponsive_after_reset_faults() {
        let model = ModemModel {
            wakes_on_request: false,
            wakes_after_reset: false,
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(full_wiring(), budgets(0, 1000, 0), model);
        assert!(!controller.wake());
        assert_eq!(controller.state(), ModemState::Faulted);
        assert_eq!(rig.model.borrow().resets, 1);
        assert_eq!(rig.led.as_ref().unwrap().level(), Some(Level::Low));
    }

    #[test]
    fn test_typical_modem_setup_timing() {
        let pins = PinAssignments {
            power: 1,
            status: 2,
            reset: UNASSIGNED,
            sleep_request: 3,
            led: UNASSIGNED,
        };
        let budgets = TimingBudgets {
            wake_delay_ms: 500,
            status_settle_ms: 200,
            disconnect_ms: 0,
            at_response_ms: 1000,
        };
        let (mut controller, rig) = build(pins, budgets, ModemModel::cooperative());
        let start = rig.clock.now_ms();
        assert!(controller.ensure_ready());
        let elapsed = rig.elapsed_since(start);
        assert!((500..=1700).contains(&elapsed), "took {} ms", elapsed);
        assert_eq!(rig.model.borrow().wake_sequences, 1);
        // returned to the unpowered state it was found in
        assert_eq!(controller.powered_since(), None);
        assert_eq!(controller.state(), ModemState::Unpowered);
    }

    #[test]
    fn test_uncontrollable_modem() {
        let model = ModemModel {
            wakes_on_request: false,
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(PinAssignments::default(), budgets(500, 100, 5000), model);
        assert!(!controller.ensure_ready());
        assert_eq!(
            controller.hard_reset(),
            Err(ModemError::NoResetCapability)
        );

        // sleep and power down are no-ops
        let start = rig.clock.now_ms();
        assert!(controller.sleep());
        assert_eq!(controller.sleep_power_down(), Ok(()));
        assert!(rig.elapsed_since(start) < 100);
    }

    #[test]
    fn test_failed_setup_restores_asleep_modem_without_reset() {
        let model = ModemModel {
            setup_succeeds: false,
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(full_wiring(), budgets(0, 1000, 0), model);
        controller.power_up();
        assert!(!controller.ensure_ready());
        assert!(!controller.has_completed_setup());

        let model = rig.model.borrow();
        assert_eq!(model.setups, 1);
        assert_eq!(model.resets, 0);
        assert_eq!(model.sleep_sequences, 1);
        assert!(!model.awake);
        assert!(controller.powered_since().is_some());
        assert_eq!(controller.state(), ModemState::SoftSleptPowered);
    }

    #[test]
    fn test_ensure_ready_leaves_running_modem_on() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 1000, 0), ModemModel::cooperative());
        assert!(controller.wake());
        assert!(controller.ensure_ready());
        assert_eq!(rig.model.borrow().sleep_sequences, 0);
        assert!(rig.model.borrow().awake);
        assert!(controller.powered_since().is_some());
        assert_eq!(controller.state(), ModemState::InUse);
    }

    #[test]
    fn test_wake_runs_setup_once() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 1000, 0), ModemModel::cooperative());
        assert!(controller.wake());
        assert_eq!(controller.state(), ModemState::InUse);
        assert!(controller.sleep());
        assert_eq!(controller.state(), ModemState::SoftSleptPowered);
        assert!(controller.wake());
        assert_eq!(controller.state(), ModemState::Responsive);

        let model = rig.model.borrow();
        assert_eq!(model.setups, 1);
        assert_eq!(model.wake_sequences, 2);
    }

    #[test]
    fn test_wake_pulse_width() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 1000, 0), ModemModel::cooperative());
        assert!(controller.wake());
        let pulses = rig.sleep_request.as_ref().unwrap().pulses(Level::Low);
        assert_eq!(pulses.len(), 1);
        assert!((50..=52).contains(&pulses[0]), "wake pulse was {} ms", pulses[0]);
    }

    #[test]
    fn test_led_follows_modem() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 1000, 0), ModemModel::cooperative());
        let led = rig.led.as_ref().unwrap();
        assert!(controller.wake());
        assert_eq!(led.level(), Some(Level::High));
        assert!(controller.stand_by());
        assert_eq!(led.level(), Some(Level::Low));
    }

    #[test]
    fn test_led_off_when_modem_found_asleep() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 1000, 0), ModemModel::cooperative());
        assert!(controller.wake());
        assert_eq!(rig.led.as_ref().unwrap().level(), Some(Level::High));

        // modem dropped off on its own
        rig.model.borrow_mut().awake = false;
        assert!(controller.sleep());
        assert_eq!(rig.model.borrow().sleep_sequences, 0);
        assert_eq!(rig.led.as_ref().unwrap().level(), Some(Level::Low));
    }

    fn inverted_levels() -> SignalLevels {
        SignalLevels {
            status_active: Level::Low,
            reset_active: Level::High,
            wake_active: Level::High,
        }
    }

    #[test]
    fn test_inverted_levels_wake_and_shutdown() {
        let (mut controller, rig) = build_with_levels(
            full_wiring(),
            inverted_levels(),
            budgets(0, 1000, 15_000),
            ModemModel::cooperative(),
        );
        assert!(controller.wake());

        let sleep_request = rig.sleep_request.as_ref().unwrap();
        let pulses = sleep_request.pulses(Level::High);
        assert_eq!(pulses.len(), 1);
        assert!((50..=52).contains(&pulses[0]), "wake pulse was {} ms", pulses[0]);
        assert_eq!(sleep_request.level(), Some(Level::Low));

        let reset = rig.reset.as_ref().unwrap();
        assert_eq!(reset.level(), Some(Level::Low));
        assert!(reset.pulses(Level::High).is_empty());
        assert_eq!(rig.model.borrow().resets, 0);

        // status goes high when the modem is off, ending the wait early
        let start = rig.clock.now_ms();
        assert!(controller.stand_by());
        assert!(rig.elapsed_since(start) < 100);
        assert_eq!(controller.powered_since(), None);
    }

    #[test]
    fn test_inverted_levels_hard_reset_pulse() {
        let model = ModemModel {
            wakes_on_request: false,
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build_with_levels(
            full_wiring(),
            inverted_levels(),
            budgets(0, 1000, 0),
            model,
        );
        assert!(controller.ensure_ready());
        let pulses = rig.reset.as_ref().unwrap().pulses(Level::High);
        assert_eq!(pulses.len(), 1);
        assert!((200..=202).contains(&pulses[0]), "reset pulse was {} ms", pulses[0]);
        assert_eq!(rig.model.borrow().resets, 1);
    }

    #[test]
    fn test_set_polling_replaces_mask() {
        let model = ModemModel {
            battery: Some(BatteryStats {
                state: 0,
                percent: 90,
                voltage_mv: 3300,
            }),
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(full_wiring(), budgets(0, 1000, 0), model);
        let mut mask = PollMask::none();
        mask.enable(PollMask::BATTERY_VOLTAGE);
        controller.enable_polling(mask);
        assert!(controller.update_diagnostics());
        assert_eq!(controller.diagnostics().battery_voltage_mv, Some(3300));

        controller.set_polling(PollMask::none());
        assert_eq!(controller.poll_mask().bits(), 0);
        rig.model.borrow_mut().battery = Some(BatteryStats {
            state: 0,
            percent: 80,
            voltage_mv: 3100,
        });
        assert!(controller.update_diagnostics());
        // not polled, the cached value stays
        assert_eq!(controller.diagnostics().battery_voltage_mv, Some(3300));
    }

    #[test]
    fn test_sleep_when_asleep_is_noop() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 1000, 0), ModemModel::cooperative());
        assert!(controller.sleep());
        assert_eq!(rig.model.borrow().sleep_sequences, 0);
    }

    #[test]
    fn test_sleep_failure_is_reported() {
        let model = ModemModel {
            sleep_succeeds: false,
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(full_wiring(), budgets(0, 1000, 200), model);
        assert!(controller.wake());
        assert_eq!(controller.sleep_power_down(), Err(ModemError::SleepFailed));
        // power is cut regardless
        assert_eq!(controller.powered_since(), None);
        assert!(!rig.model.borrow().powered);

        assert!(controller.wake());
        assert!(!controller.stand_by());
    }

    #[test]
    fn test_status_stuck_active_cuts_power_after_budget() {
        let model = ModemModel {
            status_stuck_active: true,
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(full_wiring(), budgets(0, 1000, 2000), model);
        assert!(controller.wake());
        let start = rig.clock.now_ms();
        assert_eq!(
            controller.sleep_power_down(),
            Err(ModemError::GracefulShutdownIncomplete)
        );
        let elapsed = rig.elapsed_since(start);
        assert!((2000..=2020).contains(&elapsed), "took {} ms", elapsed);
        assert_eq!(controller.powered_since(), None);
        assert_eq!(rig.power.as_ref().unwrap().level(), Some(Level::Low));

        assert!(controller.wake());
        assert!(controller.stand_by());
    }

    #[test]
    fn test_shutdown_without_status_pin_waits_full_budget() {
        let pins = PinAssignments {
            status: UNASSIGNED,
            ..full_wiring()
        };
        let (mut controller, rig) = build(pins, budgets(0, 1000, 1500), ModemModel::cooperative());
        assert!(controller.wake());
        let start = rig.clock.now_ms();
        assert_eq!(controller.sleep_power_down(), Ok(()));
        let elapsed = rig.elapsed_since(start);
        assert!((1500..=1520).contains(&elapsed), "took {} ms", elapsed);
    }

    #[test]
    fn test_shutdown_with_status_pin_returns_early() {
        let (mut controller, rig) =
            build(full_wiring(), budgets(0, 1000, 15_000), ModemModel::cooperative());
        assert!(controller.wake());
        let start = rig.clock.now_ms();
        assert_eq!(controller.sleep_power_down(), Ok(()));
        assert!(rig.elapsed_since(start) < 100);
    }

    #[test]
    fn test_shutdown_without_power_pin_does_not_wait() {
        let (mut controller, rig) = build(
            no_power_pin(),
            budgets(0, 1000, 15_000),
            ModemModel::cooperative(),
        );
        assert!(controller.wake());
        let start = rig.clock.now_ms();
        assert!(controller.stand_by());
        assert!(rig.elapsed_since(start) < 100);
        assert_eq!(controller.state(), ModemState::SoftSleptPowered);
    }

    #[test]
    fn test_update_diagnostics_polls_enabled_values() {
        let model = ModemModel {
            signal: Some(SignalQuality {
                rssi: -97,
                percent: 40,
            }),
            battery: Some(BatteryStats {
                state: 0,
                percent: 90,
                voltage_mv: 3300,
            }),
            temperature: None,
            ..ModemModel::cooperative()
        };
        let (mut controller, _rig) = build(full_wiring(), budgets(0, 1000, 0), model);

        // nothing polled by default
        assert!(controller.update_diagnostics());
        assert_eq!(controller.diagnostics().rssi, None);

        let mut mask = PollMask::none();
        mask.enable(PollMask::RSSI);
        mask.enable(PollMask::BATTERY_VOLTAGE);
        controller.enable_polling(mask);
        assert!(controller.update_diagnostics());
        assert_eq!(controller.diagnostics().rssi, Some(-97));
        assert_eq!(controller.diagnostics().battery_voltage_mv, Some(3300));
        assert_eq!(controller.diagnostics().battery_percent, None);

        let mut mask = PollMask::none();
        mask.enable(PollMask::TEMPERATURE);
        controller.enable_polling(mask);
        assert!(!controller.update_diagnostics());
        assert_eq!(controller.diagnostics().rssi, Some(-97));
        assert_eq!(controller.diagnostics().temperature_c, None);
    }

    #[test]
    fn test_time_from_network_skips_implausible_answers() {
        let model = ModemModel {
            network_times: vec![None, Some(123), Some(1_700_000_000)].into(),
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(full_wiring(), budgets(0, 1000, 0), model);
        assert_eq!(controller.time_from_network(5), Some(1_700_000_000));

        let requests = rig.model.borrow().time_requests.clone();
        assert_eq!(requests.len(), 3);
        for pair in requests.windows(2) {
            assert!(pair[1] - pair[0] >= 4000, "requests {:?}", requests);
        }
    }

    #[test]
    fn test_time_from_network_gives_up() {
        let model = ModemModel {
            network_times: vec![Some(1), Some(2), Some(1_700_000_000)].into(),
            ..ModemModel::cooperative()
        };
        let (mut controller, rig) = build(full_wiring(), budgets(0, 1000, 0), model);
        assert_eq!(controller.time_from_network(2), None);
        assert_eq!(rig.model.borrow().time_requests.len(), 2);
        assert_eq!(controller.time_from_network(0), None);
    }

    #[test]
    fn test_device_id() {
        let (controller, _rig) =
            build(full_wiring(), budgets(0, 0, 0), ModemModel::cooperative());
        assert_eq!(controller.modem_name(), "Scripted modem");
        assert_eq!(
            format!("{}", controller.device_id()),
            "Scripted modem Sn SN-0042 HwVer 1.1 FwVer 2.0.3"
        );
    }
}
