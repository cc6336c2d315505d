//! Test doubles: a stepping clock, pins that record their levels and a
//! scripted radio whose state is shared with the pins.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::digital::v2::{InputPin, OutputPin};

use crate::capability::{ModemCapability, ModemSignals};
use crate::clock::{Instant, MillisClock};
use crate::config::{ModemConfig, PinAssignments, PulseWidths, SignalLevels, TimingBudgets};
use crate::controller::{ModemController, ModemLines};
use crate::diagnostics::{BatteryStats, SignalQuality};
use crate::pins::Level;

/// Clock that advances by a fixed step every time it is read.
///
/// Clones share the same time, so a test can keep a handle to a clock that
/// was moved into the controller.
#[derive(Debug, Clone)]
pub struct StepClock {
    now: Rc<Cell<u32>>,
    step: u32,
}

impl StepClock {
    pub fn new(step: u32) -> Self {
        Self::starting_at(0, step)
    }

    pub fn starting_at(start: u32, step: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
            step,
        }
    }

    /// Current time without advancing.
    pub fn now_ms(&self) -> u32 {
        self.now.get()
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl MillisClock for StepClock {
    fn now(&mut self) -> Instant {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        Instant::from_ticks(now)
    }
}

/// State of the simulated module, shared between the capability and pins.
#[derive(Debug, Default)]
pub struct ModemModel {
    pub powered: bool,
    pub awake: bool,
    /// The wake sequence makes the module awake
    pub wakes_on_request: bool,
    /// A hard reset makes the module awake
    pub wakes_after_reset: bool,
    pub setup_succeeds: bool,
    pub sleep_succeeds: bool,
    /// The status pin reports "active" no matter what
    pub status_stuck_active: bool,
    pub internet: bool,
    pub network_times: VecDeque<Option<u32>>,
    pub signal: Option<SignalQuality>,
    pub battery: Option<BatteryStats>,
    pub temperature: Option<f32>,

    pub wake_sequences: u32,
    pub sleep_sequences: u32,
    pub setups: u32,
    pub resets: u32,
    pub time_requests: Vec<u32>,
}

impl ModemModel {
    /// A well behaved module.
    pub fn cooperative() -> Self {
        Self {
            wakes_on_request: true,
            wakes_after_reset: true,
            setup_succeeds: true,
            sleep_succeeds: true,
            internet: true,
            ..Self::default()
        }
    }
}

pub type SharedModel = Rc<RefCell<ModemModel>>;

/// What happens to the model when a pin changes level.
#[derive(Debug, Clone)]
enum PinEffect {
    None,
    Power(SharedModel),
    /// Releasing the reset from its active level resets the module.
    Reset(SharedModel, Level),
}

/// Output pin that records every level it is driven to.
#[derive(Debug, Clone)]
pub struct RecordingPin {
    name: &'static str,
    clock: StepClock,
    journal: Journal,
    effect: PinEffect,
    level: Rc<Cell<Option<Level>>>,
}

/// Level changes of all recording pins, in the order they happened.
pub type Journal = Rc<RefCell<Vec<(&'static str, u32, Level)>>>;

impl RecordingPin {
    fn new(name: &'static str, clock: &StepClock, journal: &Journal, effect: PinEffect) -> Self {
        Self {
            name,
            clock: clock.clone(),
            journal: journal.clone(),
            effect,
            level: Rc::new(Cell::new(None)),
        }
    }

    /// Last level this pin was driven to.
    pub fn level(&self) -> Option<Level> {
        self.level.get()
    }

    /// Timestamps and levels of this pin.
    pub fn events(&self) -> Vec<(u32, Level)> {
        self.journal
            .borrow()
            .iter()
            .filter(|(name, _, _)| *name == self.name)
            .map(|&(_, t, level)| (t, level))
            .collect()
    }

    /// Widths of all completed pulses at `active` level.
    pub fn pulses(&self, active: Level) -> Vec<u32> {
        let mut widths = Vec::new();
        let mut started = None;
        for (t, level) in self.events() {
            match (level == active, started) {
                (true, None) => started = Some(t),
                (false, Some(start)) => {
                    widths.push(t - start);
                    started = None;
                }
                _ => {}
            }
        }
        widths
    }

    fn record(&mut self, level: Level) {
        let previous = self.level.replace(Some(level));
        self.journal
            .borrow_mut()
            .push((self.name, self.clock.now_ms(), level));
        match &self.effect {
            PinEffect::None => {}
            PinEffect::Power(model) => {
                let mut model = model.borrow_mut();
                model.powered = level.is_high();
                if !model.powered {
                    model.awake = false;
                }
            }
            PinEffect::Reset(model, active) => {
                if previous == Some(*active) && level != *active {
                    let mut model = model.borrow_mut();
                    model.resets += 1;
                    model.awake = model.wakes_after_reset;
                }
            }
        }
    }
}

impl OutputPin for RecordingPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.record(Level::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.record(Level::High);
        Ok(())
    }
}

/// Status output of the simulated module.
#[derive(Debug, Clone)]
pub struct StatusPin {
    model: SharedModel,
    active: Level,
}

impl StatusPin {
    fn level(&self) -> Level {
        let model = self.model.borrow();
        if model.awake || model.status_stuck_active {
            self.active
        } else {
            self.active.inverted()
        }
    }
}

impl InputPin for StatusPin {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(self.level().is_high())
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(!self.level().is_high())
    }
}

/// Radio behaving according to a shared [`ModemModel`].
#[derive(Debug, Clone)]
pub struct ScriptedModem {
    pub model: SharedModel,
    clock: StepClock,
}

impl ModemCapability for ScriptedModem {
    fn name(&self) -> &str {
        "Scripted modem"
    }

    fn is_awake_now(&mut self, _signals: &mut dyn ModemSignals) -> bool {
        self.model.borrow().awake
    }

    fn perform_wake_sequence(&mut self, signals: &mut dyn ModemSignals) -> bool {
        signals.pulse_wake();
        let mut model = self.model.borrow_mut();
        model.wake_sequences += 1;
        if model.wakes_on_request {
            model.awake = true;
        }
        true
    }

    fn perform_sleep_sequence(&mut self, _signals: &mut dyn ModemSignals) -> bool {
        let mut model = self.model.borrow_mut();
        model.sleep_sequences += 1;
        if model.sleep_succeeds {
            model.awake = false;
        }
        model.sleep_succeeds
    }

    fn perform_extra_setup(&mut self, _signals: &mut dyn ModemSignals) -> bool {
        let mut model = self.model.borrow_mut();
        model.setups += 1;
        model.setup_succeeds
    }

    fn is_internet_reachable(&mut self) -> bool {
        self.model.borrow().internet
    }

    fn time_from_network(&mut self) -> Option<u32> {
        let mut model = self.model.borrow_mut();
        model.time_requests.push(self.clock.now_ms());
        model.network_times.pop_front().flatten()
    }

    fn poll_signal_quality(&mut self) -> Option<SignalQuality> {
        self.model.borrow().signal
    }

    fn poll_battery(&mut self) -> Option<BatteryStats> {
        self.model.borrow().battery
    }

    fn poll_temperature(&mut self) -> Option<f32> {
        self.model.borrow().temperature
    }

    fn serial_number(&self) -> &str {
        "SN-0042"
    }

    fn hardware_version(&self) -> &str {
        "1.1"
    }

    fn firmware_version(&self) -> &str {
        "2.0.3"
    }
}

pub type TestController = ModemController<ScriptedModem, StepClock, RecordingPin, StatusPin>;

/// Handles to everything a [`TestController`] was built from.
pub struct Rig {
    pub clock: StepClock,
    pub model: SharedModel,
    pub power: Option<RecordingPin>,
    pub reset: Option<RecordingPin>,
    pub sleep_request: Option<RecordingPin>,
    pub led: Option<RecordingPin>,
    pub journal: Journal,
}

impl Rig {
    /// Time in ms since `start` without advancing the clock.
    pub fn elapsed_since(&self, start: u32) -> u32 {
        self.clock.now_ms().wrapping_sub(start)
    }
}

/// Every signal connected.
pub fn full_wiring() -> PinAssignments {
    PinAssignments {
        power: 10,
        status: 11,
        reset: 12,
        sleep_request: 13,
        led: 14,
    }
}

pub fn budgets(wake_delay_ms: i32, at_response_ms: i32, disconnect_ms: i32) -> TimingBudgets {
    TimingBudgets {
        wake_delay_ms,
        status_settle_ms: 100,
        disconnect_ms,
        at_response_ms,
    }
}

/// Show controller logs with `RUST_LOG=debug cargo test`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Build a controller with lines for every assigned pin of `pins`.
pub fn build(
    pins: PinAssignments,
    budgets: TimingBudgets,
    model: ModemModel,
) -> (TestController, Rig) {
    build_with_levels(pins, SignalLevels::default(), budgets, model)
}

/// Like [`build`], with the given signal polarities.
pub fn build_with_levels(
    pins: PinAssignments,
    levels: SignalLevels,
    budgets: TimingBudgets,
    model: ModemModel,
) -> (TestController, Rig) {
    init_logging();
    let pulses = PulseWidths {
        reset_ms: 200,
        wake_ms: 50,
    };
    let config = ModemConfig::configure(pins, levels, pulses, budgets).unwrap();
    let levels = *config.levels();

    let clock = StepClock::new(1);
    let model = Rc::new(RefCell::new(model));
    let journal = Journal::default();

    let power = pins
        .get(crate::PinRole::Power)
        .map(|_| RecordingPin::new("power", &clock, &journal, PinEffect::Power(model.clone())));
    let reset = pins.get(crate::PinRole::Reset).map(|_| {
        RecordingPin::new(
            "reset",
            &clock,
            &journal,
            PinEffect::Reset(model.clone(), levels.reset_active),
        )
    });
    let sleep_request = pins
        .get(crate::PinRole::SleepRequest)
        .map(|_| RecordingPin::new("sleep request", &clock, &journal, PinEffect::None));
    let led = pins
        .get(crate::PinRole::Led)
        .map(|_| RecordingPin::new("led", &clock, &journal, PinEffect::None));
    let status = pins.get(crate::PinRole::Status).map(|_| StatusPin {
        model: model.clone(),
        active: levels.status_active,
    });

    // A module without a controlled supply is always powered
    if power.is_none() {
        model.borrow_mut().powered = true;
    }

    let lines = ModemLines {
        power: power.clone(),
        status,
        reset: reset.clone(),
        sleep_request: sleep_request.clone(),
        led: led.clone(),
    };
    let modem = ScriptedModem {
        model: model.clone(),
        clock: clock.clone(),
    };
    let controller = ModemController::new(config, lines, modem, clock.clone()).unwrap();
    let rig = Rig {
        clock,
        model,
        power,
        reset,
        sleep_request,
        led,
        journal,
    };
    (controller, rig)
}
