//! RTIC Monotonic implementation for the STM32L0 LPTIM.
//!
//! The 16-bit timer is software-extended to 32 bit by incrementing an overflow
//! counter every time the timer overflows. At an LSE frequency of 32.768 kHz,
//! an overflow will happen every 2 seconds.
//!
//! [`LptimMillis`] turns the monotonic into the millisecond clock the modem
//! controller spins on.

use rtic::Monotonic;
use stm32l0xx_hal::pac;
use streamlog_modem::{Instant as MillisInstant, MillisClock};

pub const LSE_FREQ: u32 = 32_768;

pub type LptimInstant = fugit::TimerInstantU32<LSE_FREQ>;

/// Software-extended LPTIM.
pub struct ExtendedLptim<TIM> {
    timer: TIM,
    overflow: u16,
}

impl ExtendedLptim<pac::LPTIM> {
    pub fn init(timer: pac::LPTIM) -> Self {
        // Enable and reset LPTIM in RCC
        //
        // Correctness: Since we only modify LPTIM related registers in the RCC
        // register block, and since we own pac::LPTIM, we should be safe.
        unsafe {
            let rcc = &*pac::RCC::ptr();

            // Select clock source: LSE
            rcc.ccipr.modify(|_, w| w.lptim1sel().lse());

            // Enable timer clock
            rcc.apb1enr.modify(|_, w| w.lptim1en().set_bit());

            // Reset timer
            rcc.apb1rstr.modify(|_, w| w.lptim1rst().set_bit());
            rcc.apb1rstr.modify(|_, w| w.lptim1rst().clear_bit());
        }

        // Enable the compare-match and the autoreload-match interrupt. The
        // latter keeps the overflow counter current while no task is
        // scheduled.
        timer
            .ier
            .modify(|_, w| w.cmpmie().set_bit().arrmie().set_bit());

        Self { timer, overflow: 0 }
    }

    fn is_overflow(&self) -> bool {
        self.timer.isr.read().arrm().bit_is_set()
    }

    fn clear_overflow_flag(&self) {
        self.timer.icr.write(|w| w.arrmcf().set_bit());
    }
}

impl Monotonic for ExtendedLptim<pac::LPTIM> {
    // Since we are counting overflows we can't let RTIC disable the interrupt.
    const DISABLE_INTERRUPT_ON_EMPTY_QUEUE: bool = false;

    type Instant = LptimInstant;
    type Duration = fugit::TimerDurationU32<LSE_FREQ>;

    #[inline(always)]
    fn now(&mut self) -> Self::Instant {
        let counter = self.timer.cnt.read().cnt().bits() as u32;

        // If the overflow bit is set, `on_interrupt` (which clears the flag)
        // was not yet called. Compensate for this.
        let overflow = if self.is_overflow() {
            self.overflow.wrapping_add(1)
        } else {
            self.overflow
        } as u32;

        Self::Instant::from_ticks((overflow << 16) + counter)
    }

    #[inline(always)]
    fn zero() -> Self::Instant {
        Self::Instant::from_ticks(0)
    }

    /// Called once by the RTIC runtime after `#[init]` returns.
    unsafe fn reset(&mut self) {
        self.timer.cr.modify(|_, w| w.enable().set_bit());

        // Count the full 16 bit range
        self.timer.arr.write(|w| w.bits(0xffff));

        self.timer.cr.modify(|_, w| w.cntstrt().set_bit());
    }

    fn set_compare(&mut self, instant: Self::Instant) {
        let now = self.now();

        let compare_register_val = match instant.checked_duration_since(now) {
            // Too far in the future for the 16 bit compare register. Fire
            // early, RTIC re-schedules.
            Some(duration) if duration.ticks() > 0xffff => 0,
            // In the past, RTIC handles this
            None => 0,
            Some(_) => instant.duration_since_epoch().ticks() as u16,
        };

        self.timer.cmp.write(|w| w.cmp().bits(compare_register_val));
    }

    fn clear_compare_flag(&mut self) {
        self.timer.icr.write(|w| w.cmpmcf().set_bit());
    }

    fn on_interrupt(&mut self) {
        if self.is_overflow() {
            self.clear_overflow_flag();
            self.overflow = self.overflow.wrapping_add(1);
        }
    }
}

/// Millisecond clock on top of the LPTIM monotonic.
///
/// The 32 bit tick counter wraps every 36 hours, which is not a whole number
/// of milliseconds. Ticks are therefore accumulated into 64 bit and only the
/// resulting milliseconds are truncated to 32 bit.
pub struct LptimMillis {
    now: fn() -> LptimInstant,
    last_ticks: u32,
    total_ticks: u64,
}

impl LptimMillis {
    /// `now` is the `monotonics::now` function of the RTIC app.
    pub fn new(now: fn() -> LptimInstant) -> Self {
        Self {
            now,
            last_ticks: 0,
            total_ticks: 0,
        }
    }

    fn update(&mut self, ticks: u32) -> u32 {
        self.total_ticks += u64::from(ticks.wrapping_sub(self.last_ticks));
        self.last_ticks = ticks;
        ticks_to_millis(self.total_ticks)
    }
}

fn ticks_to_millis(ticks: u64) -> u32 {
    (ticks * 1_000 / u64::from(LSE_FREQ)) as u32
}

impl MillisClock for LptimMillis {
    fn now(&mut self) -> MillisInstant {
        let ticks = (self.now)().ticks();
        MillisInstant::from_ticks(self.update(ticks))
    }
}
