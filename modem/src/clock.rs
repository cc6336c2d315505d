//! Monotonic millisecond time.

pub use fugit::ExtU32;

/// A point in time with millisecond resolution.
pub type Instant = fugit::TimerInstantU32<1_000>;

/// A span of time with millisecond resolution.
pub type Duration = fugit::MillisDurationU32;

/// Monotonic millisecond clock.
///
/// The counter may wrap around, all arithmetic on the returned instants is
/// wrapping.
pub trait MillisClock {
    fn now(&mut self) -> Instant;

    /// Time elapsed since `start`.
    fn elapsed_since(&mut self, start: Instant) -> Duration {
        self.now()
            .checked_duration_since(start)
            .unwrap_or_else(|| Duration::from_ticks(0))
    }

    /// Spin until `duration` has passed.
    fn spin_for(&mut self, duration: Duration) {
        let start = self.now();
        while self.elapsed_since(start) < duration { /* wait */ }
    }
}

impl<C: MillisClock + ?Sized> MillisClock for &mut C {
    fn now(&mut self) -> Instant {
        (**self).now()
    }
}
