//! Periodic task scheduling services.
//!
//! Loops are paced with absolute deadlines: every call to [`Scheduler::delay_until`] advances the
//! caller's wake time by exactly one period, so execution time inside the loop body never
//! accumulates as drift.

use crate::analog::{AnalogIo, Channel};

/// Scheduler tick count, wrapping like an RTOS tick counter.
pub type Tick = u32;

/// Scheduler tick rate.
pub const TICK_RATE_HZ: u32 = 1000;

/// Longest single wait used by [`Scheduler::park`].
///
/// Deadlines are compared as a signed tick difference, so anything more than `i32::MAX` ticks
/// ahead reads as already past.
pub const PARK_STEP: Tick = i32::MAX as Tick;

/// Milliseconds to scheduler ticks.
pub const fn ms_to_ticks(ms: u32) -> Tick {
    ((ms as u64 * TICK_RATE_HZ as u64) / 1000) as Tick
}

/// Services the control task needs from the periodic task scheduler.
pub trait Scheduler {
    /// Current tick count.
    fn now(&self) -> Tick;

    /// Advance `last_wake` by `period` and suspend the calling task until that absolute tick.
    fn delay_until(&mut self, last_wake: &mut Tick, period: Tick);

    /// Suspend the calling task for good.
    fn park(&mut self) -> ! {
        let mut wake = self.now();
        loop {
            self.delay_until(&mut wake, PARK_STEP);
        }
    }
}

impl<T: Scheduler + ?Sized> Scheduler for &mut T {
    fn now(&self) -> Tick {
        (**self).now()
    }

    fn delay_until(&mut self, last_wake: &mut Tick, period: Tick) {
        (**self).delay_until(last_wake, period)
    }

    fn park(&mut self) -> ! {
        (**self).park()
    }
}

/// A scheduler whose clock only moves when a task waits on it.
///
/// Waiting is instantaneous, which makes loops run as fast as the host allows while keeping the
/// tick stamps they report identical to a real-time run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualClock {
    now: Tick,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: Tick) -> Self {
        Self { now }
    }
}

impl Scheduler for VirtualClock {
    fn now(&self) -> Tick {
        self.now
    }

    fn delay_until(&mut self, last_wake: &mut Tick, period: Tick) {
        *last_wake = last_wake.wrapping_add(period);
        // a deadline already in the past returns at once
        if (last_wake.wrapping_sub(self.now) as i32) > 0 {
            self.now = *last_wake;
        }
    }
}

/// Analog front end and scheduler provided by one board support package.
pub struct Board<IO, S> {
    pub io: IO,
    pub scheduler: S,
}

impl<IO, S> Board<IO, S> {
    pub fn new(io: IO, scheduler: S) -> Self {
        Self { io, scheduler }
    }
}

impl<IO: AnalogIo, S> AnalogIo for Board<IO, S> {
    fn write_output(&mut self, channel: Channel, millivolts: u16) {
        self.io.write_output(channel, millivolts)
    }

    fn read_input(&mut self, channel: Channel) -> u16 {
        self.io.read_input(channel)
    }
}

impl<IO, S: Scheduler> Scheduler for Board<IO, S> {
    fn now(&self) -> Tick {
        self.scheduler.now()
    }

    fn delay_until(&mut self, last_wake: &mut Tick, period: Tick) {
        self.scheduler.delay_until(last_wake, period)
    }

    fn park(&mut self) -> ! {
        self.scheduler.park()
    }
}

#[cfg(feature = "std")]
pub use self::wall::StdScheduler;

#[cfg(feature = "std")]
mod wall {
    use std::time::{Duration, Instant};

    use super::{Scheduler, Tick, TICK_RATE_HZ};

    /// Scheduler backed by the host monotonic clock and thread sleeps.
    #[derive(Debug, Clone)]
    pub struct StdScheduler {
        epoch: Instant,
    }

    impl StdScheduler {
        pub fn new() -> Self {
            Self {
                epoch: Instant::now(),
            }
        }
    }

    impl Default for StdScheduler {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Scheduler for StdScheduler {
        fn now(&self) -> Tick {
            let ticks = self.epoch.elapsed().as_micros() * u128::from(TICK_RATE_HZ) / 1_000_000;
            ticks as Tick
        }

        fn delay_until(&mut self, last_wake: &mut Tick, period: Tick) {
            *last_wake = last_wake.wrapping_add(period);
            let remaining = last_wake.wrapping_sub(self.now()) as i32;
            if remaining > 0 {
                let micros = u64::from(remaining as u32) * 1_000_000 / u64::from(TICK_RATE_HZ);
                std::thread::sleep(Duration::from_micros(micros));
            }
        }

        fn park(&mut self) -> ! {
            loop {
                std::thread::park();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_from_ms() {
        assert_eq!(ms_to_ticks(5), 5);
        assert_eq!(ms_to_ticks(2000), 2000);
    }

    #[test]
    fn deadlines_do_not_drift() {
        let mut clock = VirtualClock::new();
        let mut wake = clock.now();
        for k in 1..=10 {
            clock.delay_until(&mut wake, 5);
            assert_eq!(wake, 5 * k);
            assert_eq!(clock.now(), 5 * k);
        }
    }

    #[test]
    fn late_deadline_returns_at_once() {
        let mut clock = VirtualClock::starting_at(100);
        let mut wake = 0;
        clock.delay_until(&mut wake, 5);
        assert_eq!(wake, 5);
        assert_eq!(clock.now(), 100);
    }

    #[test]
    fn board_delegates() {
        let mut board = Board::new(crate::plant::SimulatedPlant::default(), VirtualClock::new());
        board.write_output(Channel::One, 1000);
        board.io.tick();
        board.io.tick();
        assert_eq!(board.read_input(Channel::Two), board.io.read_input(Channel::One));
        assert_ne!(board.read_input(Channel::One), 0);

        let mut wake = board.now();
        board.delay_until(&mut wake, 5);
        assert_eq!(board.now(), 5);
        assert_eq!(board.scheduler.now(), 5);
    }

    #[test]
    fn longest_wait_still_moves_the_clock() {
        let mut clock = VirtualClock::starting_at(7);
        let mut wake = clock.now();
        clock.delay_until(&mut wake, PARK_STEP);
        assert_eq!(clock.now(), 7 + PARK_STEP);
        clock.delay_until(&mut wake, PARK_STEP);
        assert_eq!(clock.now(), (7 + PARK_STEP).wrapping_add(PARK_STEP));

        // one tick further and the deadline reads as past
        let before = clock.now();
        let mut wake = before;
        clock.delay_until(&mut wake, PARK_STEP + 1);
        assert_eq!(clock.now(), before);
    }

    #[cfg(feature = "std")]
    #[test]
    fn wall_clock_wait_sleeps() {
        use std::time::{Duration, Instant};

        let mut scheduler = StdScheduler::new();
        let mut wake = scheduler.now();
        let start = Instant::now();
        scheduler.delay_until(&mut wake, 20);
        assert!(start.elapsed() >= Duration::from_millis(19), "{:?}", start.elapsed());
        assert!((scheduler.now().wrapping_sub(wake) as i32) >= 0);
    }

    struct Waits {
        clock: VirtualClock,
        periods: heapless::Vec<Tick, 3>,
    }

    impl Scheduler for Waits {
        fn now(&self) -> Tick {
            self.clock.now()
        }

        fn delay_until(&mut self, last_wake: &mut Tick, period: Tick) {
            if self.periods.push(period).is_err() {
                panic!("still parked");
            }
            self.clock.delay_until(last_wake, period);
        }
    }

    #[test]
    fn park_waits_instead_of_spinning() {
        let mut waits = Waits {
            clock: VirtualClock::new(),
            periods: heapless::Vec::new(),
        };
        let parked: std::thread::Result<()> =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| waits.park()));
        assert!(parked.is_err());
        assert_eq!(waits.periods.as_slice(), &[PARK_STEP; 3]);
        assert_eq!(waits.clock.now(), PARK_STEP.wrapping_mul(3));
    }

    #[test]
    fn wraps_like_a_tick_counter() {
        let mut clock = VirtualClock::starting_at(Tick::MAX - 2);
        let mut wake = clock.now();
        clock.delay_until(&mut wake, 5);
        assert_eq!(wake, 2);
        assert_eq!(clock.now(), 2);
    }
}
