//! Time source for accumulator scheduling.
//!
//! Workers never sleep directly: they wait on channels handed out by a
//! [`Clock`], so tests can drive flushes with [`ManualClock`] instead of
//! waiting on real timers.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + 'static {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;

    /// Channel that receives one message once `delay` has elapsed.
    fn after(&self, delay: Duration) -> Receiver<Instant>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn after(&self, delay: Duration) -> Receiver<Instant> {
        crossbeam_channel::after(delay)
    }
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    timers: Vec<(Duration, Sender<Instant>)>,
}

/// Virtual time that only moves when [`ManualClock::advance`] is called.
#[derive(Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward and fire every timer that has come due.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.now += by;
        let now = state.now;
        state.timers.retain(|(deadline, tx)| {
            if *deadline <= now {
                // Receiver may already be gone; that timer is simply dropped.
                let _ = tx.try_send(Instant::now());
                false
            } else {
                true
            }
        });
    }

    /// Timers registered and not yet fired.
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn after(&self, delay: Duration) -> Receiver<Instant> {
        let (tx, rx) = bounded(1);
        let mut state = self.state.lock();
        if delay.is_zero() {
            let _ = tx.try_send(Instant::now());
        } else {
            let deadline = state.now + delay;
            state.timers.push((deadline, tx));
        }
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_timer_fires_on_advance() {
        let clock = ManualClock::new();
        let rx = clock.after(Duration::from_secs(1));
        assert!(rx.try_recv().is_err());

        clock.advance(Duration::from_millis(999));
        assert!(rx.try_recv().is_err());

        clock.advance(Duration::from_millis(1));
        assert!(rx.try_recv().is_ok());
        assert_eq!(clock.now(), Duration::from_secs(1));
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_zero_delay_fires_immediately() {
        let clock = ManualClock::new();
        assert!(clock.after(Duration::ZERO).try_recv().is_ok());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(clock
            .after(Duration::from_millis(1))
            .recv_timeout(Duration::from_secs(5))
            .is_ok());
    }
}
