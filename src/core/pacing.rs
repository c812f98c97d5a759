use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::core::control::ControlHandle;

/// Cadence at which paused or pacing loops re-check the control flags.
/// Bounds cancellation latency.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Cancelled,
}

/// Cooperative waits between sends.
///
/// Both waits sleep in slices of at most `poll` and look at the control
/// flags between slices. Time spent paused is tracked apart from pacing time
/// and never counts towards the interval.
pub struct Pacer {
    clock: Arc<dyn Clock>,
    poll: Duration,
    paced: Duration,
    paused: Duration,
}

impl Pacer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            poll: POLL_INTERVAL,
            paced: Duration::ZERO,
            paused: Duration::ZERO,
        }
    }

    /// Blocks while the run is paused. Returns `Cancelled` if the stop flag
    /// is up afterwards.
    pub fn hold_while_paused(&mut self, control: &ControlHandle) -> WaitOutcome {
        while control.is_paused() && !control.is_stopped() {
            self.clock.sleep(self.poll);
            self.paused += self.poll;
        }
        if control.is_stopped() {
            WaitOutcome::Cancelled
        } else {
            WaitOutcome::Elapsed
        }
    }

    /// Waits `interval` of unpaused time, or until cancelled.
    pub fn pace(&mut self, interval: Duration, control: &ControlHandle) -> WaitOutcome {
        let mut remaining = interval;
        loop {
            if control.is_stopped() {
                return WaitOutcome::Cancelled;
            }
            if remaining.is_zero() {
                return WaitOutcome::Elapsed;
            }
            if control.is_paused() {
                self.clock.sleep(self.poll);
                self.paused += self.poll;
                continue;
            }
            let slice = remaining.min(self.poll);
            self.clock.sleep(slice);
            self.paced += slice;
            remaining -= slice;
        }
    }

    pub fn paced(&self) -> Duration {
        self.paced
    }

    pub fn paused(&self) -> Duration {
        self.paused
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    type SleepHook = Box<dyn FnMut(usize, Duration) + Send>;

    /// Returns immediately from `sleep`, recording each call and running an
    /// optional hook so tests can flip control flags mid-wait.
    pub(crate) struct FakeClock {
        calls: Mutex<Vec<Duration>>,
        hook: Mutex<Option<SleepHook>>,
    }

    impl FakeClock {
        pub(crate) fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                hook: Mutex::new(None),
            }
        }

        pub(crate) fn with_hook<F>(hook: F) -> Self
        where
            F: FnMut(usize, Duration) + Send + 'static,
        {
            Self {
                calls: Mutex::new(Vec::new()),
                hook: Mutex::new(Some(Box::new(hook))),
            }
        }

        pub(crate) fn total(&self) -> Duration {
            self.calls.lock().unwrap().iter().sum()
        }
    }

    impl Clock for FakeClock {
        fn sleep(&self, duration: Duration) {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(duration);
                calls.len() - 1
            };
            if let Some(hook) = self.hook.lock().unwrap().as_mut() {
                hook(index, duration);
            }
        }
    }

    fn running() -> ControlHandle {
        let control = ControlHandle::new();
        assert!(control.try_begin().is_some());
        control
    }

    #[test]
    fn pace_sleeps_the_interval_in_poll_slices() {
        let clock = Arc::new(FakeClock::new());
        let mut pacer = Pacer::new(clock.clone());
        let control = running();

        let outcome = pacer.pace(Duration::from_millis(1200), &control);

        assert_eq!(outcome, WaitOutcome::Elapsed);
        assert_eq!(clock.calls.lock().unwrap().len(), 3);
        assert_eq!(pacer.paced(), Duration::from_millis(1200));
        assert_eq!(pacer.paused(), Duration::ZERO);
    }

    #[test]
    fn cancel_cuts_the_pacing_wait_short() {
        let control = running();
        let hook_control = control.clone();
        let clock = Arc::new(FakeClock::with_hook(move |index, _| {
            if index == 1 {
                hook_control.cancel();
            }
        }));
        let mut pacer = Pacer::new(clock.clone());

        let outcome = pacer.pace(Duration::from_secs(10), &control);

        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert_eq!(pacer.paced(), Duration::from_secs(1));
        assert_eq!(clock.total(), Duration::from_secs(1));
    }

    #[test]
    fn paused_time_does_not_count_towards_the_interval() {
        let control = running();
        let hook_control = control.clone();
        let clock = Arc::new(FakeClock::with_hook(move |index, _| match index {
            0 => {
                hook_control.pause();
            }
            4 => {
                hook_control.resume();
            }
            _ => {}
        }));
        let mut pacer = Pacer::new(clock.clone());

        let outcome = pacer.pace(Duration::from_secs(1), &control);

        assert_eq!(outcome, WaitOutcome::Elapsed);
        assert_eq!(pacer.paced(), Duration::from_secs(1));
        assert_eq!(pacer.paused(), Duration::from_secs(2));
        assert_eq!(clock.total(), Duration::from_secs(3));
    }

    #[test]
    fn hold_while_paused_returns_at_once_when_running() {
        let clock = Arc::new(FakeClock::new());
        let mut pacer = Pacer::new(clock.clone());
        let control = running();

        assert_eq!(pacer.hold_while_paused(&control), WaitOutcome::Elapsed);
        assert_eq!(clock.total(), Duration::ZERO);
    }

    #[test]
    fn hold_while_paused_ends_on_cancel() {
        let control = running();
        control.pause();
        let hook_control = control.clone();
        let clock = Arc::new(FakeClock::with_hook(move |index, _| {
            if index == 2 {
                hook_control.cancel();
            }
        }));
        let mut pacer = Pacer::new(clock);

        assert_eq!(pacer.hold_while_paused(&control), WaitOutcome::Cancelled);
        assert_eq!(pacer.paused(), Duration::from_millis(1500));
    }
}
