use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Cancelled,
    Completed,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => RunState::Running,
            2 => RunState::Paused,
            3 => RunState::Cancelled,
            4 => RunState::Completed,
            _ => RunState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::Paused => 2,
            RunState::Cancelled => 3,
            RunState::Completed => 4,
        }
    }

    /// Running or paused: a loop owns the queue.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Cancelled | RunState::Completed)
    }
}

/// Flags shared between the dispatch loop and whoever sends signals.
///
/// The loop only reads the state and stop flag at its checkpoints; signal senders only
/// flip flags. Neither side touches the job queue or the counters of the other.
#[derive(Debug)]
struct ControlState {
    state: AtomicU8,
    stop: AtomicBool,
}

/// Cloneable handle for pause/resume/cancel. Safe to use from any thread.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    inner: Arc<ControlState>,
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlState {
                state: AtomicU8::new(RunState::Idle.as_u8()),
                stop: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// `Running` → `Paused`. Anything else is a no-op.
    pub fn pause(&self) -> bool {
        let changed = self.transition(RunState::Running, RunState::Paused);
        if changed {
            debug!("pause requested");
        }
        changed
    }

    /// `Paused` → `Running`. Anything else is a no-op.
    pub fn resume(&self) -> bool {
        let changed = self.transition(RunState::Paused, RunState::Running);
        if changed {
            debug!("resume requested");
        }
        changed
    }

    /// Raises the stop flag while a run is active. The loop settles the
    /// terminal state itself once it has written the task summary.
    pub fn cancel(&self) -> bool {
        if !self.state().is_active() {
            return false;
        }
        let first = !self.inner.stop.swap(true, Ordering::SeqCst);
        if first {
            debug!("cancel requested");
        }
        first
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Claims the handle for a new run and returns the state it replaced.
    /// `None` while another run is active.
    pub(crate) fn try_begin(&self) -> Option<RunState> {
        let current = self.state();
        if current.is_active() {
            return None;
        }
        self.inner
            .state
            .compare_exchange(
                current.as_u8(),
                RunState::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()?;
        self.inner.stop.store(false, Ordering::SeqCst);
        Some(current)
    }

    /// Gives a claimed handle back when start-up fails, restoring the state
    /// `try_begin` replaced.
    pub(crate) fn abort_begin(&self, previous: RunState) {
        self.inner.stop.store(false, Ordering::SeqCst);
        self.inner.state.store(previous.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn finish(&self, terminal: RunState) {
        debug_assert!(terminal.is_terminal());
        self.inner.state.store(terminal.as_u8(), Ordering::SeqCst);
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.inner
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
