use std::time::Duration;

use crate::core::control::RunState;

/// What one run did, returned by the dispatch thread when it exits.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub task_id: i64,
    pub state: RunState,
    pub total: u32,
    pub processed: u32,
    pub success: u32,
    pub fail: u32,
    /// Jobs already settled by an earlier, interrupted run.
    pub carried_over: u32,
    pub sent: u32,
    pub write_failures: u32,
    pub paced: Duration,
    pub paused: Duration,
}

impl RunReport {
    pub fn pending(&self) -> u32 {
        self.total.saturating_sub(self.processed)
    }

    pub fn is_degraded(&self) -> bool {
        self.write_failures > 0
    }
}
