use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Success,
    Fail,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Success => "success",
            JobStatus::Fail => "fail",
        }
    }

    pub fn from_outcome(delivered: bool) -> Self {
        if delivered {
            JobStatus::Success
        } else {
            JobStatus::Fail
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(JobStatus::Pending),
            "success" => Ok(JobStatus::Success),
            "fail" => Ok(JobStatus::Fail),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Closed tasks are immutable and can never be started again.
    pub fn is_closed(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Which SIM/modem path a message should leave through. Zero is the default path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSelector(pub u32);

impl ChannelSelector {
    pub const DEFAULT: ChannelSelector = ChannelSelector(0);

    pub fn is_default(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            f.write_str("default")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub body: String,
    pub total: u32,
    pub success: u32,
    pub fail: u32,
    pub interval_secs: u32,
    pub channel: ChannelSelector,
    pub status: TaskStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub task_id: i64,
    pub recipient_id: i64,
    pub recipient_name: String,
    pub address: String,
    pub body: String,
    pub status: JobStatus,
    /// Unix milliseconds; `None` while the job is pending.
    pub sent_at: Option<i64>,
}
