use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("sender program not found: {program}")]
    BinaryNotFound { program: String },
    #[error("sender process failed (exit_code={exit_code:?}): {stderr}")]
    ProcessFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("sender timed out after {secs}s")]
    TimedOut { secs: u64 },
    #[error("invalid sender command: {message}")]
    InvalidCommand { message: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("task {task_id} not found")]
    TaskNotFound { task_id: i64 },
    #[error("task {task_id} is already closed ({status})")]
    TaskClosed { task_id: i64, status: String },
    #[error("a dispatch run is already active")]
    AlreadyRunning,
    #[error("pacing interval must be at least 1 second, got {0}")]
    InvalidInterval(u32),
    #[error("invalid recipients file: {message}")]
    InvalidRecipients { message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("terminal error: {message}")]
    Terminal { message: String },
    #[error("could not install the interrupt handler: {0}")]
    InterruptHandler(#[from] ctrlc::Error),
}
