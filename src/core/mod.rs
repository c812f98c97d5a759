use std::path::Path;

pub mod batch;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod formatter;
pub mod job;
pub mod liveness;
pub mod pacing;
pub mod runner;
pub mod store;
pub mod summary;
pub mod transport;

use error::DispatchError;
use job::ChannelSelector;
use store::SqliteJobStore;

/// Builds a task from a recipients file: one pending job per recipient, the
/// message template resolved per recipient, everything written atomically.
pub fn enqueue_task(
    store: &SqliteJobStore,
    recipients_path: &Path,
    template: &str,
    interval_secs: u32,
    channel: ChannelSelector,
) -> Result<(i64, usize), DispatchError> {
    if interval_secs < 1 {
        return Err(DispatchError::InvalidInterval(interval_secs));
    }
    let recipients = batch::parse_recipients_file(recipients_path)?;
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    let jobs = batch::build_jobs(template, &recipients, &date);
    let task_id = store.create_task(template, interval_secs, channel, &jobs)?;
    tracing::info!(task_id, jobs = jobs.len(), "task enqueued");
    Ok((task_id, jobs.len()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::core::store::JobStore;

    #[test]
    fn enqueue_creates_one_job_per_recipient() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "13800000001,Alice\n13800000002,Bob").unwrap();
        let store = SqliteJobStore::open_in_memory().unwrap();

        let (task_id, count) =
            enqueue_task(&store, file.path(), "Hi {name}", 2, ChannelSelector(1)).unwrap();

        assert_eq!(count, 2);
        let jobs = store.jobs_for_task(task_id).unwrap();
        assert_eq!(jobs[1].body, "Hi Bob");
        let task = store.task(task_id).unwrap().unwrap();
        assert_eq!((task.total, task.interval_secs), (2, 2));
    }

    #[test]
    fn enqueue_writes_nothing_for_a_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "13800000001\nbogus").unwrap();
        let store = SqliteJobStore::open_in_memory().unwrap();

        assert!(enqueue_task(&store, file.path(), "Hi", 2, ChannelSelector::DEFAULT).is_err());
        assert!(store.list_tasks().unwrap().is_empty());
    }
}
