use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::core::error::StoreError;
use crate::core::job::{ChannelSelector, Job, JobStatus, Task, TaskStatus};

/// Durable record of tasks and their jobs.
///
/// Every write must be atomic per row and survive process death: a restarted
/// process (or a UI reattaching after being backgrounded) reconciles against
/// what this store holds, not against the event stream.
pub trait JobStore: Send + Sync {
    fn task(&self, task_id: i64) -> Result<Option<Task>, StoreError>;

    /// Jobs of one task, ascending by job id.
    fn jobs_for_task(&self, task_id: i64) -> Result<Vec<Job>, StoreError>;

    fn write_job_result(&self, job_id: i64, status: JobStatus, at: i64)
        -> Result<(), StoreError>;

    fn write_task_summary(
        &self,
        task_id: i64,
        success: u32,
        fail: u32,
        status: TaskStatus,
    ) -> Result<(), StoreError>;
}

/// A job as handed over by job construction, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub recipient_id: i64,
    pub recipient_name: String,
    pub address: String,
    pub body: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS send_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL,
    total INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL DEFAULT 0,
    fail INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    interval_secs INTEGER NOT NULL DEFAULT 3,
    channel INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS send_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES send_tasks(id) ON DELETE CASCADE,
    recipient_id INTEGER NOT NULL,
    recipient_name TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL,
    body TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    sent_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_send_jobs_task ON send_jobs(task_id);
";

const TASK_COLUMNS: &str =
    "id, body, total, success, fail, status, interval_secs, channel, created_at";
const JOB_COLUMNS: &str =
    "id, task_id, recipient_id, recipient_name, address, body, status, sent_at";

pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        // WAL keeps readers (history view) from blocking the dispatch loop's writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes the task row and all of its jobs in one transaction.
    pub fn create_task(
        &self,
        body: &str,
        interval_secs: u32,
        channel: ChannelSelector,
        jobs: &[NewJob],
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO send_tasks (body, total, status, interval_secs, channel, created_at)
             VALUES (?1, ?2, 'pending', ?3, ?4, ?5)",
            params![
                body,
                jobs.len() as i64,
                interval_secs,
                channel.0,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        let task_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO send_jobs (task_id, recipient_id, recipient_name, address, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for job in jobs {
                stmt.execute(params![
                    task_id,
                    job.recipient_id,
                    job.recipient_name,
                    job.address,
                    job.body
                ])?;
            }
        }
        tx.commit()?;
        debug!(task_id, jobs = jobs.len(), "task created");
        Ok(task_id)
    }

    /// All tasks, newest first.
    pub fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM send_tasks ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], read_task_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row??);
        }
        Ok(tasks)
    }

    pub fn jobs_with_status(
        &self,
        task_id: i64,
        status: JobStatus,
    ) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM send_jobs WHERE task_id = ?1 AND status = ?2 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![task_id, status.as_str()], read_job_row)?;
        collect_jobs(rows)
    }
}

impl JobStore for SqliteJobStore {
    fn task(&self, task_id: i64) -> Result<Option<Task>, StoreError> {
        let conn = self.conn();
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM send_tasks WHERE id = ?1"),
                params![task_id],
                read_task_row,
            )
            .optional()?;
        task.transpose()
    }

    fn jobs_for_task(&self, task_id: i64) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM send_jobs WHERE task_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![task_id], read_job_row)?;
        collect_jobs(rows)
    }

    fn write_job_result(
        &self,
        job_id: i64,
        status: JobStatus,
        at: i64,
    ) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE send_jobs SET status = ?1, sent_at = ?2 WHERE id = ?3",
            params![status.as_str(), at, job_id],
        )?;
        if changed == 0 {
            return Err(StoreError::Database(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    fn write_task_summary(
        &self,
        task_id: i64,
        success: u32,
        fail: u32,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE send_tasks SET success = ?1, fail = ?2, status = ?3 WHERE id = ?4",
            params![success, fail, status.as_str(), task_id],
        )?;
        if changed == 0 {
            return Err(StoreError::Database(rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }
}

type RowResult<T> = rusqlite::Result<Result<T, StoreError>>;

fn read_task_row(row: &Row<'_>) -> RowResult<Task> {
    let status: String = row.get(5)?;
    let status = match status.parse::<TaskStatus>() {
        Ok(status) => status,
        Err(message) => return Ok(Err(StoreError::Corrupt { table: "send_tasks", message })),
    };
    Ok(Ok(Task {
        id: row.get(0)?,
        body: row.get(1)?,
        total: row.get(2)?,
        success: row.get(3)?,
        fail: row.get(4)?,
        status,
        interval_secs: row.get(6)?,
        channel: ChannelSelector(row.get(7)?),
        created_at: row.get(8)?,
    }))
}

fn read_job_row(row: &Row<'_>) -> RowResult<Job> {
    let status: String = row.get(6)?;
    let status = match status.parse::<JobStatus>() {
        Ok(status) => status,
        Err(message) => return Ok(Err(StoreError::Corrupt { table: "send_jobs", message })),
    };
    Ok(Ok(Job {
        id: row.get(0)?,
        task_id: row.get(1)?,
        recipient_id: row.get(2)?,
        recipient_name: row.get(3)?,
        address: row.get(4)?,
        body: row.get(5)?,
        status,
        sent_at: row.get(7)?,
    }))
}

fn collect_jobs<I>(rows: I) -> Result<Vec<Job>, StoreError>
where
    I: Iterator<Item = rusqlite::Result<Result<Job, StoreError>>>,
{
    let mut jobs = Vec::new();
    for row in rows {
        jobs.push(row??);
    }
    Ok(jobs)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn new_jobs(addresses: &[&str]) -> Vec<NewJob> {
        addresses
            .iter()
            .enumerate()
            .map(|(idx, address)| NewJob {
                recipient_id: idx as i64 + 1,
                recipient_name: format!("Recipient {}", idx + 1),
                address: address.to_string(),
                body: format!("hello {}", idx + 1),
            })
            .collect()
    }

    #[test]
    fn create_task_writes_pending_jobs_in_order() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let task_id = store
            .create_task(
                "hello",
                3,
                ChannelSelector(1),
                &new_jobs(&["13800000001", "13800000002", "13800000003"]),
            )
            .unwrap();

        let task = store.task(task_id).unwrap().unwrap();
        assert_eq!(task.total, 3);
        assert_eq!(task.success + task.fail, 0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.interval_secs, 3);
        assert_eq!(task.channel, ChannelSelector(1));

        let jobs = store.jobs_for_task(task_id).unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.windows(2).all(|pair| pair[0].id < pair[1].id));
        assert!(jobs.iter().all(|job| job.status == JobStatus::Pending));
        assert!(jobs.iter().all(|job| job.sent_at.is_none()));
        assert_eq!(jobs[1].address, "13800000002");
        assert_eq!(jobs[2].body, "hello 3");
    }

    #[test]
    fn missing_task_reads_as_none() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        assert!(store.task(42).unwrap().is_none());
        assert!(store.jobs_for_task(42).unwrap().is_empty());
    }

    #[test]
    fn results_and_summary_are_persisted() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let task_id = store
            .create_task("hi", 1, ChannelSelector::DEFAULT, &new_jobs(&["1", "2"]))
            .unwrap();
        let jobs = store.jobs_for_task(task_id).unwrap();

        store
            .write_job_result(jobs[0].id, JobStatus::Success, 1_700_000_000_000)
            .unwrap();
        store
            .write_task_summary(task_id, 1, 0, TaskStatus::Done)
            .unwrap();

        let success = store.jobs_with_status(task_id, JobStatus::Success).unwrap();
        assert_eq!(success.len(), 1);
        assert_eq!(success[0].sent_at, Some(1_700_000_000_000));
        let pending = store.jobs_with_status(task_id, JobStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);

        let task = store.task(task_id).unwrap().unwrap();
        assert_eq!((task.success, task.fail, task.status), (1, 0, TaskStatus::Done));
    }

    #[test]
    fn writes_to_unknown_rows_fail() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        assert!(store.write_job_result(7, JobStatus::Fail, 0).is_err());
        assert!(store.write_task_summary(7, 0, 0, TaskStatus::Done).is_err());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smsflow.db");
        let task_id = {
            let store = SqliteJobStore::open(&path).unwrap();
            let task_id = store
                .create_task("hi", 2, ChannelSelector::DEFAULT, &new_jobs(&["1"]))
                .unwrap();
            let job = &store.jobs_for_task(task_id).unwrap()[0];
            store.write_job_result(job.id, JobStatus::Fail, 5).unwrap();
            task_id
        };

        let store = SqliteJobStore::open(&path).unwrap();
        let jobs = store.jobs_for_task(task_id).unwrap();
        assert_eq!(jobs[0].status, JobStatus::Fail);
        assert_eq!(store.list_tasks().unwrap().len(), 1);
    }
}
