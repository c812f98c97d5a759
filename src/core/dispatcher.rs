use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::core::control::{ControlHandle, RunState};
use crate::core::error::DispatchError;
use crate::core::event::{progress_message, Completion, DispatchEvent, EventBus, Progress};
use crate::core::job::{ChannelSelector, Job, JobStatus, TaskStatus};
use crate::core::liveness::{acquire_or_warn, Liveness, NoopLiveness};
use crate::core::pacing::{Clock, Pacer, SystemClock, WaitOutcome};
use crate::core::store::JobStore;
use crate::core::summary::RunReport;
use crate::core::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRequest {
    pub task_id: i64,
    pub interval_secs: u32,
    pub channel: ChannelSelector,
}

/// Runs one task at a time: sends its pending jobs in id order, paced,
/// pausable and cancellable, recording every outcome before announcing it.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    liveness: Arc<dyn Liveness>,
    control: ControlHandle,
    events: EventBus,
    worker: Mutex<Option<JoinHandle<RunReport>>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            clock: Arc::new(SystemClock),
            liveness: Arc::new(NoopLiveness),
            control: ControlHandle::new(),
            events: EventBus::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_liveness(mut self, liveness: Arc<dyn Liveness>) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn state(&self) -> RunState {
        self.control.state()
    }

    pub fn subscribe(&self) -> Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self) {
        self.events.unsubscribe();
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Validates the request, loads the queue and spawns the dispatch thread.
    ///
    /// Nothing is written when the request is rejected.
    pub fn start(&self, request: StartRequest) -> Result<(), DispatchError> {
        if request.interval_secs < 1 {
            return Err(DispatchError::InvalidInterval(request.interval_secs));
        }
        let Some(previous) = self.control.try_begin() else {
            return Err(DispatchError::AlreadyRunning);
        };

        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let run = match self.prepare(request) {
            Ok(run) => run,
            Err(err) => {
                self.control.abort_begin(previous);
                return Err(err);
            }
        };

        let spawned = thread::Builder::new()
            .name(format!("smsflow-task-{}", request.task_id))
            .spawn(move || run.execute());
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.control.abort_begin(previous);
                Err(DispatchError::Io(err))
            }
        }
    }

    /// Blocks until the current run's thread exits.
    pub fn wait(&self) -> Option<RunReport> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        handle.join().ok()
    }

    fn prepare(&self, request: StartRequest) -> Result<DispatchRun, DispatchError> {
        let task = self
            .store
            .task(request.task_id)?
            .ok_or(DispatchError::TaskNotFound {
                task_id: request.task_id,
            })?;
        if task.status.is_closed() {
            return Err(DispatchError::TaskClosed {
                task_id: task.id,
                status: task.status.to_string(),
            });
        }

        let jobs = self.store.jobs_for_task(task.id)?;
        let success = count_status(&jobs, JobStatus::Success);
        let fail = count_status(&jobs, JobStatus::Fail);
        self.store
            .write_task_summary(task.id, success, fail, TaskStatus::Running)?;

        Ok(DispatchRun {
            task_id: task.id,
            interval: Duration::from_secs(u64::from(request.interval_secs)),
            channel: request.channel,
            jobs,
            success,
            fail,
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            liveness: Arc::clone(&self.liveness),
            pacer: Pacer::new(Arc::clone(&self.clock)),
            control: self.control.clone(),
            events: self.events.clone(),
        })
    }
}

fn count_status(jobs: &[Job], status: JobStatus) -> u32 {
    jobs.iter().filter(|job| job.status == status).count() as u32
}

/// Frees the controller for a new run if the dispatch thread unwinds, and
/// hangs up on the observer so it does not wait for a completion event.
struct ReleaseOnUnwind {
    control: ControlHandle,
    events: EventBus,
}

impl Drop for ReleaseOnUnwind {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("dispatch thread panicked");
            self.control.finish(RunState::Cancelled);
            self.events.unsubscribe();
        }
    }
}

/// State owned by the dispatch thread for the duration of one run.
struct DispatchRun {
    task_id: i64,
    interval: Duration,
    channel: ChannelSelector,
    jobs: Vec<Job>,
    success: u32,
    fail: u32,
    store: Arc<dyn JobStore>,
    transport: Arc<dyn Transport>,
    liveness: Arc<dyn Liveness>,
    pacer: Pacer,
    control: ControlHandle,
    events: EventBus,
}

impl DispatchRun {
    fn execute(mut self) -> RunReport {
        let _lease = acquire_or_warn(
            self.liveness.as_ref(),
            &format!("sending task {}", self.task_id),
        );
        let _unwind = ReleaseOnUnwind {
            control: self.control.clone(),
            events: self.events.clone(),
        };

        let total = self.jobs.len() as u32;
        let carried_over = self.success + self.fail;
        let mut processed = carried_over;
        let mut sent = 0;
        let mut write_failures = 0;

        let jobs = std::mem::take(&mut self.jobs);
        let pending: Vec<&Job> = jobs.iter().filter(|job| job.status.is_pending()).collect();
        info!(
            task_id = self.task_id,
            total,
            pending = pending.len(),
            interval_secs = self.interval.as_secs(),
            channel = %self.channel,
            "dispatch started"
        );

        for (idx, job) in pending.iter().enumerate() {
            if self.control.is_stopped()
                || self.pacer.hold_while_paused(&self.control) == WaitOutcome::Cancelled
            {
                break;
            }

            let delivered = self.deliver(job);
            sent += 1;
            let status = JobStatus::from_outcome(delivered);
            let at = chrono::Utc::now().timestamp_millis();
            if let Err(err) = self.store.write_job_result(job.id, status, at) {
                error!(task_id = self.task_id, job_id = job.id, error = %err, "job result not persisted");
                write_failures += 1;
                self.events.publish(DispatchEvent::Degraded {
                    job_id: Some(job.id),
                    error: err.to_string(),
                });
            }

            match status {
                JobStatus::Success => self.success += 1,
                _ => self.fail += 1,
            }
            processed += 1;
            debug!(task_id = self.task_id, job_id = job.id, %status, processed, total, "job settled");
            self.events.publish(DispatchEvent::Progress(Progress {
                processed,
                total,
                success: self.success,
                fail: self.fail,
                message: progress_message(processed, total, &job.address, status),
            }));

            let is_last = idx + 1 == pending.len();
            if !is_last && self.pacer.pace(self.interval, &self.control) == WaitOutcome::Cancelled {
                break;
            }
        }

        // A cancel accepted during the final send still ends the run as cancelled.
        let (state, task_status) = if self.control.is_stopped() {
            (RunState::Cancelled, TaskStatus::Cancelled)
        } else {
            (RunState::Completed, TaskStatus::Done)
        };
        if let Err(err) =
            self.store
                .write_task_summary(self.task_id, self.success, self.fail, task_status)
        {
            error!(task_id = self.task_id, error = %err, "task summary not persisted");
            write_failures += 1;
            self.events.publish(DispatchEvent::Degraded {
                job_id: None,
                error: err.to_string(),
            });
        }

        self.control.finish(state);
        self.events.publish(DispatchEvent::Completed(Completion {
            success: self.success,
            fail: self.fail,
        }));
        info!(
            task_id = self.task_id,
            ?state,
            success = self.success,
            fail = self.fail,
            write_failures,
            "dispatch finished"
        );

        RunReport {
            task_id: self.task_id,
            state,
            total,
            processed,
            success: self.success,
            fail: self.fail,
            carried_over,
            sent,
            write_failures,
            paced: self.pacer.paced(),
            paused: self.pacer.paused(),
        }
    }

    fn deliver(&self, job: &Job) -> bool {
        let transport = &self.transport;
        let channel = self.channel;
        panic::catch_unwind(AssertUnwindSafe(|| {
            transport.send(&job.address, &job.body, channel)
        }))
        .unwrap_or_else(|_| {
            warn!(job_id = job.id, "transport panicked, counting as failure");
            false
        })
    }
}
