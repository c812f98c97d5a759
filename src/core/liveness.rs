use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

/// Keeps the host from suspending the process while a run is active.
///
/// Acquisition is best effort: a failure is logged and the run proceeds.
pub trait Liveness: Send + Sync {
    fn acquire(&self, reason: &str) -> std::io::Result<LivenessLease>;
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Released when dropped, on every exit path of the run.
pub struct LivenessLease {
    inhibitor: Option<Child>,
    on_release: Option<ReleaseFn>,
}

impl LivenessLease {
    pub fn none() -> Self {
        Self {
            inhibitor: None,
            on_release: None,
        }
    }

    /// A lease backed by an arbitrary release action.
    pub fn with_release<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inhibitor: None,
            on_release: Some(Box::new(release)),
        }
    }

    pub fn is_held(&self) -> bool {
        self.inhibitor.is_some() || self.on_release.is_some()
    }
}

impl Drop for LivenessLease {
    fn drop(&mut self) {
        if let Some(mut child) = self.inhibitor.take() {
            let _ = child.kill();
            let _ = child.wait();
            debug!("liveness lease released");
        }
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLiveness;

impl Liveness for NoopLiveness {
    fn acquire(&self, _reason: &str) -> std::io::Result<LivenessLease> {
        Ok(LivenessLease::none())
    }
}

/// Holds a `systemd-inhibit` sleep/idle lock for the duration of the lease.
#[derive(Debug, Clone)]
pub struct InhibitLiveness {
    program: String,
}

impl Default for InhibitLiveness {
    fn default() -> Self {
        Self {
            program: "systemd-inhibit".to_string(),
        }
    }
}

impl InhibitLiveness {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Liveness for InhibitLiveness {
    fn acquire(&self, reason: &str) -> std::io::Result<LivenessLease> {
        let child = Command::new(&self.program)
            .args([
                "--what=idle:sleep",
                "--who=smsflow",
                &format!("--why={reason}"),
                "--mode=block",
                "sleep",
                "infinity",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        debug!(pid = child.id(), "liveness lease acquired");
        Ok(LivenessLease {
            inhibitor: Some(child),
            on_release: None,
        })
    }
}

pub(crate) fn acquire_or_warn(liveness: &dyn Liveness, reason: &str) -> LivenessLease {
    match liveness.acquire(reason) {
        Ok(lease) => lease,
        Err(err) => {
            warn!(error = %err, "could not acquire liveness lease, continuing without");
            LivenessLease::none()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Counts acquisitions and releases; optionally fails every acquisition.
    #[derive(Default)]
    pub(crate) struct CountingLiveness {
        pub(crate) acquired: Arc<AtomicUsize>,
        pub(crate) released: Arc<AtomicUsize>,
        pub(crate) fail: bool,
    }

    impl Liveness for CountingLiveness {
        fn acquire(&self, _reason: &str) -> std::io::Result<LivenessLease> {
            if self.fail {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "denied"));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            let released = Arc::clone(&self.released);
            Ok(LivenessLease::with_release(move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    #[test]
    fn release_action_runs_once_on_drop() {
        let liveness = CountingLiveness::default();
        let lease = liveness.acquire("test").unwrap();
        assert!(lease.is_held());
        assert_eq!(liveness.released.load(Ordering::SeqCst), 0);
        drop(lease);
        assert_eq!(liveness.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(liveness.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_acquisition_yields_empty_lease() {
        let lease = acquire_or_warn(
            &InhibitLiveness::with_program("smsflow-no-such-inhibitor"),
            "test",
        );
        assert!(!lease.is_held());
    }

    #[test]
    fn noop_lease_holds_nothing() {
        let lease = NoopLiveness.acquire("test").unwrap();
        assert!(!lease.is_held());
    }

    #[cfg(unix)]
    #[test]
    fn dropping_the_lease_reaps_the_inhibitor() {
        let lease = Command::new("sleep")
            .arg("30")
            .spawn()
            .map(|child| LivenessLease {
                inhibitor: Some(child),
                on_release: None,
            })
            .unwrap();
        assert!(lease.is_held());
        drop(lease);
    }
}
