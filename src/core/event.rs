use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::core::job::JobStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub processed: u32,
    pub total: u32,
    pub success: u32,
    pub fail: u32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub success: u32,
    pub fail: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Progress(Progress),
    /// A durable write failed; the run goes on but the store is behind.
    Degraded {
        job_id: Option<i64>,
        error: String,
    },
    Completed(Completion),
}

pub fn progress_message(processed: u32, total: u32, address: &str, status: JobStatus) -> String {
    format!("[{processed}/{total}] {address} - {status}")
}

/// Fan-out point with at most one current observer.
///
/// Publishing never blocks: events go into an unbounded channel, and are
/// dropped when nobody is subscribed or the receiver went away.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    observer: Arc<Mutex<Option<Sender<DispatchEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current observer.
    pub fn subscribe(&self) -> Receiver<DispatchEvent> {
        let (tx, rx) = mpsc::channel();
        *self.slot() = Some(tx);
        rx
    }

    pub fn unsubscribe(&self) {
        self.slot().take();
    }

    pub fn has_observer(&self) -> bool {
        self.slot().is_some()
    }

    pub fn publish(&self, event: DispatchEvent) {
        let mut slot = self.slot();
        if let Some(sender) = slot.as_ref() {
            if sender.send(event).is_err() {
                slot.take();
            }
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Sender<DispatchEvent>>> {
        self.observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(success: u32) -> DispatchEvent {
        DispatchEvent::Completed(Completion { success, fail: 0 })
    }

    #[test]
    fn publish_without_observer_is_dropped() {
        let bus = EventBus::new();
        bus.publish(completed(1));
        assert!(!bus.has_observer());
    }

    #[test]
    fn newer_subscription_replaces_older() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(completed(2));

        assert!(first.try_recv().is_err());
        assert_eq!(second.try_recv().unwrap(), completed(2));
    }

    #[test]
    fn dropped_receiver_detaches_observer() {
        let bus = EventBus::new();
        drop(bus.subscribe());
        bus.publish(completed(3));
        assert!(!bus.has_observer());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.unsubscribe();
        bus.publish(completed(4));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn progress_message_format() {
        assert_eq!(
            progress_message(12, 50, "13800000000", JobStatus::Success),
            "[12/50] 13800000000 - success"
        );
        assert_eq!(
            progress_message(1, 2, "1", JobStatus::Fail),
            "[1/2] 1 - fail"
        );
    }
}
