//! Progress and error event fan-out.
//!
//! Download workers publish job events through the [`ObserverHub`]; UI or
//! embedding code registers [`JobObserver`] sinks against a job id. An
//! observer is a pure callback sink and never owns the job.
//!
//! Delivery guarantees: every currently subscribed observer sees each event
//! exactly once, in emission order. Delivery and subscription changes
//! serialize on the same lock, so the terminal status of a job is delivered
//! before any later subscribe/unsubscribe takes effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::scheduler::JobProgress;
use crate::transport::TransportError;

/// Identifies one observer registration for later removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback sink for job events.
///
/// Callbacks run on the worker task that emitted the event and should
/// return quickly; hand heavy work off to a channel.
pub trait JobObserver: Send + Sync {
    /// A progress update, including the single terminal update carrying the
    /// job's final state.
    fn status_changed(&self, progress: &JobProgress);

    /// An error during the download. Non-fatal errors are warnings; the job
    /// keeps retrying. A fatal error precedes the terminal status update.
    fn error_occurred(&self, error: &TransportError, fatal: bool);
}

type Registrations = Vec<(SubscriptionId, Arc<dyn JobObserver>)>;

/// Fan-out of job events to registered observers.
#[derive(Default)]
pub struct ObserverHub {
    observers: Mutex<HashMap<String, Registrations>>,
    next_id: AtomicU64,
}

impl ObserverHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for a job id.
    ///
    /// Many observers may watch one job. Returns the id used to
    /// unsubscribe.
    pub fn subscribe(&self, job_id: &str, observer: Arc<dyn JobObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .push((id, observer));
        debug!(job_id, subscription = id.0, "observer subscribed");
        id
    }

    /// Remove one registration. Unknown ids are ignored.
    pub fn unsubscribe(&self, job_id: &str, id: SubscriptionId) {
        let mut observers = self.observers.lock();
        if let Some(regs) = observers.get_mut(job_id) {
            regs.retain(|(sub_id, _)| *sub_id != id);
            if regs.is_empty() {
                observers.remove(job_id);
            }
        }
    }

    /// Drop every registration for a job. Called when the job is destroyed.
    pub fn drop_job(&self, job_id: &str) {
        self.observers.lock().remove(job_id);
    }

    /// Number of observers currently watching a job.
    pub fn observer_count(&self, job_id: &str) -> usize {
        self.observers
            .lock()
            .get(job_id)
            .map(|regs| regs.len())
            .unwrap_or(0)
    }

    /// Deliver a progress update to every observer of the job.
    pub(crate) fn status_changed(&self, job_id: &str, progress: &JobProgress) {
        let observers = self.observers.lock();
        if let Some(regs) = observers.get(job_id) {
            for (_, observer) in regs {
                observer.status_changed(progress);
            }
        }
    }

    /// Deliver an error to every observer of the job.
    pub(crate) fn error_occurred(&self, job_id: &str, error: &TransportError, fatal: bool) {
        let observers = self.observers.lock();
        if let Some(regs) = observers.get(job_id) {
            for (_, observer) in regs {
                observer.error_occurred(error, fatal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{JobProgress, JobState};

    /// Records every event it sees, in order.
    #[derive(Default)]
    struct RecordingObserver {
        statuses: Mutex<Vec<JobProgress>>,
        errors: Mutex<Vec<(String, bool)>>,
    }

    impl JobObserver for RecordingObserver {
        fn status_changed(&self, progress: &JobProgress) {
            self.statuses.lock().push(progress.clone());
        }

        fn error_occurred(&self, error: &TransportError, fatal: bool) {
            self.errors.lock().push((error.message().to_string(), fatal));
        }
    }

    fn progress(completed: u64) -> JobProgress {
        JobProgress {
            state: JobState::Active,
            completed_resource_count: completed,
            required_resource_count: 10,
            completed_bytes: completed * 100,
        }
    }

    #[test]
    fn test_events_delivered_in_order() {
        let hub = ObserverHub::new();
        let observer = Arc::new(RecordingObserver::default());
        hub.subscribe("job", observer.clone());

        hub.status_changed("job", &progress(1));
        hub.error_occurred("job", &TransportError::transient("blip"), false);
        hub.status_changed("job", &progress(2));

        let statuses = observer.statuses.lock();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].completed_resource_count, 1);
        assert_eq!(statuses[1].completed_resource_count, 2);

        let errors = observer.errors.lock();
        assert_eq!(errors.as_slice(), &[("blip".to_string(), false)]);
    }

    #[test]
    fn test_multiple_observers_each_see_event_once() {
        let hub = ObserverHub::new();
        let a = Arc::new(RecordingObserver::default());
        let b = Arc::new(RecordingObserver::default());
        hub.subscribe("job", a.clone());
        hub.subscribe("job", b.clone());

        hub.status_changed("job", &progress(1));

        assert_eq!(a.statuses.lock().len(), 1);
        assert_eq!(b.statuses.lock().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = ObserverHub::new();
        let observer = Arc::new(RecordingObserver::default());
        let sub = hub.subscribe("job", observer.clone());

        hub.status_changed("job", &progress(1));
        hub.unsubscribe("job", sub);
        hub.status_changed("job", &progress(2));

        assert_eq!(observer.statuses.lock().len(), 1);
        assert_eq!(hub.observer_count("job"), 0);
    }

    #[test]
    fn test_events_scoped_to_job_id() {
        let hub = ObserverHub::new();
        let observer = Arc::new(RecordingObserver::default());
        hub.subscribe("job-a", observer.clone());

        hub.status_changed("job-b", &progress(1));
        assert!(observer.statuses.lock().is_empty());
    }

    #[test]
    fn test_drop_job_clears_registrations() {
        let hub = ObserverHub::new();
        hub.subscribe("job", Arc::new(RecordingObserver::default()));
        hub.drop_job("job");
        assert_eq!(hub.observer_count("job"), 0);
    }

    #[test]
    fn test_unsubscribe_unknown_id_ignored() {
        let hub = ObserverHub::new();
        let sub = hub.subscribe("job", Arc::new(RecordingObserver::default()));
        hub.unsubscribe("other", sub);
        assert_eq!(hub.observer_count("job"), 1);
    }
}
