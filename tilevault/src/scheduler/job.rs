//! Download job state and handles.
//!
//! A job associates one region with the descriptors being downloaded. Its
//! state machine is PENDING → ACTIVE → INACTIVE(terminal), where the
//! terminal transition happens exactly once. Progress counters only ever
//! increase while the job is alive.

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Why a job became inactive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminalState {
    /// Every required resource completed.
    Complete,
    /// A fatal error or exhausted retries.
    Failed,
    /// The job was cancelled before completion.
    Cancelled,
}

/// Lifecycle state of a download job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Created but not yet picked up by its worker.
    Pending,
    /// The worker is fetching resources.
    Active,
    /// The job reached a terminal state and will make no further progress.
    Inactive(TerminalState),
}

impl JobState {
    /// True while the job can still make progress.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }

    /// The terminal state, if the job is inactive.
    pub fn terminal(&self) -> Option<TerminalState> {
        match self {
            Self::Inactive(t) => Some(*t),
            _ => None,
        }
    }
}

/// Point-in-time progress snapshot of a job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobProgress {
    /// Current lifecycle state.
    pub state: JobState,
    /// Resources completed so far (style pack + tiles).
    pub completed_resource_count: u64,
    /// Total resources the job needs.
    pub required_resource_count: u64,
    /// Bytes of completed resources.
    pub completed_bytes: u64,
}

impl JobProgress {
    /// Completion ratio in `0.0..=1.0`; 1.0 when nothing is required.
    pub fn ratio(&self) -> f64 {
        if self.required_resource_count == 0 {
            1.0
        } else {
            self.completed_resource_count as f64 / self.required_resource_count as f64
        }
    }
}

/// Shared handle to a running (or finished) download job.
///
/// Handed out by the scheduler; cloned via `Arc`. Callers observe progress
/// through the [`ObserverHub`](crate::observer::ObserverHub) or await the
/// terminal state with [`wait`](Self::wait).
#[derive(Debug)]
pub struct JobHandle {
    region_id: String,
    progress: Mutex<JobProgress>,
    state_tx: watch::Sender<JobState>,
    cancel: CancellationToken,
}

impl JobHandle {
    /// Create a pending job for a region needing `required` resources.
    pub(crate) fn new(region_id: impl Into<String>, required: u64) -> Self {
        let (state_tx, _) = watch::channel(JobState::Pending);
        Self {
            region_id: region_id.into(),
            progress: Mutex::new(JobProgress {
                state: JobState::Pending,
                completed_resource_count: 0,
                required_resource_count: required,
                completed_bytes: 0,
            }),
            state_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// The region id this job downloads.
    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    /// Snapshot of the current progress.
    pub fn progress(&self) -> JobProgress {
        self.progress.lock().clone()
    }

    /// Current lifecycle state, as announced to waiters.
    ///
    /// A terminal transition becomes visible here only once the worker has
    /// finished publishing the final status update.
    pub fn state(&self) -> JobState {
        *self.state_tx.borrow()
    }

    /// True while the job can still make progress.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Signal the worker to stop before its next fetch attempt.
    ///
    /// In-flight fetches are abandoned, not awaited. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Await the terminal state, returning immediately if already inactive.
    pub async fn wait(&self) -> TerminalState {
        let mut rx = self.state_tx.subscribe();
        loop {
            if let JobState::Inactive(terminal) = *rx.borrow_and_update() {
                return terminal;
            }
            if rx.changed().await.is_err() {
                // The sender lives inside this handle, so this arm is
                // unreachable while the handle is borrowed; report a
                // cancellation rather than panic if it ever fires.
                return TerminalState::Cancelled;
            }
        }
    }

    /// Cancellation token observed by the worker.
    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Transition PENDING → ACTIVE.
    pub(crate) fn mark_active(&self) {
        let mut progress = self.progress.lock();
        if progress.state == JobState::Pending {
            progress.state = JobState::Active;
            let _ = self.state_tx.send_replace(JobState::Active);
        }
    }

    /// Record one completed resource and return the updated snapshot.
    ///
    /// Counters never decrease; this is the only mutation path.
    pub(crate) fn record_completed(&self, bytes: u64) -> JobProgress {
        let mut progress = self.progress.lock();
        progress.completed_resource_count += 1;
        progress.completed_bytes += bytes;
        progress.clone()
    }

    /// Perform the exactly-once terminal transition.
    ///
    /// Returns the final snapshot on the first call, `None` if the job was
    /// already terminal. Waiters are not released yet: the caller publishes
    /// the final status to observers and then calls
    /// [`announce_finished`](Self::announce_finished), so anyone woken by
    /// [`wait`](Self::wait) can rely on the terminal status having been
    /// delivered.
    pub(crate) fn try_finish(&self, terminal: TerminalState) -> Option<JobProgress> {
        let mut progress = self.progress.lock();
        if matches!(progress.state, JobState::Inactive(_)) {
            return None;
        }
        progress.state = JobState::Inactive(terminal);
        Some(progress.clone())
    }

    /// Release waiters after the terminal status has been published.
    pub(crate) fn announce_finished(&self) {
        let state = self.progress.lock().state;
        let _ = self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let handle = JobHandle::new("nantes", 5);
        assert_eq!(handle.state(), JobState::Pending);
        assert!(handle.is_active());

        let progress = handle.progress();
        assert_eq!(progress.completed_resource_count, 0);
        assert_eq!(progress.required_resource_count, 5);
        assert_eq!(progress.completed_bytes, 0);
    }

    #[test]
    fn test_record_completed_monotone() {
        let handle = JobHandle::new("nantes", 3);
        handle.mark_active();

        let p1 = handle.record_completed(100);
        let p2 = handle.record_completed(250);

        assert_eq!(p1.completed_resource_count, 1);
        assert_eq!(p2.completed_resource_count, 2);
        assert_eq!(p2.completed_bytes, 350);
        assert!(p2.completed_bytes >= p1.completed_bytes);
    }

    #[test]
    fn test_terminal_transition_exactly_once() {
        let handle = JobHandle::new("nantes", 1);
        handle.mark_active();

        let first = handle.try_finish(TerminalState::Complete);
        assert!(first.is_some());
        assert_eq!(
            first.unwrap().state,
            JobState::Inactive(TerminalState::Complete)
        );

        // Second transition attempt is refused.
        assert!(handle.try_finish(TerminalState::Failed).is_none());
        handle.announce_finished();
        assert_eq!(
            handle.state(),
            JobState::Inactive(TerminalState::Complete)
        );
    }

    #[test]
    fn test_terminal_state_announced_separately() {
        let handle = JobHandle::new("nantes", 1);
        handle.mark_active();

        let snapshot = handle.try_finish(TerminalState::Complete).unwrap();
        assert_eq!(
            snapshot.state,
            JobState::Inactive(TerminalState::Complete)
        );

        // Waiters are only released once the transition is announced.
        assert_eq!(handle.state(), JobState::Active);
        handle.announce_finished();
        assert_eq!(
            handle.state(),
            JobState::Inactive(TerminalState::Complete)
        );
    }

    #[test]
    fn test_mark_active_only_from_pending() {
        let handle = JobHandle::new("nantes", 1);
        handle.mark_active();
        handle.try_finish(TerminalState::Cancelled);
        handle.announce_finished();
        handle.mark_active();
        assert_eq!(
            handle.state(),
            JobState::Inactive(TerminalState::Cancelled)
        );
    }

    #[test]
    fn test_progress_ratio() {
        let handle = JobHandle::new("nantes", 4);
        handle.mark_active();
        handle.record_completed(10);
        assert_eq!(handle.progress().ratio(), 0.25);

        let empty = JobHandle::new("empty", 0);
        assert_eq!(empty.progress().ratio(), 1.0);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_finished() {
        let handle = JobHandle::new("nantes", 1);
        handle.mark_active();
        handle.try_finish(TerminalState::Failed);
        handle.announce_finished();
        assert_eq!(handle.wait().await, TerminalState::Failed);
    }

    #[tokio::test]
    async fn test_wait_observes_later_transition() {
        let handle = std::sync::Arc::new(JobHandle::new("nantes", 1));
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };
        tokio::task::yield_now().await;
        handle.mark_active();
        handle.try_finish(TerminalState::Complete);
        handle.announce_finished();
        assert_eq!(waiter.await.unwrap(), TerminalState::Complete);
    }

    #[test]
    fn test_cancel_token_idempotent() {
        let handle = JobHandle::new("nantes", 1);
        let token = handle.cancellation_token();
        assert!(!token.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(token.is_cancelled());
    }
}
