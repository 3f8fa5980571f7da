//! Single-slot relay job queue.
//!
//! Holds at most one job that the orchestrator has not picked up yet.
//! Offering a job while the slot is taken drops the new job instead of
//! blocking the acknowledgment path; the detector surfaces it again on the
//! next acknowledgment for that event.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::job::RelayJob;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The slot was occupied.
    Dropped(RelayJob),
    /// The orchestrator is gone.
    Closed(RelayJob),
}

/// Create the queue.
pub fn relay_job_queue() -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (JobSender { tx }, JobReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::Sender<RelayJob>,
}

impl JobSender {
    /// Offer a job without waiting.
    pub fn offer(&self, job: RelayJob) -> EnqueueOutcome {
        match self.tx.try_send(job) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::debug!("relay queue busy, dropping job for {}", job.event_id());
                EnqueueOutcome::Dropped(job)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => EnqueueOutcome::Closed(job),
        }
    }
}

#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<RelayJob>,
}

impl JobReceiver {
    /// Wait for the next job. `None` on cancellation or when every sender is gone.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<RelayJob> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            job = self.rx.recv() => job,
        }
    }
}
