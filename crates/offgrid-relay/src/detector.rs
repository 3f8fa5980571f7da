//! Missed-delivery detector.
//!
//! Runs inside the sync pipeline for every acknowledgment (read receipt)
//! event. Only local lookups happen here; relaying is left to the
//! orchestrator behind the job queue.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::job::RelayJob;
use crate::queue::{EnqueueOutcome, JobSender};
use crate::store::{HistoryStore, RoomDirectory};
use crate::types::{EventContent, RoomEvent, UserId};
use crate::RelayError;

pub struct MissedDeliveryDetector {
    own_user: UserId,
    history: Arc<dyn HistoryStore>,
    directory: Arc<dyn RoomDirectory>,
    jobs: JobSender,
}

impl MissedDeliveryDetector {
    pub fn new(
        own_user: UserId,
        history: Arc<dyn HistoryStore>,
        directory: Arc<dyn RoomDirectory>,
        jobs: JobSender,
    ) -> Self {
        Self {
            own_user,
            history,
            directory,
            jobs,
        }
    }

    /// Find events this user sent that some joined member has not acknowledged.
    ///
    /// An event is considered only once the local user's own receipt for it
    /// is present, and only if the local user is its sender. Users who are
    /// not currently joined are never reported missing.
    pub async fn inspect(&self, ack: &RoomEvent) -> Result<Vec<RelayJob>, RelayError> {
        let EventContent::Receipt(receipt) = &ack.content else {
            return Ok(Vec::new());
        };

        let mut jobs = Vec::new();
        for (event_id, readers) in &receipt.receipts {
            if !readers.contains_key(&self.own_user) {
                continue;
            }
            let Some(original) = self.history.get(&ack.room_id, event_id).await? else {
                continue;
            };
            if original.sender != self.own_user {
                continue;
            }

            let members = self.directory.members_of(&ack.room_id).await?;
            let acked: BTreeSet<&UserId> = readers.keys().collect();
            let missing: BTreeSet<UserId> = members
                .into_iter()
                .filter(|member| !acked.contains(member))
                .collect();

            if missing.is_empty() {
                continue;
            }
            tracing::debug!(
                "{event_id} in {} not acknowledged by {} member(s)",
                ack.room_id,
                missing.len()
            );
            jobs.push(RelayJob::new(
                event_id.clone(),
                ack.room_id.clone(),
                self.own_user.clone(),
                missing,
            ));
        }
        Ok(jobs)
    }

    /// [`inspect`](Self::inspect), then offer every job to the relay queue.
    pub async fn on_acknowledgment(&self, ack: &RoomEvent) -> Result<Vec<EnqueueOutcome>, RelayError> {
        Ok(self
            .inspect(ack)
            .await?
            .into_iter()
            .map(|job| self.jobs.offer(job))
            .collect())
    }
}
