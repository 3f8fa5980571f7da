use std::collections::BTreeSet;

use crate::types::{EventId, RoomId, UserId};

/// One under-acknowledged event and the users who have not acknowledged it.
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayJob {
    event_id: EventId,
    room_id: RoomId,
    sender: UserId,
    missing: BTreeSet<UserId>,
}

impl RelayJob {
    pub fn new(event_id: EventId, room_id: RoomId, sender: UserId, missing: BTreeSet<UserId>) -> Self {
        Self {
            event_id,
            room_id,
            sender,
            missing,
        }
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn sender(&self) -> &UserId {
        &self.sender
    }

    pub fn missing(&self) -> &BTreeSet<UserId> {
        &self.missing
    }

    /// Whether `user` is owed this event.
    pub fn is_owed(&self, user: &UserId) -> bool {
        self.missing.contains(user)
    }
}
