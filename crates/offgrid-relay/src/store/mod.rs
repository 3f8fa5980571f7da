//! Local event history and room membership seams.
mod room_cache;

pub use room_cache::{CachedDirectory, Clock, ManualClock, Membership, RoomState, RoomStateCache, SystemClock};

use std::collections::{BTreeSet, HashMap};

use tokio::sync::Mutex;

use crate::types::{EventId, RoomEvent, RoomId, UserId};
use crate::RelayError;

/// Local event history.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append `event`. Returns `false` if an event with the same id already
    /// exists in the room; the stored copy is left untouched.
    async fn append(&self, event: RoomEvent) -> Result<bool, RelayError>;

    async fn get(&self, room_id: &RoomId, event_id: &EventId) -> Result<Option<RoomEvent>, RelayError>;

    /// Record that the local user has read up to `event_id`.
    async fn mark_read(&self, room_id: &RoomId, event_id: &EventId) -> Result<(), RelayError>;
}

/// Room membership as seen by the local device.
#[async_trait::async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Users currently joined to the room. Invited or departed users are excluded.
    async fn members_of(&self, room_id: &RoomId) -> Result<BTreeSet<UserId>, RelayError>;

    async fn is_encrypted(&self, room_id: &RoomId) -> Result<bool, RelayError>;
}

#[derive(Debug, Default)]
struct RoomHistory {
    events: Vec<RoomEvent>,
    index: HashMap<EventId, usize>,
    read_up_to: Option<EventId>,
}

/// In-memory [`HistoryStore`].
#[derive(Debug, Default)]
pub struct MemoryHistory {
    rooms: Mutex<HashMap<RoomId, RoomHistory>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored for `room_id`.
    pub async fn len(&self, room_id: &RoomId) -> usize {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .map_or(0, |room| room.events.len())
    }

    /// Events of `room_id` in append order.
    pub async fn events(&self, room_id: &RoomId) -> Vec<RoomEvent> {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .map(|room| room.events.clone())
            .unwrap_or_default()
    }

    pub async fn read_marker(&self, room_id: &RoomId) -> Option<EventId> {
        self.rooms
            .lock()
            .await
            .get(room_id)
            .and_then(|room| room.read_up_to.clone())
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, event: RoomEvent) -> Result<bool, RelayError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms.entry(event.room_id.clone()).or_default();
        if room.index.contains_key(&event.event_id) {
            return Ok(false);
        }
        room.index.insert(event.event_id.clone(), room.events.len());
        room.events.push(event);
        Ok(true)
    }

    async fn get(&self, room_id: &RoomId, event_id: &EventId) -> Result<Option<RoomEvent>, RelayError> {
        let rooms = self.rooms.lock().await;
        Ok(rooms
            .get(room_id)
            .and_then(|room| room.index.get(event_id).map(|&i| room.events[i].clone())))
    }

    async fn mark_read(&self, room_id: &RoomId, event_id: &EventId) -> Result<(), RelayError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| RelayError::Store(format!("unknown room {room_id}")))?;
        if !room.index.contains_key(event_id) {
            return Err(RelayError::Store(format!("unknown event {event_id} in {room_id}")));
        }
        room.read_up_to = Some(event_id.clone());
        Ok(())
    }
}
