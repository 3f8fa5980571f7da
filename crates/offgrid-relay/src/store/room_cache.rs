//! LRU cache of per-room state (membership, encryption) with an injected clock.
//!
//! Eviction only removes least-recently-used rooms while the cache is over
//! capacity, and stops at the first room touched within `max_age`, so a
//! burst of activity across many rooms does not thrash recently used state.
//! [`RoomStateCache::force_evict`] ignores age.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;

use super::RoomDirectory;
use crate::types::{RoomId, UserId};
use crate::RelayError;

/// Default capacity before eviction is considered.
pub const DEFAULT_MAX_ROOMS: usize = 32;

/// Rooms touched more recently than this survive a normal eviction.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for tests.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<StdMutex<Instant>>);

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self(Arc::new(StdMutex::new(Instant::now())))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomState {
    pub encrypted: bool,
    pub members: BTreeMap<UserId, Membership>,
}

impl RoomState {
    pub fn joined(&self) -> BTreeSet<UserId> {
        self.members
            .iter()
            .filter(|(_, m)| **m == Membership::Join)
            .map(|(user, _)| user.clone())
            .collect()
    }
}

#[derive(Debug)]
struct Entry {
    state: RoomState,
    touched: Instant,
}

pub struct RoomStateCache<C: Clock = SystemClock> {
    entries: LruCache<RoomId, Entry>,
    max_rooms: usize,
    max_age: Duration,
    clock: C,
}

impl RoomStateCache<SystemClock> {
    pub fn new(max_rooms: usize, max_age: Duration) -> Self {
        Self::with_clock(max_rooms, max_age, SystemClock)
    }
}

impl<C: Clock> RoomStateCache<C> {
    pub fn with_clock(max_rooms: usize, max_age: Duration, clock: C) -> Self {
        Self {
            entries: LruCache::unbounded(),
            max_rooms,
            max_age,
            clock,
        }
    }

    /// Look up a room, marking it most recently used.
    pub fn get(&mut self, room_id: &RoomId) -> Option<&RoomState> {
        let now = self.clock.now();
        let entry = self.entries.get_mut(room_id)?;
        entry.touched = now;
        Some(&entry.state)
    }

    /// Insert or replace a room's state, then run a normal eviction.
    pub fn put(&mut self, room_id: RoomId, state: RoomState) {
        let touched = self.clock.now();
        self.entries.put(room_id, Entry { state, touched });
        self.evict();
    }

    /// Update one room in place (inserting an empty state first if needed).
    pub fn update(&mut self, room_id: RoomId, f: impl FnOnce(&mut RoomState)) {
        let now = self.clock.now();
        match self.entries.get_mut(&room_id) {
            Some(entry) => {
                f(&mut entry.state);
                entry.touched = now;
            }
            None => {
                let mut state = RoomState::default();
                f(&mut state);
                self.put(room_id, state);
            }
        }
    }

    /// Evict least-recently-used rooms while over capacity, stopping at the
    /// first one touched within `max_age`. Returns how many were removed.
    pub fn evict(&mut self) -> usize {
        self.evict_inner(false)
    }

    /// Evict down to capacity regardless of age.
    pub fn force_evict(&mut self) -> usize {
        self.evict_inner(true)
    }

    fn evict_inner(&mut self, force: bool) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        while self.entries.len() > self.max_rooms {
            let Some((room_id, entry)) = self.entries.peek_lru() else {
                break;
            };
            if !force && now.saturating_duration_since(entry.touched) < self.max_age {
                break;
            }
            tracing::trace!("evicting cached state for {room_id}");
            self.entries.pop_lru();
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// [`RoomDirectory`] backed by a [`RoomStateCache`].
///
/// Rooms the cache does not know resolve to no members, which means no relay
/// job can be created for them, and their encryption state is an error.
pub struct CachedDirectory<C: Clock = SystemClock> {
    cache: Mutex<RoomStateCache<C>>,
}

impl Default for CachedDirectory<SystemClock> {
    fn default() -> Self {
        Self::new(RoomStateCache::new(DEFAULT_MAX_ROOMS, DEFAULT_MAX_AGE))
    }
}

impl<C: Clock> CachedDirectory<C> {
    pub fn new(cache: RoomStateCache<C>) -> Self {
        Self {
            cache: Mutex::new(cache),
        }
    }

    pub async fn set_encrypted(&self, room_id: RoomId, encrypted: bool) {
        self.cache
            .lock()
            .await
            .update(room_id, |state| state.encrypted = encrypted);
    }

    pub async fn set_membership(&self, room_id: RoomId, user: UserId, membership: Membership) {
        self.cache.lock().await.update(room_id, |state| {
            state.members.insert(user, membership);
        });
    }
}

#[async_trait::async_trait]
impl<C: Clock> RoomDirectory for CachedDirectory<C> {
    async fn members_of(&self, room_id: &RoomId) -> Result<BTreeSet<UserId>, RelayError> {
        Ok(self
            .cache
            .lock()
            .await
            .get(room_id)
            .map(RoomState::joined)
            .unwrap_or_default())
    }

    /// Unknown or evicted rooms are an error, never "unencrypted".
    async fn is_encrypted(&self, room_id: &RoomId) -> Result<bool, RelayError> {
        match self.cache.lock().await.get(room_id) {
            Some(state) => Ok(state.encrypted),
            None => Err(RelayError::Store(format!("no cached state for {room_id}"))),
        }
    }
}
