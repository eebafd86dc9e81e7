//! Concurrent table of live session snapshots.
//!
//! Every read hands out an owned clone, so callers can never reach into the
//! table. Lanes are assigned on first insertion, in first-seen order, and are
//! never reassigned for the lifetime of the store.
//!
//! # Critical-section callbacks
//!
//! The `*_and_notify` methods run the `notify` callback while the write lock is
//! still held. That gives two guarantees: no reader can observe a partially
//! applied batch, and whatever the callback enqueues (broadcaster work) happens
//! before any reader sees the new state.
//!
//! The lock is not reentrant. The callback receives an owned [`StoreChange`]
//! that already carries everything a listener needs (the applied states, the
//! removed ids, the resulting active count), and it must not call back into the
//! store: `get`, `get_all`, `active_count` or any mutation from inside the
//! callback deadlocks permanently.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use pitwall_protocol::SessionState;

/// Result of a mutation, handed to the notify callback.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreChange {
    /// Stored copies of the updated sessions, with their assigned lanes.
    pub updated: Vec<SessionState>,
    /// Ids that were present and have been removed.
    pub removed: Vec<String>,
    /// Active (non-terminal) session count after the mutation.
    pub active_count: usize,
}

impl StoreChange {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<String, SessionState>,
    next_lane: u32,
}

impl StoreInner {
    fn upsert(&mut self, mut state: SessionState) -> SessionState {
        state.lane = match self.sessions.get(&state.id) {
            Some(existing) => existing.lane,
            None => {
                let lane = self.next_lane;
                self.next_lane += 1;
                lane
            }
        };
        self.sessions.insert(state.id.clone(), state.clone());
        state
    }

    fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|state| !state.is_terminal())
            .count()
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    inner: RwLock<StoreInner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // The table is always left consistent before a guard is dropped, so a
    // poisoned lock still guards valid data.
    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, id: &str) -> Option<SessionState> {
        self.read().sessions.get(id).cloned()
    }

    /// All sessions, ordered by lane.
    pub fn get_all(&self) -> Vec<SessionState> {
        let mut sessions: Vec<SessionState> = self.read().sessions.values().cloned().collect();
        sessions.sort_by_key(|state| state.lane);
        sessions
    }

    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().sessions.is_empty()
    }

    /// Number of sessions whose activity is not terminal.
    pub fn active_count(&self) -> usize {
        self.read().active_count()
    }

    /// Inserts or replaces a session and returns the stored copy.
    pub fn update(&self, state: SessionState) -> SessionState {
        self.write().upsert(state)
    }

    pub fn remove(&self, id: &str) -> Option<SessionState> {
        self.write().sessions.remove(id)
    }

    /// Applies one update and runs `notify` before releasing the write lock.
    ///
    /// See the module docs: `notify` must not touch the store.
    pub fn update_and_notify<F>(&self, state: SessionState, notify: F) -> SessionState
    where
        F: FnOnce(StoreChange),
    {
        let mut inner = self.write();
        let stored = inner.upsert(state);
        let change = StoreChange {
            updated: vec![stored.clone()],
            removed: Vec::new(),
            active_count: inner.active_count(),
        };
        notify(change);
        stored
    }

    /// Applies every update as one atomic batch and runs `notify` under the
    /// same write lock. Readers see either none or all of the batch.
    pub fn batch_update_and_notify<F>(&self, states: Vec<SessionState>, notify: F) -> Vec<SessionState>
    where
        F: FnOnce(StoreChange),
    {
        let mut inner = self.write();
        let stored: Vec<SessionState> = states.into_iter().map(|state| inner.upsert(state)).collect();
        let change = StoreChange {
            updated: stored.clone(),
            removed: Vec::new(),
            active_count: inner.active_count(),
        };
        notify(change);
        stored
    }

    /// Removes every listed id as one atomic batch. Unknown ids are ignored;
    /// the returned list (and the change) contain only ids that were present.
    pub fn batch_remove_and_notify<F>(&self, ids: &[String], notify: F) -> Vec<String>
    where
        F: FnOnce(StoreChange),
    {
        let mut inner = self.write();
        let removed: Vec<String> = ids
            .iter()
            .filter(|id| inner.sessions.remove(id.as_str()).is_some())
            .cloned()
            .collect();
        let change = StoreChange {
            updated: Vec::new(),
            removed: removed.clone(),
            active_count: inner.active_count(),
        };
        notify(change);
        removed
    }
}
