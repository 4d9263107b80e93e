//! In-flight tracker: at most one pipeline per key.
//!
//! A key is in flight from the moment it is popped off the queue until its
//! pipeline settles or aborts. The marker is held by an [`InFlightGuard`]
//! and released when the guard drops, whatever path the pipeline took.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::model::{ItemKey, PipelineState};

#[derive(Default)]
pub struct InFlightTracker {
    states: Mutex<HashMap<ItemKey, PipelineState>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` in flight. Returns `None` if a pipeline for it is already
    /// running.
    pub fn try_begin(self: &Arc<Self>, key: &ItemKey) -> Option<InFlightGuard> {
        let mut states = self.lock();
        if states.contains_key(key) {
            return None;
        }
        states.insert(key.clone(), PipelineState::InFlight);
        Some(InFlightGuard {
            tracker: Arc::clone(self),
            key: key.clone(),
            state: PipelineState::InFlight,
        })
    }

    pub fn is_active(&self, key: &ItemKey) -> bool {
        self.lock().contains_key(key)
    }

    /// State of a running pipeline, `None` if nothing runs for `key`.
    pub fn state_of(&self, key: &ItemKey) -> Option<PipelineState> {
        self.lock().get(key).copied()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn set(&self, key: &ItemKey, state: PipelineState) {
        if let Some(slot) = self.lock().get_mut(key) {
            *slot = state;
        }
    }

    fn release(&self, key: &ItemKey) {
        self.lock().remove(key);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ItemKey, PipelineState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Ownership of one key's in-flight marker.
pub struct InFlightGuard {
    tracker: Arc<InFlightTracker>,
    key: ItemKey,
    state: PipelineState,
}

impl InFlightGuard {
    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Move the pipeline to `to`, rejecting transitions the lifecycle does
    /// not allow. Returns the previous state.
    pub fn transition(&mut self, to: PipelineState) -> Result<PipelineState> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        self.tracker.set(&self.key, to);
        Ok(from)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.release(&self.key);
    }
}
