//! Subscription registry: who wants to hear about which key.
//!
//! The subscriber list is durable. Primary delivery and refinement updates
//! walk the same list; the `DeliveryKind` tag tells the sink whether to
//! create or patch its presentation state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::model::{Delivery, DeliveryKind, EnrichmentRecord, Field, ItemKey, SubscriberId};

/// A presentation target. Must tolerate repeated full deliveries.
pub trait PresentationSink: Send + Sync {
    fn deliver(&self, delivery: &Delivery);
}

struct Subscriber {
    id: SubscriberId,
    sink: Arc<dyn PresentationSink>,
}

/// Per-key subscriber lists.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: Mutex<HashMap<ItemKey, Vec<Subscriber>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber, then replay whatever `cached` returns to this
    /// subscriber alone as a first delivery.
    ///
    /// `cached` is read after the subscriber is listed, so a primary
    /// broadcast racing this call is seen either live or by replay.
    /// Registering the same id twice for a key keeps one entry.
    pub fn register(
        &self,
        key: &ItemKey,
        id: SubscriberId,
        sink: Arc<dyn PresentationSink>,
        cached: impl FnOnce() -> Option<EnrichmentRecord>,
    ) {
        {
            let mut subscribers = self.lock();
            let list = subscribers.entry(key.clone()).or_default();
            if !list.iter().any(|s| s.id == id) {
                list.push(Subscriber {
                    id,
                    sink: Arc::clone(&sink),
                });
            }
        }

        if let Some(record) = cached() {
            debug!(key = %key, subscriber = %id, "replaying cached record");
            sink.deliver(&Delivery {
                key: key.clone(),
                kind: DeliveryKind::First,
                changed: record.fields(),
                record,
            });
        }
    }

    /// Remove a subscriber. Returns true if it was registered.
    pub fn unregister(&self, key: &ItemKey, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let Some(list) = subscribers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(key);
        }
        removed
    }

    /// Deliver to every current subscriber of `key`. Returns how many were reached.
    pub fn broadcast(
        &self,
        key: &ItemKey,
        kind: DeliveryKind,
        record: &EnrichmentRecord,
        changed: Vec<Field>,
    ) -> usize {
        // Snapshot the sinks so no lock is held while sinks run.
        let sinks: Vec<Arc<dyn PresentationSink>> = self
            .lock()
            .get(key)
            .map(|list| list.iter().map(|s| Arc::clone(&s.sink)).collect())
            .unwrap_or_default();

        if sinks.is_empty() {
            return 0;
        }

        let delivery = Delivery {
            key: key.clone(),
            kind,
            record: record.clone(),
            changed,
        };
        for sink in &sinks {
            sink.deliver(&delivery);
        }
        sinks.len()
    }

    pub fn count(&self, key: &ItemKey) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ItemKey, Vec<Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
