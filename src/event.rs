//! Structured events emitted by the scheduler on every admission decision,
//! state transition and delivery.
//!
//! Consumers subscribe to the event stream to build dashboards, debugging
//! views or test assertions. Events are the scheduler's voice; pipeline
//! logs are the worker's voice.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::engine::AdmitOutcome;
use crate::model::{DeliveryKind, Field, ItemKey, PipelineState};

/// A structured event emitted by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A relevance signal was turned into a pending admission.
    Scheduled {
        key: ItemKey,
        delay_ms: u64,
    },
    /// An admission decision was made.
    Admitted {
        key: ItemKey,
        outcome: AdmitOutcome,
    },
    StateTransition {
        key: ItemKey,
        from: PipelineState,
        to: PipelineState,
    },
    Delivered {
        key: ItemKey,
        delivery: DeliveryKind,
        subscribers: usize,
        changed: Vec<Field>,
    },
    StageFailed {
        key: ItemKey,
        stage: String,
        error: String,
    },
    /// Pipeline gave up before any remote call.
    Aborted {
        key: ItemKey,
        reason: String,
    },
    Settled {
        key: ItemKey,
        duration_ms: u64,
    },
}

/// Per-scheduler broadcast channel for events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    seq: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, kind: EventKind) {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            kind,
        };
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_carry_increasing_sequence_numbers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(EventKind::Aborted {
            key: ItemKey::from("a"),
            reason: "no session".into(),
        });
        bus.emit(EventKind::Settled {
            key: ItemKey::from("a"),
            duration_ms: 3,
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.seq + 1, second.seq);
        assert!(matches!(second.kind, EventKind::Settled { .. }));
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(EventKind::Admitted {
            key: ItemKey::from("k"),
            outcome: AdmitOutcome::Queued,
        })
        .unwrap();
        assert_eq!(json["type"], "admitted");
        assert_eq!(json["outcome"], "queued");
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        EventBus::new(4).emit(EventKind::Scheduled {
            key: ItemKey::from("k"),
            delay_ms: 0,
        });
    }
}
