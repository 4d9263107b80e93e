//! Scheduling engine: admission, queueing, pipeline execution.

pub mod admission;
pub mod control;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod stages;
pub mod tracker;

pub use admission::{Admission, Scheduled};
pub use control::ControlLoop;
pub use pipeline::{Refinement, StageInput};
pub use queue::{AdmitOutcome, WorkQueue};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerStats};
pub use tracker::{InFlightGuard, InFlightTracker};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use opentelemetry::KeyValue;
use tracing::debug;

use crate::cache::ResultCache;
use crate::config::SchedulerConfig;
use crate::event::{EventBus, EventKind};
use crate::model::ItemKey;
use crate::source::EntitySource;
use crate::subscription::SubscriptionRegistry;
use crate::telemetry::metrics;

/// Monotonic counters behind [`SchedulerStats`].
#[derive(Default)]
pub(crate) struct Counters {
    pub queued: AtomicU64,
    pub dropped: AtomicU64,
    pub started: AtomicU64,
    pub settled: AtomicU64,
    pub aborted: AtomicU64,
    pub deliveries: AtomicU64,
    pub stage_failures: AtomicU64,
    pub peak_active: AtomicUsize,
}

/// State shared by the scheduler front end, the control loop and every
/// running pipeline.
pub(crate) struct Core {
    pub config: SchedulerConfig,
    pub cache: ResultCache,
    pub subscriptions: SubscriptionRegistry,
    pub tracker: Arc<InFlightTracker>,
    pub queue: WorkQueue,
    pub events: EventBus,
    pub source: Arc<dyn EntitySource>,
    pub refinements: Vec<Arc<dyn Refinement>>,
    pub counters: Counters,
}

impl Core {
    /// Admission decision for a key whose debounce has elapsed.
    pub fn admit(&self, key: &ItemKey) -> AdmitOutcome {
        let outcome = self.queue.admit(key, &self.cache, &self.tracker);
        match outcome {
            AdmitOutcome::Queued => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            AdmitOutcome::AlreadyQueued | AdmitOutcome::Cached | AdmitOutcome::InFlight => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(%key, outcome = outcome.as_str(), "admission");
        metrics::admissions().add(1, &[KeyValue::new("outcome", outcome.as_str())]);
        self.events.emit(EventKind::Admitted {
            key: key.clone(),
            outcome,
        });
        outcome
    }
}
