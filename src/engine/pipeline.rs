//! Enrichment pipeline: one run per admitted key.
//!
//! The primary stage fetches the entity (and a representative member for
//! containers), derives the technical fields and delivers a first record,
//! empty if the fetch failed. A failed fetch is delivered but not cached.
//! Refinement stages then run concurrently; each result is merged into
//! whatever the cache holds at completion time and re-broadcast as an
//! update. A failing stage contributes nothing and never disturbs its
//! siblings.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::Core;
use super::tracker::InFlightGuard;
use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::media;
use crate::model::{
    DeliveryKind, EnrichmentRecord, Entity, Field, FieldPatch, ItemKey, ItemKind, PipelineState,
};
use crate::source::EntitySource;
use crate::telemetry::metrics;
use crate::telemetry::pipeline::{record_state_transition, start_pipeline_span};

/// Everything a refinement stage gets to work with.
#[derive(Clone)]
pub struct StageInput {
    pub user: String,
    pub entity: Arc<Entity>,
    pub source: Arc<dyn EntitySource>,
    /// Per-call timeout for entity source requests.
    pub entity_timeout: Duration,
}

/// One asynchronous refinement of a primary record.
///
/// A stage owns a disjoint set of fields and reports them as patches.
/// `Err` means the stage failed; its fields are left untouched.
#[async_trait]
pub trait Refinement: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this stage has anything to do for the entity as delivered.
    fn applies_to(&self, entity: &Entity, record: &EnrichmentRecord) -> bool;

    async fn refine(&self, input: &StageInput) -> Result<Vec<FieldPatch>>;
}

/// Run `fut` with its own deadline; elapsing is an [`Error::Timeout`].
pub async fn bounded<T>(
    operation: &str,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Drive one key from `InFlight` to `Settled` (or back to `Idle`).
///
/// The guard is consumed; the key leaves the tracker when this returns.
pub(crate) async fn run(core: Arc<Core>, mut guard: InFlightGuard) {
    let key = guard.key().clone();
    let span = start_pipeline_span(&key);
    let started = Instant::now();
    core.counters.started.fetch_add(1, Ordering::Relaxed);

    async {
        let Some(user) = core.source.current_user() else {
            warn!("no active session, aborting before any remote call");
            advance(&core, &mut guard, &span, PipelineState::Idle);
            core.counters.aborted.fetch_add(1, Ordering::Relaxed);
            metrics::pipeline_runs().add(1, &[KeyValue::new("result", "aborted")]);
            core.events.emit(EventKind::Aborted {
                key: key.clone(),
                reason: Error::NoSession.to_string(),
            });
            return;
        };

        // --- Primary ---
        let (entity, record) = match primary(&core, &user, &key).await {
            Primary::Fetched(entity, record) => {
                (entity, core.cache.insert_primary(&key, record))
            }
            // Delivered but not cached, so a later relevance event retries.
            Primary::Failed => (None, EnrichmentRecord::default()),
        };
        advance(&core, &mut guard, &span, PipelineState::PartiallyDelivered);
        deliver(&core, &key, DeliveryKind::First, &record, record.fields());

        // --- Refinements ---
        let stages: Vec<Arc<dyn Refinement>> = match &entity {
            Some(entity) => core
                .refinements
                .iter()
                .filter(|stage| stage.applies_to(entity, &record))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        if let (Some(entity), false) = (entity, stages.is_empty()) {
            advance(&core, &mut guard, &span, PipelineState::Refining);
            refine(&core, &key, user, Arc::new(entity), stages).await;
        }

        advance(&core, &mut guard, &span, PipelineState::Settled);
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(duration_ms, "pipeline settled");
        core.counters.settled.fetch_add(1, Ordering::Relaxed);
        metrics::pipeline_runs().add(1, &[KeyValue::new("result", "settled")]);
        core.events.emit(EventKind::Settled {
            key: key.clone(),
            duration_ms,
        });
    }
    .instrument(span.clone())
    .await
}

/// Outcome of the primary stage.
enum Primary {
    /// The source answered. `None` is a definite not-found, cached as an
    /// empty record.
    Fetched(Option<Entity>, EnrichmentRecord),
    /// The fetch errored or timed out.
    Failed,
}

/// Primary fetch. A fetch error still delivers an empty record upstream.
async fn primary(core: &Core, user: &str, key: &ItemKey) -> Primary {
    let timeout = core.config.entity_timeout();
    let entity = match bounded("get_entity", timeout, core.source.get_entity(user, key)).await {
        Ok(Some(entity)) => entity,
        Ok(None) => {
            debug!("entity not found, delivering empty record");
            return Primary::Fetched(None, EnrichmentRecord::default());
        }
        Err(e) => {
            warn!(error = %e, "entity fetch failed, delivering uncached empty record");
            return Primary::Failed;
        }
    };

    let member = match entity.kind.member_kind() {
        Some(kind) => representative(core, user, &entity, kind).await,
        None => None,
    };
    let record = media::derive_record(&entity, member.as_ref(), core.config.media_options());
    Primary::Fetched(Some(entity), record)
}

/// Full description of a container's first member, if it has one.
async fn representative(core: &Core, user: &str, container: &Entity, kind: ItemKind) -> Option<Entity> {
    let timeout = core.config.entity_timeout();
    let member_key = match bounded(
        "representative_member",
        timeout,
        core.source.representative_member(user, &container.key, kind),
    )
    .await
    {
        Ok(Some(member)) => member,
        Ok(None) => {
            debug!(kind = ?container.kind, "container has no members");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "member lookup failed");
            return None;
        }
    };

    match bounded("get_entity", timeout, core.source.get_entity(user, &member_key)).await {
        Ok(member) => member,
        Err(e) => {
            warn!(member = %member_key, error = %e, "member fetch failed");
            None
        }
    }
}

async fn refine(
    core: &Core,
    key: &ItemKey,
    user: String,
    entity: Arc<Entity>,
    stages: Vec<Arc<dyn Refinement>>,
) {
    let input = StageInput {
        user,
        entity,
        source: Arc::clone(&core.source),
        entity_timeout: core.config.entity_timeout(),
    };

    let mut running = JoinSet::new();
    for stage in stages {
        let input = input.clone();
        running.spawn(
            async move {
                let start = Instant::now();
                let result = stage.refine(&input).await;
                (stage.name().to_string(), result, start.elapsed())
            }
            .instrument(Span::current()),
        );
    }

    while let Some(joined) = running.join_next().await {
        let (stage, result, elapsed) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "refinement task did not complete");
                continue;
            }
        };
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        metrics::stage_duration_ms().record(elapsed_ms, &[KeyValue::new("stage", stage.clone())]);

        match result {
            Ok(patches) => {
                debug!(stage = %stage, patches = patches.len(), elapsed_ms, "stage finished");
                if patches.is_empty() {
                    continue;
                }
                // Merge against the record as it is now, not as it was when
                // the stage started.
                let Some((record, changed)) = core.cache.merge(key, &patches) else {
                    continue;
                };
                if !changed.is_empty() {
                    deliver(core, key, DeliveryKind::Update, &record, changed);
                }
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, elapsed_ms, "stage failed");
                core.counters.stage_failures.fetch_add(1, Ordering::Relaxed);
                metrics::stage_failures().add(1, &[KeyValue::new("stage", stage.clone())]);
                core.events.emit(EventKind::StageFailed {
                    key: key.clone(),
                    stage,
                    error: e.to_string(),
                });
            }
        }
    }
}

fn deliver(
    core: &Core,
    key: &ItemKey,
    kind: DeliveryKind,
    record: &EnrichmentRecord,
    changed: Vec<Field>,
) {
    let subscribers = core
        .subscriptions
        .broadcast(key, kind, record, changed.clone());
    core.counters
        .deliveries
        .fetch_add(subscribers as u64, Ordering::Relaxed);
    let label = match kind {
        DeliveryKind::First => "first",
        DeliveryKind::Update => "update",
    };
    metrics::deliveries().add(subscribers as u64, &[KeyValue::new("kind", label)]);
    debug!(?kind, subscribers, ?changed, "delivered");
    core.events.emit(EventKind::Delivered {
        key: key.clone(),
        delivery: kind,
        subscribers,
        changed,
    });
}

fn advance(core: &Core, guard: &mut InFlightGuard, span: &Span, to: PipelineState) {
    match guard.transition(to) {
        Ok(from) => {
            record_state_transition(span, from, to);
            core.events.emit(EventKind::StateTransition {
                key: guard.key().clone(),
                from,
                to,
            });
        }
        Err(e) => error!(error = %e, "illegal pipeline transition"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_maps_elapsed_to_timeout() {
        let err = bounded("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        match err {
            Error::Timeout {
                operation,
                timeout_ms,
            } => {
                assert_eq!(operation, "slow");
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bounded_passes_through_result() {
        let value = bounded("fast", Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
