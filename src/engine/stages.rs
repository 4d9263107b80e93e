//! Built-in refinement stages.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::pipeline::{Refinement, StageInput, bounded};
use crate::cache::Lookup;
use crate::config::RefinementFlags;
use crate::error::{Error, Result};
use crate::model::{EnrichmentRecord, Entity, Field, FieldPatch, FieldValue, ItemKind};
use crate::provider::{Catalog, is_ended_status};

/// Whether a series has finished airing, from its TMDb status.
///
/// An unknown status clears the field rather than guessing. A failed
/// lookup is a stage failure and leaves the record alone.
pub struct SeriesEnded {
    catalog: Arc<Catalog>,
}

impl SeriesEnded {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Refinement for SeriesEnded {
    fn name(&self) -> &str {
        "series_ended"
    }

    fn applies_to(&self, entity: &Entity, _record: &EnrichmentRecord) -> bool {
        entity.kind == ItemKind::Series && self.catalog.has_status_source()
    }

    async fn refine(&self, input: &StageInput) -> Result<Vec<FieldPatch>> {
        let patch = match self.catalog.series_status(&input.entity.provider_ids).await {
            Lookup::Found(status) => {
                debug!(%status, "series status");
                FieldPatch::Set(FieldValue::SeriesEnded(is_ended_status(&status)))
            }
            Lookup::Miss => FieldPatch::Clear(Field::SeriesEnded),
            Lookup::Failed => {
                return Err(Error::Other("series status lookup failed".to_string()));
            }
        };
        Ok(vec![patch])
    }
}

/// Episodes present in a season, for seasons the primary stage could not
/// count.
pub struct SeasonCurrent;

#[async_trait]
impl Refinement for SeasonCurrent {
    fn name(&self) -> &str {
        "season_current"
    }

    fn applies_to(&self, entity: &Entity, record: &EnrichmentRecord) -> bool {
        entity.kind == ItemKind::Season && record.season_current.is_none()
    }

    async fn refine(&self, input: &StageInput) -> Result<Vec<FieldPatch>> {
        let count = bounded(
            "child_count",
            input.entity_timeout,
            input.source.child_count(&input.user, &input.entity.key),
        )
        .await?;
        Ok(count
            .map(|n| FieldPatch::Set(FieldValue::SeasonCurrent(n)))
            .into_iter()
            .collect())
    }
}

/// Episodes planned for a season, from the owning series' external ids.
pub struct SeasonPlanned {
    catalog: Arc<Catalog>,
}

impl SeasonPlanned {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Refinement for SeasonPlanned {
    fn name(&self) -> &str {
        "season_planned"
    }

    fn applies_to(&self, entity: &Entity, _record: &EnrichmentRecord) -> bool {
        entity.kind == ItemKind::Season
            && entity.index_number.is_some()
            && entity.owning_series().is_some()
            && self.catalog.has_planned_source()
    }

    async fn refine(&self, input: &StageInput) -> Result<Vec<FieldPatch>> {
        let (Some(season), Some(series_key)) =
            (input.entity.index_number, input.entity.owning_series())
        else {
            return Ok(Vec::new());
        };

        let series = bounded(
            "get_entity",
            input.entity_timeout,
            input.source.get_entity(&input.user, series_key),
        )
        .await?;
        let Some(series) = series else {
            debug!(series = %series_key, "owning series not found");
            return Ok(Vec::new());
        };

        let planned = self
            .catalog
            .planned_episodes(&series.provider_ids, season)
            .await;
        Ok(planned
            .filter(|&n| n > 0)
            .map(|n| FieldPatch::Set(FieldValue::SeasonPlanned(n)))
            .into_iter()
            .collect())
    }
}

/// The enabled built-in stages, in declaration order.
pub fn builtin(flags: &RefinementFlags, catalog: &Arc<Catalog>) -> Vec<Arc<dyn Refinement>> {
    let mut stages: Vec<Arc<dyn Refinement>> = Vec::new();
    if flags.series_ended {
        stages.push(Arc::new(SeriesEnded::new(Arc::clone(catalog))));
    }
    if flags.season_current {
        stages.push(Arc::new(SeasonCurrent));
    }
    if flags.season_planned {
        stages.push(Arc::new(SeasonPlanned::new(Arc::clone(catalog))));
    }
    stages
}
