//! Pipeline span helpers.
//!
//! Provides span creation and state-transition recording for keys flowing
//! through the enrichment pipeline.

use tracing::Span;

use crate::model::{ItemKey, PipelineState};

/// Start a span for one pipeline run.
///
/// The `pipeline.state` field is declared empty and is updated by
/// [`record_state_transition`].
pub fn start_pipeline_span(key: &ItemKey) -> Span {
    tracing::info_span!(
        "pipeline.run",
        "pipeline.key" = %key,
        "pipeline.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the given span.
///
/// Emits a tracing `debug` event scoped to the span.
pub fn record_state_transition(span: &Span, from: PipelineState, to: PipelineState) {
    span.record("pipeline.state", tracing::field::display(to));
    span.in_scope(|| {
        tracing::debug!(%from, %to, "state_transition");
    });
}
