//! Metric instrument factories for enrichq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"enrichq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for enrichq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("enrichq")
}

/// Counter: admission decisions.
/// Labels: `outcome` ("queued" | "already_queued" | "cached" | "in_flight").
pub fn admissions() -> Counter<u64> {
    meter()
        .u64_counter("enrichq.admissions")
        .with_description("Number of admission decisions")
        .build()
}

/// Counter: pipeline runs by how they ended.
/// Labels: `result` ("settled" | "aborted").
pub fn pipeline_runs() -> Counter<u64> {
    meter()
        .u64_counter("enrichq.pipeline.runs")
        .with_description("Number of enrichment pipeline runs")
        .build()
}

/// Counter: deliveries to presentation sinks.
/// Labels: `kind` ("first" | "update").
pub fn deliveries() -> Counter<u64> {
    meter()
        .u64_counter("enrichq.deliveries")
        .with_description("Number of records delivered to subscribers")
        .build()
}

/// Counter: remote provider lookups that missed the cache.
/// Labels: `provider`, `kind`, `outcome` ("found" | "miss" | "failed").
pub fn provider_lookups() -> Counter<u64> {
    meter()
        .u64_counter("enrichq.provider.lookups")
        .with_description("Number of remote provider lookups")
        .build()
}

/// Counter: refinement stages that contributed nothing because of an error.
/// Labels: `stage`.
pub fn stage_failures() -> Counter<u64> {
    meter()
        .u64_counter("enrichq.stage.failures")
        .with_description("Number of failed refinement stages")
        .build()
}

/// Histogram: refinement stage duration in milliseconds.
/// Labels: `stage`.
pub fn stage_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("enrichq.stage.duration_ms")
        .with_description("Refinement stage duration in milliseconds")
        .with_unit("ms")
        .build()
}
