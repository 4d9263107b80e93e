//! Integration tests for telemetry initialization and span helpers.

use enrichq::model::{ItemKey, PipelineState};
use enrichq::telemetry::pipeline::{record_state_transition, start_pipeline_span};
use enrichq::telemetry::{TelemetryConfig, init_telemetry};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second init
    // returning Err is acceptable.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "enrichq-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = init_telemetry(config);
}

#[test]
fn pipeline_span_records_transitions() {
    let span = start_pipeline_span(&ItemKey::from("abc"));
    record_state_transition(&span, PipelineState::Idle, PipelineState::InFlight);
    record_state_transition(&span, PipelineState::InFlight, PipelineState::PartiallyDelivered);
}

#[test]
fn telemetry_config_defaults() {
    let config = TelemetryConfig::default();
    assert_eq!(config.service_name, "enrichq");
    assert_eq!(config.log_level, "info");
    assert!(config.endpoint.is_none());
}
