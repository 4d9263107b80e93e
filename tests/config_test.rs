use enrichq::config::{Config, SchedulerConfig};
use enrichq::error::Error;

// Environment variables are process-wide; keep every env assertion in one
// test so parallel tests cannot interleave.
#[test]
fn config_from_env_requires_server_settings() {
    unsafe {
        std::env::remove_var("MEDIA_SERVER_URL");
        std::env::remove_var("MEDIA_SERVER_TOKEN");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("MEDIA_SERVER_URL", "http://localhost:8096");
        std::env::set_var("MEDIA_SERVER_TOKEN", "token-test");
        std::env::set_var("TMDB_API_KEY", "   ");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.media_server_url, "http://localhost:8096");
    assert!(config.tmdb_api_key.is_none());
    assert!(!config.log_level.is_empty());
    assert!(!config.tmdb_language.is_empty());

    unsafe {
        std::env::remove_var("MEDIA_SERVER_URL");
        std::env::remove_var("MEDIA_SERVER_TOKEN");
        std::env::remove_var("TMDB_API_KEY");
    }
}

#[test]
fn scheduler_config_defaults_from_empty_toml() {
    let config = SchedulerConfig::from_toml("").unwrap();
    assert_eq!(config.max_concurrency, 6);
    assert_eq!(config.fallback_deadline_ms, 1200);
    assert_eq!(config.visible_delay_ms, 150);
    assert_eq!(config.hover_delay_ms, 80);
    assert!(config.refinements.season_planned);
    assert!(!config.show_dv_profile);
}

#[test]
fn scheduler_config_overrides() {
    let config = SchedulerConfig::from_toml(
        r#"
max_concurrency = 2
tick_interval_ms = 50
show_dv_profile = true

[refinements]
tvmaze = false
"#,
    )
    .unwrap();
    assert_eq!(config.max_concurrency, 2);
    assert_eq!(config.tick_interval().as_millis(), 50);
    assert!(config.media_options().show_dv_profile);
    assert!(!config.refinements.tvmaze);
    assert!(config.refinements.tmdb);
}

#[test]
fn scheduler_config_rejects_bad_values() {
    match SchedulerConfig::from_toml("max_concurrency = 0") {
        Err(Error::Config(msg)) => assert!(msg.contains("max_concurrency")),
        other => panic!("expected Config error, got {other:?}"),
    }
    match SchedulerConfig::from_toml("no_such_knob = 1") {
        Err(Error::Config(_)) => {}
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn scheduler_config_load_reports_missing_file() {
    let err = SchedulerConfig::load(std::path::Path::new("/nonexistent/enrichq.toml")).unwrap_err();
    assert!(err.to_string().contains("cannot read scheduler config"));
}
