//! Typed configuration.
//!
//! Connection settings and secrets come from environment variables, loaded
//! once at startup; fails fast if required vars are missing. Scheduler tuning
//! comes from an optional TOML file and falls back to built-in defaults.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use crate::media::MediaOptions;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub media_server_url: String,
    pub media_server_token: SecretString,
    /// Absent means there is no active session; pipelines abort before any
    /// remote call.
    pub media_server_user_id: Option<String>,
    /// Absent disables every TMDb lookup strategy.
    pub tmdb_api_key: Option<SecretString>,
    pub tmdb_language: String,
    pub scheduler_config: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            media_server_url: required_var("MEDIA_SERVER_URL")?,
            media_server_token: SecretString::from(required_var("MEDIA_SERVER_TOKEN")?),
            media_server_user_id: optional_var("MEDIA_SERVER_USER_ID"),
            tmdb_api_key: optional_var("TMDB_API_KEY").map(SecretString::from),
            tmdb_language: optional_var("TMDB_LANGUAGE").unwrap_or_else(|| "en-US".to_string()),
            scheduler_config: optional_var("ENRICHQ_CONFIG").map(PathBuf::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Scheduler settings from `ENRICHQ_CONFIG`, or defaults when unset.
    pub fn scheduler(&self) -> Result<SchedulerConfig> {
        match &self.scheduler_config {
            Some(path) => SchedulerConfig::load(path),
            None => Ok(SchedulerConfig::default()),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Static scheduler tuning. All durations are milliseconds in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Soft delay for an item that became visible before its artwork loaded.
    pub visible_delay_ms: u64,
    /// Soft delay for a pointer hover.
    pub hover_delay_ms: u64,
    /// Hard ceiling after which a scheduled key is admitted regardless.
    pub fallback_deadline_ms: u64,
    pub max_concurrency: usize,
    pub tick_interval_ms: u64,
    /// Per-call timeout for media server requests.
    pub entity_timeout_ms: u64,
    /// TMDb find-by-external-id timeout.
    pub tmdb_find_timeout_ms: u64,
    /// TMDb show/season detail timeout.
    pub tmdb_timeout_ms: u64,
    pub tvmaze_timeout_ms: u64,
    pub show_dv_profile: bool,
    pub refinements: RefinementFlags,
}

/// Per-refinement enable flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefinementFlags {
    pub series_ended: bool,
    pub season_current: bool,
    pub season_planned: bool,
    pub tmdb: bool,
    pub tvmaze: bool,
}

impl Default for RefinementFlags {
    fn default() -> Self {
        Self {
            series_ended: true,
            season_current: true,
            season_planned: true,
            tmdb: true,
            tvmaze: true,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            visible_delay_ms: 150,
            hover_delay_ms: 80,
            fallback_deadline_ms: 1200,
            max_concurrency: 6,
            tick_interval_ms: 100,
            entity_timeout_ms: 5000,
            tmdb_find_timeout_ms: 3000,
            tmdb_timeout_ms: 3500,
            tvmaze_timeout_ms: 3000,
            show_dv_profile: false,
            refinements: RefinementFlags::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read scheduler config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad scheduler config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be at least 1".to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn visible_delay(&self) -> Duration {
        Duration::from_millis(self.visible_delay_ms)
    }

    pub fn hover_delay(&self) -> Duration {
        Duration::from_millis(self.hover_delay_ms)
    }

    pub fn fallback_deadline(&self) -> Duration {
        Duration::from_millis(self.fallback_deadline_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn entity_timeout(&self) -> Duration {
        Duration::from_millis(self.entity_timeout_ms)
    }

    pub fn tmdb_find_timeout(&self) -> Duration {
        Duration::from_millis(self.tmdb_find_timeout_ms)
    }

    pub fn tmdb_timeout(&self) -> Duration {
        Duration::from_millis(self.tmdb_timeout_ms)
    }

    pub fn tvmaze_timeout(&self) -> Duration {
        Duration::from_millis(self.tvmaze_timeout_ms)
    }

    pub fn media_options(&self) -> MediaOptions {
        MediaOptions {
            show_dv_profile: self.show_dv_profile,
        }
    }
}
