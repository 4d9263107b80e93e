//! Remote metadata providers and the cached lookups built on them.
//!
//! Each provider is an opaque async service behind a trait. Every call is
//! made through [`cached_lookup`], which bounds it with its own timeout,
//! classifies the answer as found / miss / failed, and remembers it by
//! `(provider, kind, external id)` so the same question is never asked twice.

pub mod catalog;
pub mod chain;
pub mod tmdb;
pub mod tvmaze;

pub use catalog::{Catalog, CatalogTimeouts};
pub use chain::{FallbackChain, LookupStrategy};

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{Cached, Lookup, ProviderCache};
use crate::error::Result;
use crate::model::ExternalSource;
use crate::telemetry::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Tmdb,
    TvMaze,
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderId::Tmdb => "tmdb",
            ProviderId::TvMaze => "tvmaze",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    /// External id → provider's own show id.
    ShowId,
    /// Show id → status and season snapshot.
    ShowDetails,
    /// (show id, season) → planned episode count.
    SeasonEpisodeCount,
}

impl std::fmt::Display for LookupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LookupKind::ShowId => "show_id",
            LookupKind::ShowDetails => "show_details",
            LookupKind::SeasonEpisodeCount => "season_episode_count",
        };
        write!(f, "{s}")
    }
}

/// Provider cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    pub provider: ProviderId,
    pub kind: LookupKind,
    pub external_id: String,
}

impl LookupKey {
    pub fn new(provider: ProviderId, kind: LookupKind, external_id: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            external_id: external_id.into(),
        }
    }

    /// Key for resolving a show from an identifier in another catalogue.
    pub fn show_id(provider: ProviderId, source: ExternalSource, id: &str) -> Self {
        Self::new(provider, LookupKind::ShowId, format!("{source}:{id}"))
    }

    pub fn season(provider: ProviderId, show: u64, season: u32) -> Self {
        Self::new(provider, LookupKind::SeasonEpisodeCount, format!("{show}:{season}"))
    }
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.kind, self.external_id)
    }
}

// ---------------------------------------------------------------------------
// Provider traits
// ---------------------------------------------------------------------------

/// One season as listed in a show snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonSummary {
    pub number: u32,
    pub episode_count: Option<u32>,
}

/// Show status plus the season list returned by the same call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShowDetails {
    pub status: Option<String>,
    pub seasons: Option<Vec<SeasonSummary>>,
}

impl ShowDetails {
    pub fn season_episode_count(&self, season: u32) -> Option<u32> {
        self.seasons
            .as_ref()?
            .iter()
            .find(|s| s.number == season)
            .and_then(|s| s.episode_count)
    }
}

/// "ended", "canceled" and "cancelled" all mean the show is finished.
pub fn is_ended_status(status: &str) -> bool {
    matches!(
        status.trim().to_lowercase().as_str(),
        "ended" | "canceled" | "cancelled"
    )
}

/// A show catalogue that can resolve foreign ids and report status and
/// season sizes (TMDb-shaped).
///
/// `Ok(None)` is a definite miss; `Err` is a failure.
#[async_trait]
pub trait ShowDirectory: Send + Sync {
    async fn find_show(&self, source: ExternalSource, id: &str) -> Result<Option<u64>>;
    async fn show_details(&self, show: u64) -> Result<Option<ShowDetails>>;
    async fn season_episode_count(&self, show: u64, season: u32) -> Result<Option<u32>>;
}

/// An episode guide that can resolve foreign ids and report planned season
/// sizes (TVMaze-shaped).
#[async_trait]
pub trait EpisodeGuide: Send + Sync {
    async fn lookup_show(&self, source: ExternalSource, id: &str) -> Result<Option<u64>>;
    async fn season_episode_order(&self, show: u64, season: u32) -> Result<Option<u32>>;
}

// ---------------------------------------------------------------------------
// Cached, bounded lookup
// ---------------------------------------------------------------------------

/// Run one remote lookup through the cache.
///
/// A cached answer short-circuits the call. Otherwise `fetch` runs under
/// `timeout`; errors and timeouts become [`Lookup::Failed`]. Every outcome
/// is recorded so a miss is never re-asked.
pub async fn cached_lookup<V, F>(
    cache: &ProviderCache<LookupKey, V>,
    key: LookupKey,
    timeout: Duration,
    fetch: F,
) -> Lookup<V>
where
    V: Clone,
    F: Future<Output = Result<Option<V>>>,
{
    if let Some(cached) = cache.get(&key) {
        debug!(lookup = %key, "provider cache hit");
        return match cached {
            Cached::Found(v) => Lookup::Found(v),
            Cached::Miss => Lookup::Miss,
        };
    }

    let start = Instant::now();
    let outcome = match tokio::time::timeout(timeout, fetch).await {
        Ok(Ok(Some(value))) => Lookup::Found(value),
        Ok(Ok(None)) => Lookup::Miss,
        Ok(Err(e)) => {
            warn!(lookup = %key, error = %e, "provider lookup failed");
            Lookup::Failed
        }
        Err(_) => {
            warn!(
                lookup = %key,
                timeout_ms = timeout.as_millis() as u64,
                "provider lookup timed out"
            );
            Lookup::Failed
        }
    };

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    debug!(lookup = %key, outcome = outcome.outcome(), elapsed_ms, "provider lookup");
    metrics::provider_lookups().add(
        1,
        &[
            KeyValue::new("provider", key.provider.to_string()),
            KeyValue::new("kind", key.kind.to_string()),
            KeyValue::new("outcome", outcome.outcome()),
        ],
    );

    cache.record(key, &outcome);
    outcome
}
