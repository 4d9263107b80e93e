//! Catalog: the refinement-facing view of all providers.
//!
//! Wires the provider clients, their caches and the fallback chains that
//! answer "is this series finished?" and "how many episodes will this
//! season have?".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::chain::{FallbackChain, LookupStrategy};
use super::{
    EpisodeGuide, LookupKey, LookupKind, ProviderId, ShowDetails, ShowDirectory, cached_lookup,
};
use crate::cache::{Lookup, ProviderCache};
use crate::model::{ExternalSource, ProviderIds};

/// Per-provider call timeouts.
#[derive(Debug, Clone, Copy)]
pub struct CatalogTimeouts {
    pub tmdb_find: Duration,
    pub tmdb: Duration,
    pub tvmaze: Duration,
}

impl Default for CatalogTimeouts {
    fn default() -> Self {
        Self {
            tmdb_find: Duration::from_millis(3000),
            tmdb: Duration::from_millis(3500),
            tvmaze: Duration::from_millis(3000),
        }
    }
}

/// A season of a show identified only by external ids.
#[derive(Debug, Clone)]
pub struct SeasonQuery {
    pub ids: ProviderIds,
    pub season: u32,
}

// ---------------------------------------------------------------------------
// Shared provider state
// ---------------------------------------------------------------------------

struct TmdbState {
    directory: Arc<dyn ShowDirectory>,
    show_ids: ProviderCache<LookupKey, u64>,
    details: ProviderCache<LookupKey, ShowDetails>,
    season_counts: ProviderCache<LookupKey, u32>,
    timeouts: CatalogTimeouts,
}

impl TmdbState {
    async fn details(&self, show: u64) -> Lookup<ShowDetails> {
        let key = LookupKey::new(ProviderId::Tmdb, LookupKind::ShowDetails, show.to_string());
        cached_lookup(
            &self.details,
            key,
            self.timeouts.tmdb,
            self.directory.show_details(show),
        )
        .await
    }

    /// Season size from the show snapshot, falling back to the season endpoint.
    async fn season_count(&self, show: u64, season: u32) -> Lookup<u32> {
        let key = LookupKey::season(ProviderId::Tmdb, show, season);
        if let Some(details) = self.details(show).await.found() {
            if let Some(count) = details.season_episode_count(season) {
                self.season_counts.put(key, count);
                return Lookup::Found(count);
            }
        }
        cached_lookup(
            &self.season_counts,
            key,
            self.timeouts.tmdb,
            self.directory.season_episode_count(show, season),
        )
        .await
    }
}

struct TvMazeState {
    guide: Arc<dyn EpisodeGuide>,
    show_ids: ProviderCache<LookupKey, u64>,
    season_orders: ProviderCache<LookupKey, u32>,
    timeout: Duration,
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// TMDb id already embedded in the entity; no remote call.
struct EmbeddedTmdbId {
    state: Arc<TmdbState>,
}

#[async_trait]
impl LookupStrategy<ProviderIds, u64> for EmbeddedTmdbId {
    fn name(&self) -> &str {
        "tmdb:embedded"
    }

    async fn attempt(&self, ids: &ProviderIds) -> Lookup<u64> {
        let Some(raw) = ids.get(ExternalSource::Tmdb) else {
            return Lookup::Miss;
        };
        match raw.parse::<u64>() {
            Ok(id) => {
                self.state.show_ids.put(
                    LookupKey::show_id(ProviderId::Tmdb, ExternalSource::Tmdb, raw),
                    id,
                );
                Lookup::Found(id)
            }
            Err(_) => Lookup::Miss,
        }
    }
}

/// TMDb `/find` by a foreign identifier.
struct TmdbFind {
    state: Arc<TmdbState>,
    source: ExternalSource,
    name: String,
}

#[async_trait]
impl LookupStrategy<ProviderIds, u64> for TmdbFind {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, ids: &ProviderIds) -> Lookup<u64> {
        let Some(id) = ids.get(self.source) else {
            return Lookup::Miss;
        };
        cached_lookup(
            &self.state.show_ids,
            LookupKey::show_id(ProviderId::Tmdb, self.source, id),
            self.state.timeouts.tmdb_find,
            self.state.directory.find_show(self.source, id),
        )
        .await
    }
}

/// TVMaze `/lookup/shows` by a foreign identifier.
struct TvMazeLookup {
    state: Arc<TvMazeState>,
    source: ExternalSource,
    name: String,
}

#[async_trait]
impl LookupStrategy<ProviderIds, u64> for TvMazeLookup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, ids: &ProviderIds) -> Lookup<u64> {
        let Some(id) = ids.get(self.source) else {
            return Lookup::Miss;
        };
        cached_lookup(
            &self.state.show_ids,
            LookupKey::show_id(ProviderId::TvMaze, self.source, id),
            self.state.timeout,
            self.state.guide.lookup_show(self.source, id),
        )
        .await
    }
}

/// Planned season size from TMDb.
struct TmdbSeasonCount {
    state: Arc<TmdbState>,
    show_ids: Arc<FallbackChain<ProviderIds, u64>>,
}

#[async_trait]
impl LookupStrategy<SeasonQuery, u32> for TmdbSeasonCount {
    fn name(&self) -> &str {
        "tmdb:season"
    }

    async fn attempt(&self, query: &SeasonQuery) -> Lookup<u32> {
        let Some(show) = self.show_ids.resolve(&query.ids).await else {
            return Lookup::Miss;
        };
        positive(self.state.season_count(show.value, query.season).await)
    }
}

/// Planned season size from TVMaze's episode order.
struct TvMazeEpisodeOrder {
    state: Arc<TvMazeState>,
    show_ids: Arc<FallbackChain<ProviderIds, u64>>,
}

#[async_trait]
impl LookupStrategy<SeasonQuery, u32> for TvMazeEpisodeOrder {
    fn name(&self) -> &str {
        "tvmaze:episode_order"
    }

    async fn attempt(&self, query: &SeasonQuery) -> Lookup<u32> {
        let Some(show) = self.show_ids.resolve(&query.ids).await else {
            return Lookup::Miss;
        };
        let outcome = cached_lookup(
            &self.state.season_orders,
            LookupKey::season(ProviderId::TvMaze, show.value, query.season),
            self.state.timeout,
            self.state.guide.season_episode_order(show.value, query.season),
        )
        .await;
        positive(outcome)
    }
}

/// A zero-sized season is no answer; let the next strategy try.
fn positive(outcome: Lookup<u32>) -> Lookup<u32> {
    match outcome {
        Lookup::Found(0) => Lookup::Miss,
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub struct Catalog {
    tmdb: Option<Arc<TmdbState>>,
    tmdb_show_ids: Arc<FallbackChain<ProviderIds, u64>>,
    planned: FallbackChain<SeasonQuery, u32>,
}

impl Catalog {
    /// Build a catalog. Either provider may be absent (disabled or
    /// unconfigured); its strategies are then left out of every chain.
    pub fn new(
        tmdb: Option<Arc<dyn ShowDirectory>>,
        tvmaze: Option<Arc<dyn EpisodeGuide>>,
        timeouts: CatalogTimeouts,
    ) -> Self {
        let tmdb = tmdb.map(|directory| {
            Arc::new(TmdbState {
                directory,
                show_ids: ProviderCache::new(),
                details: ProviderCache::new(),
                season_counts: ProviderCache::new(),
                timeouts,
            })
        });
        let tvmaze = tvmaze.map(|guide| {
            Arc::new(TvMazeState {
                guide,
                show_ids: ProviderCache::new(),
                season_orders: ProviderCache::new(),
                timeout: timeouts.tvmaze,
            })
        });

        let mut tmdb_show_ids = FallbackChain::new("tmdb_show_id");
        if let Some(state) = &tmdb {
            tmdb_show_ids = tmdb_show_ids.then(Arc::new(EmbeddedTmdbId {
                state: Arc::clone(state),
            }));
            for source in [ExternalSource::Tvdb, ExternalSource::Imdb] {
                tmdb_show_ids = tmdb_show_ids.then(Arc::new(TmdbFind {
                    state: Arc::clone(state),
                    source,
                    name: format!("tmdb:find:{source}"),
                }));
            }
        }
        let tmdb_show_ids = Arc::new(tmdb_show_ids);

        let mut planned = FallbackChain::new("season_planned");
        if let Some(state) = &tmdb {
            planned = planned.then(Arc::new(TmdbSeasonCount {
                state: Arc::clone(state),
                show_ids: Arc::clone(&tmdb_show_ids),
            }));
        }
        if let Some(state) = &tvmaze {
            let mut show_ids = FallbackChain::new("tvmaze_show_id");
            for source in [ExternalSource::Tvdb, ExternalSource::Imdb] {
                show_ids = show_ids.then(Arc::new(TvMazeLookup {
                    state: Arc::clone(state),
                    source,
                    name: format!("tvmaze:lookup:{source}"),
                }));
            }
            planned = planned.then(Arc::new(TvMazeEpisodeOrder {
                state: Arc::clone(state),
                show_ids: Arc::new(show_ids),
            }));
        }

        Self {
            tmdb,
            tmdb_show_ids,
            planned,
        }
    }

    /// A catalog with no providers; every lookup misses.
    pub fn empty() -> Self {
        Self::new(None, None, CatalogTimeouts::default())
    }

    pub fn has_status_source(&self) -> bool {
        self.tmdb.is_some()
    }

    pub fn has_planned_source(&self) -> bool {
        !self.planned.is_empty()
    }

    /// Show status string as reported by TMDb.
    ///
    /// `Miss` covers every way of not knowing: no resolvable id, a failed
    /// call, or a show without a status.
    pub async fn series_status(&self, ids: &ProviderIds) -> Lookup<String> {
        let Some(state) = &self.tmdb else {
            return Lookup::Miss;
        };
        let Some(show) = self.tmdb_show_ids.resolve(ids).await else {
            return Lookup::Miss;
        };
        match state.details(show.value).await.map(|details| details.status) {
            Lookup::Found(Some(status)) => Lookup::Found(status),
            Lookup::Found(None) | Lookup::Miss => Lookup::Miss,
            Lookup::Failed => Lookup::Failed,
        }
    }

    /// Planned episode count for a season, first positive answer wins.
    pub async fn planned_episodes(&self, ids: &ProviderIds, season: u32) -> Option<u32> {
        let query = SeasonQuery {
            ids: ids.clone(),
            season,
        };
        self.planned.resolve(&query).await.map(|r| r.value)
    }
}
