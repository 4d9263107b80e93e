//! Shared fakes for integration tests: an in-memory entity source that
//! counts calls, fake providers, and a sink that records deliveries.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use enrichq::Scheduler;
use enrichq::config::SchedulerConfig;
use enrichq::error::{Error, Result};
use enrichq::model::{
    Delivery, Entity, ExternalSource, ItemKey, ItemKind, MediaSource, MediaStream, PipelineState,
    StreamKind,
};
use enrichq::provider::{EpisodeGuide, SeasonSummary, ShowDetails, ShowDirectory};
use enrichq::source::EntitySource;
use enrichq::subscription::PresentationSink;

// ---------------------------------------------------------------------------
// Entity source
// ---------------------------------------------------------------------------

pub struct MockSource {
    user: Option<String>,
    entities: HashMap<ItemKey, Entity>,
    members: HashMap<ItemKey, ItemKey>,
    child_counts: HashMap<ItemKey, u32>,
    latency: Duration,
    hang_child_count: bool,
    failures: Mutex<HashMap<ItemKey, usize>>,
    missing: Vec<ItemKey>,
    calls: AtomicUsize,
    get_calls: Mutex<HashMap<ItemKey, usize>>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            user: Some("user-1".to_string()),
            entities: HashMap::new(),
            members: HashMap::new(),
            child_counts: HashMap::new(),
            latency: Duration::from_millis(20),
            hang_child_count: false,
            failures: Mutex::new(HashMap::new()),
            missing: Vec::new(),
            calls: AtomicUsize::new(0),
            get_calls: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
        }
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.insert(entity.key.clone(), entity);
        self
    }

    pub fn with_member(mut self, container: &str, member: Entity) -> Self {
        self.members
            .insert(ItemKey::from(container), member.key.clone());
        self.with_entity(member)
    }

    pub fn with_child_count(mut self, key: &str, count: u32) -> Self {
        self.child_counts.insert(ItemKey::from(key), count);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn without_session(mut self) -> Self {
        self.user = None;
        self
    }

    pub fn hang_child_count(mut self) -> Self {
        self.hang_child_count = true;
        self
    }

    /// Fail the next `times` entity fetches for `key`, then answer normally.
    pub fn failing(self, key: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(ItemKey::from(key), times);
        self
    }

    /// Answer a definite not-found for `key`.
    pub fn missing(mut self, key: &str) -> Self {
        self.missing.push(ItemKey::from(key));
        self
    }

    /// Every remote call of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self, key: &str) -> usize {
        self.get_calls
            .lock()
            .unwrap()
            .get(&ItemKey::from(key))
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    async fn remote<T>(&self, value: T) -> T {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        value
    }
}

#[async_trait]
impl EntitySource for MockSource {
    fn current_user(&self) -> Option<String> {
        self.user.clone()
    }

    async fn get_entity(&self, _user: &str, key: &ItemKey) -> Result<Option<Entity>> {
        *self.get_calls.lock().unwrap().entry(key.clone()).or_default() += 1;
        let fail = match self.failures.lock().unwrap().get_mut(key) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        if fail {
            return self.remote(Err(Error::Other("502 bad gateway".into()))).await;
        }
        if self.missing.contains(key) {
            return self.remote(Ok(None)).await;
        }
        let entity = self
            .entities
            .get(key)
            .cloned()
            .unwrap_or_else(|| Entity::new(key.clone(), ItemKind::Other));
        self.remote(Ok(Some(entity))).await
    }

    async fn representative_member(
        &self,
        _user: &str,
        container: &ItemKey,
        _kind: ItemKind,
    ) -> Result<Option<ItemKey>> {
        let member = self.members.get(container).cloned();
        self.remote(Ok(member)).await
    }

    async fn child_count(&self, _user: &str, key: &ItemKey) -> Result<Option<u32>> {
        if self.hang_child_count {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        let count = self.child_counts.get(key).copied();
        self.remote(Ok(count)).await
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeTmdb {
    pub shows: HashMap<String, u64>,
    pub details: HashMap<u64, ShowDetails>,
    pub calls: AtomicUsize,
}

impl FakeTmdb {
    pub fn show(mut self, external: &str, id: u64, status: &str, seasons: &[(u32, u32)]) -> Self {
        self.shows.insert(external.to_string(), id);
        self.details.insert(
            id,
            ShowDetails {
                status: Some(status.to_string()),
                seasons: Some(
                    seasons
                        .iter()
                        .map(|&(number, count)| SeasonSummary {
                            number,
                            episode_count: Some(count),
                        })
                        .collect(),
                ),
            },
        );
        self
    }
}

#[async_trait]
impl ShowDirectory for FakeTmdb {
    async fn find_show(&self, _source: ExternalSource, id: &str) -> Result<Option<u64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.shows.get(id).copied())
    }

    async fn show_details(&self, show: u64) -> Result<Option<ShowDetails>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.details.get(&show).cloned())
    }

    async fn season_episode_count(&self, _show: u64, _season: u32) -> Result<Option<u32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

#[derive(Default)]
pub struct FakeTvMaze {
    pub orders: HashMap<(String, u32), u32>,
}

#[async_trait]
impl EpisodeGuide for FakeTvMaze {
    async fn lookup_show(&self, _source: ExternalSource, id: &str) -> Result<Option<u64>> {
        Ok(self.orders.keys().any(|(show, _)| show == id).then_some(1))
    }

    async fn season_episode_order(&self, _show: u64, season: u32) -> Result<Option<u32>> {
        Ok(self
            .orders
            .iter()
            .find(|((_, s), _)| *s == season)
            .map(|(_, &n)| n))
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl PresentationSink for RecordingSink {
    fn deliver(&self, delivery: &Delivery) {
        self.seen.lock().unwrap().push(delivery.clone());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        entity_timeout_ms: 1000,
        ..SchedulerConfig::default()
    }
}

pub fn movie(key: &str, height: u32) -> Entity {
    let mut video = MediaStream::new(StreamKind::Video);
    video.height = Some(height);
    let mut audio = MediaStream::new(StreamKind::Audio);
    audio.channels = Some(2);
    let mut entity = Entity::new(key, ItemKind::Movie);
    entity.media_sources = vec![MediaSource {
        container: Some("mkv".into()),
        streams: vec![video, audio],
        ..Default::default()
    }];
    entity
}

/// Wait (in paused time) until every key has settled. Panics after `limit`.
pub async fn settle(scheduler: &Scheduler, keys: &[&str], limit: Duration) {
    let step = scheduler.config().tick_interval();
    let mut waited = Duration::ZERO;
    loop {
        let done = keys
            .iter()
            .all(|k| scheduler.state_of(&ItemKey::from(*k)) == PipelineState::Settled)
            && scheduler.stats().active == 0;
        if done {
            return;
        }
        assert!(waited < limit, "keys did not settle within {limit:?}");
        tokio::time::sleep(step).await;
        waited += step;
    }
}
