//! The scheduler front end.
//!
//! One `Scheduler` owns every cache, registry and queue it uses; there is
//! no process-wide state. Clones share the same instance.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::admission::{Admission, AdmitFn, Scheduled};
use super::control::ControlLoop;
use super::pipeline::Refinement;
use super::queue::WorkQueue;
use super::tracker::InFlightTracker;
use super::{Core, Counters, stages};
use crate::cache::ResultCache;
use crate::config::{Config, SchedulerConfig};
use crate::error::Result;
use crate::event::{Event, EventBus, EventKind};
use crate::model::{EnrichmentRecord, ItemKey, PipelineState, SubscriberId, Urgency};
use crate::provider::tmdb::TmdbClient;
use crate::provider::tvmaze::TvMazeClient;
use crate::provider::{Catalog, CatalogTimeouts, EpisodeGuide, ShowDirectory};
use crate::source::{EntitySource, MediaServerClient};
use crate::subscription::{PresentationSink, SubscriptionRegistry};

/// Point-in-time counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Keys appended to the work queue.
    pub queued: u64,
    /// Admissions dropped as cached, running or already queued.
    pub dropped: u64,
    pub pipelines_started: u64,
    pub pipelines_settled: u64,
    pub pipelines_aborted: u64,
    /// Individual sink deliveries.
    pub deliveries: u64,
    pub stage_failures: u64,
    pub active: usize,
    pub peak_active: usize,
    pub pending_admissions: usize,
    pub queue_len: usize,
    pub cached: usize,
}

pub struct SchedulerBuilder {
    config: SchedulerConfig,
    source: Arc<dyn EntitySource>,
    catalog: Arc<Catalog>,
    builtin: bool,
    extra: Vec<Arc<dyn Refinement>>,
    event_capacity: usize,
}

impl SchedulerBuilder {
    /// Providers used by the built-in refinement stages.
    pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Add a refinement stage after the built-in ones.
    pub fn refinement(mut self, stage: Arc<dyn Refinement>) -> Self {
        self.extra.push(stage);
        self
    }

    /// Run only stages added with [`SchedulerBuilder::refinement`].
    pub fn without_builtin_refinements(mut self) -> Self {
        self.builtin = false;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Scheduler {
        let mut refinements = if self.builtin {
            stages::builtin(&self.config.refinements, &self.catalog)
        } else {
            Vec::new()
        };
        refinements.extend(self.extra);

        let core = Arc::new(Core {
            cache: ResultCache::new(),
            subscriptions: SubscriptionRegistry::new(),
            tracker: Arc::new(InFlightTracker::new()),
            queue: WorkQueue::new(),
            events: EventBus::new(self.event_capacity),
            source: self.source,
            refinements,
            counters: Counters::default(),
            config: self.config,
        });

        let admit_core = Arc::clone(&core);
        let admit: AdmitFn = Arc::new(move |key: ItemKey| {
            admit_core.admit(&key);
        });
        let admission = Admission::new(core.config.fallback_deadline(), admit);
        let control = ControlLoop::new(Arc::clone(&core));

        Scheduler {
            core,
            admission,
            control,
        }
    }
}

pub struct Scheduler {
    core: Arc<Core>,
    admission: Admission,
    control: ControlLoop,
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            admission: self.admission.clone(),
            control: self.control.clone(),
        }
    }
}

impl Scheduler {
    pub fn builder(config: SchedulerConfig, source: Arc<dyn EntitySource>) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            source,
            catalog: Arc::new(Catalog::empty()),
            builtin: true,
            extra: Vec::new(),
            event_capacity: 1024,
        }
    }

    pub fn new(config: SchedulerConfig, source: Arc<dyn EntitySource>, catalog: Arc<Catalog>) -> Self {
        Self::builder(config, source).catalog(catalog).build()
    }

    /// Wire the HTTP clients described by `config`.
    ///
    /// TMDb strategies are left out without an API key or when disabled;
    /// TVMaze strategies only when disabled.
    pub fn connect(config: &Config, scheduler: SchedulerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("enrichq/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let source: Arc<dyn EntitySource> = Arc::new(MediaServerClient::new(
            http.clone(),
            config.media_server_url.clone(),
            SecretString::from(config.media_server_token.expose_secret().to_string()),
            config.media_server_user_id.clone(),
        ));

        let flags = &scheduler.refinements;
        let tmdb: Option<Arc<dyn ShowDirectory>> = match (&config.tmdb_api_key, flags.tmdb) {
            (Some(key), true) if !key.expose_secret().is_empty() => Some(Arc::new(TmdbClient::new(
                http.clone(),
                SecretString::from(key.expose_secret().to_string()),
                Some(config.tmdb_language.clone()),
            ))),
            _ => None,
        };
        let tvmaze: Option<Arc<dyn EpisodeGuide>> = if flags.tvmaze {
            Some(Arc::new(TvMazeClient::new(http)))
        } else {
            None
        };
        info!(
            tmdb = tmdb.is_some(),
            tvmaze = tvmaze.is_some(),
            session = config.media_server_user_id.is_some(),
            "providers configured"
        );

        let catalog = Catalog::new(
            tmdb,
            tvmaze,
            CatalogTimeouts {
                tmdb_find: scheduler.tmdb_find_timeout(),
                tmdb: scheduler.tmdb_timeout(),
                tvmaze: scheduler.tvmaze_timeout(),
            },
        );
        Ok(Self::new(scheduler, source, Arc::new(catalog)))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    /// An item became relevant.
    ///
    /// Cached keys, and every key after [`Scheduler::shutdown`], are ignored
    /// outright. `Immediate` cancels any pending debounce and admits now;
    /// `Delayed` arms or coalesces a debounce.
    pub fn notify_relevant(&self, key: &ItemKey, urgency: Urgency) {
        if self.control.is_shut_down() {
            debug!(%key, "scheduler shut down, ignoring relevance");
            return;
        }
        if self.core.cache.contains(key) {
            debug!(%key, "relevant key already cached");
            return;
        }
        match urgency {
            Urgency::Immediate => {
                self.admission.cancel(key);
                self.core.admit(key);
            }
            Urgency::Delayed(delay) => {
                let scheduled = self.admission.schedule(key, delay);
                if scheduled != Scheduled::Coalesced {
                    self.core.events.emit(EventKind::Scheduled {
                        key: key.clone(),
                        delay_ms: delay.as_millis() as u64,
                    });
                }
            }
        }
    }

    /// Subscribe and signal relevance in one call.
    pub fn request(
        &self,
        key: &ItemKey,
        id: SubscriberId,
        sink: Arc<dyn PresentationSink>,
        urgency: Urgency,
    ) {
        self.register(key, id, sink);
        self.notify_relevant(key, urgency);
    }

    /// Add a subscriber; replays the cached record to it if there is one.
    pub fn register(&self, key: &ItemKey, id: SubscriberId, sink: Arc<dyn PresentationSink>) {
        self.core
            .subscriptions
            .register(key, id, sink, || self.core.cache.get(key));
    }

    pub fn unregister(&self, key: &ItemKey, id: SubscriberId) -> bool {
        self.core.subscriptions.unregister(key, id)
    }

    pub fn cached(&self, key: &ItemKey) -> Option<EnrichmentRecord> {
        self.core.cache.get(key)
    }

    /// Where `key` is in its lifecycle. A cached key with nothing running
    /// is settled.
    pub fn state_of(&self, key: &ItemKey) -> PipelineState {
        if let Some(state) = self.core.tracker.state_of(key) {
            return state;
        }
        if self.core.cache.contains(key) {
            PipelineState::Settled
        } else {
            PipelineState::Idle
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.core.counters;
        SchedulerStats {
            queued: c.queued.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            pipelines_started: c.started.load(Ordering::Relaxed),
            pipelines_settled: c.settled.load(Ordering::Relaxed),
            pipelines_aborted: c.aborted.load(Ordering::Relaxed),
            deliveries: c.deliveries.load(Ordering::Relaxed),
            stage_failures: c.stage_failures.load(Ordering::Relaxed),
            active: self.control.active(),
            peak_active: c.peak_active.load(Ordering::Relaxed),
            pending_admissions: self.admission.pending_count(),
            queue_len: self.core.queue.len(),
            cached: self.core.cache.len(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.control.is_shut_down()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.core.events.subscribe()
    }

    /// Run one control tick by hand. Returns pipelines started.
    pub fn tick(&self) -> usize {
        self.control.tick()
    }

    /// Run the control loop until [`Scheduler::shutdown`].
    pub async fn run(&self) -> Result<()> {
        self.control.run().await
    }

    /// Run the control loop on its own task.
    pub fn spawn(&self) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    /// Drop pending admissions, stop accepting relevance and stop the control
    /// loop. Pipelines already running are left to finish.
    pub fn shutdown(&self) {
        self.admission.cancel_all();
        self.control.shutdown();
    }
}
