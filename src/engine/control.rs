//! Control loop: drains the work queue on a fixed tick, bounded by
//! `max_concurrency` outstanding pipelines.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::{debug, info};

use super::{Core, pipeline};
use crate::error::Result;

/// Holds one slot of the concurrency budget for a pipeline's whole lifetime.
struct ActiveSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The tick loop: take keys off the queue, spawn pipelines.
pub struct ControlLoop {
    core: Arc<Core>,
    shutdown: Arc<Notify>,
    closed: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Clone for ControlLoop {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            shutdown: Arc::clone(&self.shutdown),
            closed: Arc::clone(&self.closed),
            active: Arc::clone(&self.active),
        }
    }
}

impl ControlLoop {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            shutdown: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Signal the loop to stop. Running pipelines finish on their own.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }

    /// True once [`ControlLoop::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pipelines currently holding a concurrency slot.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Run the tick loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let tick = self.core.config.tick_interval();
        info!(
            tick_ms = tick.as_millis() as u64,
            max_concurrency = self.core.config.max_concurrency,
            "control loop started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("control loop shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(tick) => {}
            }
            self.tick();
        }
    }

    /// Start as many queued pipelines as the budget allows. Returns how many
    /// were started.
    pub fn tick(&self) -> usize {
        let max = self.core.config.max_concurrency;
        let free = max.saturating_sub(self.active.load(Ordering::Acquire));
        if free == 0 {
            return 0;
        }

        let mut started = 0;
        for key in self.core.queue.take(free) {
            // Cached or running keys may have slipped in between admission
            // and now; the tracker is the final word.
            if self.core.cache.contains(&key) {
                debug!(%key, "skipping cached key");
                continue;
            }
            let Some(guard) = self.core.tracker.try_begin(&key) else {
                debug!(%key, "skipping in-flight key");
                continue;
            };

            let now_active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
            self.core
                .counters
                .peak_active
                .fetch_max(now_active, Ordering::AcqRel);
            let slot = ActiveSlot {
                active: Arc::clone(&self.active),
            };
            let core = Arc::clone(&self.core);
            tokio::spawn(async move {
                let _slot = slot;
                pipeline::run(core, guard).await;
            });
            started += 1;
        }

        if started > 0 {
            debug!(started, active = self.active(), queued = self.core.queue.len(), "tick");
        }
        started
    }
}
