//! Debounced admission.
//!
//! Each scheduled key owns one timer task. The task admits the key at the
//! earlier of its soft due time and its hard deadline, which is fixed when
//! the task is first armed. Later `schedule` calls never push the due time
//! back; they can only pull it forward.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::model::ItemKey;

/// Called with a key once its timer fires.
pub type AdmitFn = Arc<dyn Fn(ItemKey) + Send + Sync>;

/// What `schedule` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// A new timer was armed.
    Armed,
    /// A timer was pending and kept as is.
    Coalesced,
    /// A timer was pending and moved earlier.
    Advanced,
}

struct Pending {
    generation: u64,
    due: Instant,
    reschedule: watch::Sender<Instant>,
    handle: JoinHandle<()>,
}

struct Inner {
    pending: Mutex<HashMap<ItemKey, Pending>>,
    generation: AtomicU64,
    fallback_deadline: Duration,
    admit: AdmitFn,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<ItemKey, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct Admission {
    inner: Arc<Inner>,
}

impl Admission {
    pub fn new(fallback_deadline: Duration, admit: AdmitFn) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                fallback_deadline,
                admit,
            }),
        }
    }

    /// Arrange for `key` to be admitted after `delay`.
    pub fn schedule(&self, key: &ItemKey, delay: Duration) -> Scheduled {
        let now = Instant::now();
        let due = now + delay;

        let mut pending = self.inner.lock();
        if let Some(entry) = pending.get_mut(key) {
            if due >= entry.due {
                return Scheduled::Coalesced;
            }
            entry.due = due;
            // The receiver only disappears once the task has fired.
            let _ = entry.reschedule.send(due);
            debug!(%key, delay_ms = delay.as_millis() as u64, "admission moved earlier");
            return Scheduled::Advanced;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let deadline = now + self.inner.fallback_deadline;
        let (tx, rx) = watch::channel(due);
        let handle = tokio::spawn(fire(
            Arc::clone(&self.inner),
            key.clone(),
            generation,
            deadline,
            rx,
        ));
        pending.insert(
            key.clone(),
            Pending {
                generation,
                due,
                reschedule: tx,
                handle,
            },
        );
        debug!(%key, delay_ms = delay.as_millis() as u64, "admission armed");
        Scheduled::Armed
    }

    /// Abort a pending admission. Returns true if one was pending.
    pub fn cancel(&self, key: &ItemKey) -> bool {
        match self.inner.lock().remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &ItemKey) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Abort every pending timer.
    pub fn cancel_all(&self) {
        for (_, entry) in self.inner.lock().drain() {
            entry.handle.abort();
        }
    }
}

async fn fire(
    inner: Arc<Inner>,
    key: ItemKey,
    generation: u64,
    deadline: Instant,
    mut reschedule: watch::Receiver<Instant>,
) {
    loop {
        let due = *reschedule.borrow_and_update();
        let at = due.min(deadline);
        tokio::select! {
            _ = sleep_until(at) => break,
            changed = reschedule.changed() => {
                if changed.is_err() {
                    // Sender gone without a cancel; still honor the deadline.
                    sleep_until(at).await;
                    break;
                }
            }
        }
    }

    {
        let mut pending = inner.lock();
        match pending.get(&key) {
            Some(entry) if entry.generation == generation => {
                pending.remove(&key);
            }
            _ => return,
        }
    }
    debug!(%key, "admission due");
    (inner.admit)(key);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (AdmitFn, Arc<Mutex<Vec<(ItemKey, Instant)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let admit: AdmitFn = Arc::new(move |key| {
            sink.lock().unwrap().push((key, Instant::now()));
        });
        (admit, log)
    }

    fn assert_close(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(5),
            "admitted after {actual:?}, expected {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_calls_coalesce_to_first_delay() {
        let (admit, log) = recorder();
        let admission = Admission::new(Duration::from_millis(1200), admit);
        let key = ItemKey::from("a");
        let start = Instant::now();

        assert_eq!(
            admission.schedule(&key, Duration::from_millis(150)),
            Scheduled::Armed
        );
        for _ in 0..9 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(
                admission.schedule(&key, Duration::from_millis(150)),
                Scheduled::Coalesced
            );
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_close(log[0].1 - start, Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_call_moves_admission_forward() {
        let (admit, log) = recorder();
        let admission = Admission::new(Duration::from_millis(1200), admit);
        let key = ItemKey::from("a");
        let start = Instant::now();

        admission.schedule(&key, Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            admission.schedule(&key, Duration::from_millis(50)),
            Scheduled::Advanced
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_close(log[0].1 - start, Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_caps_long_soft_delay() {
        let (admit, log) = recorder();
        let admission = Admission::new(Duration::from_millis(1200), admit);
        let start = Instant::now();

        admission.schedule(&ItemKey::from("a"), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_close(log[0].1 - start, Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_admission() {
        let (admit, log) = recorder();
        let admission = Admission::new(Duration::from_millis(1200), admit);
        let key = ItemKey::from("a");

        admission.schedule(&key, Duration::from_millis(100));
        assert!(admission.cancel(&key));
        assert!(!admission.cancel(&key));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(admission.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn key_can_be_rearmed_after_firing() {
        let (admit, log) = recorder();
        let admission = Admission::new(Duration::from_millis(1200), admit);
        let key = ItemKey::from("a");

        admission.schedule(&key, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!admission.is_pending(&key));
        assert_eq!(
            admission.schedule(&key, Duration::from_millis(100)),
            Scheduled::Armed
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
