//! Memoizing key → shared future store with per-entry expiry
//!
//! Every entry is an explicit `{ future, deadline, timer }` record. The
//! factory's work runs on its own task, so dropping every awaiter never
//! cancels it, and expiry only removes the entry from the map.

use crate::error::{CdnError, CdnResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Future handed out by the cache; every clone resolves to the same result
pub type SharedResult<V> = Shared<BoxFuture<'static, CdnResult<V>>>;

/// Observable state of a cached entry. Rejected entries are removed before
/// their future settles, so they are never observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Resolved,
}

/// How long an entry stays in the map once created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifetime {
    Expires(Duration),
    Forever,
    UntilSettled,
}

impl Lifetime {
    fn from_ttl(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Self::Forever
        } else {
            Self::Expires(ttl)
        }
    }
}

struct Slot<V> {
    id: u64,
    future: SharedResult<V>,
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl<V> Slot<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline.map_or(true, |deadline| now < deadline)
    }

    fn discard(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

type SlotMap<V> = Arc<Mutex<HashMap<String, Slot<V>>>>;

/// TTL-bounded memoizing cache of shared futures
pub struct PromiseCache<V> {
    name: &'static str,
    slots: SlotMap<V>,
    next_id: AtomicU64,
}

impl<V> PromiseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache; `name` only labels log lines
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Return the live future for `key`, or run `factory` once and memoize it.
    ///
    /// With a non-zero `ttl` the entry is dropped from the map once `ttl`
    /// elapses; a zero `ttl` keeps it until invalidated. A failed future is
    /// removed as soon as it settles so the next caller retries.
    ///
    /// `factory` is called while the map is locked and must not touch this
    /// cache synchronously.
    pub fn get_or_create<F, Fut>(&self, key: &str, ttl: Duration, factory: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CdnResult<V>> + Send + 'static,
    {
        self.insert_with(key, Lifetime::from_ttl(ttl), factory)
    }

    /// Like [`get_or_create`](Self::get_or_create), but the entry only lives
    /// while its future is pending. Used for in-flight deduplication.
    pub fn coalesce<F, Fut>(&self, key: &str, factory: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CdnResult<V>> + Send + 'static,
    {
        self.insert_with(key, Lifetime::UntilSettled, factory)
    }

    /// Remove `key` unconditionally, cancelling its expiry timer.
    /// Holders of the future keep their reference.
    pub fn invalidate(&self, key: &str) {
        if let Some(slot) = lock(&self.slots).remove(key) {
            debug!("{} cache: invalidated {}", self.name, key);
            slot.discard();
        }
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        lock(&self.slots)
            .get(key)
            .is_some_and(|slot| slot.is_live(now))
    }

    /// State of the live entry for `key`, if any
    pub fn state(&self, key: &str) -> Option<EntryState> {
        let now = Instant::now();
        let slots = lock(&self.slots);
        let slot = slots.get(key).filter(|slot| slot.is_live(now))?;
        Some(match slot.future.peek() {
            Some(_) => EntryState::Resolved,
            None => EntryState::Pending,
        })
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.slots)
            .values()
            .filter(|slot| slot.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_with<F, Fut>(&self, key: &str, lifetime: Lifetime, factory: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CdnResult<V>> + Send + 'static,
    {
        let mut slots = lock(&self.slots);
        let now = Instant::now();

        if let Some(slot) = slots.get(key) {
            if slot.is_live(now) {
                return slot.future.clone();
            }
            // Deadline passed but the timer task has not run yet
            if let Some(expired) = slots.remove(key) {
                expired.discard();
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let work = factory();
        let remove_on_settle = lifetime == Lifetime::UntilSettled;
        let task_slots = Arc::clone(&self.slots);
        let task_key = key.to_string();
        let name = self.name;

        let handle = tokio::spawn(async move {
            let result = work.await;
            if let Err(ref e) = result {
                debug!("{} cache: dropping failed entry {}: {}", name, task_key, e);
            }
            if result.is_err() || remove_on_settle {
                remove_if_current(&task_slots, &task_key, id);
            }
            result
        });

        let future = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(CdnError::Internal(format!("cache task failed: {}", e))))
        }
        .boxed()
        .shared();

        let (deadline, timer) = match lifetime {
            Lifetime::Expires(ttl) => {
                let deadline = now + ttl;
                let timer_slots = Arc::clone(&self.slots);
                let timer_key = key.to_string();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    remove_if_current(&timer_slots, &timer_key, id);
                });
                (Some(deadline), Some(timer))
            }
            Lifetime::Forever | Lifetime::UntilSettled => (None, None),
        };

        slots.insert(
            key.to_string(),
            Slot {
                id,
                future: future.clone(),
                deadline,
                timer,
            },
        );

        future
    }
}

fn lock<V>(slots: &SlotMap<V>) -> MutexGuard<'_, HashMap<String, Slot<V>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove `key` only if it still holds the entry created with `id`
fn remove_if_current<V>(slots: &SlotMap<V>, key: &str, id: u64) {
    let mut slots = lock(slots);
    if slots.get(key).is_some_and(|slot| slot.id == id) {
        if let Some(slot) = slots.remove(key) {
            slot.discard();
        }
    }
}
