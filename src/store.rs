use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, trace};

use crate::value::Value;

/// The Store is responsible for managing key-value pairs, with optional time-to-live settings for
/// each key. Keys live in a concurrent map so that commands on unrelated keys never wait on each
/// other, and a single background task deletes keys whose deadline has passed.
///
/// The store is cheap to clone; all clones share the same data. The background task stops once
/// the last clone is dropped.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreGuard>,
}

/// Remaining lifetime of an existing key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ttl {
    /// The key has no pending expiration: none was set, it was persisted, or its deadline has
    /// already passed and the key is about to be removed.
    NoExpiry,
    Remaining(Duration),
}

impl Store {
    pub fn new() -> Store {
        let shared = Arc::new(InnerStore {
            entries: DashMap::new(),
            schedule: Mutex::new(BTreeSet::new()),
            waker: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn({
            let shared = shared.clone();
            async move { remove_expired_keys(shared).await }
        });

        Self {
            inner: Arc::new(StoreGuard { shared }),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner.shared
    }
}

// Signals the expiration task to stop when the last `Store` handle goes away.
struct StoreGuard {
    shared: Arc<InnerStore>,
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.waker.notify_one();
    }
}

pub struct InnerStore {
    entries: DashMap<Key, Entry>,
    // Pending deadlines, earliest first. An item whose deadline no longer matches the entry's
    // `expires_at` is stale and ignored when it comes due.
    schedule: Mutex<BTreeSet<(Instant, Key)>>,
    waker: Notify,
    shutdown: AtomicBool,
}

type Key = String;

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
    persisted: bool,
}

impl InnerStore {
    /// Stores `value` under `key`, replacing any previous value together with its expiration and
    /// persist state.
    pub fn set(&self, key: Key, value: Value) {
        let entry = Entry {
            value,
            expires_at: None,
            persisted: false,
        };
        self.entries.insert(key, entry);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Schedules `key` for deletion at `deadline`. A deadline set earlier for the same key is
    /// superseded, and a previous persist request is dropped.
    ///
    /// Returns `false` when the key does not exist.
    pub fn expire_at(&self, key: &str, deadline: Instant) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(deadline);
                entry.persisted = false;
            }
            None => return false,
        }

        let mut schedule = self.lock_schedule();
        schedule.insert((deadline, key.to_string()));

        let next_to_expire = schedule.iter().next().map(|(when, _)| *when);
        if next_to_expire == Some(deadline) {
            self.waker.notify_one();
        }

        true
    }

    /// Exempts `key` from any expiration scheduled so far.
    ///
    /// Returns `false` when the key does not exist or is already persisted.
    pub fn persist(&self, key: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.persisted => {
                entry.persisted = true;
                true
            }
            _ => false,
        }
    }

    pub fn ttl(&self, key: &str) -> Option<Ttl> {
        let entry = self.entries.get(key)?;

        let ttl = match entry.expires_at {
            Some(_) if entry.persisted => Ttl::NoExpiry,
            Some(expires_at) => {
                let now = Instant::now();
                if expires_at > now {
                    Ttl::Remaining(expires_at - now)
                } else {
                    Ttl::NoExpiry
                }
            }
            None => Ttl::NoExpiry,
        };

        Some(ttl)
    }

    /// Applies every deadline that has come due and returns the next pending one.
    ///
    /// A due key is deleted unless it was persisted or its deadline moved since the schedule was
    /// recorded. Persisted keys only lose their expiration bookkeeping.
    pub fn remove_expired_keys(&self) -> Option<Instant> {
        let now = Instant::now();

        let expired: Vec<(Instant, Key)> = {
            let mut schedule = self.lock_schedule();
            let due: Vec<(Instant, Key)> = schedule
                .iter()
                .take_while(|(expires_at, _)| expires_at <= &now)
                .cloned()
                .collect();
            for item in &due {
                schedule.remove(item);
            }
            due
        };

        for (when, key) in expired {
            match self.entries.entry(key) {
                MapEntry::Occupied(mut occupied) => {
                    let entry = occupied.get_mut();
                    if entry.expires_at != Some(when) {
                        trace!(key = %occupied.key(), "skipping superseded expiration");
                    } else if entry.persisted {
                        entry.expires_at = None;
                        entry.persisted = false;
                        trace!(key = %occupied.key(), "key persisted, keeping it");
                    } else {
                        debug!(key = %occupied.key(), "key expired");
                        occupied.remove();
                    }
                }
                MapEntry::Vacant(_) => {}
            }
        }

        self.lock_schedule()
            .iter()
            .next()
            .map(|&(expires_at, _)| expires_at)
    }

    fn lock_schedule(&self) -> std::sync::MutexGuard<'_, BTreeSet<(Instant, Key)>> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

async fn remove_expired_keys(store: Arc<InnerStore>) {
    while !store.is_shutdown() {
        if let Some(next_expiration) = store.remove_expired_keys() {
            tokio::select! {
                _ = sleep_until(next_expiration) => {}
                _ = store.waker.notified() => {}
            }
        } else {
            store.waker.notified().await;
        }
    }

    debug!("Expiration task shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    fn value(s: &str) -> Value {
        Value::from(s)
    }

    async fn tick(duration: Duration) {
        time::advance(duration).await;
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn ttl() {
        time::pause();

        let store = Store::new();

        store.set("key1".to_string(), value("value1"));
        store.set("key2".to_string(), value("value2"));
        assert!(store.expire_at("key1", Instant::now() + Duration::from_secs(10)));
        assert!(store.expire_at("key2", Instant::now() + Duration::from_secs(20)));

        assert_eq!(store.len(), 2);

        tick(Duration::from_secs(10)).await;

        assert_eq!(store.len(), 1);
        assert!(store.exists("key2"));

        tick(Duration::from_secs(20)).await;
        assert!(store.is_empty());

        store.set("key3".to_string(), value("value3"));
        store.expire_at("key3", Instant::now() + Duration::from_secs(20));

        assert_eq!(store.len(), 1);

        tick(Duration::from_secs(20)).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn expire_missing_key() {
        let store = Store::new();

        assert!(!store.expire_at("missing", Instant::now()));
        assert_eq!(store.ttl("missing"), None);
    }

    #[tokio::test]
    async fn persist_wins_over_pending_expiration() {
        time::pause();

        let store = Store::new();
        store.set("k".to_string(), value("v"));
        store.expire_at("k", Instant::now() + Duration::from_millis(500));

        assert!(store.persist("k"));
        assert!(!store.persist("k"));
        assert_eq!(store.ttl("k"), Some(Ttl::NoExpiry));

        tick(Duration::from_secs(1)).await;

        assert_eq!(store.get("k"), Some(value("v")));
        // The expired schedule cleared the persist flag.
        assert!(store.persist("k"));
    }

    #[tokio::test]
    async fn new_deadline_supersedes_old_one() {
        time::pause();

        let store = Store::new();
        store.set("k".to_string(), value("v"));
        store.expire_at("k", Instant::now() + Duration::from_secs(1));
        store.expire_at("k", Instant::now() + Duration::from_secs(5));

        tick(Duration::from_secs(2)).await;
        assert!(store.exists("k"));

        tick(Duration::from_secs(3)).await;
        assert!(!store.exists("k"));
    }

    #[tokio::test]
    async fn earlier_deadline_wakes_reaper() {
        time::pause();

        let store = Store::new();
        store.set("late".to_string(), value("v"));
        store.set("early".to_string(), value("v"));
        store.expire_at("late", Instant::now() + Duration::from_secs(60));
        tick(Duration::from_millis(1)).await;
        store.expire_at("early", Instant::now() + Duration::from_secs(1));

        tick(Duration::from_secs(1)).await;
        assert!(!store.exists("early"));
        assert!(store.exists("late"));
    }

    #[tokio::test]
    async fn set_clears_expiration() {
        time::pause();

        let store = Store::new();
        store.set("k".to_string(), value("v1"));
        store.expire_at("k", Instant::now() + Duration::from_secs(1));
        store.set("k".to_string(), value("v2"));

        assert_eq!(store.ttl("k"), Some(Ttl::NoExpiry));

        tick(Duration::from_secs(2)).await;
        assert_eq!(store.get("k"), Some(value("v2")));
    }

    #[tokio::test]
    async fn ttl_remaining() {
        time::pause();

        let store = Store::new();
        store.set("k".to_string(), value("v"));
        assert_eq!(store.ttl("k"), Some(Ttl::NoExpiry));

        store.expire_at("k", Instant::now() + Duration::from_secs(10));
        time::advance(Duration::from_secs(4)).await;

        assert_eq!(store.ttl("k"), Some(Ttl::Remaining(Duration::from_secs(6))));
    }
}
