//! Process-wide, key-addressed cache of read results.
//!
//! Every read goes through [`QueryCache::fetch`]; every write (local mutation
//! or realtime push) ends in [`QueryCache::invalidate`]. The cache is the only
//! place fetched data is written into shared state.
//!
//! Guarantees:
//! - at most one in-flight fetch per key; concurrent readers share its outcome
//! - responses are applied in issue order: an older, slower response never
//!   overwrites a newer one
//! - a response issued before an invalidation is stored but stays stale
//! - a failed fetch leaves the previously cached value untouched

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{QueryError, StoreError};

/// Broadcast channel capacity for cache events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Keys
// =============================================================================

/// One primitive component of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Str(s) => write!(f, "{:?}", s),
            KeyPart::Int(i) => write!(f, "{}", i),
            KeyPart::Bool(b) => write!(f, "{}", b),
            KeyPart::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        KeyPart::Str(s.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(i: i64) -> Self {
        KeyPart::Int(i)
    }
}

impl From<i32> for KeyPart {
    fn from(i: i32) -> Self {
        KeyPart::Int(i64::from(i))
    }
}

impl From<u32> for KeyPart {
    fn from(i: u32) -> Self {
        KeyPart::Int(i64::from(i))
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        KeyPart::Bool(b)
    }
}

impl From<Uuid> for KeyPart {
    fn from(id: Uuid) -> Self {
        KeyPart::Str(id.to_string())
    }
}

impl From<&Uuid> for KeyPart {
    fn from(id: &Uuid) -> Self {
        KeyPart::Str(id.to_string())
    }
}

impl From<NaiveDate> for KeyPart {
    fn from(date: NaiveDate) -> Self {
        KeyPart::Str(date.to_string())
    }
}

impl From<&NaiveDate> for KeyPart {
    fn from(date: &NaiveDate) -> Self {
        KeyPart::Str(date.to_string())
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(KeyPart::Null)
    }
}

/// An ordered tuple identifying one cacheable query result,
/// e.g. `["tasks", <user id>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a part, returning the longer key.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    /// Whether `prefix` matches the leading parts of this key.
    /// The empty key is a prefix of every key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}

/// Build a [`QueryKey`] from primitive parts.
///
/// ```rust
/// use momentum_store::{KeyPart, query_key};
///
/// let key = query_key!["tasks", 42i64, true];
/// assert_eq!(key.parts()[0], KeyPart::Str("tasks".into()));
/// assert!(key.starts_with(&query_key!["tasks"]));
/// ```
#[macro_export]
macro_rules! query_key {
    () => {
        $crate::QueryKey::default()
    };
    ($($part:expr),+ $(,)?) => {
        $crate::QueryKey::new(vec![$($crate::KeyPart::from($part)),+])
    };
}

// =============================================================================
// Configuration and events
// =============================================================================

/// When a cached value stops being served without a refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Every read refetches (still de-duplicated while in flight).
    Always,
    /// Fetch once, serve until explicitly invalidated.
    #[default]
    UntilInvalidated,
    /// Serve for a fixed time after the value was stored.
    For(Duration),
}

/// Cache-wide settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheConfig {
    /// Default freshness policy for [`QueryCache::fetch`].
    pub freshness: Freshness,
    /// Drop entries that have no observers once they are invalidated or
    /// their last observer goes away.
    pub evict_inactive: bool,
}

/// Notification published for every state change in the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A fetch was issued for the key.
    Fetching { key: QueryKey },
    /// A fetched value was stored.
    Updated { key: QueryKey },
    /// The latest fetch failed.
    Failed { key: QueryKey, error: String },
    /// The key was marked stale.
    Invalidated { key: QueryKey },
    /// The entry was dropped.
    Evicted { key: QueryKey },
}

// =============================================================================
// Entries
// =============================================================================

type Value = Arc<dyn Any + Send + Sync>;
type Outcome = Result<Value, QueryError>;

struct InFlight {
    seq: u64,
    outcome: watch::Receiver<Option<Outcome>>,
}

struct Entry {
    value: Option<Value>,
    error: Option<QueryError>,
    updated_at: Option<Instant>,
    stale: bool,
    /// Issue number of the response currently stored (0 when none).
    applied_seq: u64,
    /// Highest issue number handed out when the entry was last invalidated.
    invalidated_at: u64,
    in_flight: Option<InFlight>,
    observers: usize,
    version: watch::Sender<u64>,
}

impl Entry {
    fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            value: None,
            error: None,
            updated_at: None,
            stale: false,
            applied_seq: 0,
            invalidated_at: 0,
            in_flight: None,
            observers: 0,
            version,
        }
    }

    /// Wake observers.
    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn fresh_value(&self, freshness: Freshness) -> Option<Value> {
        let value = self.value.as_ref()?;
        if self.stale || self.error.is_some() {
            return None;
        }
        match freshness {
            Freshness::Always => None,
            Freshness::UntilInvalidated => Some(Arc::clone(value)),
            Freshness::For(ttl) => self
                .updated_at
                .filter(|at| at.elapsed() < ttl)
                .map(|_| Arc::clone(value)),
        }
    }
}

enum Plan {
    Hit(Value),
    Wait(watch::Receiver<Option<Outcome>>),
    Fetch(u64, watch::Sender<Option<Outcome>>),
}

/// Snapshot of one key as seen by an observer.
#[derive(Debug)]
pub struct QueryState<T> {
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError>,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub updated_at: Option<Instant>,
}

impl<T> QueryState<T> {
    fn empty() -> Self {
        Self {
            data: None,
            error: None,
            is_fetching: false,
            is_stale: false,
            updated_at: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.data.is_none() && self.is_fetching
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Key-addressed cache of query results.
///
/// Created once and passed to every consumer; it is not a global.
pub struct QueryCache {
    config: CacheConfig,
    entries: Mutex<HashMap<QueryKey, Entry>>,
    /// Last issue number handed out.
    next_seq: AtomicU64,
    events_tx: broadcast::Sender<CacheEvent>,
}

impl QueryCache {
    /// Create a new empty cache.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            entries: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            events_tx,
        })
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// The map is only touched synchronously; the guard never crosses an await.
    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: CacheEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("no subscribers for cache event");
        }
    }

    /// Subscribe to cache events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events_tx.subscribe()
    }

    /// Read through the cache with the default freshness policy.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.fetch_with(key, self.config.freshness, fetcher).await
    }

    /// Read through the cache with an explicit freshness policy.
    pub async fn fetch_with<T, F, Fut>(
        &self,
        key: QueryKey,
        freshness: Freshness,
        fetcher: F,
    ) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let plan = {
            let mut entries = self.lock();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            if let Some(value) = entry.fresh_value(freshness) {
                Plan::Hit(value)
            } else if let Some(in_flight) = &entry.in_flight {
                Plan::Wait(in_flight.outcome.clone())
            } else {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
                let (tx, rx) = watch::channel(None);
                entry.in_flight = Some(InFlight { seq, outcome: rx });
                entry.bump();
                Plan::Fetch(seq, tx)
            }
        };

        match plan {
            Plan::Hit(value) => {
                trace!(key = %key, "cache hit");
                downcast(&key, value)
            }
            Plan::Wait(rx) => {
                trace!(key = %key, "joining in-flight fetch");
                let value = wait_for_outcome(&key, rx).await?;
                downcast(&key, value)
            }
            Plan::Fetch(seq, tx) => {
                debug!(key = %key, seq, "fetching");
                self.publish(CacheEvent::Fetching { key: key.clone() });

                let mut guard = FetchGuard {
                    cache: self,
                    key: &key,
                    seq,
                    armed: true,
                };
                let result = fetcher().await;
                guard.armed = false;

                let outcome = self.complete(&key, seq, result.map(|v| Arc::new(v) as Value));
                // Waiters may have gone away; that is fine.
                let _ = tx.send(Some(outcome.clone()));
                downcast(&key, outcome?)
            }
        }
    }

    /// Store the result of fetch `seq`, honoring issue order.
    fn complete(&self, key: &QueryKey, seq: u64, result: Result<Value, StoreError>) -> Outcome {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            // Removed while in flight: the caller still gets its answer.
            return result.map_err(|e| QueryError::Failed {
                key: key.clone(),
                source: Arc::new(e),
            });
        };

        if entry.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
            entry.in_flight = None;
        }

        match result {
            Ok(value) => {
                if seq > entry.applied_seq {
                    entry.value = Some(Arc::clone(&value));
                    entry.applied_seq = seq;
                    entry.error = None;
                    entry.updated_at = Some(Instant::now());
                    entry.stale = seq <= entry.invalidated_at;
                    entry.bump();
                    self.publish(CacheEvent::Updated { key: key.clone() });
                    trace!(key = %key, seq, stale = entry.stale, "stored response");
                    Ok(value)
                } else {
                    debug!(
                        key = %key,
                        seq,
                        applied = entry.applied_seq,
                        "discarding response superseded by a newer one"
                    );
                    Ok(entry.value.clone().unwrap_or(value))
                }
            }
            Err(e) => {
                let error = QueryError::Failed {
                    key: key.clone(),
                    source: Arc::new(e),
                };
                if seq > entry.applied_seq {
                    entry.error = Some(error.clone());
                    entry.bump();
                    self.publish(CacheEvent::Failed {
                        key: key.clone(),
                        error: error.to_string(),
                    });
                }
                Err(error)
            }
        }
    }

    /// Called when a fetch future is dropped before completing.
    fn abandon(&self, key: &QueryKey, seq: u64) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
            entry.in_flight = None;
            entry.bump();
            debug!(key = %key, seq, "in-flight fetch dropped");
        }
    }

    /// Mark every key starting with `prefix` stale. Returns how many keys matched.
    ///
    /// The next read of a matching key refetches. Fetches already in flight
    /// keep running but their results are stored as stale.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let marker = self.next_seq.load(Ordering::SeqCst);
        let mut entries = self.lock();
        let mut matched = 0;
        let mut evict = Vec::new();

        for (key, entry) in entries.iter_mut() {
            if !key.starts_with(prefix) {
                continue;
            }
            matched += 1;
            entry.stale = true;
            entry.invalidated_at = marker;
            entry.in_flight = None;
            entry.bump();
            self.publish(CacheEvent::Invalidated { key: key.clone() });
            if self.config.evict_inactive && entry.observers == 0 {
                evict.push(key.clone());
            }
        }

        for key in evict {
            entries.remove(&key);
            self.publish(CacheEvent::Evicted { key });
        }

        debug!(prefix = %prefix, matched, "invalidated queries");
        matched
    }

    /// Mark every key stale.
    pub fn invalidate_all(&self) -> usize {
        self.invalidate(&QueryKey::default())
    }

    /// Peek at a cached value without fetching.
    pub fn get<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        let entries = self.lock();
        let value = entries.get(key)?.value.clone()?;
        value.downcast::<T>().ok()
    }

    /// Whether the key is cached and stale. `None` when absent.
    pub fn is_stale(&self, key: &QueryKey) -> Option<bool> {
        self.lock().get(key).map(|e| e.stale)
    }

    /// Whether a fetch for the key is in flight.
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|e| e.in_flight.is_some())
    }

    /// Drop the cached data for a key. Observed entries keep their
    /// registration and just lose their data; a fetch already in flight
    /// lands stale.
    pub fn remove(&self, key: &QueryKey) {
        let marker = self.next_seq.load(Ordering::SeqCst);
        let mut entries = self.lock();
        let observed = entries.get(key).is_some_and(|e| e.observers > 0);
        if observed {
            if let Some(entry) = entries.get_mut(key) {
                entry.value = None;
                entry.error = None;
                entry.applied_seq = 0;
                entry.invalidated_at = marker;
                entry.in_flight = None;
                entry.bump();
            }
        } else if entries.remove(key).is_some() {
            self.publish(CacheEvent::Evicted { key: key.clone() });
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All cached keys, sorted.
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<_> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of live observers for a key.
    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.lock().get(key).map_or(0, |e| e.observers)
    }

    /// Register interest in a key (a view mounting).
    ///
    /// The returned observer is woken on every change to the key and
    /// unregisters itself when dropped, after which it receives nothing.
    pub fn observe(self: &Arc<Self>, key: QueryKey) -> QueryObserver {
        let version = {
            let mut entries = self.lock();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.observers += 1;
            entry.version.subscribe()
        };
        trace!(key = %key, "observer registered");
        QueryObserver {
            cache: Arc::clone(self),
            key,
            version,
        }
    }

    fn release(&self, key: &QueryKey) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.observers = entry.observers.saturating_sub(1);
        let evict = self.config.evict_inactive && entry.observers == 0 && entry.in_flight.is_none();
        if evict {
            entries.remove(key);
            self.publish(CacheEvent::Evicted { key: key.clone() });
        }
        trace!(key = %key, evicted = evict, "observer released");
    }

    fn state<T: Send + Sync + 'static>(&self, key: &QueryKey) -> QueryState<T> {
        let entries = self.lock();
        let Some(entry) = entries.get(key) else {
            return QueryState::empty();
        };
        let (data, mismatch) = match entry.value.clone() {
            Some(value) => match value.downcast::<T>() {
                Ok(data) => (Some(data), false),
                Err(_) => (None, true),
            },
            None => (None, false),
        };
        let error = if mismatch {
            Some(QueryError::TypeMismatch { key: key.clone() })
        } else {
            entry.error.clone()
        };
        QueryState {
            data,
            error,
            is_fetching: entry.in_flight.is_some(),
            is_stale: entry.stale,
            updated_at: entry.updated_at,
        }
    }
}

fn downcast<T: Send + Sync + 'static>(key: &QueryKey, value: Value) -> Result<Arc<T>, QueryError> {
    value
        .downcast::<T>()
        .map_err(|_| QueryError::TypeMismatch { key: key.clone() })
}

async fn wait_for_outcome(
    key: &QueryKey,
    mut rx: watch::Receiver<Option<Outcome>>,
) -> Outcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome
            .clone()
            .unwrap_or_else(|| Err(QueryError::Cancelled { key: key.clone() })),
        Err(_) => Err(QueryError::Cancelled { key: key.clone() }),
    }
}

/// Clears the in-flight marker if the fetch future is dropped mid-flight.
struct FetchGuard<'a> {
    cache: &'a QueryCache,
    key: &'a QueryKey,
    seq: u64,
    armed: bool,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.abandon(self.key, self.seq);
        }
    }
}

// =============================================================================
// Observers
// =============================================================================

/// A registered interest in one key, tied to a consumer's lifetime.
pub struct QueryObserver {
    cache: Arc<QueryCache>,
    key: QueryKey,
    version: watch::Receiver<u64>,
}

impl QueryObserver {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Wait for the next change to the key. Returns `false` if the entry
    /// was dropped from the cache.
    pub async fn changed(&mut self) -> bool {
        self.version.changed().await.is_ok()
    }

    /// Current state of the key.
    pub fn state<T: Send + Sync + 'static>(&self) -> QueryState<T> {
        self.cache.state(&self.key)
    }

    /// Fetch through the cache for this observer's key.
    pub async fn fetch<T, F, Fut>(&self, fetcher: F) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.cache.fetch(self.key.clone(), fetcher).await
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}
