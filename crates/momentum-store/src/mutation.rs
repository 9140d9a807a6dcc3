//! Remote writes that invalidate cache prefixes on success.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::StoreError;
use crate::cache::{QueryCache, QueryKey};

const NOTICE_CHANNEL_CAPACITY: usize = 256;

/// A named write and the cache prefixes it makes stale.
#[derive(Debug, Clone)]
pub struct Mutation {
    label: String,
    invalidates: Vec<QueryKey>,
    announce: bool,
}

impl Mutation {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            invalidates: Vec::new(),
            announce: true,
        }
    }

    /// Declare a key prefix to invalidate once the write succeeds.
    pub fn invalidates(mut self, prefix: QueryKey) -> Self {
        self.invalidates.push(prefix);
        self
    }

    /// Skip the success notice. Failures are always announced.
    pub fn quiet(mut self) -> Self {
        self.announce = false;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn prefixes(&self) -> &[QueryKey] {
        &self.invalidates
    }
}

/// Transient user-facing notification about a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success { label: String },
    Failure { label: String, message: String },
}

/// Runs writes and drives invalidation.
#[derive(Clone)]
pub struct MutationExecutor {
    cache: Arc<QueryCache>,
    notices_tx: broadcast::Sender<Notice>,
}

impl MutationExecutor {
    pub fn new(cache: Arc<QueryCache>) -> Self {
        let (notices_tx, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self { cache, notices_tx }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Subscribe to user-facing notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices_tx.subscribe()
    }

    /// Perform one write.
    ///
    /// On success every declared prefix is invalidated before the result is
    /// returned, so a read issued afterwards refetches. On failure the cache is
    /// left alone and the error is both announced and returned. Never retried.
    pub async fn execute<T, F, Fut>(&self, mutation: Mutation, write: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        trace!(label = %mutation.label, "executing mutation");
        match write().await {
            Ok(value) => {
                let mut invalidated = 0;
                for prefix in &mutation.invalidates {
                    invalidated += self.cache.invalidate(prefix);
                }
                debug!(label = %mutation.label, invalidated, "mutation succeeded");
                if mutation.announce {
                    self.notify(Notice::Success {
                        label: mutation.label,
                    });
                }
                Ok(value)
            }
            Err(e) => {
                warn!(label = %mutation.label, error = %e, "mutation failed");
                self.notify(Notice::Failure {
                    label: mutation.label,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn notify(&self, notice: Notice) {
        if self.notices_tx.send(notice).is_err() {
            trace!("no notice subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::query_key;
    use pretty_assertions::assert_eq;

    async fn seed(cache: &QueryCache, key: QueryKey) {
        cache
            .fetch(key, || async { Ok::<_, StoreError>(1u32) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_success_invalidates_declared_prefixes() {
        let cache = QueryCache::new(CacheConfig::default());
        seed(&cache, query_key!["tasks", "u1"]).await;
        seed(&cache, query_key!["activity-feed"]).await;
        seed(&cache, query_key!["steps", "u1"]).await;

        let executor = MutationExecutor::new(Arc::clone(&cache));
        let mut notices = executor.notices();

        let out = executor
            .execute(
                Mutation::new("Task completed")
                    .invalidates(query_key!["tasks"])
                    .invalidates(query_key!["activity-feed"]),
                || async { Ok::<_, StoreError>("done") },
            )
            .await
            .unwrap();

        assert_eq!(out, "done");
        assert_eq!(cache.is_stale(&query_key!["tasks", "u1"]), Some(true));
        assert_eq!(cache.is_stale(&query_key!["activity-feed"]), Some(true));
        assert_eq!(cache.is_stale(&query_key!["steps", "u1"]), Some(false));
        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::Success {
                label: "Task completed".into()
            }
        );
    }

    #[tokio::test]
    async fn test_failure_leaves_cache_and_announces() {
        let cache = QueryCache::new(CacheConfig::default());
        seed(&cache, query_key!["tasks", "u1"]).await;
        let executor = MutationExecutor::new(Arc::clone(&cache));
        let mut notices = executor.notices();

        let err = executor
            .execute(
                Mutation::new("Create task").invalidates(query_key!["tasks"]),
                || async { Err::<(), _>(StoreError::Auth("expired".into())) },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Auth(_)));
        assert_eq!(cache.is_stale(&query_key!["tasks", "u1"]), Some(false));
        match notices.try_recv().unwrap() {
            Notice::Failure { label, message } => {
                assert_eq!(label, "Create task");
                assert!(message.contains("expired"));
            }
            other => panic!("unexpected notice: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quiet_mutation_skips_success_notice() {
        let cache = QueryCache::new(CacheConfig::default());
        let executor = MutationExecutor::new(cache);
        let mut notices = executor.notices();

        executor
            .execute(Mutation::new("Typing").quiet(), || async {
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();

        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_runs_exactly_once_on_failure() {
        let cache = QueryCache::new(CacheConfig::default());
        let executor = MutationExecutor::new(cache);
        let attempts = std::sync::atomic::AtomicUsize::new(0);

        let _ = executor
            .execute(Mutation::new("Send message"), || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err::<(), _>(StoreError::RateLimited { retry_after_secs: Some(5) }) }
            })
            .await;

        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
