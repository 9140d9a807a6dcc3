//! Turns realtime row changes into cache invalidations.
//!
//! Pushed events are signals, never data: the bridge does not patch cached
//! values, it marks prefixes stale through the same path a mutation uses.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cache::{QueryCache, QueryKey};
use crate::realtime::{ChangeFilter, RealtimeClient};
use crate::ChangeEvent;

/// Connects realtime subscriptions to the query cache.
#[derive(Clone)]
pub struct RealtimeBridge {
    realtime: RealtimeClient,
    cache: Arc<QueryCache>,
}

impl RealtimeBridge {
    pub fn new(realtime: RealtimeClient, cache: Arc<QueryCache>) -> Self {
        Self { realtime, cache }
    }

    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    /// Invalidate `prefixes` on every change matching `filter`.
    pub fn watch(&self, filter: ChangeFilter, prefixes: Vec<QueryKey>) -> BridgeHandle {
        let cache = Arc::clone(&self.cache);
        self.watch_with(filter, move |event| {
            let mut invalidated = 0;
            for prefix in &prefixes {
                invalidated += cache.invalidate(prefix);
            }
            trace!(table = %event.table, kind = ?event.kind, invalidated, "realtime invalidation");
        })
    }

    /// Run `handler` for every change matching `filter`, in arrival order.
    pub fn watch_with<F>(&self, filter: ChangeFilter, mut handler: F) -> BridgeHandle
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let mut subscription = self.realtime.subscribe(&filter);
        let topic = filter.topic();
        debug!(topic = %topic, "bridge watching");

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event);
            }
            debug!(topic = %topic, "bridge subscription ended");
        });

        BridgeHandle { filter, task }
    }
}

/// Live bridge subscription; dropping it tears the subscription down.
pub struct BridgeHandle {
    filter: ChangeFilter,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheEvent};
    use crate::{StoreError, query_key};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn insert_frame(topic: &str) -> String {
        json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "INSERT",
                    "table": "circle_messages",
                    "record": {"id": "m1", "circle_id": "c1"}
                }
            },
            "ref": null
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_change_invalidates_watched_prefixes() {
        let cache = QueryCache::new(CacheConfig::default());
        for key in [query_key!["circle-messages", "c1"], query_key!["tasks", "u1"]] {
            cache
                .fetch(key, || async { Ok::<_, StoreError>(0u32) })
                .await
                .unwrap();
        }
        let mut events = cache.subscribe();

        let realtime = RealtimeClient::new("ws://localhost");
        let bridge = RealtimeBridge::new(realtime.clone(), Arc::clone(&cache));
        let filter = ChangeFilter::table("circle_messages").eq("circle_id", "c1");
        let _handle = bridge.watch(filter.clone(), vec![query_key!["circle-messages", "c1"]]);

        realtime.handle_message(&insert_frame(&filter.topic())).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            CacheEvent::Invalidated {
                key: query_key!["circle-messages", "c1"]
            }
        );
        assert_eq!(cache.is_stale(&query_key!["tasks", "u1"]), Some(false));
    }

    #[tokio::test]
    async fn test_custom_handler_sees_events_in_order() {
        let cache = QueryCache::new(CacheConfig::default());
        let realtime = RealtimeClient::new("ws://localhost");
        let bridge = RealtimeBridge::new(realtime.clone(), cache);
        let filter = ChangeFilter::table("circle_messages");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _handle = bridge.watch_with(filter.clone(), move |event| {
            let _ = tx.send(event.kind);
        });

        realtime.handle_message(&insert_frame(&filter.topic())).unwrap();
        let delete = insert_frame(&filter.topic()).replace("INSERT", "DELETE");
        realtime.handle_message(&delete).unwrap();

        assert_eq!(rx.recv().await, Some(crate::ChangeKind::Insert));
        assert_eq!(rx.recv().await, Some(crate::ChangeKind::Delete));
    }

    #[tokio::test]
    async fn test_dropping_handle_leaves_channel() {
        let cache = QueryCache::new(CacheConfig::default());
        let realtime = RealtimeClient::new("ws://localhost");
        let bridge = RealtimeBridge::new(realtime.clone(), cache);

        let handle = bridge.watch(ChangeFilter::table("tasks"), vec![query_key!["tasks"]]);
        assert_eq!(realtime.channel_count(), 1);

        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), async {
            while realtime.channel_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
