//! Shared handles every feature service runs against.

use std::future::Future;
use std::sync::Arc;

use momentum_store::{Mutation, MutationExecutor, QueryCache, QueryKey, StoreClient, StoreError};
use uuid::Uuid;

use crate::Result;

/// The signed-in user's view of the store.
///
/// Cloning is cheap; every clone shares the same cache.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<StoreClient>,
    pub cache: Arc<QueryCache>,
    pub mutations: MutationExecutor,
    pub user_id: Uuid,
}

impl Context {
    pub fn new(store: Arc<StoreClient>, cache: Arc<QueryCache>, user_id: Uuid) -> Self {
        let mutations = MutationExecutor::new(Arc::clone(&cache));
        Self {
            store,
            cache,
            mutations,
            user_id,
        }
    }

    /// Build a context for whoever holds the store's current session.
    pub async fn for_session(store: Arc<StoreClient>, cache: Arc<QueryCache>) -> Result<Self> {
        let user_id = store.require_user().await?;
        Ok(Self::new(store, cache, user_id))
    }

    /// Read through the cache.
    pub(crate) async fn read<T, F, Fut>(&self, key: QueryKey, fetch: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<StoreClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        let store = Arc::clone(&self.store);
        Ok(self.cache.fetch(key, move || fetch(store)).await?)
    }

    /// Run a write through the mutation executor.
    pub(crate) async fn write<T, F, Fut>(&self, mutation: Mutation, write: F) -> Result<T>
    where
        F: FnOnce(Arc<StoreClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        let store = Arc::clone(&self.store);
        Ok(self.mutations.execute(mutation, move || write(store)).await?)
    }
}
