//! Remote store access and client-side sync for Momentum Circle.
//!
//! ## Features
//!
//! - **Client**: REST client for table reads/writes, auth and edge functions
//! - **Cache**: Key-addressed query cache with prefix invalidation
//! - **Mutations**: Writes that invalidate cache prefixes on success
//! - **Realtime**: Websocket change feed bridged into cache invalidation
//! - **Presence**: Ephemeral room membership and the typing indicator

pub mod bridge;
pub mod cache;
mod client;
mod config;
mod error;
pub mod mutation;
pub mod presence;
mod query;
pub mod realtime;
mod records;
mod types;

pub use bridge::{BridgeHandle, RealtimeBridge};
pub use cache::{
    CacheConfig, CacheEvent, Freshness, KeyPart, QueryCache, QueryKey, QueryObserver, QueryState,
};
pub use client::StoreClient;
pub use config::{StoreConfig, StoreConfigBuilder};
pub use error::{QueryError, StoreError};
pub use mutation::{Mutation, MutationExecutor, Notice};
pub use presence::{
    DEFAULT_TYPING_IDLE, PresenceChannel, PresenceSet, PresenceTracker, TypingIndicator,
    TypingState,
};
pub use query::{Filter, Order, Query};
pub use realtime::{
    ChangeFilter, ChannelHandle, ChannelMessage, ChannelState, RealtimeClient, Subscription,
};
pub use records::*;
pub use types::{AuthUser, ChangeEvent, ChangeKind, Session};
