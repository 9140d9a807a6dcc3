//! Ephemeral per-room membership state and the chat typing indicator.
//!
//! Presence is never persisted. Each participant tracks one state object on
//! the room's channel; the server fans out the full set on join and diffs
//! afterwards.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::StoreError;
use crate::realtime::{ChannelMessage, ChannelState, RealtimeClient};

/// Idle time after the last keystroke before typing is cleared.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(3);

/// Typing state a chat participant publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingState {
    pub user_id: Uuid,
    pub display_name: String,
    pub typing: bool,
}

/// Current membership of a presence room: presence key to tracked states.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSet {
    members: BTreeMap<String, Vec<Value>>,
}

impl PresenceSet {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn metas(&self, key: &str) -> &[Value] {
        self.members.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Decode every tracked state that parses as `T`.
    pub fn states<T: DeserializeOwned>(&self) -> Vec<T> {
        self.members
            .values()
            .flatten()
            .filter_map(|meta| serde_json::from_value(meta.clone()).ok())
            .collect()
    }

    fn replace(&mut self, state: &Value) {
        self.members.clear();
        if let Some(entries) = state.as_object() {
            for (key, entry) in entries {
                let metas = metas_of(entry);
                if !metas.is_empty() {
                    self.members.insert(key.clone(), metas);
                }
            }
        }
    }

    fn apply_diff(&mut self, diff: &Value) {
        if let Some(joins) = diff.get("joins").and_then(Value::as_object) {
            for (key, entry) in joins {
                let joined = metas_of(entry);
                let refs: Vec<&Value> = joined.iter().filter_map(|m| m.get("phx_ref")).collect();
                let current = self.members.entry(key.clone()).or_default();
                current.retain(|m| m.get("phx_ref").is_none_or(|r| !refs.contains(&r)));
                current.extend(joined.iter().cloned());
            }
        }
        if let Some(leaves) = diff.get("leaves").and_then(Value::as_object) {
            for (key, entry) in leaves {
                let left = metas_of(entry);
                let refs: Vec<&Value> = left.iter().filter_map(|m| m.get("phx_ref")).collect();
                if let Some(current) = self.members.get_mut(key) {
                    current.retain(|m| m.get("phx_ref").is_some_and(|r| !refs.contains(&r)));
                    if current.is_empty() {
                        self.members.remove(key);
                    }
                }
            }
        }
    }
}

fn metas_of(entry: &Value) -> Vec<Value> {
    entry
        .get("metas")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Publishes this participant's typing state.
#[async_trait]
pub trait PresenceTracker: Send + Sync {
    async fn publish(&self, state: TypingState) -> Result<(), StoreError>;
}

/// Membership channel for one room (`realtime:presence:{room}`).
pub struct PresenceChannel {
    client: RealtimeClient,
    topic: String,
    tracked: Arc<Mutex<Option<Value>>>,
    sync_rx: watch::Receiver<PresenceSet>,
    task: JoinHandle<()>,
}

impl PresenceChannel {
    /// Join `room` as `key`. Membership is kept current in the background
    /// until the channel is dropped.
    pub fn join(client: &RealtimeClient, room: &str, key: impl Into<String>) -> Self {
        let topic = format!("realtime:presence:{}", room);
        let key = key.into();
        let mut handle = client.join(
            topic.clone(),
            json!({ "config": { "presence": { "key": key } } }),
        );
        debug!(topic = %topic, key = %key, "joined presence room");

        let (sync_tx, sync_rx) = watch::channel(PresenceSet::default());
        let tracked: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let retrack = Arc::clone(&tracked);
        let mut states = handle.state_changes();

        let push_client = client.clone();
        let push_topic = topic.clone();
        let task = tokio::spawn(async move {
            loop {
                let wake = tokio::select! {
                    message = handle.recv() => Wake::Message(message),
                    changed = states.changed() => Wake::State(changed.is_ok()),
                };

                match wake {
                    Wake::Message(None) | Wake::State(false) => break,
                    Wake::Message(Some(ChannelMessage::PresenceState(state))) => {
                        sync_tx.send_modify(|set| set.replace(&state));
                    }
                    Wake::Message(Some(ChannelMessage::PresenceDiff(diff))) => {
                        sync_tx.send_modify(|set| set.apply_diff(&diff));
                    }
                    Wake::Message(Some(ChannelMessage::Change(_))) => {}
                    Wake::State(true) => {
                        if *states.borrow_and_update() != ChannelState::Subscribed {
                            continue;
                        }
                        let last = retrack
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .clone();
                        if let Some(payload) = last {
                            trace!("re-tracking presence after rejoin");
                            push_client.push(&push_topic, "presence", track_frame(payload));
                        }
                    }
                }
            }
        });

        Self {
            client: client.clone(),
            topic,
            tracked,
            sync_rx,
            task,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Replace this participant's state in the room.
    pub fn track<S: Serialize>(&self, state: &S) -> Result<(), StoreError> {
        let payload = serde_json::to_value(state)?;
        *self
            .tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(payload.clone());
        self.client.push(&self.topic, "presence", track_frame(payload));
        Ok(())
    }

    /// Remove this participant's state from the room.
    pub fn untrack(&self) {
        *self
            .tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        self.client.push(
            &self.topic,
            "presence",
            json!({ "type": "presence", "event": "untrack" }),
        );
    }

    /// Watch the room's full membership.
    pub fn sync(&self) -> watch::Receiver<PresenceSet> {
        self.sync_rx.clone()
    }
}

enum Wake {
    Message(Option<ChannelMessage>),
    State(bool),
}

fn track_frame(payload: Value) -> Value {
    json!({ "type": "presence", "event": "track", "payload": payload })
}

impl Drop for PresenceChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl PresenceTracker for PresenceChannel {
    async fn publish(&self, state: TypingState) -> Result<(), StoreError> {
        self.track(&state)
    }
}

// =============================================================================
// Typing indicator
// =============================================================================

enum Signal {
    Keystroke,
    Stop,
}

/// Debounced typing state for one participant.
///
/// The first keystroke publishes `typing = true`; each keystroke restarts the
/// idle timer; once it expires (or on [`stop`](Self::stop)) `typing = false`
/// is published.
pub struct TypingIndicator {
    tx: mpsc::UnboundedSender<Signal>,
    task: JoinHandle<()>,
}

impl TypingIndicator {
    pub fn spawn(
        tracker: Arc<dyn PresenceTracker>,
        user_id: Uuid,
        display_name: impl Into<String>,
        idle: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let display_name = display_name.into();

        let task = tokio::spawn(async move {
            let publish = |typing: bool| {
                let tracker = Arc::clone(&tracker);
                let state = TypingState {
                    user_id,
                    display_name: display_name.clone(),
                    typing,
                };
                async move {
                    if let Err(e) = tracker.publish(state).await {
                        warn!(error = %e, typing, "failed to publish typing state");
                    }
                }
            };

            let mut typing = false;
            let mut deadline: Option<Instant> = None;

            loop {
                let idle_at = deadline;
                let idle_timer = async move {
                    match idle_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };

                let signal = tokio::select! {
                    signal = rx.recv() => signal,
                    _ = idle_timer => {
                        trace!("typing idle timeout");
                        typing = false;
                        deadline = None;
                        publish(false).await;
                        continue;
                    }
                };

                match signal {
                    Some(Signal::Keystroke) => {
                        if !typing {
                            typing = true;
                            publish(true).await;
                        }
                        deadline = Some(Instant::now() + idle);
                    }
                    Some(Signal::Stop) => {
                        if typing {
                            typing = false;
                            publish(false).await;
                        }
                        deadline = None;
                    }
                    None => {
                        if typing {
                            publish(false).await;
                        }
                        break;
                    }
                }
            }
        });

        Self { tx, task }
    }

    /// Record a keystroke.
    pub fn keystroke(&self) {
        let _ = self.tx.send(Signal::Keystroke);
    }

    /// Clear typing immediately (message sent, input blurred).
    pub fn stop(&self) {
        let _ = self.tx.send(Signal::Stop);
    }

    /// Clear typing and wait for the final publish.
    pub async fn finish(self) {
        let Self { tx, task } = self;
        drop(tx);
        let _ = task.await;
    }
}
