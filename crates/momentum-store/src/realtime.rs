//! Realtime websocket transport.
//!
//! One socket multiplexes every channel by topic. Frames are Phoenix-style
//! JSON objects (`{topic, event, payload, ref}`). The transport owns
//! reconnection: after a drop it backs off exponentially, reconnects and
//! rejoins every channel that still has subscribers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use crate::{ChangeEvent, StoreConfig, StoreError};

/// Interval between heartbeats on an open socket.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 60;

/// Without any inbound frame for this long the socket is dead.
const READ_TIMEOUT: Duration = Duration::from_secs(90);

const PHOENIX_TOPIC: &str = "phoenix";

/// Wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Which row changes a subscription receives: one table, optionally narrowed
/// by a single equality filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeFilter {
    table: String,
    filter: Option<(String, String)>,
}

impl ChangeFilter {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    /// Narrow to rows where `column = value`.
    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filter = Some((column.into(), value.to_string()));
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Channel topic; equal filters always map to the same topic.
    pub fn topic(&self) -> String {
        match &self.filter {
            Some((column, value)) => {
                format!("realtime:public:{}:{}=eq.{}", self.table, column, value)
            }
            None => format!("realtime:public:{}", self.table),
        }
    }

    fn join_payload(&self) -> Value {
        let mut change = json!({
            "event": "*",
            "schema": "public",
            "table": self.table,
        });
        if let Some((column, value)) = &self.filter {
            change["filter"] = json!(format!("{}=eq.{}", column, value));
        }
        json!({ "config": { "postgres_changes": [change] } })
    }
}

/// Lifecycle of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    /// The server rejected the join or reported a channel error.
    Errored,
}

/// Messages fanned out to a channel's subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Change(ChangeEvent),
    PresenceState(Value),
    PresenceDiff(Value),
}

struct Channel {
    join_payload: Value,
    join_ref: Option<String>,
    state_tx: watch::Sender<ChannelState>,
    subscribers: Vec<(u64, mpsc::UnboundedSender<ChannelMessage>)>,
    /// Consecutive rejoins since the last accepted join.
    rejoin_attempts: u32,
}

impl Channel {
    fn new(join_payload: Value) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Unsubscribed);
        Self {
            join_payload,
            join_ref: None,
            state_tx,
            subscribers: Vec::new(),
            rejoin_attempts: 0,
        }
    }

    fn is_joined_or_joining(&self) -> bool {
        matches!(
            *self.state_tx.borrow(),
            ChannelState::Subscribing | ChannelState::Subscribed
        )
    }
}

struct Inner {
    url: String,
    channels: DashMap<String, Channel>,
    outbound_tx: mpsc::UnboundedSender<Frame>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    access_token: RwLock<Option<String>>,
    connected: AtomicBool,
    next_ref: AtomicU64,
    next_subscriber: AtomicU64,
}

/// Realtime transport shared by every subscription. Cheap to clone.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    /// Create a client for a websocket URL. Nothing connects until [`run`](Self::run).
    pub fn new(url: impl Into<String>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                channels: DashMap::new(),
                outbound_tx,
                outbound_rx: Mutex::new(outbound_rx),
                access_token: RwLock::new(None),
                connected: AtomicBool::new(false),
                next_ref: AtomicU64::new(1),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Create a client for the store's realtime endpoint.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.realtime_url())
    }

    /// User token sent with every join so row-level security applies.
    pub fn set_access_token(&self, token: Option<String>) {
        let mut guard = self
            .inner
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = token;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Subscribe to row changes. Subscriptions with equal filters share one
    /// underlying channel.
    pub fn subscribe(&self, filter: &ChangeFilter) -> Subscription {
        let channel = self.join(filter.topic(), filter.join_payload());
        Subscription {
            filter: filter.clone(),
            channel,
        }
    }

    /// Join a topic, or attach to it if already joined.
    pub fn join(&self, topic: impl Into<String>, join_payload: Value) -> ChannelHandle {
        let topic = topic.into();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        let (state, first, dead) = {
            let mut channel = self
                .inner
                .channels
                .entry(topic.clone())
                .or_insert_with(|| Channel::new(join_payload));
            channel.subscribers.push((id, tx));
            (
                channel.state_tx.subscribe(),
                channel.subscribers.len() == 1,
                !channel.is_joined_or_joining(),
            )
        };

        if first {
            debug!(topic = %topic, "opening channel");
            self.send_join(&topic);
        } else if dead {
            debug!(topic = %topic, "rejoining dead shared channel");
            self.send_join(&topic);
        } else {
            debug!(topic = %topic, "sharing existing channel");
        }

        ChannelHandle {
            client: self.clone(),
            topic,
            id,
            rx,
            state,
        }
    }

    /// Push an event on a joined topic. Dropped while disconnected.
    pub fn push(&self, topic: &str, event: &str, payload: Value) {
        let frame = Frame {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(self.next_ref()),
            join_ref: None,
        };
        self.enqueue(frame);
    }

    fn next_ref(&self) -> String {
        self.inner.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn enqueue(&self, frame: Frame) {
        if !self.is_connected() {
            trace!(topic = %frame.topic, event = %frame.event, "offline, frame not sent");
            return;
        }
        if self.inner.outbound_tx.send(frame).is_err() {
            warn!("realtime outbound queue closed");
        }
    }

    fn send_join(&self, topic: &str) {
        let join_ref = self.next_ref();
        let payload = {
            let Some(mut channel) = self.inner.channels.get_mut(topic) else {
                return;
            };
            channel.join_ref = Some(join_ref.clone());
            channel.state_tx.send_replace(ChannelState::Subscribing);
            channel.join_payload.clone()
        };

        let mut payload = payload;
        let token = self
            .inner
            .access_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let (Some(token), Some(object)) = (token, payload.as_object_mut()) {
            object.insert("access_token".to_string(), Value::String(token));
        }

        self.enqueue(Frame {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload,
            reference: Some(join_ref.clone()),
            join_ref: Some(join_ref),
        });
    }

    /// Rejoin a channel the server errored or closed, backing off 1 s
    /// doubling to 60 s across consecutive failures.
    fn schedule_rejoin(&self, topic: &str) {
        let attempts = match self.inner.channels.get_mut(topic) {
            Some(mut channel) => {
                channel.rejoin_attempts = channel.rejoin_attempts.saturating_add(1);
                channel.rejoin_attempts
            }
            None => return,
        };
        let backoff_secs = rejoin_backoff_secs(attempts);
        debug!(topic = %topic, attempts, backoff_secs, "scheduling channel rejoin");

        let client = self.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            let still_dead = client
                .inner
                .channels
                .get(&topic)
                .is_some_and(|channel| !channel.is_joined_or_joining());
            if still_dead {
                client.send_join(&topic);
            }
        });
    }

    fn rejoin_all(&self) {
        let topics: Vec<String> = self
            .inner
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        debug!(channels = topics.len(), "rejoining channels");
        for topic in topics {
            self.send_join(&topic);
        }
    }

    fn release(&self, topic: &str, id: u64) {
        let empty = match self.inner.channels.get_mut(topic) {
            Some(mut channel) => {
                channel.subscribers.retain(|(sid, _)| *sid != id);
                channel.subscribers.is_empty()
            }
            None => false,
        };
        if !empty {
            return;
        }

        if let Some((_, channel)) = self
            .inner
            .channels
            .remove_if(topic, |_, channel| channel.subscribers.is_empty())
        {
            channel.state_tx.send_replace(ChannelState::Unsubscribed);
            debug!(topic = %topic, "leaving channel");
            self.enqueue(Frame {
                topic: topic.to_string(),
                event: "phx_leave".to_string(),
                payload: json!({}),
                reference: Some(self.next_ref()),
                join_ref: channel.join_ref,
            });
        }
    }

    fn set_state(&self, topic: &str, state: ChannelState) {
        if let Some(channel) = self.inner.channels.get(topic) {
            channel.state_tx.send_replace(state);
        }
    }

    fn deliver(&self, topic: &str, message: ChannelMessage) {
        match self.inner.channels.get_mut(topic) {
            Some(mut channel) => channel
                .subscribers
                .retain(|(_, tx)| tx.send(message.clone()).is_ok()),
            None => trace!(topic = %topic, "message for unknown channel"),
        }
    }

    /// Connect and process frames until shutdown.
    ///
    /// Runs in a reconnection loop with exponential backoff.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), StoreError> {
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            if *shutdown_rx.borrow() {
                info!("realtime client shutting down");
                return Ok(());
            }

            info!(url = %redact(&self.inner.url), "connecting to realtime");

            match self.connect_and_process(&mut shutdown_rx, &mut backoff_secs).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!(error = %e, backoff_secs, "realtime connection error, reconnecting");

                    let wait = Duration::from_secs(backoff_secs);
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                return Ok(());
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }

                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    }

    async fn connect_and_process(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        backoff_secs: &mut u64,
    ) -> Result<(), StoreError> {
        let (ws_stream, _) = connect_async(self.inner.url.as_str())
            .await
            .map_err(|e| StoreError::WebSocket(format!("connection failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        info!("realtime connected");
        *backoff_secs = INITIAL_BACKOFF_SECS;

        let mut outbound = self.inner.outbound_rx.lock().await;
        // Anything queued belongs to the previous socket.
        while outbound.try_recv().is_ok() {}

        self.inner.connected.store(true, Ordering::SeqCst);
        self.rejoin_all();

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        // Outbound heartbeats do not count; only frames from the server do.
        let mut last_inbound = Instant::now();

        let result = loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("realtime received shutdown signal");
                        let _ = write.send(Message::Close(None)).await;
                        break Ok(());
                    }
                }

                Some(frame) = outbound.recv() => {
                    if let Err(e) = send_frame(&mut write, &frame).await {
                        break Err(e);
                    }
                }

                _ = heartbeat.tick() => {
                    let frame = Frame {
                        topic: PHOENIX_TOPIC.to_string(),
                        event: "heartbeat".to_string(),
                        payload: json!({}),
                        reference: Some(self.next_ref()),
                        join_ref: None,
                    };
                    trace!("sending heartbeat");
                    if let Err(e) = send_frame(&mut write, &frame).await {
                        break Err(e);
                    }
                }

                _ = tokio::time::sleep_until(last_inbound + READ_TIMEOUT) => {
                    warn!("realtime read timeout after {}s", READ_TIMEOUT.as_secs());
                    break Err(StoreError::WebSocket("read timeout".to_string()));
                }

                message = read.next() => {
                    last_inbound = Instant::now();
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_message(&text) {
                                warn!(error = %e, "failed to handle realtime message");
                            }
                        }
                        Some(Ok(Message::Ping(_))) => {
                            trace!("received ping");
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("realtime connection closed by server");
                            break Err(StoreError::WebSocket("connection closed".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            break Err(StoreError::WebSocket(format!("read error: {}", e)));
                        }
                        None => {
                            break Err(StoreError::WebSocket("stream ended".to_string()));
                        }
                    }
                }
            }
        };

        self.inner.connected.store(false, Ordering::SeqCst);
        let closing = if result.is_ok() {
            ChannelState::Unsubscribed
        } else {
            ChannelState::Subscribing
        };
        for channel in self.inner.channels.iter() {
            channel.state_tx.send_replace(closing);
        }
        result
    }

    /// Route one inbound frame.
    pub(crate) fn handle_message(&self, text: &str) -> Result<(), StoreError> {
        let frame: Frame = serde_json::from_str(text)?;

        match frame.event.as_str() {
            "phx_reply" => self.handle_reply(&frame),
            "postgres_changes" => {
                let data = frame.payload.get("data").cloned().ok_or_else(|| {
                    StoreError::Realtime("postgres_changes frame without data".to_string())
                })?;
                let event: ChangeEvent = serde_json::from_value(data)?;
                trace!(topic = %frame.topic, table = %event.table, kind = ?event.kind, "row change");
                self.deliver(&frame.topic, ChannelMessage::Change(event));
            }
            "presence_state" => {
                self.deliver(&frame.topic, ChannelMessage::PresenceState(frame.payload));
            }
            "presence_diff" => {
                self.deliver(&frame.topic, ChannelMessage::PresenceDiff(frame.payload));
            }
            "phx_error" => {
                warn!(topic = %frame.topic, "channel error");
                self.set_state(&frame.topic, ChannelState::Errored);
                self.schedule_rejoin(&frame.topic);
            }
            "phx_close" => {
                // Channels we leave are already gone from the map.
                debug!(topic = %frame.topic, "channel closed by server");
                self.set_state(&frame.topic, ChannelState::Unsubscribed);
                self.schedule_rejoin(&frame.topic);
            }
            "system" => {
                if frame.payload.get("status").and_then(Value::as_str) == Some("error") {
                    warn!(topic = %frame.topic, payload = %frame.payload, "channel system error");
                    self.set_state(&frame.topic, ChannelState::Errored);
                    self.schedule_rejoin(&frame.topic);
                }
            }
            other => {
                trace!(topic = %frame.topic, event = %other, "ignoring realtime event");
            }
        }

        Ok(())
    }

    fn handle_reply(&self, frame: &Frame) {
        if frame.topic == PHOENIX_TOPIC {
            trace!("heartbeat acknowledged");
            return;
        }
        let rejected = {
            let Some(mut channel) = self.inner.channels.get_mut(&frame.topic) else {
                return;
            };
            if channel.join_ref.is_none() || channel.join_ref != frame.reference {
                return;
            }

            let status = frame.payload.get("status").and_then(Value::as_str);
            if status == Some("ok") {
                debug!(topic = %frame.topic, "channel subscribed");
                channel.rejoin_attempts = 0;
                channel.state_tx.send_replace(ChannelState::Subscribed);
                false
            } else {
                warn!(topic = %frame.topic, response = %frame.payload, "channel join rejected");
                channel.state_tx.send_replace(ChannelState::Errored);
                true
            }
        };
        if rejected {
            self.schedule_rejoin(&frame.topic);
        }
    }
}

fn rejoin_backoff_secs(attempts: u32) -> u64 {
    let exponent = attempts.saturating_sub(1).min(6);
    (INITIAL_BACKOFF_SECS << exponent).min(MAX_BACKOFF_SECS)
}

async fn send_frame<S>(write: &mut S, frame: &Frame) -> Result<(), StoreError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(frame)?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|e| StoreError::WebSocket(format!("write error: {}", e)))
}

/// Strip the api key from a URL before logging it.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// One subscriber's attachment to a channel. Dropping it detaches; the last
/// handle to drop leaves the channel.
pub struct ChannelHandle {
    client: RealtimeClient,
    topic: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
    state: watch::Receiver<ChannelState>,
}

impl ChannelHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch the channel's lifecycle.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Next message in arrival order. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }

    /// Push an event on this channel's topic.
    pub fn push(&self, event: &str, payload: Value) {
        self.client.push(&self.topic, event, payload);
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.client.release(&self.topic, self.id);
    }
}

/// A live row-change subscription.
pub struct Subscription {
    filter: ChangeFilter,
    channel: ChannelHandle,
}

impl Subscription {
    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.channel.state_changes()
    }

    /// Next row change, in server commit order.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.channel.recv().await? {
                ChannelMessage::Change(event) => return Some(event),
                other => trace!(message = ?other, "ignoring non-change message"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChangeKind;
    use pretty_assertions::assert_eq;

    fn change_frame(topic: &str, kind: &str, id: u32) -> String {
        json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": {
                "ids": [1],
                "data": {
                    "type": kind,
                    "table": "circle_messages",
                    "schema": "public",
                    "record": {"id": id, "circle_id": "c1"},
                    "commit_timestamp": "2024-05-01T10:00:00Z"
                }
            },
            "ref": null
        })
        .to_string()
    }

    fn join_ref(client: &RealtimeClient, topic: &str) -> Option<String> {
        client.inner.channels.get(topic).and_then(|c| c.join_ref.clone())
    }

    #[test]
    fn test_topics() {
        assert_eq!(ChangeFilter::table("tasks").topic(), "realtime:public:tasks");
        assert_eq!(
            ChangeFilter::table("circle_messages").eq("circle_id", "c1").topic(),
            "realtime:public:circle_messages:circle_id=eq.c1"
        );
    }

    #[test]
    fn test_join_payload_carries_filter() {
        let payload = ChangeFilter::table("circle_messages")
            .eq("circle_id", "c1")
            .join_payload();
        assert_eq!(
            payload["config"]["postgres_changes"][0],
            json!({
                "event": "*",
                "schema": "public",
                "table": "circle_messages",
                "filter": "circle_id=eq.c1"
            })
        );
    }

    #[tokio::test]
    async fn test_equal_filters_share_one_channel() {
        let client = RealtimeClient::new("ws://localhost");
        let filter = ChangeFilter::table("circle_messages").eq("circle_id", "c1");

        let first = client.subscribe(&filter);
        let second = client.subscribe(&filter);
        let other = client.subscribe(&ChangeFilter::table("tasks"));
        assert_eq!(client.channel_count(), 2);
        assert_eq!(first.state(), ChannelState::Subscribing);

        drop(first);
        assert_eq!(client.channel_count(), 2);
        drop(second);
        assert_eq!(client.channel_count(), 1);
        drop(other);
        assert_eq!(client.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_join_reply_moves_channel_to_subscribed() {
        let client = RealtimeClient::new("ws://localhost");
        let filter = ChangeFilter::table("tasks");
        let sub = client.subscribe(&filter);
        let reference = join_ref(&client, &filter.topic()).unwrap();

        client
            .handle_message(
                &json!({
                    "topic": filter.topic(),
                    "event": "phx_reply",
                    "payload": {"status": "ok", "response": {}},
                    "ref": reference
                })
                .to_string(),
            )
            .unwrap();
        assert_eq!(sub.state(), ChannelState::Subscribed);

        client
            .handle_message(
                &json!({"topic": filter.topic(), "event": "phx_error", "payload": {}, "ref": null})
                    .to_string(),
            )
            .unwrap();
        assert_eq!(sub.state(), ChannelState::Errored);
    }

    #[tokio::test]
    async fn test_rejected_join_is_errored() {
        let client = RealtimeClient::new("ws://localhost");
        let filter = ChangeFilter::table("quizzes");
        let sub = client.subscribe(&filter);
        let reference = join_ref(&client, &filter.topic()).unwrap();

        client
            .handle_message(
                &json!({
                    "topic": filter.topic(),
                    "event": "phx_reply",
                    "payload": {"status": "error", "response": {"reason": "unauthorized"}},
                    "ref": reference
                })
                .to_string(),
            )
            .unwrap();
        assert_eq!(sub.state(), ChannelState::Errored);
    }

    #[tokio::test]
    async fn test_changes_fan_out_in_arrival_order() {
        let client = RealtimeClient::new("ws://localhost");
        let filter = ChangeFilter::table("circle_messages").eq("circle_id", "c1");
        let topic = filter.topic();
        let mut a = client.subscribe(&filter);
        let mut b = client.subscribe(&filter);

        client.handle_message(&change_frame(&topic, "INSERT", 1)).unwrap();
        client.handle_message(&change_frame(&topic, "DELETE", 2)).unwrap();

        for sub in [&mut a, &mut b] {
            let first = sub.recv().await.unwrap();
            let second = sub.recv().await.unwrap();
            assert_eq!(first.kind, ChangeKind::Insert);
            assert_eq!(first.column("id"), Some(&json!(1)));
            assert_eq!(second.kind, ChangeKind::Delete);
        }
    }

    fn reply_frame(topic: &str, status: &str, reference: &str) -> String {
        json!({
            "topic": topic,
            "event": "phx_reply",
            "payload": {"status": status, "response": {}},
            "ref": reference
        })
        .to_string()
    }

    #[test]
    fn test_rejoin_backoff_doubles_to_a_minute() {
        let schedule: Vec<u64> = (1..=8).map(rejoin_backoff_secs).collect();
        assert_eq!(schedule, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errored_channel_rejoins_after_backoff() {
        let client = RealtimeClient::new("ws://localhost");
        let filter = ChangeFilter::table("circle_messages").eq("circle_id", "c1");
        let topic = filter.topic();
        let sub = client.subscribe(&filter);
        let first_ref = join_ref(&client, &topic).unwrap();
        client.handle_message(&reply_frame(&topic, "ok", &first_ref)).unwrap();

        client
            .handle_message(&json!({"topic": topic, "event": "phx_error", "payload": {}, "ref": null}).to_string())
            .unwrap();
        assert_eq!(sub.state(), ChannelState::Errored);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(sub.state(), ChannelState::Subscribing);
        let second_ref = join_ref(&client, &topic).unwrap();
        assert_ne!(second_ref, first_ref);

        client.handle_message(&reply_frame(&topic, "ok", &second_ref)).unwrap();
        assert_eq!(sub.state(), ChannelState::Subscribed);
        assert_eq!(client.inner.channels.get(&topic).unwrap().rejoin_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_subscriber_revives_rejected_channel() {
        let client = RealtimeClient::new("ws://localhost");
        let filter = ChangeFilter::table("feed_activities");
        let topic = filter.topic();
        let first = client.subscribe(&filter);
        let rejected_ref = join_ref(&client, &topic).unwrap();
        client.handle_message(&reply_frame(&topic, "error", &rejected_ref)).unwrap();
        assert_eq!(first.state(), ChannelState::Errored);

        let second = client.subscribe(&filter);
        assert_eq!(client.channel_count(), 1);
        assert_eq!(second.state(), ChannelState::Subscribing);
        let revived_ref = join_ref(&client, &topic).unwrap();
        assert_ne!(revived_ref, rejected_ref);

        client.handle_message(&reply_frame(&topic, "ok", &revived_ref)).unwrap();
        assert_eq!(first.state(), ChannelState::Subscribed);

        // The rejoin scheduled by the rejection finds the channel healthy.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(join_ref(&client, &topic), Some(revived_ref));
        assert_eq!(second.state(), ChannelState::Subscribed);
    }

    #[test]
    fn test_malformed_frame_is_an_error() {
        let client = RealtimeClient::new("ws://localhost");
        assert!(client.handle_message("not json").is_err());
        assert!(
            client
                .handle_message(r#"{"topic":"t","event":"postgres_changes","payload":{},"ref":null}"#)
                .is_err()
        );
    }

    #[test]
    fn test_redact_strips_query() {
        assert_eq!(
            redact("wss://x.example/realtime/v1/websocket?apikey=secret&vsn=1.0.0"),
            "wss://x.example/realtime/v1/websocket"
        );
    }

    #[tokio::test]
    async fn test_run_joins_and_receives_over_socket() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let filter = ChangeFilter::table("circle_messages").eq("circle_id", "c1");
        let topic = filter.topic();

        let server_topic = topic.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let join = loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Text(text) => {
                        let frame: Frame = serde_json::from_str(&text).unwrap();
                        if frame.event == "phx_join" {
                            break frame;
                        }
                    }
                    _ => continue,
                }
            };
            assert_eq!(join.topic, server_topic);
            assert_eq!(join.payload["access_token"], json!("jwt"));

            let reply = json!({
                "topic": server_topic,
                "event": "phx_reply",
                "payload": {"status": "ok", "response": {}},
                "ref": join.reference
            });
            ws.send(Message::Text(reply.to_string())).await.unwrap();
            ws.send(Message::Text(change_frame(&server_topic, "INSERT", 7)))
                .await
                .unwrap();

            // Keep the socket open until the client hangs up.
            while let Some(Ok(message)) = ws.next().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        });

        let client = RealtimeClient::new(format!("ws://{}", addr));
        client.set_access_token(Some("jwt".to_string()));
        let mut sub = client.subscribe(&filter);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = {
            let client = client.clone();
            tokio::spawn(async move { client.run(shutdown_rx).await })
        };

        let mut states = sub.state_changes();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ChannelState::Subscribed),
        )
        .await
        .unwrap()
        .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.column("id"), Some(&json!(7)));

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap().unwrap();
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_socket_times_out_and_reconnects() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();

        // Accepts every connection and never says anything back.
        let server = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let _ = conn_tx.send(());
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });

        let client = RealtimeClient::new(format!("ws://{}", addr));
        let _sub = client.subscribe(&ChangeFilter::table("tasks"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = {
            let client = client.clone();
            tokio::spawn(async move { client.run(shutdown_rx).await })
        };

        conn_rx.recv().await.unwrap();
        let reconnected = tokio::time::timeout(Duration::from_secs(600), conn_rx.recv())
            .await
            .expect("silent socket never timed out");
        assert!(reconnected.is_some());

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap().unwrap();
        server.abort();
    }
}
