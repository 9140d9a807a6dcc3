//! Circle chat: messages, moderation and the live room.

use std::sync::Arc;

use momentum_store::{
    BridgeHandle, CIRCLE_MESSAGES_TABLE, ChangeFilter, CircleMessage, DEFAULT_TYPING_IDLE,
    Mutation, NewCircleMessage, Order, PresenceChannel, PresenceSet, PresenceTracker,
    RealtimeBridge, RealtimeClient, Query, TypingIndicator, TypingState,
};
use tokio::sync::watch;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::{Context, Result, keys};

/// Longest message accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

pub struct Chat<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn chat(&self) -> Chat<'_> {
        Chat { ctx: self }
    }
}

impl Chat<'_> {
    /// A circle's messages, oldest first.
    pub async fn messages(&self, circle_id: Uuid) -> Result<Arc<Vec<CircleMessage>>> {
        let query = Query::table(CIRCLE_MESSAGES_TABLE)
            .eq("circle_id", circle_id)
            .order("created_at", Order::Asc);
        self.ctx
            .read(keys::circle_messages(circle_id), move |store| async move {
                store.select(&query).await
            })
            .await
    }

    #[instrument(skip(self, content))]
    pub async fn send(&self, circle_id: Uuid, content: &str) -> Result<CircleMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(TrackerError::invalid("message is empty"));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(TrackerError::invalid(format!(
                "message is longer than {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        let row = NewCircleMessage {
            circle_id,
            user_id: self.ctx.user_id,
            content: content.to_string(),
        };
        self.ctx
            .write(
                Mutation::new("Message sent")
                    .invalidates(keys::circle_messages(circle_id))
                    .quiet(),
                move |store| async move { store.insert_one(CIRCLE_MESSAGES_TABLE, &row).await },
            )
            .await
    }

    /// Delete every message in a circle. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn clear_history(&self, circle_id: Uuid) -> Result<usize> {
        let query = Query::table(CIRCLE_MESSAGES_TABLE).eq("circle_id", circle_id);
        let removed = self.delete_where(query, "Chat history cleared", circle_id).await?;
        info!(circle = %circle_id, removed, "cleared chat history");
        Ok(removed)
    }

    /// Delete one member's messages in a circle.
    #[instrument(skip(self))]
    pub async fn delete_messages_from(&self, circle_id: Uuid, user_id: Uuid) -> Result<usize> {
        let query = Query::table(CIRCLE_MESSAGES_TABLE)
            .eq("circle_id", circle_id)
            .eq("user_id", user_id);
        self.delete_where(query, "Messages deleted", circle_id).await
    }

    async fn delete_where(&self, query: Query, label: &str, circle_id: Uuid) -> Result<usize> {
        let rows: Vec<CircleMessage> = self
            .ctx
            .write(
                Mutation::new(label).invalidates(keys::circle_messages(circle_id)),
                move |store| async move { store.delete(&query).await },
            )
            .await?;
        Ok(rows.len())
    }

    /// Refresh the circle's messages whenever the change feed reports one.
    pub fn watch(&self, bridge: &RealtimeBridge, circle_id: Uuid) -> BridgeHandle {
        let filter = ChangeFilter::table(CIRCLE_MESSAGES_TABLE).eq("circle_id", circle_id);
        debug!(circle = %circle_id, "watching chat");
        bridge.watch(filter, vec![keys::circle_messages(circle_id)])
    }
}

/// A joined chat room: who is here and who is typing.
pub struct ChatRoom {
    user_id: Uuid,
    presence: Arc<PresenceChannel>,
    typing: TypingIndicator,
}

impl ChatRoom {
    pub fn join(realtime: &RealtimeClient, circle_id: Uuid, user_id: Uuid, display_name: &str) -> Self {
        let presence = Arc::new(PresenceChannel::join(
            realtime,
            &circle_id.to_string(),
            user_id.to_string(),
        ));
        let tracker: Arc<dyn PresenceTracker> = presence.clone();
        let typing = TypingIndicator::spawn(tracker, user_id, display_name, DEFAULT_TYPING_IDLE);
        Self {
            user_id,
            presence,
            typing,
        }
    }

    /// Call on every edit of the message draft.
    pub fn keystroke(&self) {
        self.typing.keystroke();
    }

    /// Call when the draft is sent or cleared.
    pub fn stop_typing(&self) {
        self.typing.stop();
    }

    pub fn presence(&self) -> watch::Receiver<PresenceSet> {
        self.presence.sync()
    }

    /// Everyone else currently typing.
    pub fn typing_users(&self) -> Vec<TypingState> {
        typing_others(&self.presence.sync().borrow(), self.user_id)
    }

    /// Publish `typing = false` and leave.
    pub async fn leave(self) {
        self.typing.finish().await;
        self.presence.untrack();
    }
}

fn typing_others(set: &PresenceSet, me: Uuid) -> Vec<TypingState> {
    set.states::<TypingState>()
        .into_iter()
        .filter(|s| s.typing && s.user_id != me)
        .collect()
}
