//! Activity feed and emoji reactions.

use std::sync::Arc;

use momentum_store::{
    ACTIVITY_FEED_TABLE, ACTIVITY_REACTIONS_TABLE, ActivityFeedItem, ActivityKind, Mutation,
    NewActivity, Order, Query, Reaction,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::{Context, Result, keys};

/// Items shown per feed page.
pub const FEED_PAGE_SIZE: usize = 50;

/// An activity about to be posted by the context's user.
#[derive(Debug, Clone)]
pub struct ActivityDraft {
    pub circle_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub title: String,
    pub metadata: serde_json::Value,
}

pub struct Feed<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn feed(&self) -> Feed<'_> {
        Feed { ctx: self }
    }
}

impl Feed<'_> {
    /// Latest activity, newest first: one circle's, or everything visible.
    pub async fn list(&self, circle: Option<Uuid>) -> Result<Arc<Vec<ActivityFeedItem>>> {
        let mut query = Query::table(ACTIVITY_FEED_TABLE);
        if let Some(circle) = circle {
            query = query.eq("circle_id", circle);
        }
        let query = query.order("created_at", Order::Desc).limit(FEED_PAGE_SIZE);

        self.ctx
            .read(keys::activity_feed_for(circle), move |store| async move {
                store.select(&query).await
            })
            .await
    }

    /// Post an activity. Quiet: the write that caused it already announced itself.
    #[instrument(skip(self, draft), fields(kind = ?draft.kind))]
    pub async fn post(&self, draft: ActivityDraft) -> Result<ActivityFeedItem> {
        let row = NewActivity {
            user_id: self.ctx.user_id,
            circle_id: draft.circle_id,
            kind: draft.kind,
            title: draft.title,
            metadata: draft.metadata,
        };
        self.ctx
            .write(
                Mutation::new("Activity posted")
                    .invalidates(keys::activity_feed())
                    .quiet(),
                move |store| async move { store.insert_one(ACTIVITY_FEED_TABLE, &row).await },
            )
            .await
    }

    pub async fn reactions(&self, activity: Uuid) -> Result<Arc<Vec<Reaction>>> {
        let query = Query::table(ACTIVITY_REACTIONS_TABLE)
            .eq("activity_id", activity)
            .order("created_at", Order::Asc);
        self.ctx
            .read(keys::reactions_for(activity), move |store| async move {
                store.select(&query).await
            })
            .await
    }

    /// Add the user's `emoji` reaction, or remove it if present. Returns
    /// whether the reaction exists afterwards.
    #[instrument(skip(self))]
    pub async fn toggle_reaction(&self, activity: Uuid, emoji: &str) -> Result<bool> {
        if emoji.trim().is_empty() {
            return Err(TrackerError::invalid("reaction emoji is empty"));
        }
        let mine = Query::table(ACTIVITY_REACTIONS_TABLE)
            .eq("activity_id", activity)
            .eq("user_id", self.ctx.user_id)
            .eq("emoji", emoji);

        // Read the row directly: a cached list may already be stale.
        let existing: Option<Reaction> = self.ctx.store.select_one(&mine).await?;
        let mutation = Mutation::new("Reaction updated")
            .invalidates(keys::reactions_for(activity))
            .quiet();

        match existing {
            Some(_) => {
                self.ctx
                    .write(mutation, move |store| async move {
                        store.delete::<Reaction>(&mine).await
                    })
                    .await?;
                debug!(activity = %activity, emoji, "reaction removed");
                Ok(false)
            }
            None => {
                let row = Reaction {
                    activity_id: activity,
                    user_id: self.ctx.user_id,
                    emoji: emoji.to_string(),
                    created_at: None,
                };
                self.ctx
                    .write(mutation, move |store| async move {
                        store
                            .upsert::<_, Reaction>(
                                ACTIVITY_REACTIONS_TABLE,
                                &row,
                                &["activity_id", "user_id", "emoji"],
                            )
                            .await
                    })
                    .await?;
                debug!(activity = %activity, emoji, "reaction added");
                Ok(true)
            }
        }
    }
}
