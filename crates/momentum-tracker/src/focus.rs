//! Focus timer sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use momentum_store::{
    ActivityKind, FOCUS_SESSIONS_TABLE, FocusSession, Mutation, NewFocusSession, Order, Query,
};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::feed::ActivityDraft;
use crate::{Context, Result, keys};

pub struct Focus<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn focus(&self) -> Focus<'_> {
        Focus { ctx: self }
    }
}

impl Focus<'_> {
    /// Store a finished timer run and announce it on the feed.
    #[instrument(skip(self))]
    pub async fn record_session(
        &self,
        task_id: Option<Uuid>,
        minutes: u32,
        started_at: DateTime<Utc>,
    ) -> Result<FocusSession> {
        if minutes == 0 {
            return Err(TrackerError::invalid("focus session has no minutes"));
        }
        let row = NewFocusSession {
            user_id: self.ctx.user_id,
            task_id,
            minutes,
            started_at,
        };

        let session: FocusSession = self
            .ctx
            .write(
                Mutation::new("Focus session saved")
                    .invalidates(keys::focus_sessions(self.ctx.user_id))
                    .invalidates(keys::profile(self.ctx.user_id)),
                move |store| async move { store.insert_one(FOCUS_SESSIONS_TABLE, &row).await },
            )
            .await?;
        info!(session = %session.id, minutes, "focus session recorded");

        self.ctx
            .feed()
            .post(ActivityDraft {
                circle_id: None,
                kind: ActivityKind::FocusSession,
                title: format!("Focused for {} minutes", minutes),
                metadata: json!({ "minutes": minutes, "task_id": task_id }),
            })
            .await?;
        Ok(session)
    }

    /// The user's sessions, newest first.
    pub async fn sessions(&self) -> Result<Arc<Vec<FocusSession>>> {
        let query = Query::table(FOCUS_SESSIONS_TABLE)
            .eq("user_id", self.ctx.user_id)
            .order("started_at", Order::Desc);
        self.ctx
            .read(keys::focus_sessions(self.ctx.user_id), move |store| async move {
                store.select(&query).await
            })
            .await
    }
}
