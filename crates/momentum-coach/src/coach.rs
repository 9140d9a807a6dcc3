//! Coaching chat and activity suggestions backed by edge functions.

use std::sync::Arc;

use momentum_store::{AI_MEMORIES_TABLE, AiMemory, Mutation, NewAiMemory, Order, Query};
use momentum_tracker::{Context, keys};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::context::{CoachContext, CoachRequest};
use crate::error::Result;
use crate::reply::{CoachReply, MemoryNote, Suggestion, parse_reply, parse_suggestions};

pub const COACH_FUNCTION: &str = "ai-coach";
pub const SUGGESTIONS_FUNCTION: &str = "ai-suggestions";

/// JSON envelopes the coaching endpoint may wrap its text in.
#[derive(Deserialize)]
struct ReplyEnvelope {
    #[serde(alias = "response", alias = "message", alias = "content")]
    reply: String,
}

/// Take the reply text out of a response body: a JSON envelope, a JSON
/// string, or the raw body.
fn reply_text(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ReplyEnvelope>(body) {
        return envelope.reply;
    }
    if let Ok(text) = serde_json::from_str::<String>(body) {
        return text;
    }
    body.to_string()
}

pub struct Coach {
    ctx: Context,
}

impl Coach {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Send the conversation, keep any memories the reply carries and
    /// return what should be shown.
    #[instrument(skip(self, request), fields(turns = request.messages.len()))]
    pub async fn ask(&self, request: &CoachRequest) -> Result<CoachReply> {
        request.validate()?;
        let body = self.ctx.store.invoke_text(COACH_FUNCTION, request).await?;
        let reply = parse_reply(&reply_text(&body));
        debug!(memories = reply.memories.len(), "coach replied");

        for note in &reply.memories {
            if let Err(e) = self.remember(note).await {
                warn!(error = %e, category = %note.category, "failed to save memory");
            }
        }
        Ok(reply)
    }

    /// Store one memory as its own row.
    async fn remember(&self, note: &MemoryNote) -> Result<AiMemory> {
        let row = NewAiMemory {
            user_id: self.ctx.user_id,
            category: note.category.clone(),
            content: note.content.clone(),
        };
        let store = Arc::clone(&self.ctx.store);
        let memory: AiMemory = self
            .ctx
            .mutations
            .execute(
                Mutation::new("Memory saved")
                    .invalidates(keys::ai_memories(self.ctx.user_id))
                    .quiet(),
                move || async move { store.insert_one(AI_MEMORIES_TABLE, &row).await },
            )
            .await?;
        info!(memory = %memory.id, category = %memory.category, "memory saved");
        Ok(memory)
    }

    /// Everything the coach has been asked to remember, newest first.
    pub async fn memories(&self) -> Result<Arc<Vec<AiMemory>>> {
        let query = Query::table(AI_MEMORIES_TABLE)
            .eq("user_id", self.ctx.user_id)
            .order("created_at", Order::Desc);
        let store = Arc::clone(&self.ctx.store);
        Ok(self
            .ctx
            .cache
            .fetch(keys::ai_memories(self.ctx.user_id), move || async move {
                store.select(&query).await
            })
            .await?)
    }

    /// Ask for activity ideas. A reply that cannot be decoded gives none.
    #[instrument(skip(self, context))]
    pub async fn suggestions(&self, context: &CoachContext) -> Result<Vec<Suggestion>> {
        let body = self
            .ctx
            .store
            .invoke_text(SUGGESTIONS_FUNCTION, &json!({ "context": context }))
            .await?;
        let suggestions = parse_suggestions(&reply_text(&body));
        debug!(count = suggestions.len(), "suggestions received");
        Ok(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_text_envelopes() {
        assert_eq!(reply_text(r#"{"reply": "hi"}"#), "hi");
        assert_eq!(reply_text(r#"{"response": "hi"}"#), "hi");
        assert_eq!(reply_text(r#""hi""#), "hi");
        assert_eq!(reply_text("hi there"), "hi there");
        assert_eq!(reply_text(r#"[{"title": "Walk"}]"#), r#"[{"title": "Walk"}]"#);
    }
}
