//! Request types for the coaching endpoint.

use serde::{Deserialize, Serialize};

use crate::error::{CoachError, Result};

/// Who wrote a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What the coach knows about the user's current situation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachContext {
    pub recent_tasks: Vec<String>,
    pub streak: u32,
    pub level: u32,
    pub current_page: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachRequest {
    pub messages: Vec<ChatTurn>,
    pub context: CoachContext,
}

impl CoachRequest {
    pub fn new(messages: Vec<ChatTurn>, context: CoachContext) -> Self {
        Self { messages, context }
    }

    /// A conversation must end with a non-empty user turn.
    pub fn validate(&self) -> Result<()> {
        match self.messages.last() {
            None => Err(CoachError::InvalidRequest("conversation is empty".into())),
            Some(turn) if turn.role != Role::User => Err(CoachError::InvalidRequest(
                "conversation must end with a user message".into(),
            )),
            Some(turn) if turn.content.trim().is_empty() => {
                Err(CoachError::InvalidRequest("last message is empty".into()))
            }
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wire_shape() {
        let context = CoachContext {
            recent_tasks: vec!["Write report".into()],
            streak: 4,
            level: 2,
            current_page: Some("dashboard".into()),
        };
        let value = serde_json::to_value(&context).unwrap();
        assert_eq!(value["recentTasks"][0], "Write report");
        assert_eq!(value["currentPage"], "dashboard");
        assert_eq!(
            serde_json::to_value(ChatTurn::user("hi")).unwrap(),
            serde_json::json!({"role": "user", "content": "hi"})
        );
    }

    #[test]
    fn test_validate() {
        let ctx = CoachContext::default();
        assert!(CoachRequest::new(vec![], ctx.clone()).validate().is_err());
        assert!(
            CoachRequest::new(vec![ChatTurn::assistant("hello")], ctx.clone())
                .validate()
                .is_err()
        );
        assert!(
            CoachRequest::new(vec![ChatTurn::user("  ")], ctx.clone())
                .validate()
                .is_err()
        );
        assert!(
            CoachRequest::new(vec![ChatTurn::assistant("hello"), ChatTurn::user("help")], ctx)
                .validate()
                .is_ok()
        );
    }
}
