//! Wire types shared by the REST and auth endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated user as returned by the auth endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Session information from authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUser,
}

/// Error body returned by the REST layer.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(alias = "msg", alias = "error_description")]
    pub message: String,
    #[serde(default)]
    pub hint: Option<String>,
}

/// Kind of row change delivered by the realtime feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change pushed by the realtime feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// New row (absent for deletes).
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    /// Previous row (only primary key columns unless replica identity is full).
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Read a column from the new row, falling back to the old row.
    pub fn column(&self, name: &str) -> Option<&serde_json::Value> {
        self.record
            .as_ref()
            .and_then(|r| r.get(name))
            .or_else(|| self.old_record.as_ref().and_then(|r| r.get(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session() {
        let json = r#"{
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": {"id": "6f1c1b9e-8a0c-4c7e-9d59-3f8f0c2b1a11", "email": "a@b.c"}
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.access_token, "at");
        assert_eq!(session.user.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_parse_api_error_aliases() {
        let body: ApiErrorBody =
            serde_json::from_str(r#"{"error": "invalid_grant", "error_description": "bad creds"}"#)
                .unwrap();
        assert_eq!(body.message, "bad creds");
        assert!(body.code.is_none());
    }

    #[test]
    fn test_change_event_column_fallback() {
        let event: ChangeEvent = serde_json::from_str(
            r#"{"type": "DELETE", "table": "circle_messages", "old_record": {"id": "m1", "circle_id": "c1"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert_eq!(event.column("circle_id"), Some(&serde_json::json!("c1")));
        assert!(event.record.is_none());
    }
}
