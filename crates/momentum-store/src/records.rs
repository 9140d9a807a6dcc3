//! Row types for the tables the application reads and writes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TASKS_TABLE: &str = "tasks";
pub const TASK_LOGS_TABLE: &str = "task_logs";
pub const PRODUCTIVITY_TASKS_TABLE: &str = "productivity_tasks";
pub const PRODUCTIVITY_LOGS_TABLE: &str = "productivity_logs";
pub const DAILY_SUMMARIES_TABLE: &str = "daily_summaries";
pub const CIRCLES_TABLE: &str = "circles";
pub const CIRCLE_MEMBERS_TABLE: &str = "circle_members";
pub const CIRCLE_MESSAGES_TABLE: &str = "circle_messages";
pub const ACTIVITY_FEED_TABLE: &str = "activity_feed";
pub const ACTIVITY_REACTIONS_TABLE: &str = "activity_reactions";
pub const QUIZZES_TABLE: &str = "quizzes";
pub const QUIZ_ATTEMPTS_TABLE: &str = "quiz_attempts";
pub const PROFILES_TABLE: &str = "profiles";
pub const DAILY_STEPS_TABLE: &str = "daily_steps";
pub const FOCUS_SESSIONS_TABLE: &str = "focus_sessions";
pub const AI_MEMORIES_TABLE: &str = "ai_memories";

// =============================================================================
// Tasks
// =============================================================================

/// A to-do item owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub category: String,
    pub estimated_minutes: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub logged_minutes: u32,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub user_id: Uuid,
    pub title: String,
    pub category: String,
    pub estimated_minutes: u32,
    pub completed: bool,
}

/// Minutes logged against a task on one day. Unique per (task_id, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub minutes: u32,
}

// =============================================================================
// Productivity tracker
// =============================================================================

/// How a productivity task is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    Numeric,
    Boolean,
}

/// A recurring habit measured once per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub kind: MeasureKind,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    pub points: u32,
    #[serde(default = "default_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Insert payload for a productivity task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProductivityTask {
    pub user_id: Uuid,
    pub name: String,
    pub kind: MeasureKind,
    pub target: Option<f64>,
    pub unit: Option<String>,
    pub points: u32,
    pub active: bool,
}

/// One day's measurement for a productivity task. Unique per (task_id, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityLog {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub done: Option<bool>,
}

/// Per-day totals for a user. Unique per (user_id, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub user_id: Uuid,
    pub date: NaiveDate,
    #[serde(default)]
    pub earned_points: u32,
    #[serde(default)]
    pub possible_points: u32,
    #[serde(default)]
    pub percentage: u32,
    #[serde(default)]
    pub is_leave: bool,
    #[serde(default)]
    pub leave_type: Option<String>,
    #[serde(default)]
    pub leave_reason: Option<String>,
}

// =============================================================================
// Steps and focus
// =============================================================================

/// Step count for one day. Unique per (user_id, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySteps {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub steps: u32,
    pub goal: u32,
}

/// A completed focus timer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusSession {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub minutes: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFocusSession {
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub minutes: u32,
    pub started_at: DateTime<Utc>,
}

// =============================================================================
// Circles
// =============================================================================

/// A named group joined through an invite code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub invite_code: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCircle {
    pub name: String,
    pub description: Option<String>,
    pub invite_code: String,
    pub created_by: Uuid,
}

/// Role of a member inside a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Member,
    Admin,
}

/// Membership row. Unique per (circle_id, user_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleMember {
    pub circle_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

/// A chat message inside a circle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleMessage {
    pub id: Uuid,
    pub circle_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCircleMessage {
    pub circle_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
}

// =============================================================================
// Activity feed
// =============================================================================

/// What an activity feed item records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    TaskCompleted,
    FocusSession,
    StreakMilestone,
    QuizCompleted,
    LevelUp,
    StepsGoal,
}

/// Immutable event record, optionally scoped to a circle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityFeedItem {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub circle_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub title: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
    pub user_id: Uuid,
    pub circle_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub title: String,
    pub metadata: serde_json::Value,
}

/// Emoji reaction. Unique per (activity_id, user_id, emoji).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub activity_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Quizzes
// =============================================================================

/// One multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
}

/// A quiz owned by a circle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: Uuid,
    pub circle_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuiz {
    pub circle_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
}

/// A scored attempt. Insert-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub user_id: Uuid,
    pub score: u32,
    pub total_questions: u32,
    #[serde(default)]
    pub answers: Vec<usize>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuizAttempt {
    pub quiz_id: Uuid,
    pub user_id: Uuid,
    pub score: u32,
    pub total_questions: u32,
    pub answers: Vec<usize>,
}

// =============================================================================
// Profiles and AI memories
// =============================================================================

/// Application role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

/// One per user; aggregates progress counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub xp: u32,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub total_focus_minutes: u32,
    #[serde(default)]
    pub role: UserRole,
}

fn default_level() -> u32 {
    1
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Name to show in chat and leaderboards.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Anonymous")
    }
}

/// A fact the AI coach asked to remember about the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMemory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAiMemory {
    pub user_id: Uuid,
    pub category: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults_when_columns_missing() {
        let json = r#"{
            "id": "0b8f6f3a-5d7b-4a55-9a35-0d6a4e1f7c01",
            "user_id": "6f1c1b9e-8a0c-4c7e-9d59-3f8f0c2b1a11",
            "title": "Write report",
            "category": "Work",
            "estimated_minutes": 30,
            "created_at": "2024-05-01T09:00:00Z"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert!(!task.completed);
        assert_eq!(task.logged_minutes, 0);
    }

    #[test]
    fn test_activity_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(ActivityKind::TaskCompleted).unwrap(),
            serde_json::json!("task_completed")
        );
        assert_eq!(
            serde_json::from_value::<ActivityKind>(serde_json::json!("streak_milestone")).unwrap(),
            ActivityKind::StreakMilestone
        );
    }

    #[test]
    fn test_profile_defaults() {
        let profile: Profile =
            serde_json::from_str(r#"{"id": "6f1c1b9e-8a0c-4c7e-9d59-3f8f0c2b1a11"}"#).unwrap();
        assert_eq!(profile.level, 1);
        assert_eq!(profile.role, UserRole::User);
        assert_eq!(profile.name(), "Anonymous");
        assert!(!profile.is_admin());
    }

    #[test]
    fn test_summary_date_format() {
        let summary = DailySummary {
            user_id: Uuid::nil(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            earned_points: 8,
            possible_points: 10,
            percentage: 80,
            is_leave: false,
            leave_type: None,
            leave_reason: None,
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["date"], "2024-05-01");
    }
}
