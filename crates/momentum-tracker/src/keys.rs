//! Cache key families.
//!
//! Every key the services read under is built here, so a mutation and the
//! reads it must refresh can never disagree on a prefix.

use chrono::NaiveDate;
use momentum_store::{QueryKey, query_key};
use uuid::Uuid;

pub fn tasks() -> QueryKey {
    query_key!["tasks"]
}

pub fn tasks_for(user: Uuid) -> QueryKey {
    tasks().with(user)
}

pub fn task_logs(task: Uuid) -> QueryKey {
    query_key!["task-logs", task]
}

pub fn focus_sessions(user: Uuid) -> QueryKey {
    query_key!["focus-sessions", user]
}

pub fn productivity_tasks(user: Uuid) -> QueryKey {
    query_key!["productivity-tasks", user]
}

pub fn productivity_logs(user: Uuid) -> QueryKey {
    query_key!["productivity-logs", user]
}

pub fn productivity_logs_on(user: Uuid, date: NaiveDate) -> QueryKey {
    productivity_logs(user).with(date)
}

/// Every summary-derived read for a user (single days and months).
pub fn daily_summaries(user: Uuid) -> QueryKey {
    query_key!["daily-summaries", user]
}

pub fn daily_summary(user: Uuid, date: NaiveDate) -> QueryKey {
    daily_summaries(user).with("day").with(date)
}

pub fn summary_month(user: Uuid, year: i32, month: u32) -> QueryKey {
    daily_summaries(user).with("month").with(year).with(month)
}

pub fn daily_steps(user: Uuid) -> QueryKey {
    query_key!["daily-steps", user]
}

pub fn daily_steps_on(user: Uuid, date: NaiveDate) -> QueryKey {
    daily_steps(user).with(date)
}

pub fn circles() -> QueryKey {
    query_key!["circles"]
}

pub fn circles_for(user: Uuid) -> QueryKey {
    circles().with(user)
}

pub fn circle_members(circle: Uuid) -> QueryKey {
    query_key!["circle-members", circle]
}

pub fn circle_messages(circle: Uuid) -> QueryKey {
    query_key!["circle-messages", circle]
}

pub fn activity_feed() -> QueryKey {
    query_key!["activity-feed"]
}

pub fn activity_feed_for(circle: Option<Uuid>) -> QueryKey {
    activity_feed().with(circle)
}

pub fn reactions() -> QueryKey {
    query_key!["activity-reactions"]
}

pub fn reactions_for(activity: Uuid) -> QueryKey {
    reactions().with(activity)
}

pub fn quizzes(circle: Uuid) -> QueryKey {
    query_key!["quizzes", circle]
}

pub fn quiz_attempts(quiz: Uuid) -> QueryKey {
    query_key!["quiz-attempts", quiz]
}

pub fn leaderboard() -> QueryKey {
    query_key!["leaderboard"]
}

pub fn leaderboard_for(circle: Uuid, period: &str, today: NaiveDate) -> QueryKey {
    leaderboard().with(circle).with(period).with(today)
}

pub fn profiles() -> QueryKey {
    query_key!["profiles"]
}

pub fn profile(user: Uuid) -> QueryKey {
    profiles().with(user)
}

pub fn ai_memories(user: Uuid) -> QueryKey {
    query_key!["ai-memories", user]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_reads_share_user_prefix() {
        let user = Uuid::nil();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert!(daily_summary(user, day).starts_with(&daily_summaries(user)));
        assert!(summary_month(user, 2024, 5).starts_with(&daily_summaries(user)));
        assert!(!daily_summary(user, day).starts_with(&daily_steps(user)));
    }

    #[test]
    fn test_families_are_distinct() {
        let id = Uuid::nil();
        assert!(!task_logs(id).starts_with(&tasks()));
        assert!(tasks_for(id).starts_with(&tasks()));
        assert!(activity_feed_for(None).starts_with(&activity_feed()));
        assert!(profile(id).starts_with(&profiles()));
    }
}
