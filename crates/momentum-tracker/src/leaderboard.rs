//! Circle leaderboards built from members' daily summaries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use momentum_store::{
    CIRCLE_MEMBERS_TABLE, CircleMember, DAILY_SUMMARIES_TABLE, DailySummary, PROFILES_TABLE,
    Profile, Query, StoreClient, StoreError,
};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::derived::{WEEK_DAYS, daily_score, weekly_score};
use crate::{Context, Result, keys};

/// Time window a leaderboard ranks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Daily,
    Weekly,
}

impl Period {
    fn as_str(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
        }
    }

    fn start(self, today: NaiveDate) -> NaiveDate {
        match self {
            Period::Daily => today,
            Period::Weekly => today - Duration::days(WEEK_DAYS - 1),
        }
    }
}

/// One ranked member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: Uuid,
    pub name: String,
    pub score: u32,
    pub on_leave: bool,
}

pub struct Leaderboard<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn leaderboard(&self) -> Leaderboard<'_> {
        Leaderboard { ctx: self }
    }
}

impl Leaderboard<'_> {
    /// Members ranked by today's percentage.
    pub async fn daily(&self, circle_id: Uuid, today: NaiveDate) -> Result<Arc<Vec<LeaderboardEntry>>> {
        self.load(circle_id, Period::Daily, today).await
    }

    /// Members ranked by their mean percentage over the last seven days.
    pub async fn weekly(&self, circle_id: Uuid, today: NaiveDate) -> Result<Arc<Vec<LeaderboardEntry>>> {
        self.load(circle_id, Period::Weekly, today).await
    }

    async fn load(
        &self,
        circle_id: Uuid,
        period: Period,
        today: NaiveDate,
    ) -> Result<Arc<Vec<LeaderboardEntry>>> {
        self.ctx
            .read(
                keys::leaderboard_for(circle_id, period.as_str(), today),
                move |store| async move { fetch_board(store, circle_id, period, today).await },
            )
            .await
    }
}

async fn fetch_board(
    store: Arc<StoreClient>,
    circle_id: Uuid,
    period: Period,
    today: NaiveDate,
) -> std::result::Result<Vec<LeaderboardEntry>, StoreError> {
    let members: Vec<CircleMember> = store
        .select(&Query::table(CIRCLE_MEMBERS_TABLE).eq("circle_id", circle_id))
        .await?;
    let ids: Vec<Uuid> = members.iter().map(|m| m.user_id).collect();

    let profiles: Vec<Profile> = store
        .select(&Query::table(PROFILES_TABLE).in_list("id", &ids))
        .await?;
    let summaries: Vec<DailySummary> = store
        .select(
            &Query::table(DAILY_SUMMARIES_TABLE)
                .in_list("user_id", &ids)
                .gte("date", period.start(today))
                .lte("date", today),
        )
        .await?;
    debug!(
        circle = %circle_id,
        members = ids.len(),
        summaries = summaries.len(),
        "leaderboard inputs"
    );
    Ok(rank(&ids, &profiles, &summaries, period, today))
}

/// Score every member and order them best first. Ties keep member order.
pub fn rank(
    members: &[Uuid],
    profiles: &[Profile],
    summaries: &[DailySummary],
    period: Period,
    today: NaiveDate,
) -> Vec<LeaderboardEntry> {
    let names: HashMap<Uuid, &str> = profiles.iter().map(|p| (p.id, p.name())).collect();
    let mut by_user: HashMap<Uuid, Vec<DailySummary>> = HashMap::new();
    for summary in summaries {
        by_user.entry(summary.user_id).or_default().push(summary.clone());
    }

    let mut entries: Vec<LeaderboardEntry> = members
        .iter()
        .map(|&user_id| {
            let own = by_user.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
            let (score, on_leave) = match period {
                Period::Daily => {
                    let day = daily_score(own, today);
                    (day.percentage, day.on_leave)
                }
                Period::Weekly => (weekly_score(own, today), false),
            };
            LeaderboardEntry {
                rank: 0,
                user_id,
                name: names.get(&user_id).copied().unwrap_or("Anonymous").to_string(),
                score,
                on_leave,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.score.cmp(&a.score));
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn summary(user: Uuid, date: NaiveDate, percentage: u32, is_leave: bool) -> DailySummary {
        DailySummary {
            user_id: user,
            date,
            earned_points: percentage,
            possible_points: 100,
            percentage,
            is_leave,
            leave_type: None,
            leave_reason: None,
        }
    }

    fn profile(id: Uuid, name: &str) -> Profile {
        serde_json::from_value(serde_json::json!({ "id": id, "display_name": name })).unwrap()
    }

    #[test]
    fn test_daily_ranking_flags_leave() {
        let (a, b, c) = (Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3));
        let today = day(10);
        let summaries = vec![
            summary(a, today, 40, false),
            summary(b, today, 90, false),
            summary(c, today, 0, true),
            summary(a, day(9), 100, false),
        ];
        let profiles = vec![profile(a, "Ana"), profile(b, "Ben")];

        let board = rank(&[a, b, c], &profiles, &summaries, Period::Daily, today);
        let view: Vec<(usize, &str, u32, bool)> = board
            .iter()
            .map(|e| (e.rank, e.name.as_str(), e.score, e.on_leave))
            .collect();
        assert_eq!(
            view,
            vec![(1, "Ben", 90, false), (2, "Ana", 40, false), (3, "Anonymous", 0, true)]
        );
    }

    #[test]
    fn test_weekly_ranking_averages_recorded_days() {
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let today = day(10);
        let summaries = vec![
            summary(a, day(10), 100, false),
            summary(a, day(9), 50, false),
            summary(b, day(8), 80, false),
            summary(b, day(7), 0, true),
        ];

        let board = rank(&[a, b], &[], &summaries, Period::Weekly, today);
        assert_eq!(board[0].user_id, b);
        assert_eq!(board[0].score, 80);
        assert_eq!(board[1].score, 75);
    }
}
