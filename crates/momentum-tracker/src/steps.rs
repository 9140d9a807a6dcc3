//! Daily step counts.

use std::sync::Arc;

use chrono::NaiveDate;
use momentum_store::{ActivityKind, DAILY_STEPS_TABLE, DailySteps, Mutation, Query};
use serde_json::json;
use tracing::{debug, instrument};

use crate::derived::step_progress;
use crate::error::TrackerError;
use crate::feed::ActivityDraft;
use crate::{Context, Result, keys};

pub const DEFAULT_STEP_GOAL: u32 = 10_000;

pub struct Steps<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn steps(&self) -> Steps<'_> {
        Steps { ctx: self }
    }
}

impl Steps<'_> {
    /// The row for `date`, if any steps were recorded.
    pub async fn today(&self, date: NaiveDate) -> Result<Arc<Option<DailySteps>>> {
        let query = Query::table(DAILY_STEPS_TABLE)
            .eq("user_id", self.ctx.user_id)
            .eq("date", date);
        self.ctx
            .read(
                keys::daily_steps_on(self.ctx.user_id, date),
                move |store| async move { store.select_one(&query).await },
            )
            .await
    }

    /// Set the day's step count. Crossing the goal posts to the feed once.
    #[instrument(skip(self))]
    pub async fn record(&self, date: NaiveDate, steps: u32, goal: u32) -> Result<DailySteps> {
        if goal == 0 {
            return Err(TrackerError::invalid("step goal must be positive"));
        }
        let before = self.today(date).await?;
        let was_reached = (*before).as_ref().is_some_and(|s| s.steps >= s.goal);

        let row = DailySteps {
            user_id: self.ctx.user_id,
            date,
            steps,
            goal,
        };
        let rows: Vec<DailySteps> = self
            .ctx
            .write(
                Mutation::new("Steps saved").invalidates(keys::daily_steps(self.ctx.user_id)),
                move |store| async move {
                    store
                        .upsert(DAILY_STEPS_TABLE, &row, &["user_id", "date"])
                        .await
                },
            )
            .await?;
        let saved = rows
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::not_found(format!("steps for {}", date)))?;
        debug!(steps, goal, "steps recorded");

        if saved.steps >= saved.goal && !was_reached {
            self.ctx
                .feed()
                .post(ActivityDraft {
                    circle_id: None,
                    kind: ActivityKind::StepsGoal,
                    title: format!("Reached {} steps", saved.goal),
                    metadata: json!({ "steps": saved.steps, "goal": saved.goal, "date": date }),
                })
                .await?;
        }
        Ok(saved)
    }

    /// Percent of the goal walked on `date`, 0 with no row.
    pub async fn progress(&self, date: NaiveDate) -> Result<u32> {
        let row = self.today(date).await?;
        Ok((*row)
            .as_ref()
            .map_or(0, |s| step_progress(s.steps, s.goal)))
    }
}
