//! Habit tracker: measured tasks, daily logs, summaries and leave days.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use momentum_store::{
    DAILY_SUMMARIES_TABLE, DailySummary, MeasureKind, Mutation, NewProductivityTask, Order,
    PRODUCTIVITY_LOGS_TABLE, PRODUCTIVITY_TASKS_TABLE, ProductivityLog, ProductivityTask, Query,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::derived::{MonthGrid, day_points, month_grid, summary_percentage};
use crate::error::TrackerError;
use crate::{Context, Result, keys};

/// A day's measurement for one task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogValue {
    Numeric(f64),
    Done(bool),
}

impl LogValue {
    fn fits(&self, kind: MeasureKind) -> bool {
        matches!(
            (self, kind),
            (LogValue::Numeric(_), MeasureKind::Numeric) | (LogValue::Done(_), MeasureKind::Boolean)
        )
    }
}

/// Fields for a new tracked habit.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub name: String,
    pub kind: MeasureKind,
    pub target: Option<f64>,
    pub unit: Option<String>,
    pub points: u32,
}

/// Summary columns owned by the points computation. Leave columns are left
/// out so an upsert never clears them.
#[derive(Serialize)]
struct SummaryPoints {
    user_id: Uuid,
    date: NaiveDate,
    earned_points: u32,
    possible_points: u32,
    percentage: u32,
}

pub struct Productivity<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn productivity(&self) -> Productivity<'_> {
        Productivity { ctx: self }
    }
}

impl Productivity<'_> {
    pub async fn tasks(&self) -> Result<Arc<Vec<ProductivityTask>>> {
        let query = Query::table(PRODUCTIVITY_TASKS_TABLE)
            .eq("user_id", self.ctx.user_id)
            .order("created_at", Order::Asc);
        self.ctx
            .read(
                keys::productivity_tasks(self.ctx.user_id),
                move |store| async move { store.select(&query).await },
            )
            .await
    }

    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn create_task(&self, spec: TaskSpec) -> Result<ProductivityTask> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(TrackerError::invalid("task name is empty"));
        }
        if spec.points == 0 {
            return Err(TrackerError::invalid("task must be worth at least one point"));
        }
        if spec.target.is_some_and(|t| !t.is_finite() || t < 0.0) {
            return Err(TrackerError::invalid("target must be a non-negative number"));
        }
        let row = NewProductivityTask {
            user_id: self.ctx.user_id,
            name: name.to_string(),
            kind: spec.kind,
            target: spec.target.filter(|_| spec.kind == MeasureKind::Numeric),
            unit: spec.unit,
            points: spec.points,
            active: true,
        };

        self.ctx
            .write(
                Mutation::new("Tracker task created")
                    .invalidates(keys::productivity_tasks(self.ctx.user_id)),
                move |store| async move {
                    store.insert_one(PRODUCTIVITY_TASKS_TABLE, &row).await
                },
            )
            .await
    }

    /// Logs for every task on `date`.
    pub async fn logs_on(&self, date: NaiveDate) -> Result<Arc<Vec<ProductivityLog>>> {
        let query = Query::table(PRODUCTIVITY_LOGS_TABLE)
            .eq("user_id", self.ctx.user_id)
            .eq("date", date);
        self.ctx
            .read(
                keys::productivity_logs_on(self.ctx.user_id, date),
                move |store| async move { store.select(&query).await },
            )
            .await
    }

    /// Record a task's value for `date` and refresh that day's summary.
    #[instrument(skip(self))]
    pub async fn log(
        &self,
        task_id: Uuid,
        date: NaiveDate,
        value: LogValue,
    ) -> Result<DailySummary> {
        let tasks = self.tasks().await?;
        let task = tasks
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| TrackerError::not_found(format!("tracker task {}", task_id)))?;
        if !value.fits(task.kind) {
            return Err(TrackerError::invalid(format!(
                "{:?} value for a {:?} task",
                value, task.kind
            )));
        }

        let (numeric, done) = match value {
            LogValue::Numeric(v) => (Some(v), None),
            LogValue::Done(d) => (None, Some(d)),
        };
        let row = ProductivityLog {
            task_id,
            user_id: self.ctx.user_id,
            date,
            value: numeric,
            done,
        };
        self.ctx
            .write(
                Mutation::new("Progress logged")
                    .invalidates(keys::productivity_logs(self.ctx.user_id))
                    .quiet(),
                move |store| async move {
                    store
                        .upsert::<_, ProductivityLog>(
                            PRODUCTIVITY_LOGS_TABLE,
                            &row,
                            &["task_id", "date"],
                        )
                        .await
                },
            )
            .await?;

        self.recompute_summary(date).await
    }

    pub async fn summary(&self, date: NaiveDate) -> Result<Arc<Option<DailySummary>>> {
        let query = Query::table(DAILY_SUMMARIES_TABLE)
            .eq("user_id", self.ctx.user_id)
            .eq("date", date);
        self.ctx
            .read(
                keys::daily_summary(self.ctx.user_id, date),
                move |store| async move { store.select_one(&query).await },
            )
            .await
    }

    /// Recompute earned/possible points for `date` from the active tasks and
    /// that day's logs, and store them. Leave columns are untouched.
    #[instrument(skip(self))]
    pub async fn recompute_summary(&self, date: NaiveDate) -> Result<DailySummary> {
        let tasks = self.tasks().await?;
        let logs = self.logs_on(date).await?;
        let (earned, possible) = day_points(&tasks, &logs);
        let row = SummaryPoints {
            user_id: self.ctx.user_id,
            date,
            earned_points: earned,
            possible_points: possible,
            percentage: summary_percentage(earned, possible),
        };

        let rows: Vec<DailySummary> = self
            .ctx
            .write(
                Mutation::new("Daily summary updated")
                    .invalidates(keys::daily_summaries(self.ctx.user_id))
                    .invalidates(keys::leaderboard())
                    .quiet(),
                move |store| async move {
                    store
                        .upsert(DAILY_SUMMARIES_TABLE, &row, &["user_id", "date"])
                        .await
                },
            )
            .await?;
        let summary = rows
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::not_found(format!("summary for {}", date)))?;
        debug!(earned, possible, percentage = summary.percentage, "summary recomputed");
        Ok(summary)
    }

    /// Mark or unmark `date` as a leave day. Clearing leave on a date that
    /// has no summary row writes nothing and returns `None`.
    #[instrument(skip(self, reason))]
    pub async fn set_leave(
        &self,
        date: NaiveDate,
        is_leave: bool,
        leave_type: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Option<DailySummary>> {
        let mutation = Mutation::new(if is_leave { "Leave saved" } else { "Leave cleared" })
            .invalidates(keys::daily_summaries(self.ctx.user_id))
            .invalidates(keys::leaderboard());

        if is_leave {
            let row = json!({
                "user_id": self.ctx.user_id,
                "date": date,
                "is_leave": true,
                "leave_type": leave_type,
                "leave_reason": reason,
            });
            let rows: Vec<DailySummary> = self
                .ctx
                .write(mutation, move |store| async move {
                    store
                        .upsert(DAILY_SUMMARIES_TABLE, &row, &["user_id", "date"])
                        .await
                })
                .await?;
            info!(%date, "marked leave day");
            return Ok(rows.into_iter().next());
        }

        let query = Query::table(DAILY_SUMMARIES_TABLE)
            .eq("user_id", self.ctx.user_id)
            .eq("date", date);
        // Read the row directly: a cached miss may predate a row written elsewhere.
        let existing: Option<DailySummary> = self.ctx.store.select_one(&query).await?;
        if existing.is_none() {
            debug!(%date, "no summary to clear leave on");
            return Ok(None);
        }
        let rows: Vec<DailySummary> = self
            .ctx
            .write(mutation, move |store| async move {
                store
                    .update(
                        &query,
                        &json!({ "is_leave": false, "leave_type": null, "leave_reason": null }),
                    )
                    .await
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Calendar for one month.
    pub async fn month(&self, year: i32, month: u32) -> Result<Arc<MonthGrid>> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| TrackerError::invalid(format!("no such month {}-{}", year, month)))?;
        let last = last_day_of_month(first);
        let query = Query::table(DAILY_SUMMARIES_TABLE)
            .eq("user_id", self.ctx.user_id)
            .gte("date", first)
            .lte("date", last)
            .order("date", Order::Asc);

        self.ctx
            .read(
                keys::summary_month(self.ctx.user_id, year, month),
                move |store| async move {
                    let summaries: Vec<DailySummary> = store.select(&query).await?;
                    Ok(month_grid(year, month, &summaries).unwrap_or(MonthGrid {
                        year,
                        month,
                        weeks: Vec::new(),
                    }))
                },
            )
            .await
    }
}

fn last_day_of_month(first: NaiveDate) -> NaiveDate {
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    next.and_then(|d| d.pred_opt()).unwrap_or(first)
}
