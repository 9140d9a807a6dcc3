//! To-do tasks and per-day minute logs.

use std::sync::Arc;

use chrono::NaiveDate;
use momentum_store::{
    ActivityKind, Mutation, NewTask, Order, Query, TASK_LOGS_TABLE, TASKS_TABLE, Task, TaskLog,
};
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::feed::ActivityDraft;
use crate::{Context, Result, keys};

/// Task operations for the context's user.
pub struct Tasks<'a> {
    ctx: &'a Context,
}

impl Context {
    pub fn tasks(&self) -> Tasks<'_> {
        Tasks { ctx: self }
    }
}

impl Tasks<'_> {
    /// The user's tasks, newest first.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Arc<Vec<Task>>> {
        let query = Query::table(TASKS_TABLE)
            .eq("user_id", self.ctx.user_id)
            .order("created_at", Order::Desc);
        self.ctx
            .read(keys::tasks_for(self.ctx.user_id), move |store| async move {
                store.select(&query).await
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn create(&self, title: &str, category: &str, estimated_minutes: u32) -> Result<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TrackerError::invalid("task title is empty"));
        }
        let row = NewTask {
            user_id: self.ctx.user_id,
            title: title.to_string(),
            category: category.trim().to_string(),
            estimated_minutes,
            completed: false,
        };

        let task: Task = self
            .ctx
            .write(
                Mutation::new("Task created").invalidates(keys::tasks()),
                move |store| async move { store.insert_one(TASKS_TABLE, &row).await },
            )
            .await?;
        debug!(task = %task.id, "created task");
        Ok(task)
    }

    /// Mark a task done or not done. Completing posts to the activity feed.
    #[instrument(skip(self))]
    pub async fn set_completed(&self, task_id: Uuid, completed: bool) -> Result<Task> {
        let query = Query::table(TASKS_TABLE)
            .eq("id", task_id)
            .eq("user_id", self.ctx.user_id);
        let label = if completed {
            "Task completed"
        } else {
            "Task reopened"
        };

        let rows: Vec<Task> = self
            .ctx
            .write(
                Mutation::new(label).invalidates(keys::tasks()),
                move |store| async move { store.update(&query, &json!({ "completed": completed })).await },
            )
            .await?;
        let task = rows
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::not_found(format!("task {}", task_id)))?;

        if completed {
            self.ctx
                .feed()
                .post(ActivityDraft {
                    circle_id: None,
                    kind: ActivityKind::TaskCompleted,
                    title: format!("Completed \"{}\"", task.title),
                    metadata: json!({
                        "task_id": task.id,
                        "category": task.category,
                        "minutes": task.logged_minutes,
                    }),
                })
                .await?;
        }
        Ok(task)
    }

    /// Set the minutes logged against a task on `date`. Logging the same day
    /// again overwrites the earlier value.
    #[instrument(skip(self))]
    pub async fn log_minutes(&self, task_id: Uuid, date: NaiveDate, minutes: u32) -> Result<TaskLog> {
        let row = TaskLog {
            task_id,
            user_id: self.ctx.user_id,
            date,
            minutes,
        };
        let rows: Vec<TaskLog> = self
            .ctx
            .write(
                Mutation::new("Time logged")
                    .invalidates(keys::task_logs(task_id))
                    .invalidates(keys::tasks())
                    .quiet(),
                move |store| async move {
                    store
                        .upsert(TASK_LOGS_TABLE, &row, &["task_id", "date"])
                        .await
                },
            )
            .await?;
        let log = rows
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::not_found(format!("log for task {}", task_id)))?;

        self.sync_logged_minutes(task_id).await?;
        Ok(log)
    }

    /// Every day logged against a task, oldest first.
    pub async fn logs(&self, task_id: Uuid) -> Result<Arc<Vec<TaskLog>>> {
        let query = Query::table(TASK_LOGS_TABLE)
            .eq("task_id", task_id)
            .order("date", Order::Asc);
        self.ctx
            .read(keys::task_logs(task_id), move |store| async move {
                store.select(&query).await
            })
            .await
    }

    /// Keep the task's running total equal to the sum of its logs.
    async fn sync_logged_minutes(&self, task_id: Uuid) -> Result<()> {
        let logs = self.logs(task_id).await?;
        let total: u32 = logs.iter().map(|l| l.minutes).sum();
        let query = Query::table(TASKS_TABLE)
            .eq("id", task_id)
            .eq("user_id", self.ctx.user_id);

        self.ctx
            .write(
                Mutation::new("Task total updated")
                    .invalidates(keys::tasks())
                    .quiet(),
                move |store| async move {
                    store
                        .update::<_, Task>(&query, &json!({ "logged_minutes": total }))
                        .await
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, task_id: Uuid) -> Result<()> {
        let query = Query::table(TASKS_TABLE)
            .eq("id", task_id)
            .eq("user_id", self.ctx.user_id);
        self.ctx
            .write(
                Mutation::new("Task deleted")
                    .invalidates(keys::tasks())
                    .invalidates(keys::task_logs(task_id)),
                move |store| async move { store.delete::<serde_json::Value>(&query).await },
            )
            .await?;
        Ok(())
    }
}
