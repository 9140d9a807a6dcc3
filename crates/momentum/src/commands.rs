//! One-shot commands: run a service call and print the result.

use std::collections::BTreeSet;

use chrono::{NaiveDate, Utc};
use miette::Result;
use momentum_coach::{ChatTurn, Coach, CoachContext, CoachRequest};
use momentum_store::{MemberRole, Task};
use momentum_tracker::derived::{CalendarBucket, current_streak};
use momentum_tracker::{LogValue, Period, TaskSpec};
use uuid::Uuid;

use crate::session::{Session, today};
use crate::{
    AdminAction, ChatAction, CircleAction, CoachAction, FeedAction, QuizAction, StepsAction,
    TaskAction, TrackAction,
};

fn err(e: impl std::fmt::Display) -> miette::Report {
    miette::miette!("{}", e)
}

fn print_task(task: &Task) {
    let mark = if task.completed { "x" } else { " " };
    println!(
        "[{}] {}  {} ({}, {}/{} min)",
        mark, task.id, task.title, task.category, task.logged_minutes, task.estimated_minutes
    );
}

pub async fn tasks(session: &Session, action: TaskAction) -> Result<()> {
    let tasks = session.ctx.tasks();
    match action {
        TaskAction::List => {
            let list = tasks.list().await.map_err(err)?;
            if list.is_empty() {
                println!("No tasks yet.");
            }
            for task in list.iter() {
                print_task(task);
            }
        }
        TaskAction::Add {
            title,
            category,
            minutes,
        } => print_task(&tasks.create(&title, &category, minutes).await.map_err(err)?),
        TaskAction::Done { id, undo } => {
            print_task(&tasks.set_completed(id, !undo).await.map_err(err)?)
        }
        TaskAction::Log { id, minutes, date } => {
            let log = tasks
                .log_minutes(id, date.unwrap_or_else(today), minutes)
                .await
                .map_err(err)?;
            println!("Logged {} min on {}", log.minutes, log.date);
        }
        TaskAction::Delete { id } => {
            tasks.delete(id).await.map_err(err)?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

fn parse_log_value(raw: &str) -> Result<LogValue> {
    match raw.to_lowercase().as_str() {
        "yes" | "y" | "done" | "true" => Ok(LogValue::Done(true)),
        "no" | "n" | "false" => Ok(LogValue::Done(false)),
        other => other
            .parse::<f64>()
            .map(LogValue::Numeric)
            .map_err(|_| miette::miette!("expected a number or yes/no, got '{}'", raw)),
    }
}

fn bucket_glyph(bucket: CalendarBucket) -> &'static str {
    match bucket {
        CalendarBucket::Leave => "L",
        CalendarBucket::Empty => ".",
        CalendarBucket::Red => "r",
        CalendarBucket::Yellow => "y",
        CalendarBucket::Green => "G",
    }
}

pub async fn track(session: &Session, action: TrackAction) -> Result<()> {
    let productivity = session.ctx.productivity();
    match action {
        TrackAction::Habits => {
            for task in productivity.tasks().await.map_err(err)?.iter() {
                let target = task
                    .target
                    .map(|t| format!(" target {}{}", t, task.unit.as_deref().unwrap_or("")))
                    .unwrap_or_default();
                println!("{}  {} ({} pts){}", task.id, task.name, task.points, target);
            }
        }
        TrackAction::AddHabit {
            name,
            kind,
            target,
            unit,
            points,
        } => {
            let task = productivity
                .create_task(TaskSpec {
                    name,
                    kind: kind.into(),
                    target,
                    unit,
                    points,
                })
                .await
                .map_err(err)?;
            println!("Added {} ({})", task.name, task.id);
        }
        TrackAction::Log { id, value, date } => {
            let value = parse_log_value(&value)?;
            let summary = productivity
                .log(id, date.unwrap_or_else(today), value)
                .await
                .map_err(err)?;
            println!(
                "{}: {}/{} points ({}%)",
                summary.date, summary.earned_points, summary.possible_points, summary.percentage
            );
        }
        TrackAction::Summary { date } => {
            let date = date.unwrap_or_else(today);
            match productivity.summary(date).await.map_err(err)?.as_ref() {
                Some(s) if s.is_leave => println!(
                    "{}: on leave{}",
                    date,
                    s.leave_type
                        .as_deref()
                        .map(|t| format!(" ({})", t))
                        .unwrap_or_default()
                ),
                Some(s) => println!(
                    "{}: {}/{} points ({}%)",
                    date, s.earned_points, s.possible_points, s.percentage
                ),
                None => println!("{}: nothing logged", date),
            }
        }
        TrackAction::Leave {
            date,
            clear,
            leave_type,
            reason,
        } => {
            let result = productivity
                .set_leave(date, !clear, leave_type.as_deref(), reason.as_deref())
                .await
                .map_err(err)?;
            match (clear, result) {
                (true, None) => println!("{} was not a leave day", date),
                (true, Some(_)) => println!("{} is no longer a leave day", date),
                (false, _) => println!("{} marked as leave", date),
            }
        }
        TrackAction::Month { year, month } => {
            let grid = productivity.month(year, month).await.map_err(err)?;
            println!("{}-{:02}", grid.year, grid.month);
            println!(" Mo Tu We Th Fr Sa Su");
            for week in &grid.weeks {
                let row: Vec<String> = week
                    .iter()
                    .map(|cell| match cell {
                        Some(cell) => format!("  {}", bucket_glyph(cell.bucket)),
                        None => "   ".to_string(),
                    })
                    .collect();
                println!("{}", row.concat());
            }
            let active: BTreeSet<NaiveDate> = grid
                .days()
                .filter(|d| d.percentage.is_some_and(|p| p > 0))
                .map(|d| d.date)
                .collect();
            println!("Streak: {} days", current_streak(&active, today()));
        }
    }
    Ok(())
}

pub async fn steps(session: &Session, action: StepsAction) -> Result<()> {
    let steps = session.ctx.steps();
    match action {
        StepsAction::Record { steps: count, goal, date } => {
            let date = date.unwrap_or_else(today);
            let row = steps.record(date, count, goal).await.map_err(err)?;
            println!("{}: {} / {} steps", row.date, row.steps, row.goal);
        }
        StepsAction::Show { date } => {
            let date = date.unwrap_or_else(today);
            let progress = steps.progress(date).await.map_err(err)?;
            println!("{}: {}% of goal", date, progress);
        }
    }
    Ok(())
}

pub async fn focus(session: &Session, minutes: u32, task: Option<Uuid>) -> Result<()> {
    let started_at = Utc::now() - chrono::Duration::minutes(i64::from(minutes));
    let recorded = session
        .ctx
        .focus()
        .record_session(task, minutes, started_at)
        .await
        .map_err(err)?;
    println!("Recorded {} focused minutes", recorded.minutes);
    Ok(())
}

pub async fn circle(session: &Session, action: CircleAction) -> Result<()> {
    let circles = session.ctx.circles();
    match action {
        CircleAction::List => {
            for circle in circles.mine().await.map_err(err)?.iter() {
                println!("{}  {} (invite {})", circle.id, circle.name, circle.invite_code);
            }
        }
        CircleAction::Create { name, description } => {
            let circle = circles
                .create(&name, description.as_deref())
                .await
                .map_err(err)?;
            println!("Created {} - invite code {}", circle.name, circle.invite_code);
        }
        CircleAction::Join { code } => {
            let circle = circles.join(&code).await.map_err(err)?;
            println!("Joined {}", circle.name);
        }
        CircleAction::Leave { id } => {
            circles.leave(id).await.map_err(err)?;
            println!("Left {}", id);
        }
        CircleAction::Members { id } => {
            for member in circles.members(id).await.map_err(err)?.iter() {
                let role = match member.role {
                    MemberRole::Admin => "admin",
                    MemberRole::Member => "member",
                };
                println!("{}  {}", member.user_id, role);
            }
        }
        CircleAction::Remove { id, user } => {
            circles.remove_member(id, user).await.map_err(err)?;
            println!("Removed {}", user);
        }
    }
    Ok(())
}

pub async fn chat(session: &Session, action: ChatAction) -> Result<()> {
    let chat = session.ctx.chat();
    match action {
        ChatAction::Show { circle } => {
            for message in chat.messages(circle).await.map_err(err)?.iter() {
                println!(
                    "{} {}: {}",
                    message.created_at.format("%Y-%m-%d %H:%M"),
                    message.user_id,
                    message.content
                );
            }
        }
        ChatAction::Send { circle, message } => {
            chat.send(circle, &message).await.map_err(err)?;
        }
        ChatAction::Clear { circle } => {
            let removed = chat.clear_history(circle).await.map_err(err)?;
            println!("Deleted {} messages", removed);
        }
        ChatAction::Purge { circle, user } => {
            let removed = chat.delete_messages_from(circle, user).await.map_err(err)?;
            println!("Deleted {} messages", removed);
        }
        ChatAction::Watch { circle } => return crate::live::watch_chat(session, circle).await,
    }
    Ok(())
}

pub async fn feed(session: &Session, action: FeedAction) -> Result<()> {
    let feed = session.ctx.feed();
    match action {
        FeedAction::Show { circle } => {
            for item in feed.list(circle).await.map_err(err)?.iter() {
                println!(
                    "{} {}  {}",
                    item.created_at.format("%Y-%m-%d %H:%M"),
                    item.id,
                    item.title
                );
            }
        }
        FeedAction::React { activity, emoji } => {
            let added = feed.toggle_reaction(activity, &emoji).await.map_err(err)?;
            println!("{} {}", if added { "Reacted" } else { "Removed" }, emoji);
        }
    }
    Ok(())
}

pub async fn quiz(session: &Session, action: QuizAction) -> Result<()> {
    let quizzes = session.ctx.quizzes();
    match action {
        QuizAction::List { circle } => {
            for quiz in quizzes.list(circle).await.map_err(err)?.iter() {
                println!("{}  {} ({} questions)", quiz.id, quiz.title, quiz.questions.len());
            }
        }
        QuizAction::Submit { quiz, answers } => {
            let attempt = quizzes.submit(quiz, answers).await.map_err(err)?;
            println!("Score: {}/{}", attempt.score, attempt.total_questions);
        }
        QuizAction::Attempts { quiz } => {
            for attempt in quizzes.attempts(quiz).await.map_err(err)?.iter() {
                println!(
                    "{}  {}/{}",
                    attempt.user_id, attempt.score, attempt.total_questions
                );
            }
        }
    }
    Ok(())
}

pub async fn leaderboard(session: &Session, circle: Uuid, weekly: bool) -> Result<()> {
    let board = session.ctx.leaderboard();
    let (period, entries) = if weekly {
        (Period::Weekly, board.weekly(circle, today()).await.map_err(err)?)
    } else {
        (Period::Daily, board.daily(circle, today()).await.map_err(err)?)
    };
    println!("{:?} leaderboard", period);
    for entry in entries.iter() {
        let leave = if entry.on_leave { " (on leave)" } else { "" };
        println!("{:>3}. {:<24} {:>3}%{}", entry.rank, entry.name, entry.score, leave);
    }
    Ok(())
}

pub async fn coach(session: &Session, action: CoachAction) -> Result<()> {
    let coach = Coach::new(session.ctx.clone());
    match action {
        CoachAction::Ask { message } => {
            let context = coach_context(session).await?;
            let reply = coach
                .ask(&CoachRequest::new(vec![ChatTurn::user(message)], context))
                .await
                .map_err(err)?;
            println!("{}", reply.visible_text);
        }
        CoachAction::Suggest => {
            let context = coach_context(session).await?;
            let suggestions = coach.suggestions(&context).await.map_err(err)?;
            if suggestions.is_empty() {
                println!("No suggestions right now.");
            }
            for s in suggestions {
                println!("{} {} - {}", s.emoji, s.title, s.description);
            }
        }
        CoachAction::Memories => {
            for memory in coach.memories().await.map_err(err)?.iter() {
                println!("[{}] {}", memory.category, memory.content);
            }
        }
    }
    Ok(())
}

/// Snapshot of the user's progress sent along with coaching requests.
async fn coach_context(session: &Session) -> Result<CoachContext> {
    let profile = session.ctx.profiles().me().await.map_err(err)?;
    let tasks = session.ctx.tasks().list().await.map_err(err)?;
    Ok(CoachContext {
        recent_tasks: tasks.iter().take(5).map(|t| t.title.clone()).collect(),
        streak: profile.current_streak,
        level: profile.level,
        current_page: Some("cli".to_string()),
    })
}

pub async fn profile(session: &Session) -> Result<()> {
    let profile = session.ctx.profiles().me().await.map_err(err)?;
    println!("{}", profile.name());
    println!("Level {} ({} xp)", profile.level, profile.xp);
    println!(
        "Streak {} (best {}), {} focused minutes",
        profile.current_streak, profile.longest_streak, profile.total_focus_minutes
    );
    Ok(())
}

pub async fn admin(session: &Session, action: AdminAction) -> Result<()> {
    let admin = session.ctx.admin();
    match action {
        AdminAction::Roles { role, users } => {
            let updated = admin.set_roles(&users, role.into()).await.map_err(err)?;
            println!("Updated {} profiles", updated.len());
        }
        AdminAction::CreateUser {
            email,
            password,
            name,
        } => {
            let created = admin
                .create_user(&email, &password, &name)
                .await
                .map_err(err)?;
            println!("Created user {}", created.user_id);
        }
        AdminAction::AddMember {
            circle,
            user,
            admin: as_admin,
        } => {
            let role = if as_admin {
                MemberRole::Admin
            } else {
                MemberRole::Member
            };
            admin.add_member(circle, user, role).await.map_err(err)?;
            println!("Added {} to {}", user, circle);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("yes" => Some(LogValue::Done(true)))]
    #[test_case("No" => Some(LogValue::Done(false)))]
    #[test_case("2.5" => Some(LogValue::Numeric(2.5)))]
    #[test_case("lots" => None)]
    fn test_parse_log_value(raw: &str) -> Option<LogValue> {
        parse_log_value(raw).ok()
    }
}
