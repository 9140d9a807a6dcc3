//! Values computed on the client from fetched rows.
//!
//! Everything here is pure: no I/O, no clock reads. Callers pass `today`.

use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, Duration, NaiveDate};
use momentum_store::{DailySummary, MeasureKind, ProductivityLog, ProductivityTask};
use serde::Serialize;
use uuid::Uuid;

/// Lower bound of the yellow bucket.
pub const YELLOW_THRESHOLD: u32 = 50;
/// Lower bound of the green bucket.
pub const GREEN_THRESHOLD: u32 = 80;
/// XP needed per level.
pub const XP_PER_LEVEL: u32 = 100;
/// Days in the weekly leaderboard window, today included.
pub const WEEK_DAYS: i64 = 7;

fn rounded_percentage(part: f64, whole: f64) -> u32 {
    if whole <= 0.0 {
        return 0;
    }
    (part / whole * 100.0).round().max(0.0) as u32
}

/// `completed / total * 100`, rounded. 0 when there is nothing to complete.
pub fn completion_percentage(completed: usize, total: usize) -> u32 {
    rounded_percentage(completed as f64, total as f64)
}

/// Percentage of possible points earned on a day.
pub fn summary_percentage(earned: u32, possible: u32) -> u32 {
    rounded_percentage(f64::from(earned), f64::from(possible))
}

/// Calendar cell coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarBucket {
    Leave,
    Empty,
    Red,
    Yellow,
    Green,
}

/// Bucket for a day: leave wins, then no data or 0 is empty, then
/// `<50` red, `50..80` yellow, `>=80` green.
pub fn calendar_bucket(percentage: Option<u32>, is_leave: bool) -> CalendarBucket {
    if is_leave {
        return CalendarBucket::Leave;
    }
    match percentage {
        None | Some(0) => CalendarBucket::Empty,
        Some(p) if p < YELLOW_THRESHOLD => CalendarBucket::Red,
        Some(p) if p < GREEN_THRESHOLD => CalendarBucket::Yellow,
        Some(_) => CalendarBucket::Green,
    }
}

/// Points earned and possible for one day's logs.
///
/// Inactive tasks do not count. A numeric task earns its points once the
/// logged value reaches the target (any positive value when it has none);
/// a boolean task earns them when marked done.
pub fn day_points(tasks: &[ProductivityTask], logs: &[ProductivityLog]) -> (u32, u32) {
    let by_task: HashMap<Uuid, &ProductivityLog> = logs.iter().map(|l| (l.task_id, l)).collect();
    let mut earned = 0;
    let mut possible = 0;

    for task in tasks.iter().filter(|t| t.active) {
        possible += task.points;
        let Some(log) = by_task.get(&task.id) else {
            continue;
        };
        let achieved = match task.kind {
            MeasureKind::Numeric => {
                let value = log.value.unwrap_or(0.0);
                match task.target {
                    Some(target) if target > 0.0 => value >= target,
                    _ => value > 0.0,
                }
            }
            MeasureKind::Boolean => log.done.unwrap_or(false),
        };
        if achieved {
            earned += task.points;
        }
    }

    (earned, possible)
}

/// Leaderboard score for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayScore {
    pub percentage: u32,
    pub on_leave: bool,
}

/// Today's percentage. A leave day scores 0 and is flagged.
pub fn daily_score(summaries: &[DailySummary], today: NaiveDate) -> DayScore {
    match summaries.iter().find(|s| s.date == today) {
        Some(s) if s.is_leave => DayScore {
            percentage: 0,
            on_leave: true,
        },
        Some(s) => DayScore {
            percentage: s.percentage,
            on_leave: false,
        },
        None => DayScore {
            percentage: 0,
            on_leave: false,
        },
    }
}

/// Mean percentage over the non-leave days with a summary in the 7 days
/// ending `today`, rounded. 0 when there is no such day.
pub fn weekly_score(summaries: &[DailySummary], today: NaiveDate) -> u32 {
    let start = today - Duration::days(WEEK_DAYS - 1);
    let days: Vec<u32> = summaries
        .iter()
        .filter(|s| s.date >= start && s.date <= today && !s.is_leave)
        .map(|s| s.percentage)
        .collect();
    if days.is_empty() {
        return 0;
    }
    let total: u64 = days.iter().map(|&p| u64::from(p)).sum();
    (total as f64 / days.len() as f64).round() as u32
}

/// Step goal progress, capped at 100.
pub fn step_progress(steps: u32, goal: u32) -> u32 {
    rounded_percentage(f64::from(steps), f64::from(goal)).min(100)
}

/// Consecutive active days ending today. A streak still counts if the last
/// active day was yesterday (today is not over yet).
pub fn current_streak(active_days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut day = if active_days.contains(&today) {
        today
    } else {
        match today.pred_opt() {
            Some(yesterday) if active_days.contains(&yesterday) => yesterday,
            _ => return 0,
        }
    };

    let mut streak = 0;
    loop {
        if !active_days.contains(&day) {
            break;
        }
        streak += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    streak
}

/// Number of answers equal to the correct option index, position by position.
/// Missing answers count as wrong.
pub fn score_quiz(answers: &[usize], correct: &[usize]) -> u32 {
    answers
        .iter()
        .zip(correct)
        .filter(|(given, expected)| given == expected)
        .count() as u32
}

/// Level reached with `xp` experience points.
pub fn level_for_xp(xp: u32) -> u32 {
    xp / XP_PER_LEVEL + 1
}

/// One day in a month grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCell {
    pub date: NaiveDate,
    pub percentage: Option<u32>,
    pub bucket: CalendarBucket,
}

/// A month laid out in Monday-first weeks. Cells outside the month are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    pub weeks: Vec<[Option<DayCell>; 7]>,
}

impl MonthGrid {
    pub fn days(&self) -> impl Iterator<Item = &DayCell> {
        self.weeks.iter().flatten().flatten()
    }
}

/// Build the calendar for a month from its summaries. `None` for an invalid month.
pub fn month_grid(year: i32, month: u32, summaries: &[DailySummary]) -> Option<MonthGrid> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let by_date: HashMap<NaiveDate, &DailySummary> =
        summaries.iter().map(|s| (s.date, s)).collect();

    let mut weeks = Vec::new();
    let mut week: [Option<DayCell>; 7] = Default::default();
    let mut day = first;

    while day.month() == month {
        let column = day.weekday().num_days_from_monday() as usize;
        let summary = by_date.get(&day);
        let percentage = summary.map(|s| s.percentage);
        let is_leave = summary.is_some_and(|s| s.is_leave);
        week[column] = Some(DayCell {
            date: day,
            percentage,
            bucket: calendar_bucket(percentage, is_leave),
        });
        if column == 6 {
            weeks.push(std::mem::take(&mut week));
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    if week.iter().any(Option::is_some) {
        weeks.push(week);
    }

    Some(MonthGrid { year, month, weeks })
}
