//! Momentum Circle command-line client
//!
//! Subcommands map onto the feature services:
//! - `tasks`, `track`, `steps`, `focus`: personal progress
//! - `circle`, `chat`, `feed`, `quiz`, `leaderboard`: circles
//! - `coach`: AI coaching chat and suggestions
//! - `profile`, `admin`: accounts

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use momentum_store::{MeasureKind, UserRole};
use momentum_tracker::DEFAULT_STEP_GOAL;

mod commands;
mod live;
mod session;

#[derive(Parser)]
#[command(name = "momentum")]
#[command(about = "Momentum Circle productivity tracker", long_about = None)]
struct Cli {
    #[command(flatten)]
    auth: AuthArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Where to connect and who to sign in as.
#[derive(Args, Clone)]
pub struct AuthArgs {
    /// Backend URL
    #[arg(long, env = "MOMENTUM_URL")]
    pub url: String,

    /// Public API key
    #[arg(long, env = "MOMENTUM_ANON_KEY", hide_env_values = true)]
    pub anon_key: String,

    /// Account email
    #[arg(long, env = "MOMENTUM_EMAIL")]
    pub email: String,

    /// Account password
    #[arg(long, env = "MOMENTUM_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// To-do tasks and logged time
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Daily habit tracker
    Track {
        #[command(subcommand)]
        action: TrackAction,
    },

    /// Step counts
    Steps {
        #[command(subcommand)]
        action: StepsAction,
    },

    /// Record a finished focus session
    Focus {
        /// Minutes focused
        minutes: u32,

        /// Task the session was spent on
        #[arg(long)]
        task: Option<Uuid>,
    },

    /// Circles and membership
    Circle {
        #[command(subcommand)]
        action: CircleAction,
    },

    /// Circle chat
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Activity feed
    Feed {
        #[command(subcommand)]
        action: FeedAction,
    },

    /// Circle quizzes
    Quiz {
        #[command(subcommand)]
        action: QuizAction,
    },

    /// Rank a circle's members
    Leaderboard {
        circle: Uuid,

        /// Rank by the last seven days instead of today
        #[arg(long)]
        weekly: bool,
    },

    /// AI coach
    Coach {
        #[command(subcommand)]
        action: CoachAction,
    },

    /// Show your profile
    Profile,

    /// Administrative operations
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// List your tasks
    List,
    /// Add a task
    Add {
        title: String,
        #[arg(long, default_value = "General")]
        category: String,
        /// Estimated minutes
        #[arg(long, default_value = "25")]
        minutes: u32,
    },
    /// Mark a task done
    Done {
        id: Uuid,
        /// Reopen instead
        #[arg(long)]
        undo: bool,
    },
    /// Set minutes spent on a task for a day
    Log {
        id: Uuid,
        minutes: u32,
        /// Day to log against (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Delete a task
    Delete { id: Uuid },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum HabitKind {
    Numeric,
    Boolean,
}

impl From<HabitKind> for MeasureKind {
    fn from(kind: HabitKind) -> Self {
        match kind {
            HabitKind::Numeric => MeasureKind::Numeric,
            HabitKind::Boolean => MeasureKind::Boolean,
        }
    }
}

#[derive(Subcommand)]
pub enum TrackAction {
    /// List tracked habits
    Habits,
    /// Add a habit
    AddHabit {
        name: String,
        #[arg(long, value_enum, default_value = "boolean")]
        kind: HabitKind,
        /// Target value for numeric habits
        #[arg(long)]
        target: Option<f64>,
        #[arg(long)]
        unit: Option<String>,
        #[arg(long, default_value = "10")]
        points: u32,
    },
    /// Log a habit: a number, or yes/no
    Log {
        id: Uuid,
        value: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show a day's summary
    Summary {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Mark a leave day
    Leave {
        date: NaiveDate,
        /// Clear the leave instead
        #[arg(long)]
        clear: bool,
        #[arg(long = "type")]
        leave_type: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show a month calendar
    Month { year: i32, month: u32 },
}

#[derive(Subcommand)]
pub enum StepsAction {
    /// Record today's steps
    Record {
        steps: u32,
        #[arg(long, default_value_t = DEFAULT_STEP_GOAL)]
        goal: u32,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show progress toward the goal
    Show {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
pub enum CircleAction {
    /// Circles you belong to
    List,
    /// Create a circle
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Join with an invite code
    Join { code: String },
    /// Leave a circle
    Leave { id: Uuid },
    /// List members
    Members { id: Uuid },
    /// Remove a member
    Remove { id: Uuid, user: Uuid },
}

#[derive(Subcommand)]
pub enum ChatAction {
    /// Print a circle's messages
    Show { circle: Uuid },
    /// Send a message
    Send { circle: Uuid, message: String },
    /// Delete all messages in a circle
    Clear { circle: Uuid },
    /// Delete one member's messages
    Purge { circle: Uuid, user: Uuid },
    /// Follow a circle's chat live until interrupted
    Watch { circle: Uuid },
}

#[derive(Subcommand)]
pub enum FeedAction {
    /// Show recent activity
    Show {
        #[arg(long)]
        circle: Option<Uuid>,
    },
    /// Toggle an emoji reaction
    React { activity: Uuid, emoji: String },
}

#[derive(Subcommand)]
pub enum QuizAction {
    /// A circle's quizzes
    List { circle: Uuid },
    /// Submit answers (zero-based option indexes, comma separated)
    Submit {
        quiz: Uuid,
        #[arg(value_delimiter = ',')]
        answers: Vec<usize>,
    },
    /// Attempts on a quiz
    Attempts { quiz: Uuid },
}

#[derive(Subcommand)]
pub enum CoachAction {
    /// Ask the coach something
    Ask { message: String },
    /// Get activity suggestions
    Suggest,
    /// Show what the coach remembers
    Memories,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RoleArg {
    User,
    Admin,
}

impl From<RoleArg> for UserRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => UserRole::User,
            RoleArg::Admin => UserRole::Admin,
        }
    }
}

#[derive(Subcommand)]
pub enum AdminAction {
    /// Set the role of one or more users
    Roles {
        #[arg(value_enum)]
        role: RoleArg,
        #[arg(required = true)]
        users: Vec<Uuid>,
    },
    /// Create an account
    CreateUser {
        email: String,
        password: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Add a user to a circle
    AddMember {
        circle: Uuid,
        user: Uuid,
        #[arg(long)]
        admin: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "momentum=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let session = session::connect(&cli.auth).await?;

    match cli.command {
        Commands::Tasks { action } => commands::tasks(&session, action).await,
        Commands::Track { action } => commands::track(&session, action).await,
        Commands::Steps { action } => commands::steps(&session, action).await,
        Commands::Focus { minutes, task } => commands::focus(&session, minutes, task).await,
        Commands::Circle { action } => commands::circle(&session, action).await,
        Commands::Chat { action } => commands::chat(&session, action).await,
        Commands::Feed { action } => commands::feed(&session, action).await,
        Commands::Quiz { action } => commands::quiz(&session, action).await,
        Commands::Leaderboard { circle, weekly } => {
            commands::leaderboard(&session, circle, weekly).await
        }
        Commands::Coach { action } => commands::coach(&session, action).await,
        Commands::Profile => commands::profile(&session).await,
        Commands::Admin { action } => commands::admin(&session, action).await,
    }
}
