//! Feature services for Momentum Circle.
//!
//! Every service borrows a [`Context`] (store, cache, mutation executor and
//! the signed-in user) and reads through the query cache under the key
//! families in [`keys`]. Writes go through the mutation executor so the
//! matching cache prefixes are invalidated when they succeed.
//!
//! ```ignore
//! let ctx = Context::for_session(store, cache).await?;
//! let task = ctx.tasks().create("Write report", "Work", 30).await?;
//! ctx.tasks().set_completed(task.id, true).await?;
//! ```

mod admin;
mod chat;
mod circles;
mod context;
pub mod derived;
mod error;
mod feed;
mod focus;
pub mod keys;
mod leaderboard;
mod productivity;
mod profiles;
mod quizzes;
mod steps;
mod tasks;

pub use admin::{Admin, CREATE_USER_FUNCTION, CreatedUser};
pub use chat::{Chat, ChatRoom, MAX_MESSAGE_CHARS};
pub use circles::{Circles, INVITE_CODE_LEN, generate_invite_code, normalize_invite_code};
pub use context::Context;
pub use error::{Result, TrackerError};
pub use feed::{ActivityDraft, FEED_PAGE_SIZE, Feed};
pub use focus::Focus;
pub use leaderboard::{Leaderboard, LeaderboardEntry, Period, rank};
pub use productivity::{LogValue, Productivity, TaskSpec};
pub use profiles::Profiles;
pub use quizzes::{Quizzes, validate_quiz};
pub use steps::{DEFAULT_STEP_GOAL, Steps};
pub use tasks::Tasks;
