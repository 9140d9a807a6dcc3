//! AI coaching for Momentum Circle.
//!
//! The coach sends the conversation and a snapshot of the user's progress to
//! a hosted endpoint. Replies may carry memory blocks, which are parsed out
//! of the visible text and stored one row each.

mod coach;
mod context;
mod error;
pub mod reply;

pub use coach::{COACH_FUNCTION, Coach, SUGGESTIONS_FUNCTION};
pub use context::{ChatTurn, CoachContext, CoachRequest, Role};
pub use error::{CoachError, Result};
pub use reply::{CoachReply, FALLBACK_REPLY, MemoryNote, Suggestion, parse_reply, parse_suggestions};
