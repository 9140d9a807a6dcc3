//! Parsing of coaching replies and suggestion lists.
//!
//! A coaching reply is free text that may carry memory blocks:
//!
//! ```text
//! Nice work today! |||MEMORY|||{"category": "goals", "content": "Training for a 10k"}|||END|||
//! ```
//!
//! The blocks are cut out of the visible text and decoded separately. A block
//! whose JSON does not parse is still removed; its memories are dropped.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MEMORY_OPEN: &str = "|||MEMORY|||";
pub const MEMORY_CLOSE: &str = "|||END|||";

/// Shown when a reply has no visible text left.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't come up with a response. Please try again.";

const DEFAULT_CATEGORY: &str = "general";

static MEMORY_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\|\|\|MEMORY\|\|\|(.*?)\|\|\|END\|\|\|").unwrap());

/// A fact the coach wants remembered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryNote {
    #[serde(default = "default_category")]
    pub category: String,
    pub content: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MemoryPayload {
    Wrapped { memories: Vec<MemoryNote> },
    Many(Vec<MemoryNote>),
    One(MemoryNote),
}

impl MemoryPayload {
    fn into_notes(self) -> Vec<MemoryNote> {
        match self {
            MemoryPayload::Wrapped { memories } | MemoryPayload::Many(memories) => memories,
            MemoryPayload::One(note) => vec![note],
        }
    }
}

/// A reply split into what to show and what to remember.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachReply {
    pub visible_text: String,
    pub memories: Vec<MemoryNote>,
}

pub fn parse_reply(raw: &str) -> CoachReply {
    let mut memories = Vec::new();
    for captures in MEMORY_BLOCK_RE.captures_iter(raw) {
        let body = captures.get(1).map_or("", |m| m.as_str()).trim();
        match serde_json::from_str::<MemoryPayload>(body) {
            Ok(payload) => memories.extend(
                payload
                    .into_notes()
                    .into_iter()
                    .filter(|n| !n.content.trim().is_empty()),
            ),
            Err(e) => debug!(error = %e, "dropping malformed memory block"),
        }
    }

    let mut visible = MEMORY_BLOCK_RE.replace_all(raw, "").into_owned();
    if let Some(open) = visible.find(MEMORY_OPEN) {
        debug!("dropping unterminated memory block");
        visible.truncate(open);
    }
    let visible = visible.trim();

    CoachReply {
        visible_text: if visible.is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            visible.to_string()
        },
        memories,
    }
}

/// One suggested activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default)]
    pub emoji: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Decode the suggestion array inside `raw`, which may be wrapped in prose.
/// Anything unparseable yields no suggestions.
pub fn parse_suggestions(raw: &str) -> Vec<Suggestion> {
    let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    match serde_json::from_str(&raw[start..=end]) {
        Ok(suggestions) => suggestions,
        Err(e) => {
            debug!(error = %e, "malformed suggestions");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;

    fn note(category: &str, content: &str) -> MemoryNote {
        MemoryNote {
            category: category.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_plain_reply() {
        let reply = parse_reply("  Keep going!  ");
        assert_eq!(reply.visible_text, "Keep going!");
        assert!(reply.memories.is_empty());
    }

    #[test_case(r#"{"category": "goals", "content": "Run a 10k"}"#; "single object")]
    #[test_case(r#"[{"category": "goals", "content": "Run a 10k"}]"#; "array")]
    #[test_case(r#"{"memories": [{"category": "goals", "content": "Run a 10k"}]}"#; "wrapped")]
    fn test_memory_shapes(json: &str) {
        let raw = format!("Great plan.{}{}{}", MEMORY_OPEN, json, MEMORY_CLOSE);
        let reply = parse_reply(&raw);
        assert_eq!(reply.visible_text, "Great plan.");
        assert_eq!(reply.memories, vec![note("goals", "Run a 10k")]);
    }

    #[test]
    fn test_several_blocks_and_default_category() {
        let raw = "A |||MEMORY|||{\"content\": \"likes mornings\"}|||END||| B \
                   |||MEMORY|||[{\"category\": \"health\", \"content\": \"knee injury\"}]|||END|||";
        let reply = parse_reply(raw);
        assert_eq!(reply.visible_text, "A  B");
        assert_eq!(
            reply.memories,
            vec![note("general", "likes mornings"), note("health", "knee injury")]
        );
    }

    #[test]
    fn test_malformed_block_is_still_removed() {
        let reply = parse_reply("Hello |||MEMORY|||{not json|||END||| there");
        assert_eq!(reply.visible_text, "Hello  there");
        assert!(reply.memories.is_empty());
    }

    #[test]
    fn test_unterminated_block_is_cut() {
        let reply = parse_reply("See you tomorrow. |||MEMORY|||{\"content\": \"x\"");
        assert_eq!(reply.visible_text, "See you tomorrow.");
        assert!(reply.memories.is_empty());
    }

    #[test]
    fn test_empty_visible_text_falls_back() {
        let reply = parse_reply("|||MEMORY|||{\"content\": \"prefers short answers\"}|||END|||");
        assert_eq!(reply.visible_text, FALLBACK_REPLY);
        assert_eq!(reply.memories.len(), 1);
    }

    #[test]
    fn test_suggestions_wrapped_in_prose() {
        let raw = r#"Here you go:
[{"emoji": "🚶", "title": "Walk", "description": "Ten minutes outside"},
 {"title": "Stretch"}]
Enjoy!"#;
        let suggestions = parse_suggestions(raw);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].emoji, "🚶");
        assert_eq!(suggestions[1].description, "");
    }

    #[test_case(""; "empty")]
    #[test_case("no array here"; "prose")]
    #[test_case("] backwards ["; "reversed brackets")]
    #[test_case("[{\"title\": 1}]"; "wrong types")]
    fn test_malformed_suggestions(raw: &str) {
        assert!(parse_suggestions(raw).is_empty());
    }

    proptest! {
        #[test]
        fn visible_text_never_shows_a_memory_delimiter(
            parts in prop::collection::vec(
                prop_oneof![
                    Just(MEMORY_OPEN.to_string()),
                    Just(MEMORY_CLOSE.to_string()),
                    Just("|||".to_string()),
                    Just("MEMORY".to_string()),
                    "[a-z {}\":]{0,12}",
                ],
                0..12,
            )
        ) {
            let reply = parse_reply(&parts.concat());
            prop_assert!(!reply.visible_text.contains(MEMORY_OPEN));
            prop_assert!(!reply.visible_text.is_empty());
        }
    }
}
