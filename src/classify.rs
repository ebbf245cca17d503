// The `classify` module recognizes chatterbox requests by their subject line.

use regex::Regex;
use std::sync::LazyLock;

/// The keyword a subject must start with to be handled.
pub const TAG_KEYWORD: &str = "chatterbox";

static SUBJECT_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?is)^{}\b\s*(?::\s*(?P<id>[0-9a-f]{{8}}-[0-9a-f]{{4}}-[0-9a-f]{{4}}-[0-9a-f]{{4}}-[0-9a-f]{{12}})?)?(?P<title>.*)$",
        regex::escape(TAG_KEYWORD)
    );
    Regex::new(&pattern).expect("subject grammar is a valid regex")
});

/// How a subject line was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_tagged: bool,
    /// Lowercase hyphenated conversation id, when the subject names one.
    pub explicit_conversation_id: Option<String>,
    pub title: String,
}

/// Classifies `subject` against the tagging grammar:
///
/// ```text
/// chatterbox [":" <uuid>] <title>
/// ```
///
/// The subject must begin with the keyword itself (no leading whitespace).
/// Matching is case-insensitive and the keyword must end at a word boundary.
/// The id has a fixed length, so a title may follow it without a space.
pub fn classify(subject: &str) -> Classification {
    let Some(captures) = SUBJECT_GRAMMAR.captures(subject) else {
        return Classification {
            is_tagged: false,
            explicit_conversation_id: None,
            title: subject.trim().to_string(),
        };
    };

    Classification {
        is_tagged: true,
        explicit_conversation_id: captures.name("id").map(|m| m.as_str().to_ascii_lowercase()),
        title: captures
            .name("title")
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    }
}
