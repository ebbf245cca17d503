use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, provider-issued position in the mailbox change stream.
///
/// The only ordering applied to cursors is the one the provider documents:
/// Gmail history ids are unsigned integers, so two cursors that both parse as
/// `u64` compare numerically. Anything else only supports equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    /// The value persisted before the first successful sync.
    pub const SENTINEL: &'static str = "0";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    /// Returns the "never synced" cursor.
    pub fn sentinel() -> Self {
        Self(Self::SENTINEL.to_string())
    }

    /// Whether this cursor means "never synced".
    pub fn is_sentinel(&self) -> bool {
        self.0.is_empty() || self.0 == Self::SENTINEL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The provider's numeric ordering hint, when the cursor carries one.
    pub fn sequence(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// Whether `self` is strictly later than `other` in the change stream.
    pub fn is_after(&self, other: &Cursor) -> bool {
        match (self.sequence(), other.sequence()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    }

    /// Returns the later of the two cursors, preferring `self` when they
    /// cannot be ordered.
    pub fn later(self, other: Cursor) -> Cursor {
        if other.is_after(&self) { other } else { self }
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::sentinel()
    }
}

impl From<u64> for Cursor {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
