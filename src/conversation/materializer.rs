use crate::mail::Attachment;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Name of the file holding a turn's extracted body text.
pub const BODY_FILE_NAME: &str = "body_text.txt";
/// Name of the file holding the model's answer for a turn.
pub const RESPONSE_FILE_NAME: &str = "response_text.txt";

const RESERVED_FILE_NAMES: [&str; 2] = [BODY_FILE_NAME, RESPONSE_FILE_NAME];

/// The `MaterializeError` enum defines the failures while writing a turn.
#[derive(Error, Debug)]
pub enum MaterializeError {
    /// The conversation id cannot be used as a directory name.
    #[error("invalid conversation id {0:?}")]
    InvalidConversationId(String),
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The position of a turn inside its conversation, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnNumber(u32);

impl TurnNumber {
    pub const FIRST: TurnNumber = TurnNumber(1);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Parses a turn directory name: at least three ASCII digits.
    pub fn parse(name: &str) -> Option<Self> {
        if name.len() < 3 || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        name.parse().ok().map(Self)
    }
}

impl fmt::Display for TurnNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// A materialized turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub conversation_id: String,
    pub number: TurnNumber,
    pub path: PathBuf,
}

/// Returns a fresh random conversation id.
pub fn mint_conversation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Writes turns under a root directory, one subdirectory per conversation.
///
/// Turn numbers are derived from the directories already on disk, so the
/// store keeps no state of its own. Numbering is only safe with a single
/// writer per conversation.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    root: PathBuf,
}

impl ConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory of `conversation_id`, rejecting ids that are not
    /// a single plain path component.
    pub fn conversation_dir(&self, conversation_id: &str) -> Result<PathBuf, MaterializeError> {
        let valid = !conversation_id.is_empty()
            && conversation_id != "."
            && conversation_id != ".."
            && !conversation_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(MaterializeError::InvalidConversationId(
                conversation_id.to_string(),
            ));
        }
        Ok(self.root.join(conversation_id))
    }

    /// Stores one message as the next turn of a conversation.
    ///
    /// A conversation id is minted when none is given.
    pub async fn materialize(
        &self,
        conversation_id: Option<&str>,
        body_text: Option<&str>,
        attachments: &[Attachment],
    ) -> Result<Turn, MaterializeError> {
        let conversation_id = match conversation_id {
            Some(id) => id.to_string(),
            None => {
                let id = mint_conversation_id();
                info!(conversation_id = %id, "Started a new conversation");
                id
            }
        };

        let conversation_dir = self.conversation_dir(&conversation_id)?;
        fs::create_dir_all(&conversation_dir)
            .await
            .map_err(|source| MaterializeError::CreateDir {
                path: conversation_dir.clone(),
                source,
            })?;

        let number = next_turn_number(&conversation_dir).await?;
        let turn_dir = conversation_dir.join(number.to_string());
        // Never reuse a directory that appeared since the scan.
        fs::create_dir(&turn_dir)
            .await
            .map_err(|source| MaterializeError::CreateDir {
                path: turn_dir.clone(),
                source,
            })?;

        if let Some(text) = body_text {
            write_file(&turn_dir.join(BODY_FILE_NAME), text.as_bytes()).await?;
        }
        for attachment in attachments {
            let path = available_path(&turn_dir, &safe_file_name(&attachment.filename)).await?;
            write_file(&path, &attachment.data).await?;
        }

        debug!(
            conversation_id = %conversation_id,
            turn = %number,
            attachments = attachments.len(),
            "Turn materialized"
        );
        Ok(Turn {
            conversation_id,
            number,
            path: turn_dir,
        })
    }

    /// Writes the model's answer next to the turn's body.
    pub async fn write_response(&self, turn: &Turn, text: &str) -> Result<PathBuf, MaterializeError> {
        let path = turn.path.join(RESPONSE_FILE_NAME);
        write_file(&path, text.as_bytes()).await?;
        Ok(path)
    }

    /// Lists the turn numbers of a conversation in ascending order.
    pub async fn list_turns(&self, conversation_id: &str) -> Result<Vec<TurnNumber>, MaterializeError> {
        let dir = self.conversation_dir(conversation_id)?;
        let mut turns = scan_turns(&dir).await?;
        turns.sort();
        Ok(turns)
    }
}

async fn scan_turns(dir: &Path) -> Result<Vec<TurnNumber>, MaterializeError> {
    let scan_err = |source| MaterializeError::Scan {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(scan_err(e)),
    };

    let mut turns = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
        if !entry.file_type().await.map_err(scan_err)?.is_dir() {
            continue;
        }
        if let Some(number) = entry.file_name().to_str().and_then(TurnNumber::parse) {
            turns.push(number);
        }
    }
    Ok(turns)
}

async fn next_turn_number(dir: &Path) -> Result<TurnNumber, MaterializeError> {
    Ok(scan_turns(dir)
        .await?
        .into_iter()
        .max()
        .map(TurnNumber::next)
        .unwrap_or(TurnNumber::FIRST))
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), MaterializeError> {
    fs::write(path, data)
        .await
        .map_err(|source| MaterializeError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Makes an attachment name usable as a single file name.
fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "attachment".to_string()
    } else {
        cleaned
    }
}

/// Returns `dir/name`, or `dir/stem (n).ext` when that name is already taken.
async fn available_path(dir: &Path, name: &str) -> Result<PathBuf, MaterializeError> {
    let (stem, extension) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };

    let mut candidate = name.to_string();
    let mut suffix = 0;
    loop {
        let path = dir.join(&candidate);
        let reserved = RESERVED_FILE_NAMES.contains(&candidate.as_str());
        let taken = fs::try_exists(&path)
            .await
            .map_err(|source| MaterializeError::Scan {
                path: path.clone(),
                source,
            })?;
        if !reserved && !taken {
            return Ok(path);
        }
        suffix += 1;
        candidate = format!("{stem} ({suffix}){extension}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn attachment(name: &str, data: &[u8]) -> Attachment {
        Attachment {
            filename: name.to_string(),
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn sequential_turns_are_numbered_from_001() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());

        let first = store.materialize(Some("abc"), Some("one"), &[]).await.unwrap();
        let second = store.materialize(Some("abc"), Some("two"), &[]).await.unwrap();

        assert_eq!(first.path, dir.path().join("abc").join("001"));
        assert_eq!(second.path, dir.path().join("abc").join("002"));
        let body = std::fs::read_to_string(second.path.join(BODY_FILE_NAME)).unwrap();
        assert_eq!(body, "two");
    }

    #[tokio::test]
    async fn numbering_is_per_conversation() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());

        for conversation in ["a", "b", "a", "a", "b"] {
            store.materialize(Some(conversation), None, &[]).await.unwrap();
        }

        let a: Vec<String> = store.list_turns("a").await.unwrap().iter().map(|t| t.to_string()).collect();
        let b: Vec<String> = store.list_turns("b").await.unwrap().iter().map(|t| t.to_string()).collect();
        assert_eq!(a, vec!["001", "002", "003"]);
        assert_eq!(b, vec!["001", "002"]);
    }

    #[tokio::test]
    async fn existing_turns_are_left_untouched() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let first = store
            .materialize(Some("abc"), Some("original"), &[attachment("a.txt", b"a")])
            .await
            .unwrap();

        store.materialize(Some("abc"), Some("later"), &[]).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(first.path.join(BODY_FILE_NAME)).unwrap(),
            "original"
        );
        assert_eq!(std::fs::read(first.path.join("a.txt")).unwrap(), b"a");
    }

    #[tokio::test]
    async fn numbering_continues_after_gaps_and_ignores_other_entries() {
        let dir = tempdir().unwrap();
        let conversation = dir.path().join("abc");
        std::fs::create_dir_all(conversation.join("001")).unwrap();
        std::fs::create_dir_all(conversation.join("004")).unwrap();
        std::fs::create_dir_all(conversation.join("notes")).unwrap();
        std::fs::create_dir_all(conversation.join("07")).unwrap();
        std::fs::write(conversation.join("009"), "a file, not a turn").unwrap();

        let turn = ConversationStore::new(dir.path())
            .materialize(Some("abc"), None, &[])
            .await
            .unwrap();

        assert_eq!(turn.number, TurnNumber::new(5));
        assert!(!turn.path.join(BODY_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn missing_id_mints_a_uuid() {
        let dir = tempdir().unwrap();
        let turn = ConversationStore::new(dir.path())
            .materialize(None, Some("hello"), &[])
            .await
            .unwrap();

        assert!(Uuid::parse_str(&turn.conversation_id).is_ok());
        assert_eq!(turn.number, TurnNumber::FIRST);
    }

    #[tokio::test]
    async fn attachments_are_written_and_collisions_suffixed() {
        let dir = tempdir().unwrap();
        let turn = ConversationStore::new(dir.path())
            .materialize(
                Some("abc"),
                Some("body"),
                &[
                    attachment("report.pdf", b"v1"),
                    attachment("report.pdf", b"v2"),
                    attachment("body_text.txt", b"sneaky"),
                    attachment("../escape.sh", b"x"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read(turn.path.join("report.pdf")).unwrap(), b"v1");
        assert_eq!(std::fs::read(turn.path.join("report (1).pdf")).unwrap(), b"v2");
        assert_eq!(std::fs::read(turn.path.join("body_text (1).txt")).unwrap(), b"sneaky");
        assert_eq!(std::fs::read_to_string(turn.path.join(BODY_FILE_NAME)).unwrap(), "body");
        assert!(turn.path.join(".._escape.sh").exists());
    }

    #[tokio::test]
    async fn unsafe_conversation_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path());

        for id in ["", "..", "a/b"] {
            let result = store.materialize(Some(id), None, &[]).await;
            assert!(matches!(result, Err(MaterializeError::InvalidConversationId(_))));
        }
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let dir = tempdir().unwrap();
        // A file where the conversation directory should be.
        std::fs::write(dir.path().join("abc"), "blocker").unwrap();

        let result = ConversationStore::new(dir.path())
            .materialize(Some("abc"), Some("x"), &[])
            .await;

        assert!(matches!(result, Err(MaterializeError::CreateDir { .. })));
    }

    #[test]
    fn turn_numbers_parse_and_display() {
        assert_eq!(TurnNumber::parse("001"), Some(TurnNumber::new(1)));
        assert_eq!(TurnNumber::parse("1000"), Some(TurnNumber::new(1000)));
        assert_eq!(TurnNumber::parse("01"), None);
        assert_eq!(TurnNumber::parse("0a1"), None);
        assert_eq!(TurnNumber::new(42).to_string(), "042");
    }
}
