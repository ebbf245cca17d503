// The `listing` module reports the attachments stored across a conversation.

use crate::conversation::materializer::{
    BODY_FILE_NAME, ConversationStore, MaterializeError, RESPONSE_FILE_NAME, TurnNumber,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::fs;

/// An attachment file found in a turn directory.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAttachment {
    pub turn: TurnNumber,
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex SHA-256 of the content.
    pub sha256: String,
}

impl ConversationStore {
    /// Lists the attachments of a conversation, reporting each distinct
    /// content once.
    ///
    /// Turns are visited in ascending order and files by name, so the
    /// earliest copy of a duplicated payload is the one reported.
    pub async fn unique_attachments(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredAttachment>, MaterializeError> {
        let conversation_dir = self.conversation_dir(conversation_id)?;
        let mut seen = HashSet::new();
        let mut unique = Vec::new();

        for turn in self.list_turns(conversation_id).await? {
            let turn_dir = conversation_dir.join(turn.to_string());
            let scan_err = |source| MaterializeError::Scan {
                path: turn_dir.clone(),
                source,
            };

            let mut files = Vec::new();
            let mut entries = fs::read_dir(&turn_dir).await.map_err(scan_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
                if !entry.file_type().await.map_err(scan_err)?.is_file() {
                    continue;
                }
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                if name != BODY_FILE_NAME && name != RESPONSE_FILE_NAME {
                    files.push(name);
                }
            }
            files.sort();

            for filename in files {
                let path = turn_dir.join(&filename);
                let data = fs::read(&path).await.map_err(|source| MaterializeError::Scan {
                    path: path.clone(),
                    source,
                })?;
                let sha256 = format!("{:x}", Sha256::digest(&data));
                if seen.insert(sha256.clone()) {
                    unique.push(StoredAttachment {
                        turn,
                        filename,
                        path,
                        size_bytes: data.len() as u64,
                        sha256,
                    });
                }
            }
        }

        Ok(unique)
    }
}
