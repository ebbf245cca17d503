// The `cursor_store` module keeps the change cursor and the poll-cycle counter.

use crate::store::cursor::Cursor;
use crate::store::kv_file::{KeyValueFile, StoreError};
use std::path::Path;
use tracing::{debug, warn};

/// File holding the last fully processed change cursor.
pub const CURSOR_FILE_NAME: &str = "last_history_id.txt";
/// File holding the number of completed poll cycles.
pub const COUNTER_FILE_NAME: &str = "total_poll_cycles.txt";

/// Persists the change cursor and the poll-cycle counter under a data directory.
///
/// Loading never fails: an unreadable or corrupted file is logged and treated
/// as "start fresh". For the cursor this means a re-baseline on the next
/// cycle instead of a crash.
#[derive(Debug, Clone)]
pub struct CursorStore {
    cursor_file: KeyValueFile,
    counter_file: KeyValueFile,
}

impl CursorStore {
    /// Creates a store rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            cursor_file: KeyValueFile::new(data_dir.join(CURSOR_FILE_NAME)),
            counter_file: KeyValueFile::new(data_dir.join(COUNTER_FILE_NAME)),
        }
    }

    /// Returns the persisted cursor, or the sentinel when there is none.
    pub async fn load(&self) -> Cursor {
        match self.cursor_file.read().await {
            Ok(Some(value)) => {
                let cursor = Cursor::new(value);
                debug!(cursor = %cursor, "Loaded change cursor");
                cursor
            }
            Ok(None) => {
                debug!(path = %self.cursor_file.path().display(), "No change cursor yet");
                Cursor::sentinel()
            }
            Err(e) => {
                warn!(error = %e, "Unreadable change cursor, starting fresh");
                Cursor::sentinel()
            }
        }
    }

    pub async fn save(&self, cursor: &Cursor) -> Result<(), StoreError> {
        self.cursor_file.write(cursor.as_str()).await?;
        debug!(cursor = %cursor, "Persisted change cursor");
        Ok(())
    }

    /// Returns the number of completed poll cycles, zero when unknown.
    pub async fn load_counter(&self) -> u64 {
        match self.counter_file.read().await {
            Ok(Some(value)) => value.parse().unwrap_or_else(|e| {
                warn!(value = %value, error = %e, "Malformed poll counter, starting from zero");
                0
            }),
            Ok(None) => 0,
            Err(e) => {
                warn!(error = %e, "Unreadable poll counter, starting from zero");
                0
            }
        }
    }

    pub async fn save_counter(&self, cycles: u64) -> Result<(), StoreError> {
        self.counter_file.write(&cycles.to_string()).await
    }
}
