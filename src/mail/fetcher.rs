// The `fetcher` module turns provider change records into an ordered batch of new messages.

use crate::mail::{MailTransport, TransportError};
use crate::store::Cursor;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// The `FetchError` enum defines why a change fetch produced no batch.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The stored cursor was rejected; the caller must reset and re-baseline.
    #[error("change cursor {0} was rejected, resync required")]
    InvalidCursor(Cursor),
    /// The provider could not be reached or failed; retry next cycle.
    #[error("transient fetch failure: {0}")]
    Transient(#[source] TransportError),
}

/// A newly added message and the change-sequence id it was reported under.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEntry {
    pub message_id: String,
    pub sequence: Cursor,
}

/// The result of one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub entries: Vec<ChangeEntry>,
    pub new_cursor: Cursor,
    /// Set when this fetch only established a starting point.
    pub baseline: bool,
}

impl ChangeSet {
    pub fn message_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.message_id.as_str()).collect()
    }

    /// Returns the cursor that is safe to persist once `failed` messages
    /// could not be processed.
    ///
    /// That is the latest sequence id strictly before the first failed entry,
    /// never earlier than `previous`. Without failures it is `new_cursor`.
    pub fn safe_cursor(&self, previous: &Cursor, failed: &HashSet<String>) -> Cursor {
        let Some(first_failed) = self
            .entries
            .iter()
            .position(|e| failed.contains(&e.message_id))
        else {
            return self.new_cursor.clone();
        };

        let boundary = &self.entries[first_failed].sequence;
        self.entries[..first_failed]
            .iter()
            .filter(|e| boundary.is_after(&e.sequence))
            .fold(previous.clone(), |acc, e| acc.later(e.sequence.clone()))
    }
}

/// Computes new-message batches from a cursor.
#[derive(Clone)]
pub struct ChangeFetcher {
    transport: Arc<dyn MailTransport>,
}

impl ChangeFetcher {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    /// Returns the messages added since `cursor` and the new high-water cursor.
    ///
    /// A sentinel cursor never lists history: the provider's current cursor
    /// becomes the baseline and no message is returned.
    pub async fn fetch_changes_since(&self, cursor: &Cursor) -> Result<ChangeSet, FetchError> {
        if cursor.is_sentinel() {
            let baseline = self
                .transport
                .baseline_cursor()
                .await
                .map_err(FetchError::Transient)?;
            info!(cursor = %baseline, "Established baseline cursor, history before it is ignored");
            return Ok(ChangeSet {
                entries: Vec::new(),
                new_cursor: baseline,
                baseline: true,
            });
        }

        let changes = match self.transport.list_changes(cursor).await {
            Ok(changes) => changes,
            Err(TransportError::InvalidCursor(rejected)) => {
                return Err(FetchError::InvalidCursor(rejected));
            }
            Err(e) => return Err(FetchError::Transient(e)),
        };

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut new_cursor = cursor.clone();
        if let Some(high_water) = changes.high_water {
            new_cursor = new_cursor.later(high_water);
        }
        for batch in changes.batches {
            new_cursor = new_cursor.later(batch.sequence.clone());
            for message_id in batch.added_message_ids {
                if seen.insert(message_id.clone()) {
                    entries.push(ChangeEntry {
                        message_id,
                        sequence: batch.sequence.clone(),
                    });
                }
            }
        }

        debug!(
            since = %cursor,
            new_cursor = %new_cursor,
            added = entries.len(),
            "Fetched mailbox changes"
        );
        Ok(ChangeSet {
            entries,
            new_cursor,
            baseline: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::testing::{FakeMailbox, tagged_message};

    fn fetcher(mailbox: &Arc<FakeMailbox>) -> ChangeFetcher {
        ChangeFetcher::new(mailbox.clone())
    }

    #[tokio::test]
    async fn first_run_only_establishes_a_baseline() {
        let mailbox = Arc::new(FakeMailbox::new(500));
        mailbox.add_message(400, tagged_message("old", "chatterbox old news", "ignored"));

        let set = fetcher(&mailbox)
            .fetch_changes_since(&Cursor::sentinel())
            .await
            .unwrap();

        assert!(set.baseline);
        assert!(set.entries.is_empty());
        assert_eq!(set.new_cursor, Cursor::from(500));
        assert!(mailbox.listed_since().is_empty(), "history must not be listed");
    }

    #[tokio::test]
    async fn changes_are_flattened_in_order_without_duplicates() {
        let mailbox = Arc::new(FakeMailbox::new(10));
        mailbox.add_message(11, tagged_message("a", "chatterbox a", "a"));
        mailbox.add_message(12, tagged_message("b", "chatterbox b", "b"));
        mailbox.add_batch(13, &["a", "c"]);

        let set = fetcher(&mailbox)
            .fetch_changes_since(&Cursor::from(10))
            .await
            .unwrap();

        assert_eq!(set.message_ids(), vec!["a", "b", "c"]);
        assert_eq!(set.entries[2].sequence, Cursor::from(13));
        assert_eq!(set.new_cursor, Cursor::from(13));
        assert!(!set.baseline);
    }

    #[tokio::test]
    async fn no_changes_keeps_the_input_cursor() {
        let mailbox = Arc::new(FakeMailbox::new(10));
        mailbox.report_high_water(false);

        let set = fetcher(&mailbox)
            .fetch_changes_since(&Cursor::from(10))
            .await
            .unwrap();

        assert!(set.entries.is_empty());
        assert_eq!(set.new_cursor, Cursor::from(10));
    }

    #[tokio::test]
    async fn rejected_cursor_asks_for_resync() {
        let mailbox = Arc::new(FakeMailbox::new(10));
        mailbox.invalidate_cursor_once();

        let result = fetcher(&mailbox).fetch_changes_since(&Cursor::from(3)).await;

        assert!(matches!(result, Err(FetchError::InvalidCursor(c)) if c == Cursor::from(3)));
    }

    #[tokio::test]
    async fn provider_failure_is_transient() {
        let mailbox = Arc::new(FakeMailbox::new(10));
        mailbox.fail_listing(true);

        let result = fetcher(&mailbox).fetch_changes_since(&Cursor::from(3)).await;

        assert!(matches!(result, Err(FetchError::Transient(_))));
    }

    #[test]
    fn safe_cursor_stops_before_the_first_failure() {
        let set = ChangeSet {
            entries: vec![
                ChangeEntry { message_id: "a".into(), sequence: Cursor::from(11) },
                ChangeEntry { message_id: "b".into(), sequence: Cursor::from(12) },
                ChangeEntry { message_id: "c".into(), sequence: Cursor::from(12) },
                ChangeEntry { message_id: "d".into(), sequence: Cursor::from(14) },
            ],
            new_cursor: Cursor::from(15),
            baseline: false,
        };
        let previous = Cursor::from(10);

        let none = HashSet::new();
        assert_eq!(set.safe_cursor(&previous, &none), Cursor::from(15));

        let c_failed: HashSet<String> = ["c".to_string()].into();
        assert_eq!(set.safe_cursor(&previous, &c_failed), Cursor::from(11));

        let a_failed: HashSet<String> = ["a".to_string(), "d".to_string()].into();
        assert_eq!(set.safe_cursor(&previous, &a_failed), previous);
    }
}
