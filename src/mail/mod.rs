// The `mail` module defines the mailbox collaborator and its data model.

pub mod content;
pub mod fetcher;
pub mod gmail;
pub mod message;
#[cfg(test)]
pub(crate) mod testing;

use crate::store::Cursor;
use crate::utils::google_auth::AuthError;
use async_trait::async_trait;
use thiserror::Error;

pub use content::AttachmentInfo;
pub use fetcher::{ChangeEntry, ChangeFetcher, ChangeSet, FetchError};
pub use gmail::{GmailTransport, GmailTransportBuilder};
pub use message::{Attachment, AttachmentRef, Header, Message, OutgoingMessage, Part};

/// The `TransportError` enum defines the failures reported by a [`MailTransport`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// The provider no longer accepts the given change cursor.
    #[error("change cursor {0} is invalid or expired")]
    InvalidCursor(Cursor),
    /// The requested message or attachment does not exist (any more).
    #[error("not found: {0}")]
    NotFound(String),
    /// The request failed; retrying later may succeed.
    #[error("mail provider request failed: {0}")]
    Request(String),
    /// The provider answered with something we cannot interpret.
    #[error("malformed provider response: {0}")]
    Malformed(String),
    /// The transport could not be authorized.
    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),
}

/// One change record: every message added under a single change-sequence id.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub sequence: Cursor,
    pub added_message_ids: Vec<String>,
}

/// Everything the provider reported since a cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeList {
    pub batches: Vec<ChangeBatch>,
    /// The provider's current high-water mark, when it reports one.
    pub high_water: Option<Cursor>,
}

/// An authorized connection to a mailbox.
///
/// Implementations own the credential lifecycle; callers only see mailbox
/// operations.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Returns the mailbox's current change cursor.
    async fn baseline_cursor(&self) -> Result<Cursor, TransportError>;

    /// Lists every change recorded after `since`, across all result pages.
    async fn list_changes(&self, since: &Cursor) -> Result<ChangeList, TransportError>;

    async fn get_message(&self, id: &str) -> Result<Message, TransportError>;

    /// Fetches the payload of an attachment that was not delivered inline.
    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, TransportError>;

    /// Sends a message and returns its provider id.
    async fn send_message(&self, message: &OutgoingMessage) -> Result<String, TransportError>;
}
