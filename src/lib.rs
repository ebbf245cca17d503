//! # Chatterbox: turns tagged emails into on-disk conversations.
//!
//! A [`Poller`] follows a mailbox's change history, stores every message whose
//! subject starts with `chatterbox` as the next turn of a conversation and
//! answers the sender with an acknowledgment.

/// The `ack` module renders and sends acknowledgments.
pub mod ack;
/// The `classify` module parses the subject tagging grammar.
pub mod classify;
pub mod config;
/// The `conversation` module owns the conversation/turn directory tree.
pub mod conversation;
/// The `llm` module provides a trait for interacting with language models.
pub mod llm;
/// The `mail` module provides the mailbox abstraction and its Gmail implementation.
pub mod mail;
/// The `poller` module drives poll cycles.
pub mod poller;
/// The `shutdown` module provides a trait for gracefully shutting down the poller.
pub mod shutdown;
/// The `store` module persists the change cursor and poll counter.
pub mod store;
/// The `utils` module provides authorization and templating helpers.
pub mod utils;

pub use ack::Acknowledger;
pub use classify::{Classification, classify};
pub use config::Config;
pub use conversation::{ConversationStore, Turn, TurnNumber};
pub use mail::{ChangeFetcher, GmailTransport, MailTransport};
pub use poller::{CycleReport, Poller, PollerBuilder};
pub use store::{Cursor, CursorStore};
pub use utils::context_hub::ContextHub;
