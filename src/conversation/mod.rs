// The `conversation` module owns the on-disk conversation tree.
//
// <interactions_dir>/<conversation id>/<NNN>/body_text.txt
// <interactions_dir>/<conversation id>/<NNN>/<attachment files>

pub mod listing;
pub mod materializer;

pub use listing::StoredAttachment;
pub use materializer::{
    BODY_FILE_NAME, ConversationStore, MaterializeError, RESPONSE_FILE_NAME, Turn, TurnNumber,
    mint_conversation_id,
};
