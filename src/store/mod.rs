// The `store` module persists the poller's state between process restarts.

pub mod cursor;
pub mod cursor_store;
pub mod kv_file;

pub use cursor::Cursor;
pub use cursor_store::CursorStore;
pub use kv_file::{KeyValueFile, StoreError};
