//! Session persistence and lifecycle.
//!
//! This module provides:
//! - `SessionStore`: get/set/remove over the persisted session keys, with
//!   `MemoryStore`, `FileStore` and `KeyringStore` backends
//! - `Session`, `SessionStatus`: the signed-in identity and its UI-facing status
//! - `SessionManager`: sign-in, sign-up, sign-out, restore and profile updates

pub mod credentials;
pub mod manager;
pub mod session;
pub mod store;

pub use credentials::KeyringStore;
pub use manager::{SessionError, SessionManager};
pub use session::{Session, SessionStatus, TokenPair};
pub use store::{open_store, FileStore, MemoryStore, SessionStore, StorageKey};
