//! Conversation persistence
//!
//! Conversations live in memory while they are active and are written behind
//! to SQLite. All writes go through a single writer thread ([`WriteQueue`]),
//! reads use a small pool of read-only connections. The periodic maintenance
//! tick in [`eviction`] persists dirty conversations and drops idle ones.

pub mod conversation;
pub mod database;
pub mod eviction;
pub mod schema;
pub mod users;
pub mod write_queue;

pub use conversation::{
    CacheStats, Conversation, ConversationCache, ConversationKey, ConversationState, InUseGuard,
    StoreConfig,
};
pub use database::{Database, StoredConversation};
pub use eviction::{MaintenanceReport, spawn_maintenance};
pub use users::{User, UserDirectory};
pub use write_queue::{QueueStats, WriteQueue};

use thiserror::Error;

/// Session id used when a request does not name one.
pub const DEFAULT_SESSION_ID: &str = "default";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("History encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Write queue is closed")]
    QueueClosed,

    #[error("Writer dropped the request before reporting a result")]
    WriterGone,

    #[error("Blocking task failed: {0}")]
    Join(String),

    #[error("Failed to start writer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("User row missing after insert: {0}")]
    MissingUser(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
