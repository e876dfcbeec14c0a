//! Session state persistence.
//!
//! Two logical keys exist per session: the current-state record
//! (overwritten in place) and the append-only error log. Each carries an
//! independent time-to-live that is refreshed to the full retention window
//! on every write, so an actively reporting installer never expires
//! mid-run while an abandoned session disappears after one idle window.

use std::time::Duration;

use async_trait::async_trait;

use crate::record::{ErrorLogEntry, ProgressRecord, SessionId};

mod in_memory;
pub use in_memory::InMemoryStore;

/// Retention window for both session keys, refreshed on every write.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Infrastructure failure talking to the backing store. Never conflated
/// with validation rejections or with a key that simply isn't there.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session store codec error: {0}")]
    Codec(String),
}

/// Trait for abstracting the durable key-value map behind the
/// synchronization service. Backends with per-key expiration (Redis and
/// friends) implement this directly.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Overwrites the current-state record and resets its expiration.
    async fn put_record(&self, id: &SessionId, record: &ProgressRecord)
    -> Result<(), StoreError>;

    /// Returns the stored record, or `None` if absent or expired. The two
    /// conditions are deliberately indistinguishable to readers.
    async fn get_record(&self, id: &SessionId) -> Result<Option<ProgressRecord>, StoreError>;

    /// Appends one entry to the session's error log, resetting the log's
    /// expiration. Returns the new total entry count.
    async fn append_log(&self, id: &SessionId, entry: ErrorLogEntry) -> Result<usize, StoreError>;

    /// Returns the error log, or an empty sequence if none exists yet.
    /// A session is expected to exist before errors are, so this is not a
    /// not-found condition.
    async fn read_log(&self, id: &SessionId) -> Result<Vec<ErrorLogEntry>, StoreError>;
}
