use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{DEFAULT_TTL, SessionStore, StoreError};
use crate::record::{ErrorLogEntry, ProgressRecord, SessionId};

struct Expiring<T> {
    value: T,
    deadline: Instant,
}

/// An in-memory implementation of [`SessionStore`] with per-key TTL.
///
/// Expired entries are dropped lazily on read, which makes "expired" and
/// "never existed" indistinguishable to callers, matching the semantics
/// of an external KV map with per-key expiration. Deadlines use
/// `tokio::time::Instant`, so TTL behavior is testable under paused time.
pub struct InMemoryStore {
    records: Mutex<HashMap<String, Expiring<ProgressRecord>>>,
    logs: Mutex<HashMap<String, Expiring<Vec<ErrorLogEntry>>>>,
    ttl: Duration,
}

impl InMemoryStore {
    /// Creates a store with the default one-hour retention window.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn fresh_deadline(&self) -> Instant {
        Instant::now() + self.ttl
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn put_record(
        &self,
        id: &SessionId,
        record: &ProgressRecord,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.insert(
            id.as_str().to_string(),
            Expiring {
                value: record.clone(),
                deadline: self.fresh_deadline(),
            },
        );
        Ok(())
    }

    async fn get_record(&self, id: &SessionId) -> Result<Option<ProgressRecord>, StoreError> {
        let mut records = self.records.lock().await;
        match records.get(id.as_str()) {
            Some(entry) if entry.deadline > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                records.remove(id.as_str());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn append_log(&self, id: &SessionId, entry: ErrorLogEntry) -> Result<usize, StoreError> {
        let mut logs = self.logs.lock().await;
        let now = Instant::now();
        let mut entries = match logs.remove(id.as_str()) {
            Some(existing) if existing.deadline > now => existing.value,
            _ => Vec::new(),
        };
        entries.push(entry);
        let total = entries.len();
        logs.insert(
            id.as_str().to_string(),
            Expiring {
                value: entries,
                deadline: self.fresh_deadline(),
            },
        );
        Ok(total)
    }

    async fn read_log(&self, id: &SessionId) -> Result<Vec<ErrorLogEntry>, StoreError> {
        let mut logs = self.logs.lock().await;
        match logs.get(id.as_str()) {
            Some(entry) if entry.deadline > Instant::now() => Ok(entry.value.clone()),
            Some(_) => {
                logs.remove(id.as_str());
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}
