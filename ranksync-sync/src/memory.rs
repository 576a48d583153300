//! In-memory [`RecordStore`] for tests and embedding.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use ranksync_core::config::DEFAULT_TABLE;
use ranksync_core::{PersistedRecord, UserId};

use crate::error::{query_err, SyncError};
use crate::store::RecordStore;

/// A write observed by [`MemoryRecordStore`], in completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Insert { user: UserId, roles: Option<String> },
    Update { user: UserId, roles: String },
}

/// Most recent writes kept by [`MemoryRecordStore::writes`].
pub const WRITE_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<UserId, Option<String>>,
    writes: VecDeque<StoreWrite>,
    failing: bool,
    latency: Duration,
}

impl MemoryState {
    fn log(&mut self, write: StoreWrite) {
        if self.writes.len() == WRITE_LOG_CAPACITY {
            self.writes.pop_front();
        }
        self.writes.push_back(write);
    }
}

/// Map-backed store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row without recording a write. `None` stores a NULL `Ranks`.
    pub fn with_record(self, user: impl Into<UserId>, roles: Option<&str>) -> Self {
        self.lock()
            .rows
            .insert(user.into(), roles.map(str::to_string));
        self
    }

    /// Make every following call fail as if the backend were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Delay applied before each call completes.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// `None` if no row exists; `Some(None)` for a NULL `Ranks`.
    pub fn roles(&self, user: &UserId) -> Option<Option<String>> {
        self.lock().rows.get(user).cloned()
    }

    /// The last [`WRITE_LOG_CAPACITY`] writes, oldest first. A test aid;
    /// older entries are dropped.
    pub fn writes(&self) -> Vec<StoreWrite> {
        self.lock().writes.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply latency, then fail if requested.
    async fn enter(&self, operation: &'static str) -> Result<(), SyncError> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.lock().failing {
            return Err(query_err(operation, sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn table(&self) -> &str {
        DEFAULT_TABLE
    }

    async fn ensure_schema(&self) -> Result<(), SyncError> {
        self.enter("ensure_schema")
            .await
            .map_err(|_| SyncError::Schema {
                table: DEFAULT_TABLE.to_string(),
                source: sqlx::Error::PoolClosed,
            })
    }

    async fn fetch_by_user(&self, user: &UserId) -> Result<Option<PersistedRecord>, SyncError> {
        self.enter("fetch_by_user").await?;
        Ok(self.lock().rows.get(user).map(|roles| PersistedRecord {
            user_id: user.clone(),
            roles: roles.clone(),
        }))
    }

    async fn insert(&self, record: &PersistedRecord) -> Result<(), SyncError> {
        self.enter("insert").await?;
        let mut state = self.lock();
        state
            .rows
            .insert(record.user_id.clone(), record.roles.clone());
        state.log(StoreWrite::Insert {
            user: record.user_id.clone(),
            roles: record.roles.clone(),
        });
        Ok(())
    }

    async fn update_roles(&self, user: &UserId, roles: &str) -> Result<bool, SyncError> {
        self.enter("update_roles").await?;
        let mut state = self.lock();
        let Some(slot) = state.rows.get_mut(user) else {
            return Ok(false);
        };
        *slot = Some(roles.to_string());
        state.log(StoreWrite::Update {
            user: user.clone(),
            roles: roles.to_string(),
        });
        Ok(true)
    }

    async fn ping(&self) -> Result<(), SyncError> {
        self.enter("ping").await
    }
}
