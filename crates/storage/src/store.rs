use async_trait::async_trait;
use tokio::sync::Mutex;

use common::models::{CoreSnapshot, CycleRecord};

use crate::repositories::{CheckpointRepository, CycleRecordRepository};
use crate::{Database, StoreError};

/// Where cycle records and checkpoints go.
#[async_trait]
pub trait CycleStore: Send + Sync {
    async fn append_record(&self, record: &CycleRecord) -> Result<(), StoreError>;

    async fn save_checkpoint(&self, snapshot: &CoreSnapshot) -> Result<(), StoreError>;

    async fn latest_checkpoint(&self) -> Result<Option<CoreSnapshot>, StoreError>;

    /// Newest first.
    async fn recent_records(&self, limit: u32) -> Result<Vec<CycleRecord>, StoreError>;
}

pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CycleStore for SqliteStore {
    async fn append_record(&self, record: &CycleRecord) -> Result<(), StoreError> {
        CycleRecordRepository::insert(self.db.pool(), record).await
    }

    async fn save_checkpoint(&self, snapshot: &CoreSnapshot) -> Result<(), StoreError> {
        CheckpointRepository::save(self.db.pool(), snapshot).await
    }

    async fn latest_checkpoint(&self) -> Result<Option<CoreSnapshot>, StoreError> {
        CheckpointRepository::latest(self.db.pool()).await
    }

    async fn recent_records(&self, limit: u32) -> Result<Vec<CycleRecord>, StoreError> {
        CycleRecordRepository::recent(self.db.pool(), limit).await
    }
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<CycleRecord>>,
    checkpoint: Mutex<Option<CoreSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest first.
    pub async fn records(&self) -> Vec<CycleRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl CycleStore for MemoryStore {
    async fn append_record(&self, record: &CycleRecord) -> Result<(), StoreError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn save_checkpoint(&self, snapshot: &CoreSnapshot) -> Result<(), StoreError> {
        *self.checkpoint.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn latest_checkpoint(&self) -> Result<Option<CoreSnapshot>, StoreError> {
        Ok(self.checkpoint.lock().await.clone())
    }

    async fn recent_records(&self, limit: u32) -> Result<Vec<CycleRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.iter().rev().take(limit as usize).cloned().collect())
    }
}
