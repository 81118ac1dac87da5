//! Tracking record storage.
//!
//! # Responsibilities
//! - Create records in the running state
//! - Apply terminal updates, conditionally or unconditionally
//! - Optional JSON snapshot to disk for the in-memory store
//!
//! # Design Decisions
//! - The conditional update is decided under the per-key entry lock, so two
//!   finalizers racing on one record cannot both win

use std::collections::HashMap;
use std::fs::File;
use std::future::Future;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::tracking::record::{
    ExecutionTrackingRecord, Finalization, NewTrackingRecord, RecordId, TrackingStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tracking record {0} not found")]
    NotFound(RecordId),

    #[error("tracking store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage collaborator for tracking records.
pub trait TrackingStore: Send + Sync {
    /// Create a record with status `Running`.
    fn create(
        &self,
        fields: NewTrackingRecord,
    ) -> impl Future<Output = Result<RecordId, StoreError>> + Send;

    /// Apply `update` only if the record is still running. Returns whether
    /// the update was applied.
    fn update_if_running(
        &self,
        id: RecordId,
        update: &Finalization,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Apply `update` regardless of the current status.
    fn update(
        &self,
        id: RecordId,
        update: &Finalization,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Process-local record store.
#[derive(Debug, Default)]
pub struct InMemoryTrackingStore {
    records: DashMap<RecordId, ExecutionTrackingRecord>,
    persistence_path: Option<PathBuf>,
}

impl InMemoryTrackingStore {
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            records: DashMap::new(),
            persistence_path,
        }
    }

    /// Open a store backed by `path`, loading any records already saved there.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let store = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let saved: HashMap<RecordId, ExecutionTrackingRecord> = serde_json::from_reader(reader)?;
            for (id, record) in saved {
                store.records.insert(id, record);
            }
            tracing::info!(
                path = %path.display(),
                records = store.records.len(),
                "Loaded tracking records"
            );
        }
        Ok(store)
    }

    /// Write all records to the persistence path, if one is set.
    pub fn save_to_file(&self) -> Result<(), StoreError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let snapshot: HashMap<RecordId, ExecutionTrackingRecord> = self
            .records
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &snapshot)?;
        tracing::info!(path = %path.display(), records = snapshot.len(), "Saved tracking records");
        Ok(())
    }

    pub fn get(&self, id: RecordId) -> Option<ExecutionTrackingRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    pub fn records(&self) -> Vec<ExecutionTrackingRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records still in the running state.
    pub fn running_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == TrackingStatus::Running)
            .count()
    }
}

impl TrackingStore for InMemoryTrackingStore {
    async fn create(&self, fields: NewTrackingRecord) -> Result<RecordId, StoreError> {
        let id = Uuid::new_v4();
        self.records
            .insert(id, ExecutionTrackingRecord::running(id, fields));
        Ok(id)
    }

    async fn update_if_running(
        &self,
        id: RecordId,
        update: &Finalization,
    ) -> Result<bool, StoreError> {
        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.apply(update);
        Ok(true)
    }

    async fn update(&self, id: RecordId, update: &Finalization) -> Result<(), StoreError> {
        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.apply(update);
        Ok(())
    }
}
