// ============================================================================
// File-Backed Entity Store
// ============================================================================
//
// Same record map as the in-memory store plus snapshot durability: every
// successful commit serializes the full map and atomically replaces the
// snapshot file (write to a temp file in the same directory, then persist
// over the target). Opening resumes the version counter above the highest
// persisted token, so tokens never repeat across restarts.
//
// ============================================================================

use super::memory::{RecordMap, StoredEntity, apply_batch, validate_batch};
use super::spi::{CommitReceipt, EntityStore, StateBatch, StoreCommit};
use crate::core::{Result, Usecase, UowError};
use crate::entity::{EntityReference, EntityState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct EntityStoreSnapshot {
    format_version: u32,
    entities: RecordMap,
    metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMetadata {
    created_at: DateTime<Utc>,
    entity_count: usize,
}

impl EntityStoreSnapshot {
    fn new(entities: RecordMap) -> Self {
        let entity_count = entities.len();
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            entities,
            metadata: SnapshotMetadata {
                created_at: Utc::now(),
                entity_count,
            },
        }
    }
}

pub struct FileEntityStore {
    records: Arc<RwLock<RecordMap>>,
    versions: Arc<AtomicU64>,
    snapshot_path: PathBuf,
}

impl FileEntityStore {
    /// Open a store at `path`, loading an existing snapshot or starting
    /// empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let snapshot_path = path.as_ref().to_path_buf();
        if let Some(parent) = snapshot_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let entities = if snapshot_path.exists() {
            let bytes = fs::read(&snapshot_path)?;
            let snapshot: EntityStoreSnapshot = rmp_serde::from_slice(&bytes)
                .map_err(|e| UowError::Serialization(e.to_string()))?;
            if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
                return Err(UowError::Store(format!(
                    "Unsupported snapshot format version {}",
                    snapshot.format_version
                )));
            }
            snapshot.entities
        } else {
            HashMap::new()
        };

        let highest = entities
            .values()
            .map(|stored| stored.version.as_u64())
            .max()
            .unwrap_or(0);
        tracing::debug!(
            path = %snapshot_path.display(),
            entities = entities.len(),
            "opened file entity store"
        );

        Ok(Self {
            records: Arc::new(RwLock::new(entities)),
            versions: Arc::new(AtomicU64::new(highest)),
            snapshot_path,
        })
    }

    pub async fn entity_count(&self) -> usize {
        self.records.read().await.len()
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }
}

fn write_snapshot(path: &Path, records: &RecordMap) -> Result<()> {
    let snapshot = EntityStoreSnapshot::new(records.clone());
    let bytes =
        rmp_serde::to_vec(&snapshot).map_err(|e| UowError::Serialization(e.to_string()))?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(path).map_err(|e| UowError::Io(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl EntityStore for FileEntityStore {
    async fn new_entity_state(&self, reference: EntityReference) -> Result<EntityState> {
        Ok(EntityState::new(reference))
    }

    async fn entity_state_of(
        &self,
        reference: &EntityReference,
        usecase: &Usecase,
    ) -> Result<EntityState> {
        tracing::trace!(%reference, usecase = %usecase.name(), "loading entity state");
        let records = self.records.read().await;
        records
            .get(reference)
            .map(|stored| stored.to_loaded_state(reference.clone()))
            .ok_or_else(|| UowError::EntityNotFound(reference.clone()))
    }

    async fn prepare(&self, batch: StateBatch) -> Result<Box<dyn StoreCommit>> {
        let guard = Arc::clone(&self.records).write_owned().await;
        validate_batch(&guard, &batch)?;
        Ok(Box::new(FileCommit {
            guard,
            batch,
            versions: Arc::clone(&self.versions),
            snapshot_path: self.snapshot_path.clone(),
        }))
    }
}

struct FileCommit {
    guard: OwnedRwLockWriteGuard<RecordMap>,
    batch: StateBatch,
    versions: Arc<AtomicU64>,
    snapshot_path: PathBuf,
}

#[async_trait]
impl StoreCommit for FileCommit {
    async fn commit(mut self: Box<Self>) -> Result<CommitReceipt> {
        let receipt = apply_batch(&mut self.guard, &self.batch, &self.versions);

        // The in-memory apply has happened; losing the snapshot afterwards is
        // a durability loss the caller cannot retry its way out of.
        if let Err(err) = write_snapshot(&self.snapshot_path, &self.guard) {
            tracing::error!(
                path = %self.snapshot_path.display(),
                error = %err,
                "snapshot write failed after apply"
            );
            return Err(UowError::Completion {
                reason: format!("snapshot write failed: {}", err),
                unrecoverable: true,
            });
        }

        tracing::debug!(
            usecase = %self.batch.usecase,
            changes = self.batch.change_count(),
            path = %self.snapshot_path.display(),
            "committed batch to snapshot"
        );
        Ok(receipt)
    }

    async fn cancel(self: Box<Self>) {
        tracing::debug!(usecase = %self.batch.usecase, "cancelled prepared batch");
        drop(self.guard);
    }
}
