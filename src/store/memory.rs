// ============================================================================
// In-Memory Entity Store
// ============================================================================
//
// Reference store implementation. All records live under one map; `prepare`
// takes the map's owned write guard, so the concurrency check and the commit
// that follows form a single critical section. Dropping the pending-commit
// handle without committing releases the guard with no effect.
//
// ============================================================================

use super::spi::{CommitReceipt, EntityStore, StateBatch, StoreCommit};
use crate::core::{Result, Usecase, UowError, Value};
use crate::entity::{EntityReference, EntityState, VersionToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

/// Durable form of one entity's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntity {
    pub properties: HashMap<String, Value>,
    pub associations: HashMap<String, Option<EntityReference>>,
    pub many_associations: HashMap<String, Vec<EntityReference>>,
    pub version: VersionToken,
    pub modified_at: DateTime<Utc>,
}

impl StoredEntity {
    fn from_state(state: &EntityState, version: VersionToken) -> Self {
        Self {
            properties: state.properties().clone(),
            associations: state.associations().clone(),
            many_associations: state.many_associations().clone(),
            version,
            modified_at: Utc::now(),
        }
    }

    pub(crate) fn to_loaded_state(&self, reference: EntityReference) -> EntityState {
        EntityState::loaded(
            reference,
            self.version,
            self.properties.clone(),
            self.associations.clone(),
            self.many_associations.clone(),
        )
    }
}

pub(crate) type RecordMap = HashMap<EntityReference, StoredEntity>;

/// Validate a batch against the current records: every updated state's token
/// must match, and new references must not collide. The check covers the
/// whole batch before reporting, so the error carries every conflict.
pub(crate) fn validate_batch(records: &RecordMap, batch: &StateBatch) -> Result<()> {
    let mut conflicts = Vec::new();

    for state in &batch.updated {
        let supplied = state.version().ok_or_else(|| {
            UowError::Store(format!(
                "Updated state '{}' carries no version token",
                state.reference()
            ))
        })?;
        match records.get(state.reference()) {
            // A vanished record means a concurrent remove won the race.
            None => conflicts.push(state.reference().clone()),
            Some(stored) if stored.version != supplied => {
                conflicts.push(state.reference().clone());
            }
            Some(_) => {}
        }
    }

    if !conflicts.is_empty() {
        return Err(UowError::ConcurrentModification(conflicts));
    }

    for state in &batch.new {
        if records.contains_key(state.reference()) {
            return Err(UowError::Store(format!(
                "Entity '{}' already exists",
                state.reference()
            )));
        }
    }

    Ok(())
}

/// Apply a validated batch, assigning fresh version tokens off `versions`.
pub(crate) fn apply_batch(
    records: &mut RecordMap,
    batch: &StateBatch,
    versions: &AtomicU64,
) -> CommitReceipt {
    let mut receipt = CommitReceipt::default();

    for state in batch.new.iter().chain(&batch.updated) {
        let version = VersionToken::new(versions.fetch_add(1, Ordering::SeqCst) + 1);
        records.insert(
            state.reference().clone(),
            StoredEntity::from_state(state, version),
        );
        receipt.versions.insert(state.reference().clone(), version);
    }

    for reference in &batch.removed {
        records.remove(reference);
    }

    receipt
}

pub struct MemoryEntityStore {
    records: Arc<RwLock<RecordMap>>,
    versions: Arc<AtomicU64>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            versions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn entity_count(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn contains(&self, reference: &EntityReference) -> bool {
        self.records.read().await.contains_key(reference)
    }

    pub async fn version_of(&self, reference: &EntityReference) -> Option<VersionToken> {
        self.records.read().await.get(reference).map(|e| e.version)
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
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
        Ok(Box::new(MemoryCommit {
            guard,
            batch,
            versions: Arc::clone(&self.versions),
        }))
    }
}

/// Pending commit holding the store's write guard until resolved.
struct MemoryCommit {
    guard: OwnedRwLockWriteGuard<RecordMap>,
    batch: StateBatch,
    versions: Arc<AtomicU64>,
}

#[async_trait]
impl StoreCommit for MemoryCommit {
    async fn commit(mut self: Box<Self>) -> Result<CommitReceipt> {
        let receipt = apply_batch(&mut self.guard, &self.batch, &self.versions);
        tracing::debug!(
            usecase = %self.batch.usecase,
            changes = self.batch.change_count(),
            "committed batch"
        );
        Ok(receipt)
    }

    async fn cancel(self: Box<Self>) {
        tracing::debug!(usecase = %self.batch.usecase, "cancelled prepared batch");
        drop(self.guard);
    }
}
