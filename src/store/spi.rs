use crate::core::{Result, Usecase};
use crate::entity::{EntityReference, EntityState, VersionToken};
use async_trait::async_trait;
use std::collections::HashMap;

/// One completion's worth of state changes, as three disjoint sets.
#[derive(Debug, Default)]
pub struct StateBatch {
    pub new: Vec<EntityState>,
    pub updated: Vec<EntityState>,
    pub removed: Vec<EntityReference>,
    /// Name of the usecase driving the completion, for store diagnostics.
    pub usecase: String,
}

impl StateBatch {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.new.len() + self.updated.len() + self.removed.len()
    }
}

/// Version tokens freshly assigned by a committed batch, keyed by reference.
/// Covers every surviving (new and updated) entity; this is what `apply()`
/// uses to rebind its identity map.
#[derive(Debug, Default)]
pub struct CommitReceipt {
    pub versions: HashMap<EntityReference, VersionToken>,
}

/// Entity store SPI - allows pluggable persistence backends.
///
/// The unit of work treats a store as an opaque, blocking collaborator: it
/// loads states one at a time and flushes whole batches through the
/// two-phase `prepare`/`commit` handshake. The store owns all concurrency
/// control for its own resource; the version-token check in `prepare` is the
/// sole serialization point between racing units of work.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Produce a fresh NEW state for a reference. Must succeed without I/O.
    async fn new_entity_state(&self, reference: EntityReference) -> Result<EntityState>;

    /// Load the current state of a reference as a LOADED state carrying the
    /// store's version token. The usecase is passed through so backends can
    /// honor its eager-loading hints.
    ///
    /// # Errors
    /// `EntityNotFound` when the reference is absent.
    async fn entity_state_of(
        &self,
        reference: &EntityReference,
        usecase: &Usecase,
    ) -> Result<EntityState>;

    /// Check the whole batch atomically and return a pending-commit handle.
    ///
    /// Every updated state's version token must still match the store's
    /// current token for that reference; the check passes for all entities or
    /// fails for the full batch.
    ///
    /// # Errors
    /// `ConcurrentModification` carrying every conflicting reference when the
    /// version check fails; `Store` for duplicate new references.
    async fn prepare(&self, batch: StateBatch) -> Result<Box<dyn StoreCommit>>;
}

/// Pending-commit handle produced by `EntityStore::prepare`.
///
/// Dropping the handle without calling either method must behave like
/// `cancel`.
#[async_trait]
pub trait StoreCommit: Send {
    /// Durably apply the whole prepared batch as a single atomic unit.
    async fn commit(self: Box<Self>) -> Result<CommitReceipt>;

    /// Discard the prepared batch with no effect.
    async fn cancel(self: Box<Self>);
}
