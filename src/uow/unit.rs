// ============================================================================
// Unit of Work
// ============================================================================
//
// The orchestrating session: identity map, create/get/remove, the completion
// protocol, and pause/resume against the ambient context stack.
//
// State transitions:
// ```text
// OPEN <──────> PAUSED            (pause / resume, repeatable)
// OPEN ──> COMPLETING ──> CLOSED  (complete)
// OPEN ──> COMPLETING ──> OPEN    (recoverable completion failure)
// OPEN | PAUSED ──> CLOSED        (discard)
// ```
// Nothing leaves CLOSED. A unit of work serves one logical flow of control;
// the interior mutex only guards against accidental overlap, it is not a
// concurrency feature.
//
// ============================================================================

use super::callback::{CompletionStatus, UnitOfWorkCallback};
use super::factory::ContextStack;
use crate::composite::{
    CompositeContext, Entity, EntityLifecycle, EntityTypeDescriptor, EntityTypeRegistry,
    FragmentFactory,
};
use crate::core::{MetaInfo, Result, Usecase, UowError};
use crate::entity::{EntityReference, EntityState, EntityStatus, IdentityGenerator};
use crate::store::{CommitReceipt, EntityStore, StateBatch, StoreCommit};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// Global unit-of-work id counter
static NEXT_UOW_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UowId(u64);

impl UowId {
    fn next() -> Self {
        Self(NEXT_UOW_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for UowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uow_{}", self.0)
    }
}

/// Status of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UowStatus {
    Open,
    Paused,
    Completing,
    Closed,
}

impl UowStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for UowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Completing => write!(f, "COMPLETING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

struct UowInner {
    status: UowStatus,
    identity_map: HashMap<EntityReference, Entity>,
    callbacks: Vec<Arc<dyn UnitOfWorkCallback>>,
}

/// Diagnostic snapshot of a unit of work.
#[derive(Debug)]
pub struct UnitOfWorkInfo {
    pub id: UowId,
    pub status: UowStatus,
    pub usecase: String,
    pub entity_count: usize,
    pub callback_count: usize,
}

/// A session scoped to one logical operation.
///
/// All entity access goes through a unit of work: entities are created and
/// fetched into its identity map, mutated through their handles, and flushed
/// as one atomic batch by [`complete`](Self::complete). Unlike a transaction
/// it holds no storage resource, so there is no timeout and it may stay open
/// arbitrarily long; a failed completion of the concurrency class leaves it
/// open for the caller to reconcile and retry.
///
/// Clones are cheap handles onto the same session.
#[derive(Clone)]
pub struct UnitOfWork {
    id: UowId,
    usecase: Arc<Usecase>,
    meta: MetaInfo,
    store: Arc<dyn EntityStore>,
    registry: Arc<EntityTypeRegistry>,
    identities: Arc<dyn IdentityGenerator>,
    stack: ContextStack,
    closed: Arc<AtomicBool>,
    inner: Arc<Mutex<UowInner>>,
}

impl UnitOfWork {
    pub(crate) fn new(
        usecase: Usecase,
        store: Arc<dyn EntityStore>,
        registry: Arc<EntityTypeRegistry>,
        identities: Arc<dyn IdentityGenerator>,
        stack: ContextStack,
    ) -> Self {
        Self {
            id: UowId::next(),
            usecase: Arc::new(usecase),
            meta: MetaInfo::new(),
            store,
            registry,
            identities,
            stack,
            closed: Arc::new(AtomicBool::new(false)),
            inner: Arc::new(Mutex::new(UowInner {
                status: UowStatus::Open,
                identity_map: HashMap::new(),
                callbacks: Vec::new(),
            })),
        }
    }

    pub fn id(&self) -> UowId {
        self.id
    }

    pub fn usecase(&self) -> &Usecase {
        &self.usecase
    }

    pub fn meta_info(&self) -> &MetaInfo {
        &self.meta
    }

    pub async fn status(&self) -> UowStatus {
        self.inner.lock().await.status
    }

    pub async fn is_open(&self) -> bool {
        self.status().await == UowStatus::Open
    }

    pub async fn is_paused(&self) -> bool {
        self.status().await == UowStatus::Paused
    }

    pub async fn info(&self) -> UnitOfWorkInfo {
        let inner = self.inner.lock().await;
        UnitOfWorkInfo {
            id: self.id,
            status: inner.status,
            usecase: self.usecase.name().to_string(),
            entity_count: inner.identity_map.len(),
            callback_count: inner.callbacks.len(),
        }
    }

    /// Create a new entity of a registered type with a generated identity.
    pub async fn new_entity(&self, type_name: &str) -> Result<Entity> {
        self.new_entity_builder(type_name).await?.new_instance().await
    }

    /// Create a new entity with a caller-supplied identity.
    pub async fn new_entity_with_identity(
        &self,
        type_name: &str,
        identity: impl Into<String>,
    ) -> Result<Entity> {
        self.new_entity_builder_with_identity(type_name, identity)
            .await?
            .new_instance()
            .await
    }

    /// Start staged creation of a new entity: the builder's composite can be
    /// primed with properties before it joins the identity map.
    pub async fn new_entity_builder(&self, type_name: &str) -> Result<EntityBuilder> {
        let identity = self.identities.generate(type_name);
        self.new_entity_builder_with_identity(type_name, identity).await
    }

    pub async fn new_entity_builder_with_identity(
        &self,
        type_name: &str,
        identity: impl Into<String>,
    ) -> Result<EntityBuilder> {
        self.ensure_usable("create entity").await?;
        let descriptor = self.registry.resolve(type_name)?;
        let reference = EntityReference::new(type_name, identity);

        let state = self.store.new_entity_state(reference.clone()).await?;
        let entity = self.compose(&descriptor, state)?;
        tracing::trace!(uow = %self.id, entity = %reference, "built entity state");

        Ok(EntityBuilder {
            uow: self.clone(),
            descriptor,
            entity,
        })
    }

    /// Fetch an entity by type and identity, against the identity map first
    /// and the store on a miss.
    ///
    /// # Errors
    /// `NoSuchEntity` when the store has no such reference, or the cached
    /// entry is already removed in this unit of work.
    pub async fn get(&self, type_name: &str, identity: impl Into<String>) -> Result<Entity> {
        let mut inner = self.inner.lock().await;
        self.check_usable(&inner, "get entity")?;
        let descriptor = self.registry.resolve(type_name)?;
        let reference = EntityReference::new(type_name, identity);

        if let Some(cached) = inner.identity_map.get(&reference) {
            if cached.state_cell().lock()?.status().is_removed() {
                return Err(UowError::NoSuchEntity(reference));
            }
            return Ok(cached.clone());
        }

        let state = self
            .store
            .entity_state_of(&reference, &self.usecase)
            .await
            .map_err(|err| match err {
                UowError::EntityNotFound(r) => UowError::NoSuchEntity(r),
                other => other,
            })?;
        let entity = self.compose(&descriptor, state)?;
        inner.identity_map.insert(reference, entity.clone());
        Ok(entity)
    }

    /// Rebind an entity obtained from another unit of work into this one.
    pub async fn get_entity(&self, entity: &Entity) -> Result<Entity> {
        let reference = entity.reference().clone();
        self.get(reference.type_name(), reference.identity()).await
    }

    /// Schedule an entity of this unit of work for removal at completion.
    ///
    /// # Errors
    /// `IllegalState` when the entity is not in this unit of work's identity
    /// map; `Lifecycle` when a removal hook fails (state is left untouched).
    pub async fn remove(&self, entity: &Entity) -> Result<()> {
        let reference = entity.reference().clone();
        let cached = {
            let inner = self.inner.lock().await;
            self.check_usable(&inner, "remove entity")?;
            inner
                .identity_map
                .get(&reference)
                .cloned()
                .ok_or_else(|| {
                    UowError::IllegalState(format!(
                        "Entity '{}' is not managed by {}",
                        reference, self.id
                    ))
                })?
        };

        let descriptor = self.registry.resolve(reference.type_name())?;
        if let Some(hook) = descriptor.lifecycle() {
            hook.remove(&cached)
                .map_err(|err| UowError::Lifecycle(err.to_string()))?;
        }

        let inner = self.inner.lock().await;
        self.check_usable(&inner, "remove entity")?;
        cached.state_cell().lock()?.remove_entity()?;
        tracing::debug!(uow = %self.id, entity = %reference, "entity scheduled for removal");
        Ok(())
    }

    /// Flush all pending changes and close this unit of work.
    ///
    /// On a concurrency conflict the unit of work stays open, the error
    /// carries the conflicting references, and the caller is expected to
    /// reconcile and retry. Any other store failure also leaves it open
    /// unless the store classified the failure unrecoverable, in which case
    /// the unit of work force-closes after a discard notification.
    pub async fn complete(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.check_open(&inner, "complete")?;
        inner.status = UowStatus::Completing;

        if let Err(err) = run_before_callbacks(&inner.callbacks) {
            inner.status = UowStatus::Open;
            return Err(err);
        }

        let batch = self.compute_batch(&inner)?;
        if !batch.is_empty() {
            tracing::debug!(
                uow = %self.id,
                usecase = %self.usecase.name(),
                new = batch.new.len(),
                updated = batch.updated.len(),
                removed = batch.removed.len(),
                "completing"
            );
            if let Err(err) = self.flush(batch).await {
                return self.fail_completion(&mut inner, err);
            }
        }

        for callback in &inner.callbacks {
            callback.after_completion(CompletionStatus::Completed);
        }
        self.close(&mut inner);
        tracing::debug!(uow = %self.id, "completed");
        Ok(())
    }

    /// Flush all pending changes but keep this unit of work open.
    ///
    /// After a successful apply every tracked entity continues life as
    /// LOADED under the version token the store just assigned; the refresh
    /// happens before `after_completion` fires, so callbacks observe the
    /// post-apply state. A later `complete` only flushes changes made after
    /// this call.
    pub async fn apply(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.check_open(&inner, "apply")?;
        inner.status = UowStatus::Completing;

        if let Err(err) = run_before_callbacks(&inner.callbacks) {
            inner.status = UowStatus::Open;
            return Err(err);
        }

        let batch = self.compute_batch(&inner)?;
        let receipt = if batch.is_empty() {
            CommitReceipt::default()
        } else {
            tracing::debug!(
                uow = %self.id,
                new = batch.new.len(),
                updated = batch.updated.len(),
                removed = batch.removed.len(),
                "applying"
            );
            match self.flush(batch).await {
                Ok(receipt) => receipt,
                Err(err) => return self.fail_completion(&mut inner, err),
            }
        };

        self.rebind_identity_map(&mut inner, &receipt)?;
        inner.status = UowStatus::Open;
        for callback in &inner.callbacks {
            callback.after_completion(CompletionStatus::Completed);
        }
        tracing::debug!(uow = %self.id, "applied");
        Ok(())
    }

    /// Abandon all pending changes and close. Never touches the store.
    pub async fn discard(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.status.is_terminal() || inner.status == UowStatus::Completing {
            return Err(UowError::IllegalState(format!(
                "Cannot discard {}: it is {}",
                self.id, inner.status
            )));
        }

        for callback in &inner.callbacks {
            callback.after_completion(CompletionStatus::Discarded);
        }
        self.close(&mut inner);
        tracing::debug!(uow = %self.id, "discarded");
        Ok(())
    }

    /// Step off the ambient context stack while staying fully usable by
    /// direct reference.
    pub async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.check_open(&inner, "pause")?;
        self.stack.remove(self.id);
        inner.status = UowStatus::Paused;
        tracing::trace!(uow = %self.id, "paused");
        Ok(())
    }

    /// Push back onto the ambient context stack as the current unit of work.
    pub async fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.status != UowStatus::Paused {
            return Err(UowError::IllegalState(format!(
                "Cannot resume {}: it is {}",
                self.id, inner.status
            )));
        }
        self.stack.push(self.clone());
        inner.status = UowStatus::Open;
        tracing::trace!(uow = %self.id, "resumed");
        Ok(())
    }

    /// Register a completion callback. Re-adding the same callback is a
    /// no-op; invocation order is registration order.
    pub async fn add_callback(&self, callback: Arc<dyn UnitOfWorkCallback>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.check_usable(&inner, "add callback")?;
        if !inner
            .callbacks
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &callback))
        {
            inner.callbacks.push(callback);
        }
        Ok(())
    }

    pub async fn remove_callback(&self, callback: &Arc<dyn UnitOfWorkCallback>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.check_usable(&inner, "remove callback")?;
        inner
            .callbacks
            .retain(|existing| !Arc::ptr_eq(existing, callback));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn compose(&self, descriptor: &EntityTypeDescriptor, state: EntityState) -> Result<Entity> {
        let reference = state.reference().clone();
        let cell = Arc::new(StdMutex::new(state));
        let context = CompositeContext::new(reference, cell, Arc::clone(&self.closed));
        descriptor.fragment_factory().new_fragment(descriptor, context)
    }

    async fn ensure_usable(&self, operation: &str) -> Result<()> {
        let inner = self.inner.lock().await;
        self.check_usable(&inner, operation)
    }

    fn check_usable(&self, inner: &UowInner, operation: &str) -> Result<()> {
        if inner.status.is_terminal() {
            return Err(UowError::IllegalState(format!(
                "Cannot {} on {}: it is {}",
                operation, self.id, inner.status
            )));
        }
        Ok(())
    }

    fn check_open(&self, inner: &UowInner, operation: &str) -> Result<()> {
        if !inner.status.is_open() {
            return Err(UowError::IllegalState(format!(
                "Cannot {} {}: it is {}",
                operation, self.id, inner.status
            )));
        }
        Ok(())
    }

    /// Compute the three disjoint batches from the identity map. An entity
    /// created and removed within this unit of work never reaches the store.
    fn compute_batch(&self, inner: &UowInner) -> Result<StateBatch> {
        let mut batch = StateBatch {
            usecase: self.usecase.name().to_string(),
            ..Default::default()
        };
        for (reference, entity) in &inner.identity_map {
            let state = entity.state_cell();
            let state = state.lock()?;
            match state.status() {
                EntityStatus::New => batch.new.push(state.clone()),
                EntityStatus::Updated => batch.updated.push(state.clone()),
                EntityStatus::Removed => {
                    if state.version().is_some() {
                        batch.removed.push(reference.clone());
                    }
                }
                EntityStatus::Loaded => {}
            }
        }
        Ok(batch)
    }

    async fn flush(&self, batch: StateBatch) -> Result<CommitReceipt> {
        let pending = self.store.prepare(batch).await?;
        pending.commit().await
    }

    /// Map a completion failure onto the state machine: concurrency conflicts
    /// and recoverable store failures reopen; unrecoverable ones force-close
    /// after a discard notification.
    fn fail_completion(&self, inner: &mut UowInner, err: UowError) -> Result<()> {
        match err {
            UowError::ConcurrentModification(refs) => {
                inner.status = UowStatus::Open;
                tracing::warn!(uow = %self.id, conflicts = refs.len(), "concurrent modification");
                Err(UowError::ConcurrentModification(refs))
            }
            UowError::Completion {
                reason,
                unrecoverable: true,
            } => {
                for callback in &inner.callbacks {
                    callback.after_completion(CompletionStatus::Discarded);
                }
                self.close(inner);
                tracing::error!(uow = %self.id, %reason, "unrecoverable completion failure");
                Err(UowError::Completion {
                    reason,
                    unrecoverable: true,
                })
            }
            other => {
                inner.status = UowStatus::Open;
                Err(UowError::Completion {
                    reason: other.to_string(),
                    unrecoverable: false,
                })
            }
        }
    }

    /// Rebind the identity map after a successful apply: surviving entities
    /// continue as LOADED under their fresh tokens, removed ones evict.
    fn rebind_identity_map(&self, inner: &mut UowInner, receipt: &CommitReceipt) -> Result<()> {
        let mut evicted = Vec::new();
        for (reference, entity) in &inner.identity_map {
            let cell = entity.state_cell();
            let mut state = cell.lock()?;
            match state.status() {
                EntityStatus::Removed => evicted.push(reference.clone()),
                EntityStatus::New | EntityStatus::Updated => {
                    if let Some(version) = receipt.versions.get(reference) {
                        state.rebind(*version);
                    }
                }
                EntityStatus::Loaded => {}
            }
        }
        for reference in evicted {
            inner.identity_map.remove(&reference);
        }
        Ok(())
    }

    fn close(&self, inner: &mut UowInner) {
        self.closed.store(true, Ordering::Release);
        inner.identity_map.clear();
        inner.callbacks.clear();
        inner.status = UowStatus::Closed;
        self.stack.remove(self.id);
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("usecase", &self.usecase.name())
            .finish()
    }
}

fn run_before_callbacks(callbacks: &[Arc<dyn UnitOfWorkCallback>]) -> Result<()> {
    let mut failures = Vec::new();
    for callback in callbacks {
        if let Err(err) = callback.before_completion() {
            failures.push(err.to_string());
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(UowError::Completion {
            reason: format!("vetoed by callbacks: {}", failures.join("; ")),
            unrecoverable: false,
        })
    }
}

/// Staged creation of one entity: prime the composite with properties, then
/// promote it into the identity map with `new_instance`.
pub struct EntityBuilder {
    uow: UnitOfWork,
    descriptor: EntityTypeDescriptor,
    entity: Entity,
}

impl EntityBuilder {
    /// The uncommitted composite. Mutations are legal and will be part of
    /// the NEW state once the instance joins the unit of work.
    pub fn instance(&self) -> &Entity {
        &self.entity
    }

    /// Insert the entity into the unit of work and run its creation hook.
    ///
    /// # Errors
    /// `EntityState` when the identity already exists in this unit of work;
    /// `Lifecycle` when the creation hook fails, in which case the entity is
    /// rolled back out of the identity map.
    pub async fn new_instance(self) -> Result<Entity> {
        let reference = self.entity.reference().clone();
        {
            let mut inner = self.uow.inner.lock().await;
            self.uow.check_usable(&inner, "create entity")?;
            if inner.identity_map.contains_key(&reference) {
                return Err(UowError::EntityState(format!(
                    "Entity '{}' already exists in {}",
                    reference, self.uow.id
                )));
            }
            inner
                .identity_map
                .insert(reference.clone(), self.entity.clone());
        }

        if let Some(hook) = self.descriptor.lifecycle() {
            if let Err(err) = hook.create(&self.entity) {
                let mut inner = self.uow.inner.lock().await;
                inner.identity_map.remove(&reference);
                return Err(UowError::Lifecycle(err.to_string()));
            }
        }

        tracing::debug!(uow = %self.uow.id, entity = %reference, "entity created");
        Ok(self.entity)
    }
}
