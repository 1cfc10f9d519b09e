// ============================================================================
// Unit-of-Work Factory & Context Stack
// ============================================================================
//
// The factory is the assembly point: store, type registry, and identity
// generator come together here. Each factory owns one context stack - the
// ambient "current unit of work" of a single execution context. Concurrent
// contexts get their own stack via fork(), which shares the assembly but
// starts with a clean ambient state.
//
// ============================================================================

use super::unit::{UnitOfWork, UowId};
use crate::composite::EntityTypeRegistry;
use crate::core::{Result, Usecase, UowError};
use crate::entity::{IdentityGenerator, UuidIdentityGenerator};
use crate::store::EntityStore;
use std::sync::{Arc, Mutex};

/// Ambient stack of active units of work for one execution context.
///
/// Explicit push/pop discipline: creating a unit of work pushes it, pausing
/// or closing it pops it, resuming pushes it back. Clones share the stack.
#[derive(Clone, Default)]
pub struct ContextStack {
    stack: Arc<Mutex<Vec<UnitOfWork>>>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, uow: UnitOfWork) {
        let mut stack = self.stack.lock().unwrap_or_else(|e| e.into_inner());
        stack.push(uow);
    }

    /// Drop a unit of work off the stack wherever it sits. No-op when it is
    /// not on the stack (e.g. closing one that was paused).
    pub(crate) fn remove(&self, id: UowId) {
        let mut stack = self.stack.lock().unwrap_or_else(|e| e.into_inner());
        stack.retain(|uow| uow.id() != id);
    }

    pub fn current(&self) -> Option<UnitOfWork> {
        let stack = self.stack.lock().unwrap_or_else(|e| e.into_inner());
        stack.last().cloned()
    }

    pub fn depth(&self) -> usize {
        let stack = self.stack.lock().unwrap_or_else(|e| e.into_inner());
        stack.len()
    }
}

impl std::fmt::Debug for ContextStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStack")
            .field("depth", &self.depth())
            .finish()
    }
}

/// Creates units of work and tracks the current one per execution context.
///
/// Clones share the same assembly and the same context stack; use
/// [`fork`](Self::fork) to hand a sibling context its own stack.
#[derive(Clone)]
pub struct UnitOfWorkFactory {
    store: Arc<dyn EntityStore>,
    registry: Arc<EntityTypeRegistry>,
    identities: Arc<dyn IdentityGenerator>,
    stack: ContextStack,
}

impl UnitOfWorkFactory {
    pub fn new(store: Arc<dyn EntityStore>, registry: Arc<EntityTypeRegistry>) -> Self {
        Self {
            store,
            registry,
            identities: Arc::new(UuidIdentityGenerator),
            stack: ContextStack::new(),
        }
    }

    pub fn builder(store: Arc<dyn EntityStore>) -> UnitOfWorkFactoryBuilder {
        UnitOfWorkFactoryBuilder {
            store,
            registry: None,
            identities: None,
        }
    }

    /// Create a unit of work for the default usecase and push it as current.
    pub fn new_unit_of_work(&self) -> UnitOfWork {
        self.new_unit_of_work_for(Usecase::default())
    }

    /// Create a unit of work for a usecase and push it as current.
    pub fn new_unit_of_work_for(&self, usecase: Usecase) -> UnitOfWork {
        let uow = UnitOfWork::new(
            usecase,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.identities),
            self.stack.clone(),
        );
        tracing::debug!(uow = %uow.id(), usecase = %uow.usecase().name(), "new unit of work");
        self.stack.push(uow.clone());
        uow
    }

    /// The current (topmost) unit of work of this execution context.
    ///
    /// # Errors
    /// `IllegalState` when no unit of work is active.
    pub fn current_unit_of_work(&self) -> Result<UnitOfWork> {
        self.stack.current().ok_or_else(|| {
            UowError::IllegalState("No current unit of work in this context".to_string())
        })
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Same assembly, fresh ambient stack: hands a sibling execution context
    /// its own current-unit-of-work state.
    pub fn fork(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            identities: Arc::clone(&self.identities),
            stack: ContextStack::new(),
        }
    }

    pub fn registry(&self) -> &Arc<EntityTypeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }
}

impl std::fmt::Debug for UnitOfWorkFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkFactory")
            .field("stack", &self.stack)
            .finish()
    }
}

pub struct UnitOfWorkFactoryBuilder {
    store: Arc<dyn EntityStore>,
    registry: Option<Arc<EntityTypeRegistry>>,
    identities: Option<Arc<dyn IdentityGenerator>>,
}

impl UnitOfWorkFactoryBuilder {
    pub fn registry(mut self, registry: Arc<EntityTypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn identity_generator(mut self, identities: Arc<dyn IdentityGenerator>) -> Self {
        self.identities = Some(identities);
        self
    }

    pub fn build(self) -> UnitOfWorkFactory {
        UnitOfWorkFactory {
            store: self.store,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(EntityTypeRegistry::new())),
            identities: self
                .identities
                .unwrap_or_else(|| Arc::new(UuidIdentityGenerator)),
            stack: ContextStack::new(),
        }
    }
}
