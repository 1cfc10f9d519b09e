use crate::core::{Result, UowError, Value};
use crate::entity::{EntityReference, EntityState, EntityStatus, VersionToken};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Composite handle over one entity's shared state.
///
/// This is what callers hold and mutate. Clones are cheap and share the same
/// state cell, so two handles obtained from the same unit of work for the
/// same reference are observably the same instance (`same_instance`).
///
/// Every state access checks the owning unit of work first: once that unit of
/// work closes, outstanding handles are detached and fail with
/// `IllegalState`.
#[derive(Clone)]
pub struct Entity {
    reference: EntityReference,
    state: Arc<Mutex<EntityState>>,
    closed: Arc<AtomicBool>,
}

impl Entity {
    pub(crate) fn new(
        reference: EntityReference,
        state: Arc<Mutex<EntityState>>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reference,
            state,
            closed,
        }
    }

    /// Identity is immutable and stays readable after the unit of work
    /// closes; it is all that is needed to rebind into another one.
    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    pub fn type_name(&self) -> &str {
        self.reference.type_name()
    }

    pub fn identity(&self) -> &str {
        self.reference.identity()
    }

    /// True iff both handles share one underlying state cell.
    pub fn same_instance(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.state, &b.state)
    }

    pub fn status(&self) -> Result<EntityStatus> {
        self.check_attached()?;
        Ok(self.state.lock()?.status())
    }

    pub fn version(&self) -> Result<Option<VersionToken>> {
        self.check_attached()?;
        Ok(self.state.lock()?.version())
    }

    pub fn is_removed(&self) -> Result<bool> {
        Ok(self.status()?.is_removed())
    }

    pub fn property(&self, name: &str) -> Result<Option<Value>> {
        self.check_attached()?;
        Ok(self.state.lock()?.property(name).cloned())
    }

    pub fn set_property(&self, name: impl Into<String>, value: Value) -> Result<()> {
        self.check_attached()?;
        self.state.lock()?.set_property(name, value)
    }

    pub fn association(&self, name: &str) -> Result<Option<EntityReference>> {
        self.check_attached()?;
        Ok(self.state.lock()?.association(name).cloned())
    }

    pub fn set_association(
        &self,
        name: impl Into<String>,
        target: Option<EntityReference>,
    ) -> Result<()> {
        self.check_attached()?;
        self.state.lock()?.set_association(name, target)
    }

    pub fn add_association(&self, name: impl Into<String>, target: EntityReference) -> Result<()> {
        self.check_attached()?;
        self.state.lock()?.add_association(name, target)
    }

    pub fn remove_association(&self, name: &str, target: &EntityReference) -> Result<()> {
        self.check_attached()?;
        self.state.lock()?.remove_association(name, target)
    }

    pub fn many_association(&self, name: &str) -> Result<Vec<EntityReference>> {
        self.check_attached()?;
        Ok(self.state.lock()?.many_association(name).to_vec())
    }

    pub(crate) fn state_cell(&self) -> Arc<Mutex<EntityState>> {
        Arc::clone(&self.state)
    }

    fn check_attached(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(UowError::IllegalState(format!(
                "Entity '{}' is detached: its unit of work has closed",
                self.reference
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("reference", &self.reference)
            .field("detached", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

/// Hooks invoked around entity creation and removal.
///
/// A failing `create` rolls the entity back out of the identity map; a
/// failing `remove` leaves the state untouched. Both surface to the caller
/// wrapped in `UowError::Lifecycle`.
pub trait EntityLifecycle: Send + Sync {
    fn create(&self, entity: &Entity) -> Result<()> {
        let _ = entity;
        Ok(())
    }

    fn remove(&self, entity: &Entity) -> Result<()> {
        let _ = entity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(closed: Arc<AtomicBool>) -> Entity {
        let reference = EntityReference::new("Person", "p-1");
        let state = Arc::new(Mutex::new(EntityState::new(reference.clone())));
        Entity::new(reference, state, closed)
    }

    #[test]
    fn test_clones_share_state() {
        let handle = entity(Arc::new(AtomicBool::new(false)));
        let twin = handle.clone();
        handle.set_property("name", "Alice".into()).unwrap();

        assert!(Entity::same_instance(&handle, &twin));
        assert_eq!(twin.property("name").unwrap(), Some("Alice".into()));
    }

    #[test]
    fn test_detached_handle_fails() {
        let closed = Arc::new(AtomicBool::new(false));
        let handle = entity(Arc::clone(&closed));
        handle.set_property("name", "Alice".into()).unwrap();

        closed.store(true, Ordering::Release);

        assert!(matches!(
            handle.property("name"),
            Err(UowError::IllegalState(_))
        ));
        assert!(handle.set_property("name", "Bob".into()).is_err());
        // Identity stays readable.
        assert_eq!(handle.identity(), "p-1");
    }
}
