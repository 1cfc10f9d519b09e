use super::entity::Entity;
use super::registry::EntityTypeDescriptor;
use crate::core::Result;
use crate::entity::{EntityReference, EntityState};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

/// Everything needed to materialize a composite handle for one entity state:
/// the reference, the shared state cell, and the owning unit of work's
/// closed flag.
pub struct CompositeContext {
    reference: EntityReference,
    state: Arc<Mutex<EntityState>>,
    closed: Arc<AtomicBool>,
}

impl CompositeContext {
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

    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    /// Materialize the plain composite handle over this context.
    pub fn into_entity(self) -> Entity {
        Entity::new(self.reference, self.state, self.closed)
    }
}

/// Instantiates composite wrappers on demand.
///
/// The unit of work never builds composites directly; it resolves the
/// descriptor for the requested type and delegates here. Failures surface as
/// `UowError::Instantiation`.
pub trait FragmentFactory: Send + Sync {
    fn new_fragment(
        &self,
        descriptor: &EntityTypeDescriptor,
        context: CompositeContext,
    ) -> Result<Entity>;
}

/// Default factory: the composite is the plain entity handle itself.
#[derive(Debug, Default)]
pub struct HandleFragmentFactory;

impl FragmentFactory for HandleFragmentFactory {
    fn new_fragment(
        &self,
        _descriptor: &EntityTypeDescriptor,
        context: CompositeContext,
    ) -> Result<Entity> {
        Ok(context.into_entity())
    }
}
