// ============================================================================
// Entity Type Registry
// ============================================================================
//
// Maps registered type names to composite implementations. Resolution picks
// the unique descriptor with the highest visibility; a tie at the top is an
// assembly error and resolves to AmbiguousType. The registry is populated at
// assembly time and read-mostly afterwards.
//
// ============================================================================

use super::entity::EntityLifecycle;
use super::fragment::{FragmentFactory, HandleFragmentFactory};
use crate::core::{Result, UowError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Precedence of a registered entity type, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    Module,
    Layer,
    Application,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Module => write!(f, "module"),
            Self::Layer => write!(f, "layer"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// One registered composite implementation for an entity type.
#[derive(Clone)]
pub struct EntityTypeDescriptor {
    type_name: String,
    visibility: Visibility,
    fragment_factory: Arc<dyn FragmentFactory>,
    lifecycle: Option<Arc<dyn EntityLifecycle>>,
}

impl EntityTypeDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            visibility: Visibility::Module,
            fragment_factory: Arc::new(HandleFragmentFactory),
            lifecycle: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_fragment_factory(mut self, factory: Arc<dyn FragmentFactory>) -> Self {
        self.fragment_factory = factory;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn EntityLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn fragment_factory(&self) -> &Arc<dyn FragmentFactory> {
        &self.fragment_factory
    }

    pub fn lifecycle(&self) -> Option<&Arc<dyn EntityLifecycle>> {
        self.lifecycle.as_ref()
    }
}

impl std::fmt::Debug for EntityTypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityTypeDescriptor")
            .field("type_name", &self.type_name)
            .field("visibility", &self.visibility)
            .field("lifecycle", &self.lifecycle.is_some())
            .finish()
    }
}

/// Type → implementation registry, resolved at assembly time.
#[derive(Default)]
pub struct EntityTypeRegistry {
    types: RwLock<HashMap<String, Vec<EntityTypeDescriptor>>>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: EntityTypeDescriptor) {
        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        types
            .entry(descriptor.type_name().to_string())
            .or_default()
            .push(descriptor);
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        types.get(type_name).is_some_and(|v| !v.is_empty())
    }

    /// Resolve the implementation for a type name.
    ///
    /// # Errors
    /// `EntityTypeNotFound` when nothing is registered under the name;
    /// `AmbiguousType` when several candidates tie at the highest visibility.
    pub fn resolve(&self, type_name: &str) -> Result<EntityTypeDescriptor> {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        let candidates = types
            .get(type_name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| UowError::EntityTypeNotFound(type_name.to_string()))?;

        let mut winner: Option<&EntityTypeDescriptor> = None;
        let mut ties = 0;
        for candidate in candidates {
            match winner {
                None => winner = Some(candidate),
                Some(current) if candidate.visibility() > current.visibility() => {
                    winner = Some(candidate);
                    ties = 0;
                }
                Some(current) if candidate.visibility() == current.visibility() => ties += 1,
                Some(_) => {}
            }
        }

        match winner {
            Some(descriptor) if ties == 0 => Ok(descriptor.clone()),
            Some(_) => Err(UowError::AmbiguousType(type_name.to_string(), ties + 1)),
            None => Err(UowError::EntityTypeNotFound(type_name.to_string())),
        }
    }
}

impl std::fmt::Debug for EntityTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types = self.types.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("EntityTypeRegistry")
            .field("types", &types.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unregistered_type_is_not_found() {
        let registry = EntityTypeRegistry::new();
        assert!(matches!(
            registry.resolve("Person"),
            Err(UowError::EntityTypeNotFound(_))
        ));
    }

    #[test]
    fn test_higher_visibility_wins() {
        let registry = EntityTypeRegistry::new();
        registry.register(EntityTypeDescriptor::new("Person"));
        registry.register(
            EntityTypeDescriptor::new("Person").with_visibility(Visibility::Application),
        );

        let descriptor = registry.resolve("Person").unwrap();
        assert_eq!(descriptor.visibility(), Visibility::Application);
    }

    #[test]
    fn test_tie_at_the_top_is_ambiguous() {
        let registry = EntityTypeRegistry::new();
        registry.register(EntityTypeDescriptor::new("Person").with_visibility(Visibility::Layer));
        registry.register(EntityTypeDescriptor::new("Person").with_visibility(Visibility::Layer));

        assert!(matches!(
            registry.resolve("Person"),
            Err(UowError::AmbiguousType(_, 2))
        ));
    }
}
