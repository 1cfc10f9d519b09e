// ============================================================================
// Entity State
// ============================================================================
//
// In-memory record of one entity's persistent data as tracked within a single
// unit of work. Status transitions are monotonic for the lifetime of the
// owning unit of work:
//
// ```text
// NEW ────────────────┐
//                     ├──remove──> REMOVED (terminal)
// LOADED ──mutate──> UPDATED ──┘
// ```
//
// A REMOVED state stays readable until commit (cascade-style checks need the
// associations), but every further mutation fails.
//
// ============================================================================

use super::{EntityReference, VersionToken};
use crate::core::{Result, UowError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of an entity state within its owning unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityStatus {
    /// Created in this unit of work; the store has never seen it.
    New,

    /// Loaded from the store and not modified since.
    Loaded,

    /// Loaded from the store and modified in this unit of work.
    Updated,

    /// Scheduled for removal at commit. Terminal.
    Removed,
}

impl EntityStatus {
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }

    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Loaded => write!(f, "LOADED"),
            Self::Updated => write!(f, "UPDATED"),
            Self::Removed => write!(f, "REMOVED"),
        }
    }
}

/// Mutable persistent state of one entity.
///
/// Exclusively owned by one unit of work's identity map; never shared across
/// units of work. Equality is by reference, which is what the identity map
/// relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    reference: EntityReference,
    status: EntityStatus,
    version: Option<VersionToken>,
    properties: HashMap<String, Value>,
    associations: HashMap<String, Option<EntityReference>>,
    many_associations: HashMap<String, Vec<EntityReference>>,
}

impl EntityState {
    /// A fresh NEW state. Only entity stores create these.
    pub fn new(reference: EntityReference) -> Self {
        Self {
            reference,
            status: EntityStatus::New,
            version: None,
            properties: HashMap::new(),
            associations: HashMap::new(),
            many_associations: HashMap::new(),
        }
    }

    /// A LOADED state carrying the store's current version token.
    pub fn loaded(
        reference: EntityReference,
        version: VersionToken,
        properties: HashMap<String, Value>,
        associations: HashMap<String, Option<EntityReference>>,
        many_associations: HashMap<String, Vec<EntityReference>>,
    ) -> Self {
        Self {
            reference,
            status: EntityStatus::Loaded,
            version: Some(version),
            properties,
            associations,
            many_associations,
        }
    }

    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    pub fn status(&self) -> EntityStatus {
        self.status
    }

    /// `None` for a state the store has never seen.
    pub fn version(&self) -> Option<VersionToken> {
        self.version
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    pub fn association(&self, name: &str) -> Option<&EntityReference> {
        self.associations.get(name).and_then(Option::as_ref)
    }

    pub fn associations(&self) -> &HashMap<String, Option<EntityReference>> {
        &self.associations
    }

    pub fn many_association(&self, name: &str) -> &[EntityReference] {
        self.many_associations
            .get(name)
            .map_or(&[], Vec::as_slice)
    }

    pub fn many_associations(&self) -> &HashMap<String, Vec<EntityReference>> {
        &self.many_associations
    }

    /// Record a property value.
    ///
    /// # Errors
    /// Fails if this state is REMOVED.
    pub fn set_property(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        self.check_mutable("set property")?;
        self.properties.insert(name.into(), value);
        self.mark_updated();
        Ok(())
    }

    /// Point a single-valued association at a target, or clear it with `None`.
    ///
    /// # Errors
    /// Fails if this state is REMOVED.
    pub fn set_association(
        &mut self,
        name: impl Into<String>,
        target: Option<EntityReference>,
    ) -> Result<()> {
        self.check_mutable("set association")?;
        self.associations.insert(name.into(), target);
        self.mark_updated();
        Ok(())
    }

    /// Add a target to a many-valued association. Idempotent per target.
    ///
    /// # Errors
    /// Fails if this state is REMOVED.
    pub fn add_association(
        &mut self,
        name: impl Into<String>,
        target: EntityReference,
    ) -> Result<()> {
        self.check_mutable("add association")?;
        let targets = self.many_associations.entry(name.into()).or_default();
        if !targets.contains(&target) {
            targets.push(target);
            self.mark_updated();
        }
        Ok(())
    }

    /// Remove a target from a many-valued association.
    ///
    /// # Errors
    /// Fails if this state is REMOVED.
    pub fn remove_association(&mut self, name: &str, target: &EntityReference) -> Result<()> {
        self.check_mutable("remove association")?;
        if let Some(targets) = self.many_associations.get_mut(name) {
            if let Some(position) = targets.iter().position(|t| t == target) {
                targets.remove(position);
                self.mark_updated();
            }
        }
        Ok(())
    }

    /// Transition to REMOVED.
    ///
    /// # Errors
    /// Fails on the second call: REMOVED is terminal.
    pub fn remove_entity(&mut self) -> Result<()> {
        if self.status.is_removed() {
            return Err(UowError::EntityState(format!(
                "Cannot remove '{}': already {}",
                self.reference, self.status
            )));
        }
        self.status = EntityStatus::Removed;
        Ok(())
    }

    /// Rebind after a successful apply: the store has accepted this state, so
    /// it continues life as LOADED under the freshly assigned token.
    pub(crate) fn rebind(&mut self, version: VersionToken) {
        self.status = EntityStatus::Loaded;
        self.version = Some(version);
    }

    fn mark_updated(&mut self) {
        if self.status == EntityStatus::Loaded {
            self.status = EntityStatus::Updated;
        }
    }

    fn check_mutable(&self, operation: &str) -> Result<()> {
        if self.status.is_removed() {
            return Err(UowError::EntityState(format!(
                "Cannot {} on '{}': entity is {}",
                operation, self.reference, self.status
            )));
        }
        Ok(())
    }
}

impl PartialEq for EntityState {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Eq for EntityState {}
