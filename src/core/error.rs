use crate::entity::EntityReference;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UowError {
    #[error("Entity type '{0}' is not registered")]
    EntityTypeNotFound(String),

    #[error("Ambiguous entity type '{0}': {1} implementations share the highest visibility")]
    AmbiguousType(String, usize),

    #[error("No entity '{0}'")]
    NoSuchEntity(EntityReference),

    #[error("Entity state '{0}' not found in store")]
    EntityNotFound(EntityReference),

    #[error("Concurrently modified: {}", display_references(.0))]
    ConcurrentModification(Vec<EntityReference>),

    #[error("Completion failed: {reason}")]
    Completion { reason: String, unrecoverable: bool },

    #[error("Lifecycle failure: {0}")]
    Lifecycle(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Entity state error: {0}")]
    EntityState(String),

    #[error("Could not instantiate composite: {0}")]
    Instantiation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, UowError>;

impl UowError {
    /// Whether the failed operation may be retried after the caller has
    /// reconciled its entities. Only the concurrency and recoverable
    /// completion classes qualify; everything else aborts the operation.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConcurrentModification(_) => true,
            Self::Completion { unrecoverable, .. } => !unrecoverable,
            _ => false,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for UowError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<std::io::Error> for UowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

fn display_references(refs: &[EntityReference]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
