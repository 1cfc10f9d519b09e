use crate::core::Result;

/// How a unit of work left its open state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Changes were flushed to the store (`complete` or `apply`).
    Completed,

    /// Pending changes were abandoned without store interaction.
    Discarded,
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Discarded => write!(f, "DISCARDED"),
        }
    }
}

/// Observer of a unit of work's completion protocol.
///
/// `before_completion` runs ahead of any store interaction and may veto the
/// completion by returning an error; every registered callback runs even when
/// an earlier one fails, and the failures are aggregated into a single veto.
/// `after_completion` is a pure notification and cannot fail.
pub trait UnitOfWorkCallback: Send + Sync {
    fn before_completion(&self) -> Result<()> {
        Ok(())
    }

    fn after_completion(&self, status: CompletionStatus) {
        let _ = status;
    }
}
