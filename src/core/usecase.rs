use serde::{Deserialize, Serialize};

/// Immutable descriptor of the intent behind a unit of work.
///
/// A usecase is attached when the unit of work is created and never mutated
/// afterwards. The engine only consumes it: the name shows up in tracing
/// events, and the whole descriptor is handed to the entity store on every
/// load so backends can honor the eager-loading hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usecase {
    name: String,
    read_only: bool,
    eager_state: Vec<String>,
}

impl Usecase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_only: false,
            eager_state: Vec::new(),
        }
    }

    pub fn builder(name: impl Into<String>) -> UsecaseBuilder {
        UsecaseBuilder {
            usecase: Self::new(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hint that this unit of work does not intend to flush changes.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Qualified state names a store may prefetch when loading entities.
    pub fn eager_state(&self) -> &[String] {
        &self.eager_state
    }
}

impl Default for Usecase {
    fn default() -> Self {
        Self::new("default")
    }
}

impl std::fmt::Display for Usecase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub struct UsecaseBuilder {
    usecase: Usecase,
}

impl UsecaseBuilder {
    pub fn read_only(mut self) -> Self {
        self.usecase.read_only = true;
        self
    }

    pub fn eager(mut self, state_name: impl Into<String>) -> Self {
        self.usecase.eager_state.push(state_name.into());
        self
    }

    pub fn build(self) -> Usecase {
        self.usecase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_hints() {
        let usecase = Usecase::builder("reporting")
            .read_only()
            .eager("report.rows")
            .eager("report.title")
            .build();

        assert_eq!(usecase.name(), "reporting");
        assert!(usecase.is_read_only());
        assert_eq!(usecase.eager_state().len(), 2);
    }

    #[test]
    fn test_default_is_writable() {
        let usecase = Usecase::default();
        assert_eq!(usecase.name(), "default");
        assert!(!usecase.is_read_only());
    }
}
