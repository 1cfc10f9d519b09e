use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Produces the identity string of a newly created entity.
///
/// Identities are generated exactly once, at creation, and are immutable
/// afterwards. Plugged in at factory assembly.
pub trait IdentityGenerator: Send + Sync {
    fn generate(&self, type_name: &str) -> String;
}

/// Default generator: random UUID v4 strings.
#[derive(Debug, Default)]
pub struct UuidIdentityGenerator;

impl IdentityGenerator for UuidIdentityGenerator {
    fn generate(&self, _type_name: &str) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic generator producing `type-N` identities off an atomic
/// counter. Handy in tests and for embedders that want readable ids.
#[derive(Debug, Default)]
pub struct SequenceIdentityGenerator {
    counter: AtomicU64,
}

impl IdentityGenerator for SequenceIdentityGenerator {
    fn generate(&self, type_name: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", type_name.to_lowercase(), n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_identities_are_unique() {
        let generator = UuidIdentityGenerator;
        assert_ne!(generator.generate("Person"), generator.generate("Person"));
    }

    #[test]
    fn test_sequence_identities_are_readable() {
        let generator = SequenceIdentityGenerator::default();
        assert_eq!(generator.generate("Person"), "person-1");
        assert_eq!(generator.generate("Person"), "person-2");
    }
}
