use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one persistent entity: its registered type name plus a unique
/// identity string. Equality is by value; this is the key of every identity
/// map and store map in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityReference {
    type_name: String,
    identity: String,
}

impl EntityReference {
    pub fn new(type_name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            identity: identity.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.identity)
    }
}

/// Store-assigned optimistic-concurrency token.
///
/// Tokens are opaque to the unit of work; only the store that issued one may
/// compare it against its current token for the same reference.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VersionToken(u64);

impl VersionToken {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
