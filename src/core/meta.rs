use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Typed metadata map carried by a unit of work.
///
/// Callers attach arbitrary data keyed by type; the engine stores it and hands
/// it back, nothing more. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MetaInfo {
    entries: Arc<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl MetaInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&self, value: T) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|entry| entry.downcast::<T>().ok())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&self) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&TypeId::of::<T>()).is_some()
    }
}

impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MetaInfo")
            .field("entries", &entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn test_set_and_get_by_type() {
        let meta = MetaInfo::new();
        meta.set(Marker(7));

        assert_eq!(*meta.get::<Marker>().unwrap(), Marker(7));
        assert!(meta.get::<String>().is_none());
    }

    #[test]
    fn test_clones_share_entries() {
        let meta = MetaInfo::new();
        let other = meta.clone();
        other.set(Marker(1));

        assert!(meta.contains::<Marker>());
        assert!(meta.remove::<Marker>());
        assert!(!other.contains::<Marker>());
    }
}
