//! Tag-keyed coordinator registry.
//!
//! One coordinator per consumer tag, owned by whichever process boundary
//! composes the application. The core takes no global state; it is
//! instantiated per registry entry.

use crate::coordinator::{SyncCoordinator, SyncDeps};
use crate::config::SyncConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds the coordinator for a tag on first use.
pub type CoordinatorFactory = dyn Fn(&str) -> (SyncConfig, SyncDeps) + Send + Sync;

/// Owns one [`SyncCoordinator`] per consumer tag.
pub struct SyncRegistry {
    factory: Box<CoordinatorFactory>,
    entries: Mutex<HashMap<String, Arc<SyncCoordinator>>>,
}

impl SyncRegistry {
    /// Creates a registry. The factory supplies configuration and
    /// collaborators for each new tag.
    pub fn new(factory: impl Fn(&str) -> (SyncConfig, SyncDeps) + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the coordinator for the tag, creating it on first use.
    pub fn get_or_create(&self, tag: &str) -> Arc<SyncCoordinator> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(tag) {
            return Arc::clone(existing);
        }
        let (config, deps) = (self.factory)(tag);
        let coordinator = Arc::new(SyncCoordinator::new(config, deps));
        entries.insert(tag.to_string(), Arc::clone(&coordinator));
        coordinator
    }

    /// Shuts down and removes the coordinator for the tag, if any.
    pub fn remove(&self, tag: &str) {
        if let Some(coordinator) = self.entries.lock().remove(tag) {
            coordinator.shutdown();
        }
    }

    /// Tags with a live coordinator.
    pub fn tags(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::channel::ScriptedTransport;
    use crate::collaborators::StaticAuth;
    use crate::remote::MockRemoteLoader;

    fn test_registry() -> SyncRegistry {
        SyncRegistry::new(|tag| {
            let deps = SyncDeps::new(
                Arc::new(MockRemoteLoader::new()),
                Arc::new(MemoryCacheStore::new()),
                Arc::new(ScriptedTransport::new()),
                Arc::new(StaticAuth::new("token-0")),
            );
            (SyncConfig::new(tag), deps)
        })
    }

    #[tokio::test]
    async fn one_coordinator_per_tag() {
        let registry = test_registry();

        let a1 = registry.get_or_create("a");
        let a2 = registry.get_or_create("a");
        let b = registry.get_or_create("b");

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));

        let mut tags = registry.tags();
        tags.sort();
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn remove_shuts_down_and_forgets() {
        let registry = test_registry();
        let a = registry.get_or_create("a");

        registry.remove("a");
        registry.remove("a");
        assert!(registry.tags().is_empty());

        // A fresh coordinator is built on the next request.
        let a2 = registry.get_or_create("a");
        assert!(!Arc::ptr_eq(&a, &a2));
    }
}
