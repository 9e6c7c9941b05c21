// # Memory State Store
//
// In-memory implementation of StateStore.
//
// Nothing survives the process: the next run treats the site as never
// applied. Useful for tests and for previews against the memory backends.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::state::SiteState;
use crate::traits::StateStore;

/// In-memory state store implementation
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<String, SiteState>>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of resources in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_state(&self, resource_name: &str) -> Result<Option<SiteState>, Error> {
        Ok(self.inner.read().await.get(resource_name).cloned())
    }

    async fn set_state(&self, resource_name: &str, state: &SiteState) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(resource_name.to_string(), state.clone());
        Ok(())
    }

    async fn delete_state(&self, resource_name: &str) -> Result<(), Error> {
        self.inner.write().await.remove(resource_name);
        Ok(())
    }

    async fn list_resources(&self) -> Result<Vec<String>, Error> {
        let mut names: Vec<String> = self.inner.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::site_state;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStateStore::new();
        assert!(store.is_empty().await);

        store
            .set_state("b", &site_state(&[("index.html", "v1")]))
            .await
            .unwrap();
        store.set_state("a", &site_state(&[])).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert_eq!(store.list_resources().await.unwrap(), vec!["a", "b"]);

        store.delete_state("a").await.unwrap();
        assert!(store.get_state("a").await.unwrap().is_none());
        assert!(store.get_state("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_state() {
        let store = MemoryStateStore::new();
        let clone = store.clone();

        clone.set_state("site", &site_state(&[])).await.unwrap();
        assert!(store.get_state("site").await.unwrap().is_some());
    }
}
