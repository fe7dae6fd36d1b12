use std::sync::Arc;

use tokio::sync::RwLock;

use crate::dao::kv_store::KvStore;

/// Shared, swappable reference to the durable store.
///
/// Empty while the storage supervisor has not connected yet; readers then run on
/// in-memory defaults.
#[derive(Clone, Default)]
pub struct StoreSlot {
    inner: Arc<RwLock<Option<Arc<dyn KvStore>>>>,
}

impl StoreSlot {
    /// Slot without a store.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Slot holding `store`.
    pub fn with_store(store: Arc<dyn KvStore>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(store))),
        }
    }

    /// Current store, if one is installed.
    pub async fn current(&self) -> Option<Arc<dyn KvStore>> {
        self.inner.read().await.as_ref().cloned()
    }

    /// Install or replace the store.
    pub async fn install(&self, store: Arc<dyn KvStore>) {
        *self.inner.write().await = Some(store);
    }

    /// Drop the store.
    pub async fn clear(&self) {
        self.inner.write().await.take();
    }
}
