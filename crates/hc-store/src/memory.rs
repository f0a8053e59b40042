use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hc_domain::Appliance;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::ApplianceStore;

/// In-memory implementation of [`ApplianceStore`], keyed by `ha_id`.
///
/// All data is lost on process exit; the engine repopulates it from a fresh
/// `GET /api/homeappliances` on startup, so this is the only store this
/// crate needs to ship.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<HashMap<String, Appliance>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApplianceStore for InMemoryStore {
    async fn get(&self, ha_id: &str) -> Result<Option<Appliance>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.get(ha_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Appliance>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.values().cloned().collect())
    }

    async fn upsert(&self, appliance: Appliance) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.insert(appliance.ha_id.clone(), appliance);
        Ok(())
    }

    async fn remove(&self, ha_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.remove(ha_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(ha_id: &str) -> Appliance {
        Appliance::new(ha_id, "Oven", "BSH", "Oven")
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let store = InMemoryStore::new();
        store.upsert(dummy("a1")).await.unwrap();

        let got = store.get("a1").await.unwrap();
        assert!(got.is_some());
        assert_eq!(got.unwrap().ha_id, "a1");
    }

    #[tokio::test]
    async fn list_returns_every_appliance() {
        let store = InMemoryStore::new();
        store.upsert(dummy("a1")).await.unwrap();
        store.upsert(dummy("a2")).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);
    }

    #[tokio::test]
    async fn remove_deletes_the_entry() {
        let store = InMemoryStore::new();
        store.upsert(dummy("gone")).await.unwrap();
        store.remove("gone").await.unwrap();
        assert!(store.get("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_entry() {
        let store = InMemoryStore::new();
        store.upsert(dummy("a1")).await.unwrap();
        let mut updated = dummy("a1");
        updated.connected = false;
        store.upsert(updated).await.unwrap();

        let got = store.get("a1").await.unwrap().unwrap();
        assert!(!got.connected);
    }
}
