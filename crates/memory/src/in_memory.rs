//! In-memory store, useful for tests and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use maistro_core::error::MemoryError;
use maistro_core::memory::{Item, MemoryStore, Namespace};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A store that keeps every namespace in a `HashMap` of insertion-ordered items.
/// Nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    items: Arc<RwLock<HashMap<Namespace, Vec<Item>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items across every namespace.
    pub async fn len(&self) -> usize {
        self.items.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(&self, namespace: &Namespace) -> Result<Vec<Item>, MemoryError> {
        Ok(self
            .items
            .read()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<Item>, MemoryError> {
        Ok(self
            .items
            .read()
            .await
            .get(namespace)
            .and_then(|items| items.iter().find(|item| item.key == key).cloned()))
    }

    async fn put(
        &self,
        namespace: &Namespace,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), MemoryError> {
        let now = Utc::now();
        let mut items = self.items.write().await;
        let bucket = items.entry(namespace.clone()).or_default();

        match bucket.iter_mut().find(|item| item.key == key) {
            Some(existing) => {
                existing.value = value;
                existing.updated_at = now;
            }
            None => bucket.push(Item {
                namespace: namespace.clone(),
                key: key.to_string(),
                value,
                created_at: now,
                updated_at: now,
            }),
        }
        Ok(())
    }
}
