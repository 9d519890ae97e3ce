//! In-memory media store for tests and single-node development.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::store::MediaStore;

/// `MediaStore` backed by a process-local map.
#[derive(Default)]
pub struct MemoryMediaStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32> {
        let mut objects = self.objects.write().await;
        let keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            objects.remove(key);
        }
        Ok(keys.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryMediaStore::new();
        store
            .put("p1/v1/frames/000000.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();

        let bytes = store.get("p1/v1/frames/000000.jpg").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let store = MemoryMediaStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_prefix_removes_container() {
        let store = MemoryMediaStore::new();
        store.put("p1/a", vec![0], "bin").await.unwrap();
        store.put("p1/b", vec![0], "bin").await.unwrap();
        store.put("p2/a", vec![0], "bin").await.unwrap();

        let removed = store.delete_prefix("p1/").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.exists("p2/a").await.unwrap());
        assert!(!store.exists("p1/a").await.unwrap());
    }
}
