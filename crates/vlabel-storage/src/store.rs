//! Media store capability trait.

use async_trait::async_trait;

use crate::error::StorageResult;

/// Durable binary storage for raw video, frame images and numeric
/// artifacts, addressed by opaque keys.
///
/// Keys are prefixed per project (`{project_id}/...`), so deleting a
/// project's prefix removes every object it owns.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store bytes under a key, overwriting any existing object.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Fetch the bytes stored under a key.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Whether an object exists under the key.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete a single object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Delete every object whose key starts with `prefix`.
    /// Returns the number of objects removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32>;
}
