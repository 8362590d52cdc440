//! Blob storage is an external dependency consumed through a trait only;
//! the queue never assumes a specific object store.

use async_trait::async_trait;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads `bytes` under a store-chosen key derived from `project_id`/
    /// `hint`, returning a publicly fetchable URL.
    async fn upload(&self, project_id: &str, hint: &str, bytes: Vec<u8>, content_type: &str) -> anyhow::Result<String>;
}
