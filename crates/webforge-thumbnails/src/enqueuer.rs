//! Implements the multi-page orchestrator's `ThumbnailEnqueuer` so it never
//! depends on this crate directly.

use std::sync::Arc;

use async_trait::async_trait;
use webforge_orchestrator::ThumbnailEnqueuer;

use crate::queue::ThumbnailQueue;

/// Supplies the page content a capture needs; the orchestrator's own page
/// store satisfies this without `webforge-thumbnails` depending on it.
#[async_trait]
pub trait PageContentSource: Send + Sync {
    async fn page_content(&self, project_id: &str, page_id: &str) -> anyhow::Result<PageContent>;
}

pub struct PageContent {
    pub html: String,
    pub background_color: String,
    pub title: String,
}

pub struct QueueThumbnailEnqueuer {
    queue: Arc<ThumbnailQueue>,
    pages: Arc<dyn PageContentSource>,
}

impl QueueThumbnailEnqueuer {
    pub fn new(queue: Arc<ThumbnailQueue>, pages: Arc<dyn PageContentSource>) -> Self {
        Self { queue, pages }
    }
}

#[async_trait]
impl ThumbnailEnqueuer for QueueThumbnailEnqueuer {
    async fn enqueue_thumbnail(&self, project_id: &str, page_id: &str) -> anyhow::Result<()> {
        let content = self.pages.page_content(project_id, page_id).await?;
        self.queue
            .enqueue_thumbnail(project_id, page_id, content.html, content.background_color, content.title)
            .await;
        Ok(())
    }
}
