//! Project page persistence façade. Grounded on `_save_page` in the
//! original implementation: a page is found by `(branch_id, path, name)` and
//! updated in place on retry rather than always inserted, and the home-page
//! invariant (exactly one per branch) is enforced by clearing `is_home` on
//! every other page when a new home page is saved.

use async_trait::async_trait;
use webforge_types::ProjectPage;

#[async_trait]
pub trait ProjectPageStore: Send + Sync {
    async fn upsert(&self, page: ProjectPage) -> anyhow::Result<ProjectPage>;
    async fn find(&self, branch_id: &str, path: &str, name: &str) -> anyhow::Result<Option<ProjectPage>>;
    async fn list_by_branch(&self, branch_id: &str) -> anyhow::Result<Vec<ProjectPage>>;
    async fn clear_home(&self, branch_id: &str, except_id: &str) -> anyhow::Result<()>;
    async fn max_sort_order(&self, branch_id: &str) -> anyhow::Result<i64>;
}

#[derive(Clone, Default)]
pub struct InMemoryProjectPageStore {
    rows: std::sync::Arc<tokio::sync::RwLock<Vec<ProjectPage>>>,
}

impl InMemoryProjectPageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectPageStore for InMemoryProjectPageStore {
    async fn upsert(&self, page: ProjectPage) -> anyhow::Result<ProjectPage> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows.iter_mut().find(|p| p.id == page.id) {
            *existing = page.clone();
        } else {
            rows.push(page.clone());
        }
        Ok(page)
    }

    async fn find(&self, branch_id: &str, path: &str, name: &str) -> anyhow::Result<Option<ProjectPage>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|p| p.branch_id == branch_id && p.path == path && p.name == name)
            .cloned())
    }

    async fn list_by_branch(&self, branch_id: &str) -> anyhow::Result<Vec<ProjectPage>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|p| p.branch_id == branch_id).cloned().collect())
    }

    async fn clear_home(&self, branch_id: &str, except_id: &str) -> anyhow::Result<()> {
        let mut rows = self.rows.write().await;
        for page in rows.iter_mut().filter(|p| p.branch_id == branch_id && p.id != except_id) {
            page.is_home = false;
        }
        Ok(())
    }

    async fn max_sort_order(&self, branch_id: &str) -> anyhow::Result<i64> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|p| p.branch_id == branch_id)
            .map(|p| p.sort_order)
            .max()
            .unwrap_or(-1))
    }
}
