//! Implements the tool layer's `SnapshotBackend` on top of a [`VersionStore`]
//! and [`PageWriter`], so the "snapshot" tool the Implementer/Reviewer agents
//! call can checkpoint and restore project pages without the tool crate
//! knowing anything about version history.

use std::sync::Arc;

use async_trait::async_trait;
use webforge_tools::SnapshotBackend;
use webforge_types::ValidationStatus;

use crate::store::{PageWriter, VersionStore};

pub struct VersionSnapshotBackend {
    store: Arc<VersionStore>,
    writer: Arc<dyn PageWriter>,
    branch_id: String,
}

impl VersionSnapshotBackend {
    pub fn new(store: Arc<VersionStore>, writer: Arc<dyn PageWriter>, branch_id: impl Into<String>) -> Self {
        Self { store, writer, branch_id: branch_id.into() }
    }
}

#[async_trait]
impl SnapshotBackend for VersionSnapshotBackend {
    async fn create(&self, project_id: &str, reason: &str) -> anyhow::Result<String> {
        let pages = self.writer_read_current().await?;
        let version = self
            .store
            .create_version(
                project_id,
                &self.branch_id,
                None,
                pages,
                ValidationStatus::Passed,
                vec![reason.to_string()],
            )
            .await?;
        Ok(version.id)
    }

    async fn restore(&self, snapshot_id: &str, _project_id: &str) -> anyhow::Result<bool> {
        match self.store.rollback_pages(snapshot_id, &self.writer).await {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

impl VersionSnapshotBackend {
    async fn writer_read_current(&self) -> anyhow::Result<Vec<webforge_types::ProjectPage>> {
        // The current live pages are whatever the most recent version on
        // this branch holds; a fresh branch has nothing to snapshot yet.
        let head = self.store.list(&self.branch_id).await.into_iter().next();
        match head {
            Some(v) => Ok(self.store.get_snapshot(&v.id).await?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use webforge_types::ProjectPage;

    struct RecordingWriter {
        last: StdMutex<Option<Vec<ProjectPage>>>,
    }

    #[async_trait]
    impl PageWriter for RecordingWriter {
        async fn write_pages(&self, _branch_id: &str, pages: Vec<ProjectPage>) -> anyhow::Result<()> {
            *self.last.lock().unwrap() = Some(pages);
            Ok(())
        }

        async fn read_pages(&self, _branch_id: &str) -> anyhow::Result<Vec<ProjectPage>> {
            Ok(self.last.lock().unwrap().clone().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn create_then_restore_round_trips_via_tool_trait() {
        let store = Arc::new(VersionStore::new());
        let writer: Arc<dyn PageWriter> = Arc::new(RecordingWriter { last: StdMutex::new(None) });
        let backend = VersionSnapshotBackend::new(store.clone(), writer, "main");

        let page = ProjectPage {
            id: "home".to_string(),
            project_id: "proj".to_string(),
            branch_id: "main".to_string(),
            name: "Home".to_string(),
            slug: None,
            path: "/".to_string(),
            is_home: true,
            sort_order: 0,
            html: "<html>hi</html>".to_string(),
            js: None,
            design_system: serde_json::Value::Null,
            thumbnail_url: None,
            updated_at: chrono::Utc::now(),
        };
        store
            .create_version("proj", "main", None, vec![page], ValidationStatus::Passed, Vec::new())
            .await
            .unwrap();

        let snapshot_id = backend.create("proj", "checkpoint").await.unwrap();
        let restored = backend.restore(&snapshot_id, "proj").await.unwrap();
        assert!(restored);
    }

    #[tokio::test]
    async fn restore_of_unknown_snapshot_returns_false() {
        let store = Arc::new(VersionStore::new());
        let writer: Arc<dyn PageWriter> = Arc::new(RecordingWriter { last: StdMutex::new(None) });
        let backend = VersionSnapshotBackend::new(store, writer, "main");
        let restored = backend.restore("does-not-exist", "proj").await.unwrap();
        assert!(!restored);
    }
}
