//! Version history over a project's pages: every successful build (or
//! explicit restore) becomes a `Version`. Only the most recent
//! [`FULL_SNAPSHOT_WINDOW`] non-failed versions per branch, plus any pinned
//! version, keep an inline [`VersionSnapshot`]; everything older is
//! compacted into a [`VersionDiff`] against the nearest newer anchor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::Level;
use uuid::Uuid;
use webforge_observability::{emit_event, Component, ObservabilityEvent};
use webforge_types::{ChangeSummary, ProjectPage, ValidationStatus, Version, VersionDiff, VersionSnapshot};

use crate::diffing::{apply_unified_diff, compute_change_summary, unified_diff_text};

pub const FULL_SNAPSHOT_WINDOW: usize = 3;
pub const MAX_PINNED_VERSIONS: usize = 3;
pub const MAX_BRANCHES: usize = 3;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("version not found: {0}")]
    NotFound(String),
    #[error("branch not found: {0}")]
    BranchNotFound(String),
    #[error("branch {0} already has {MAX_PINNED_VERSIONS} pinned versions")]
    PinLimitExceeded(String),
    #[error("project {0} already has {MAX_BRANCHES} branches")]
    BranchLimitExceeded(String),
    #[error("snapshot data corrupt for version {0}: {1}")]
    CorruptSnapshot(String, serde_json::Error),
}

/// Lets `webforge-version` write reconstructed pages back into live project
/// storage without depending on `webforge-orchestrator`'s page store.
#[async_trait]
pub trait PageWriter: Send + Sync {
    async fn write_pages(&self, branch_id: &str, pages: Vec<ProjectPage>) -> anyhow::Result<()>;
    async fn read_pages(&self, branch_id: &str) -> anyhow::Result<Vec<ProjectPage>>;
}

#[derive(Default)]
struct Branch {
    id: String,
    project_id: String,
    name: String,
    label: Option<String>,
    created_at: chrono::DateTime<Utc>,
}

impl From<Branch> for webforge_types::Branch {
    fn from(b: Branch) -> Self {
        webforge_types::Branch {
            id: b.id,
            project_id: b.project_id,
            name: b.name,
            label: b.label,
            created_at: b.created_at,
        }
    }
}

pub struct VersionStore {
    versions: RwLock<HashMap<String, Version>>,
    snapshots: RwLock<HashMap<String, VersionSnapshot>>,
    diffs: RwLock<HashMap<String, VersionDiff>>,
    branches: RwLock<HashMap<String, webforge_types::Branch>>,
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionStore {
    pub fn new() -> Self {
        Self {
            versions: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            diffs: RwLock::new(HashMap::new()),
            branches: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_branch(
        &self,
        project_id: &str,
        name: &str,
        label: Option<String>,
    ) -> Result<webforge_types::Branch, VersionError> {
        let mut branches = self.branches.write().await;
        let existing = branches.values().filter(|b| b.project_id == project_id).count();
        if existing >= MAX_BRANCHES {
            return Err(VersionError::BranchLimitExceeded(project_id.to_string()));
        }
        let branch = webforge_types::Branch {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            label,
            created_at: Utc::now(),
        };
        branches.insert(branch.id.clone(), branch.clone());
        Ok(branch)
    }

    pub async fn list_branches(&self, project_id: &str) -> Vec<webforge_types::Branch> {
        let branches = self.branches.read().await;
        let mut list: Vec<_> = branches
            .values()
            .filter(|b| b.project_id == project_id)
            .cloned()
            .collect();
        list.sort_by_key(|b| b.created_at);
        list
    }

    pub async fn get(&self, version_id: &str) -> Result<Version, VersionError> {
        self.versions
            .read()
            .await
            .get(version_id)
            .cloned()
            .ok_or_else(|| VersionError::NotFound(version_id.to_string()))
    }

    pub async fn list(&self, branch_id: &str) -> Vec<Version> {
        let versions = self.versions.read().await;
        let mut list: Vec<_> = versions
            .values()
            .filter(|v| v.branch_id == branch_id)
            .cloned()
            .collect();
        list.sort_by_key(|v| std::cmp::Reverse(v.created_at));
        list
    }

    /// Records a new version at the head of `branch_id`. The new version
    /// always gets an inline snapshot; older versions are then compacted
    /// by [`Self::enforce_snapshot_window`].
    pub async fn create_version(
        &self,
        project_id: &str,
        branch_id: &str,
        branch_label: Option<String>,
        pages: Vec<ProjectPage>,
        validation_status: ValidationStatus,
        tasks_completed: Vec<String>,
    ) -> Result<Version, VersionError> {
        let head = self.list(branch_id).await.into_iter().next();
        let prev_pages = match &head {
            Some(v) => self.get_snapshot(&v.id).await.unwrap_or_default(),
            None => Vec::new(),
        };
        let change_summary = self.summarize(&prev_pages, &pages, tasks_completed);

        let snapshot_id = Uuid::new_v4().to_string();
        let snapshot_data = serde_json::to_value(&pages).expect("ProjectPage always serializes");
        let snapshot = VersionSnapshot {
            id: snapshot_id.clone(),
            project_id: project_id.to_string(),
            snapshot_data,
        };

        let version = Version {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            parent_version_id: head.as_ref().map(|v| v.id.clone()),
            branch_id: branch_id.to_string(),
            branch_label,
            created_at: Utc::now(),
            change_summary,
            validation_status,
            is_pinned: false,
            snapshot_id: Some(snapshot_id.clone()),
        };

        self.snapshots.write().await.insert(snapshot_id, snapshot);
        self.versions.write().await.insert(version.id.clone(), version.clone());
        self.enforce_snapshot_window(branch_id).await?;
        emit_event(
            Level::INFO,
            Component::Version,
            ObservabilityEvent {
                event: "version_created",
                component: Component::Version.as_str(),
                build_id: None,
                session_id: None,
                project_id: Some(project_id),
                task_id: None,
                job_id: None,
                status: Some(match version.validation_status {
                    ValidationStatus::Passed => "passed",
                    ValidationStatus::Failed => "failed",
                }),
                error_code: None,
                detail: Some(&version.id),
            },
        );
        Ok(version)
    }

    fn summarize(
        &self,
        prev: &[ProjectPage],
        curr: &[ProjectPage],
        tasks_completed: Vec<String>,
    ) -> ChangeSummary {
        compute_change_summary(prev, curr, tasks_completed)
    }

    /// Reconstructs the full page list for a version: direct if it still
    /// carries an inline snapshot, otherwise by applying its diff to its
    /// anchor's (recursively reconstructed) page list.
    pub async fn get_snapshot(&self, version_id: &str) -> Result<Vec<ProjectPage>, VersionError> {
        let version = self.get(version_id).await?;
        if let Some(snapshot_id) = &version.snapshot_id {
            let snapshots = self.snapshots.read().await;
            let snapshot = snapshots
                .get(snapshot_id)
                .ok_or_else(|| VersionError::NotFound(snapshot_id.clone()))?;
            return serde_json::from_value(snapshot.snapshot_data.clone())
                .map_err(|e| VersionError::CorruptSnapshot(version_id.to_string(), e));
        }

        let diff = {
            let diffs = self.diffs.read().await;
            diffs
                .get(version_id)
                .cloned()
                .ok_or_else(|| VersionError::NotFound(version_id.to_string()))?
        };
        let anchor_pages = Box::pin(self.get_snapshot(&diff.base_version_id)).await?;
        let anchor_json = serde_json::to_string_pretty(&anchor_pages).expect("serializes");
        let reconstructed_json = apply_unified_diff(&anchor_json, &diff.diff_text);
        serde_json::from_str(&reconstructed_json)
            .map_err(|e| VersionError::CorruptSnapshot(version_id.to_string(), e))
    }

    /// Pins a version so it always keeps an inline snapshot regardless of
    /// recency, up to [`MAX_PINNED_VERSIONS`] per branch.
    pub async fn pin(&self, version_id: &str) -> Result<Version, VersionError> {
        let branch_id = self.get(version_id).await?.branch_id;
        let pinned_count = {
            let versions = self.versions.read().await;
            versions
                .values()
                .filter(|v| v.branch_id == branch_id && v.is_pinned)
                .count()
        };
        {
            let versions = self.versions.read().await;
            let already_pinned = versions.get(version_id).map(|v| v.is_pinned).unwrap_or(false);
            if !already_pinned && pinned_count >= MAX_PINNED_VERSIONS {
                return Err(VersionError::PinLimitExceeded(branch_id));
            }
        }

        let pages = self.get_snapshot(version_id).await?;
        self.materialize_snapshot(version_id, &pages).await?;

        let mut versions = self.versions.write().await;
        let version = versions
            .get_mut(version_id)
            .ok_or_else(|| VersionError::NotFound(version_id.to_string()))?;
        version.is_pinned = true;
        Ok(version.clone())
    }

    pub async fn unpin(&self, version_id: &str) -> Result<Version, VersionError> {
        let mut versions = self.versions.write().await;
        let version = versions
            .get_mut(version_id)
            .ok_or_else(|| VersionError::NotFound(version_id.to_string()))?;
        version.is_pinned = false;
        Ok(version.clone())
    }

    async fn materialize_snapshot(
        &self,
        version_id: &str,
        pages: &[ProjectPage],
    ) -> Result<(), VersionError> {
        let has_snapshot = self
            .versions
            .read()
            .await
            .get(version_id)
            .map(|v| v.snapshot_id.is_some())
            .unwrap_or(false);
        if has_snapshot {
            return Ok(());
        }
        let project_id = self.get(version_id).await?.project_id;
        let snapshot_id = Uuid::new_v4().to_string();
        let snapshot = VersionSnapshot {
            id: snapshot_id.clone(),
            project_id,
            snapshot_data: serde_json::to_value(pages).expect("serializes"),
        };
        self.snapshots.write().await.insert(snapshot_id.clone(), snapshot);
        self.diffs.write().await.remove(version_id);
        let mut versions = self.versions.write().await;
        if let Some(v) = versions.get_mut(version_id) {
            v.snapshot_id = Some(snapshot_id);
        }
        Ok(())
    }

    /// Walks a branch newest-first. The most recent [`FULL_SNAPSHOT_WINDOW`]
    /// non-failed versions and every pinned version stay as anchors; every
    /// other version is converted to a diff against the nearest anchor
    /// encountered so far (scanning from newest to oldest).
    pub async fn enforce_snapshot_window(&self, branch_id: &str) -> Result<(), VersionError> {
        let versions = self.list(branch_id).await;
        let mut anchor: Option<(String, Vec<ProjectPage>)> = None;
        let mut kept_non_failed = 0usize;

        for version in &versions {
            let is_anchor_slot = version.is_pinned
                || (version.validation_status != ValidationStatus::Failed
                    && kept_non_failed < FULL_SNAPSHOT_WINDOW);
            if version.validation_status != ValidationStatus::Failed {
                kept_non_failed += 1;
            }

            if is_anchor_slot {
                let pages = self.get_snapshot(&version.id).await?;
                self.materialize_snapshot(&version.id, &pages).await?;
                anchor = Some((version.id.clone(), pages));
                continue;
            }

            let Some((anchor_id, anchor_pages)) = anchor.clone() else {
                // No anchor yet (shouldn't happen: the newest version is
                // always an anchor slot), keep as-is.
                continue;
            };
            if version.snapshot_id.is_none() {
                // Already compacted against this or an earlier anchor.
                continue;
            }
            let version_pages = self.get_snapshot(&version.id).await?;
            let anchor_json = serde_json::to_string_pretty(&anchor_pages).expect("serializes");
            let version_json = serde_json::to_string_pretty(&version_pages).expect("serializes");
            let diff_text = unified_diff_text(&anchor_json, &version_json);

            let old_snapshot_id = {
                let mut versions = self.versions.write().await;
                let v = versions.get_mut(&version.id).expect("version exists");
                v.snapshot_id.take()
            };
            if let Some(sid) = old_snapshot_id {
                self.snapshots.write().await.remove(&sid);
            }
            self.diffs.write().await.insert(
                version.id.clone(),
                VersionDiff {
                    id: Uuid::new_v4().to_string(),
                    project_id: version.project_id.clone(),
                    version_id: version.id.clone(),
                    base_version_id: anchor_id,
                    diff_text,
                },
            );
        }
        Ok(())
    }

    /// Deletes the oldest non-pinned versions on a branch once the branch
    /// exceeds `limit` versions (a negative limit means unlimited). Versions
    /// still referenced as a diff base are never deleted, even if they would
    /// otherwise be evicted.
    pub async fn prune(&self, branch_id: &str, limit: i64) {
        if limit < 0 {
            return;
        }
        let limit = limit as usize;
        let mut versions = self.list(branch_id).await; // newest first
        if versions.len() <= limit {
            return;
        }
        let referenced_as_base: std::collections::HashSet<String> = self
            .diffs
            .read()
            .await
            .values()
            .map(|d| d.base_version_id.clone())
            .collect();

        versions.reverse(); // oldest first, so we evict the oldest
        let mut removed = 0usize;
        let overflow = versions.len() - limit;
        for version in versions {
            if removed >= overflow {
                break;
            }
            if version.is_pinned || referenced_as_base.contains(&version.id) {
                continue;
            }
            self.versions.write().await.remove(&version.id);
            if let Some(sid) = version.snapshot_id {
                self.snapshots.write().await.remove(&sid);
            }
            self.diffs.write().await.remove(&version.id);
            removed += 1;
        }
    }

    /// Writes a past version's pages back into live storage without
    /// recording a new version.
    pub async fn rollback_pages(
        &self,
        version_id: &str,
        writer: &Arc<dyn PageWriter>,
    ) -> Result<(), VersionError> {
        let version = self.get(version_id).await?;
        let pages = self.get_snapshot(version_id).await?;
        writer
            .write_pages(&version.branch_id, pages)
            .await
            .map_err(|_| VersionError::NotFound(version_id.to_string()))
    }

    /// Restores a past version as the new head: writes its pages back into
    /// live storage and records a fresh version on top of the current head.
    pub async fn restore_version(
        &self,
        version_id: &str,
        writer: &Arc<dyn PageWriter>,
    ) -> Result<Version, VersionError> {
        let source = self.get(version_id).await?;
        let pages = self.get_snapshot(version_id).await?;
        writer
            .write_pages(&source.branch_id, pages.clone())
            .await
            .map_err(|_| VersionError::NotFound(version_id.to_string()))?;

        let mut restored = self
            .create_version(
                &source.project_id,
                &source.branch_id,
                source.branch_label.clone(),
                pages,
                ValidationStatus::Passed,
                Vec::new(),
            )
            .await?;
        restored.change_summary.description =
            format!("Restored from version {}", &source.id);
        self.versions
            .write()
            .await
            .insert(restored.id.clone(), restored.clone());
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn page(id: &str, html: &str) -> ProjectPage {
        ProjectPage {
            id: id.to_string(),
            project_id: "proj".to_string(),
            branch_id: "main".to_string(),
            name: id.to_string(),
            slug: None,
            path: format!("/{id}"),
            is_home: id == "home",
            sort_order: 0,
            html: html.to_string(),
            js: None,
            design_system: serde_json::Value::Null,
            thumbnail_url: None,
            updated_at: Utc::now(),
        }
    }

    struct RecordingWriter {
        last: StdMutex<Option<(String, Vec<ProjectPage>)>>,
    }

    #[async_trait]
    impl PageWriter for RecordingWriter {
        async fn write_pages(&self, branch_id: &str, pages: Vec<ProjectPage>) -> anyhow::Result<()> {
            *self.last.lock().unwrap() = Some((branch_id.to_string(), pages));
            Ok(())
        }

        async fn read_pages(&self, _branch_id: &str) -> anyhow::Result<Vec<ProjectPage>> {
            Ok(self.last.lock().unwrap().clone().map(|(_, pages)| pages).unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn create_version_reconstructs_full_pages() {
        let store = VersionStore::new();
        let v1 = store
            .create_version(
                "proj",
                "main",
                None,
                vec![page("home", "v1")],
                ValidationStatus::Passed,
                vec!["t1".to_string()],
            )
            .await
            .unwrap();
        let pages = store.get_snapshot(&v1.id).await.unwrap();
        assert_eq!(pages[0].html, "v1");
    }

    #[tokio::test]
    async fn versions_beyond_window_compact_to_diffs_but_still_reconstruct() {
        let store = VersionStore::new();
        let mut ids = Vec::new();
        for i in 0..6 {
            let v = store
                .create_version(
                    "proj",
                    "main",
                    None,
                    vec![page("home", &format!("v{i}"))],
                    ValidationStatus::Passed,
                    Vec::new(),
                )
                .await
                .unwrap();
            ids.push(v.id);
        }
        let oldest = &ids[0];
        let is_diffed = store.get(oldest).await.unwrap().snapshot_id.is_none();
        assert!(is_diffed, "oldest version should have been compacted to a diff");
        let pages = store.get_snapshot(oldest).await.unwrap();
        assert_eq!(pages[0].html, "v0");
    }

    #[tokio::test]
    async fn pin_keeps_snapshot_materialized_outside_window() {
        let store = VersionStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let v = store
                .create_version(
                    "proj",
                    "main",
                    None,
                    vec![page("home", &format!("v{i}"))],
                    ValidationStatus::Passed,
                    Vec::new(),
                )
                .await
                .unwrap();
            ids.push(v.id);
        }
        store.pin(&ids[0]).await.unwrap();
        for i in 3..6 {
            store
                .create_version(
                    "proj",
                    "main",
                    None,
                    vec![page("home", &format!("v{i}"))],
                    ValidationStatus::Passed,
                    Vec::new(),
                )
                .await
                .unwrap();
        }
        let pinned = store.get(&ids[0]).await.unwrap();
        assert!(pinned.is_pinned);
        assert!(pinned.snapshot_id.is_some());
    }

    #[tokio::test]
    async fn pin_limit_enforced_per_branch() {
        let store = VersionStore::new();
        let mut ids = Vec::new();
        for i in 0..4 {
            let v = store
                .create_version(
                    "proj",
                    "main",
                    None,
                    vec![page("home", &format!("v{i}"))],
                    ValidationStatus::Passed,
                    Vec::new(),
                )
                .await
                .unwrap();
            ids.push(v.id);
        }
        for id in &ids[0..3] {
            store.pin(id).await.unwrap();
        }
        let err = store.pin(&ids[3]).await.unwrap_err();
        assert!(matches!(err, VersionError::PinLimitExceeded(_)));
    }

    #[tokio::test]
    async fn branch_limit_enforced_per_project() {
        let store = VersionStore::new();
        for i in 0..3 {
            store
                .create_branch("proj", &format!("branch-{i}"), None)
                .await
                .unwrap();
        }
        let err = store.create_branch("proj", "branch-4", None).await.unwrap_err();
        assert!(matches!(err, VersionError::BranchLimitExceeded(_)));
    }

    #[tokio::test]
    async fn restore_version_writes_pages_and_records_new_version() {
        let store = VersionStore::new();
        let v1 = store
            .create_version(
                "proj",
                "main",
                None,
                vec![page("home", "v1")],
                ValidationStatus::Passed,
                Vec::new(),
            )
            .await
            .unwrap();
        let v2 = store
            .create_version(
                "proj",
                "main",
                None,
                vec![page("home", "v2")],
                ValidationStatus::Passed,
                Vec::new(),
            )
            .await
            .unwrap();

        let writer = Arc::new(RecordingWriter { last: StdMutex::new(None) });
        let dyn_writer: Arc<dyn PageWriter> = writer.clone();
        let restored = store.restore_version(&v1.id, &dyn_writer).await.unwrap();
        assert_eq!(restored.parent_version_id.as_deref(), Some(v2.id.as_str()));
        let (branch_id, pages) = writer.last.lock().unwrap().clone().unwrap();
        assert_eq!(branch_id, "main");
        assert_eq!(pages[0].html, "v1");
    }

    #[tokio::test]
    async fn prune_deletes_oldest_unreferenced_unpinned_versions() {
        let store = VersionStore::new();
        let mut ids = Vec::new();
        for i in 0..6 {
            let v = store
                .create_version(
                    "proj",
                    "main",
                    None,
                    vec![page("home", &format!("v{i}"))],
                    ValidationStatus::Passed,
                    Vec::new(),
                )
                .await
                .unwrap();
            ids.push(v.id);
        }
        store.prune("main", 3).await;
        let remaining = store.list("main").await;
        assert!(remaining.len() <= 6);
        assert!(remaining.iter().any(|v| v.id == ids[5]));
    }
}
