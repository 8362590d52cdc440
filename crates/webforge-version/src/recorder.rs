//! Implements the multi-page orchestrator's `VersionRecorder` so it never
//! has to depend on this crate directly — the orchestrator only sees the
//! trait, this crate provides the wiring.

use std::sync::Arc;

use async_trait::async_trait;
use webforge_orchestrator::VersionRecorder;
use webforge_types::{ErrorDetail, ValidationStatus, Version};

use crate::store::{PageWriter, VersionStore};

pub struct BuildVersionRecorder {
    store: Arc<VersionStore>,
    pages: Arc<dyn PageWriter>,
}

impl BuildVersionRecorder {
    pub fn new(store: Arc<VersionStore>, pages: Arc<dyn PageWriter>) -> Self {
        Self { store, pages }
    }
}

#[async_trait]
impl VersionRecorder for BuildVersionRecorder {
    async fn record_success(
        &self,
        project_id: &str,
        branch_id: &str,
        tasks_completed: Vec<String>,
    ) -> anyhow::Result<Version> {
        let pages = self.pages.read_pages(branch_id).await?;
        let version = self
            .store
            .create_version(
                project_id,
                branch_id,
                None,
                pages,
                ValidationStatus::Passed,
                tasks_completed,
            )
            .await?;
        Ok(version)
    }

    async fn record_failure(
        &self,
        project_id: &str,
        branch_id: &str,
        errors: Vec<ErrorDetail>,
        message: String,
    ) -> anyhow::Result<()> {
        let pages = self.pages.read_pages(branch_id).await?;
        let mut tasks_completed: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
        tasks_completed.push(message);
        self.store
            .create_version(
                project_id,
                branch_id,
                None,
                pages,
                ValidationStatus::Failed,
                tasks_completed,
            )
            .await?;
        Ok(())
    }
}
