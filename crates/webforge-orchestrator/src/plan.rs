//! `BuildPlan` generation: each page expands into six fixed micro-tasks,
//! plus four project-level tasks. Grounded on the original implementation's
//! `multi_task_orchestrator.py` plan-preview expansion.

use async_trait::async_trait;
use thiserror::Error;
use webforge_types::{BuildPlan, BuildPlanStatus, BuildPlanTask, BuildPlanTaskStatus, PageSpec};

#[derive(Debug, Error)]
pub enum PlanStoreError {
    #[error("no build plan with id {0}")]
    NotFound(String),
}

#[async_trait]
pub trait BuildPlanStore: Send + Sync {
    async fn save(&self, plan: BuildPlan) -> Result<(), PlanStoreError>;
    async fn load(&self, id: &str) -> Result<BuildPlan, PlanStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryBuildPlanStore {
    rows: std::sync::Arc<tokio::sync::RwLock<std::collections::HashMap<String, BuildPlan>>>,
}

impl InMemoryBuildPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildPlanStore for InMemoryBuildPlanStore {
    async fn save(&self, plan: BuildPlan) -> Result<(), PlanStoreError> {
        self.rows.write().await.insert(plan.id.clone(), plan);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<BuildPlan, PlanStoreError> {
        self.rows
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PlanStoreError::NotFound(id.to_string()))
    }
}

/// Expands `pages` into the fixed six-micro-task-per-page shape plus the
/// four project-level tasks. `project-plan`/`project-doc` start `done`.
pub fn expand_build_plan(plan_id: impl Into<String>, project_id: impl Into<String>, pages: &[PageSpec]) -> BuildPlan {
    let mut tasks = vec![
        BuildPlanTask {
            key: "project-plan".to_string(),
            title: "Plan project structure".to_string(),
            status: BuildPlanTaskStatus::Done,
        },
        BuildPlanTask {
            key: "project-doc".to_string(),
            title: "Draft product document".to_string(),
            status: BuildPlanTaskStatus::Done,
        },
    ];

    for page in pages {
        tasks.push(page_task(page, "page", "Generate"));
        tasks.push(page_task(page, "style", "Style"));
        tasks.push(page_task(page, "validate", "Validate"));
        tasks.push(page_task(page, "secure", "Secure"));
        tasks.push(page_task(page, "save", "Save"));
        tasks.push(page_task(page, "thumb", "Capture thumbnail for"));
    }

    tasks.push(BuildPlanTask {
        key: "project-links".to_string(),
        title: "Check cross-page links".to_string(),
        status: BuildPlanTaskStatus::Todo,
    });
    tasks.push(BuildPlanTask {
        key: "project-final".to_string(),
        title: "Run final checks".to_string(),
        status: BuildPlanTaskStatus::Todo,
    });

    BuildPlan {
        id: plan_id.into(),
        project_id: project_id.into(),
        status: BuildPlanStatus::Planning,
        tasks,
    }
}

fn page_task(page: &PageSpec, prefix: &str, verb: &str) -> BuildPlanTask {
    BuildPlanTask {
        key: format!("{prefix}-{}", page.id),
        title: format!("{verb} {}", page.name),
        status: BuildPlanTaskStatus::Todo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str, name: &str) -> PageSpec {
        PageSpec {
            id: id.to_string(),
            name: name.to_string(),
            path: format!("/{id}"),
            sections: vec![],
            is_main: id == "home",
        }
    }

    #[test]
    fn expand_build_plan_has_six_tasks_per_page_plus_four_project_tasks() {
        let pages = vec![page("home", "Home"), page("about", "About")];
        let plan = expand_build_plan("plan-1", "proj-1", &pages);
        assert_eq!(plan.tasks.len(), 2 * 6 + 4);
        assert!(plan.tasks.iter().any(|t| t.key == "page-home"));
        assert!(plan.tasks.iter().any(|t| t.key == "thumb-about"));
        let done_count = plan
            .tasks
            .iter()
            .filter(|t| t.status == BuildPlanTaskStatus::Done)
            .count();
        assert_eq!(done_count, 2);
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryBuildPlanStore::new();
        let plan = expand_build_plan("plan-2", "proj-2", &[]);
        store.save(plan.clone()).await.unwrap();
        let loaded = store.load("plan-2").await.unwrap();
        assert_eq!(loaded.id, plan.id);
    }
}
