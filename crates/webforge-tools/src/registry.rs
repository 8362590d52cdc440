//! `Tool` trait and registry exposing the five tool-layer façades to the
//! Agent Bridge / orchestrators: `ReadFile`, `ApplyPatch`, `RunValidator`,
//! `RunChecks`, `Snapshot`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::check_tools::CheckTools;
use crate::repo_tools::RepoTools;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
}

/// Accepted by `SnapshotTool` so the tool layer does not depend on the
/// Version Store crate directly; `webforge-version` provides the
/// implementation at wiring time.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn create(&self, project_id: &str, reason: &str) -> anyhow::Result<String>;
    async fn restore(&self, snapshot_id: &str, project_id: &str) -> anyhow::Result<bool>;
}

struct ReadFileTool {
    repo: Arc<RepoTools>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("read_file requires a `path` argument"))?;
        let start = args.get("start_line").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let end = args.get("end_line").and_then(|v| v.as_u64()).map(|v| v as usize);
        let content = self.repo.read(path, start, end).await?;
        Ok(json!({ "content": content }))
    }
}

struct SearchTool {
    repo: Arc<RepoTools>,
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("search requires a `query` argument"))?;
        let matches = self.repo.search(query).await?;
        Ok(json!({ "matches": matches }))
    }
}

struct ApplyPatchTool {
    repo: Arc<RepoTools>,
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &'static str {
        "apply_patch"
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let diff = args
            .get("diff")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("apply_patch requires a `diff` argument"))?;
        let result = self.repo.apply_patch(diff).await;
        Ok(json!({
            "applied": result.applied,
            "touched": result.touched,
            "errors": result.errors,
        }))
    }
}

struct RunValidatorTool;

#[async_trait]
impl Tool for RunValidatorTool {
    fn name(&self) -> &'static str {
        "run_validator"
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let html = args
            .get("html")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("run_validator requires `html`"))?;
        let js = args.get("js").and_then(|v| v.as_str());
        let html_path = args.get("html_path").and_then(|v| v.as_str());
        let js_path = args.get("js_path").and_then(|v| v.as_str());
        let report = webforge_validator::validate_page(html, js, html_path, js_path);
        Ok(serde_json::to_value(report)?)
    }
}

struct RunChecksTool {
    checks: Arc<CheckTools>,
}

#[async_trait]
impl Tool for RunChecksTool {
    fn name(&self) -> &'static str {
        "run_checks"
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
        let report = self.checks.all().await;
        Ok(serde_json::to_value(report)?)
    }
}

struct SnapshotTool {
    project_id: String,
    backend: Arc<dyn SnapshotBackend>,
}

#[async_trait]
impl Tool for SnapshotTool {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        if let Some(snapshot_id) = args.get("restore").and_then(|v| v.as_str()) {
            let ok = self
                .backend
                .restore(snapshot_id, &self.project_id)
                .await
                .unwrap_or(false);
            return Ok(json!({ "restored": ok }));
        }
        let reason = args.get("reason").and_then(|v| v.as_str()).unwrap_or("checkpoint");
        let snapshot_id = self.backend.create(&self.project_id, reason).await?;
        Ok(json!({ "snapshot_id": snapshot_id }))
    }
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<HashMap<&'static str, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new(
        project_path: impl Into<std::path::PathBuf>,
        project_id: impl Into<String>,
        snapshots: Arc<dyn SnapshotBackend>,
    ) -> Self {
        let project_path = project_path.into();
        let repo = Arc::new(RepoTools::new(project_path.clone()));
        let checks = Arc::new(CheckTools::new(project_path));
        let mut map: HashMap<&'static str, Arc<dyn Tool>> = HashMap::new();
        map.insert("read_file", Arc::new(ReadFileTool { repo: repo.clone() }));
        map.insert("search", Arc::new(SearchTool { repo: repo.clone() }));
        map.insert("apply_patch", Arc::new(ApplyPatchTool { repo }));
        map.insert("run_validator", Arc::new(RunValidatorTool));
        map.insert("run_checks", Arc::new(RunChecksTool { checks }));
        map.insert(
            "snapshot",
            Arc::new(SnapshotTool {
                project_id: project_id.into(),
                backend: snapshots,
            }),
        );
        Self { tools: Arc::new(map) }
    }

    pub async fn execute(&self, name: &str, args: Value) -> anyhow::Result<Value> {
        let Some(tool) = self.tools.get(name) else {
            anyhow::bail!("unknown tool: {name}");
        };
        tool.execute(args).await
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopSnapshots;

    #[async_trait]
    impl SnapshotBackend for NoopSnapshots {
        async fn create(&self, _project_id: &str, _reason: &str) -> anyhow::Result<String> {
            Ok("snap-1".to_string())
        }
        async fn restore(&self, _snapshot_id: &str, _project_id: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn registry_lists_all_five_tools() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path(), "proj-1", Arc::new(NoopSnapshots));
        assert_eq!(
            registry.names(),
            vec!["apply_patch", "read_file", "run_checks", "run_validator", "search"]
        );
    }

    #[tokio::test]
    async fn snapshot_tool_creates_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path(), "proj-1", Arc::new(NoopSnapshots));
        let result = registry.execute("snapshot", json!({})).await.unwrap();
        assert_eq!(result["snapshot_id"], "snap-1");
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path(), "proj-1", Arc::new(NoopSnapshots));
        assert!(registry.execute("nope", json!({})).await.is_err());
    }
}
