//! Data model for one page spec, one single-page build, and one multi-page
//! session. Plain serde types with no behavior attached, mirroring the split
//! between a pure data crate and the crates that act on the data.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page a session will build. Immutable for the life of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    pub id: String,
    pub name: String,
    pub path: String,
    pub sections: Vec<String>,
    pub is_main: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Doing,
    Done,
    Blocked,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub files_expected: Vec<String>,
    pub status: TaskStatus,
}

/// DAG of tasks with acceptance criteria. Invariant: `depends_on` never
/// forms a cycle; enforced by the scheduler, not by this type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildGraph {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl BuildGraph {
    /// First `todo` task whose dependencies are all `done`, or `None` when
    /// the graph is fully resolved (no remaining `todo`/`doing` tasks).
    pub fn next_runnable(&self) -> Option<&Task> {
        self.tasks.iter().find(|task| {
            task.status == TaskStatus::Todo
                && task.depends_on.iter().all(|dep| {
                    self.tasks
                        .iter()
                        .find(|t| &t.id == dep)
                        .map(|t| t.status == TaskStatus::Done)
                        .unwrap_or(false)
                })
        })
    }

    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Unified diff proposed by the Implementer for one task. Capped at five
/// touched files per task by the caller, not enforced here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchSet {
    pub id: String,
    pub task_id: String,
    pub diff: String,
    pub touched_files: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub rule_id: String,
    pub rule_category: String,
    #[serde(default)]
    pub path: Option<String>,
    pub line: usize,
    pub excerpt: String,
    pub message: String,
    #[serde(default)]
    pub suggested_fix: Option<String>,
    pub severity: Severity,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub normalized_html: Option<String>,
    #[serde(default)]
    pub error_details: Vec<ErrorDetail>,
    #[serde(default = "default_true")]
    pub js_valid: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub ok: bool,
    pub output: String,
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub ok: bool,
    pub typecheck_ok: bool,
    pub lint_ok: bool,
    pub unit_ok: bool,
    pub logs: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    RequestChanges,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub required_fixes: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Implementing,
    Verifying,
    Reviewing,
    Iterating,
    Ready,
    Error,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ready | Phase::Error | Phase::Aborted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Auto,
    PlanOnly,
    ImplementOnly,
    VerifyOnly,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub phase: Phase,
    pub note: String,
}

/// Reviewer feedback carried into a re-entry of the `implementing` phase.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IterationFeedback {
    pub reasons: Vec<String>,
    pub required_fixes: Vec<String>,
    pub user_message: Option<String>,
}

/// The single-page build context. The sole durable truth for one build run;
/// persisted as one row keyed by `build_id` on every transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildState {
    pub build_id: String,
    pub phase: Phase,
    pub mode: Mode,
    pub current_task_id: Option<String>,
    pub graph: Option<BuildGraph>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub cumulative_tokens: TokenUsage,
    #[serde(default)]
    pub last_tokens: TokenUsage,
    #[serde(default)]
    pub last_patch: Option<PatchSet>,
    #[serde(default)]
    pub last_validation: Option<ValidationReport>,
    #[serde(default)]
    pub last_check: Option<CheckReport>,
    #[serde(default)]
    pub last_review: Option<ReviewReport>,
    #[serde(default)]
    pub pending_feedback: Option<IterationFeedback>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuildState {
    pub fn new(build_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            build_id: build_id.into(),
            phase: Phase::Planning,
            mode: Mode::Auto,
            current_task_id: None,
            graph: None,
            history: Vec::new(),
            cumulative_tokens: TokenUsage::default(),
            last_tokens: TokenUsage::default(),
            last_patch: None,
            last_validation: None,
            last_check: None,
            last_review: None,
            pending_feedback: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push_history(&mut self, note: impl Into<String>) {
        self.history.push(HistoryEntry {
            at: Utc::now(),
            phase: self.phase,
            note: note.into(),
        });
        self.updated_at = Utc::now();
    }
}

// --- Multi-page session -----------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildSession {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub pages: Vec<PageSpec>,
    #[serde(default)]
    pub completed_pages: HashSet<String>,
    #[serde(default)]
    pub failed_pages: HashSet<String>,
    #[serde(default)]
    pub failed_page_errors: HashMap<String, Vec<ErrorDetail>>,
    #[serde(default)]
    pub project_error_details: Vec<ErrorDetail>,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub final_checks_failed: bool,
    pub build_plan_id: String,
    #[serde(default)]
    pub task_mapping: HashMap<String, String>,
    /// page_id -> (html, optional js), kept for cross-page link checking.
    #[serde(default)]
    pub page_html: HashMap<String, (String, Option<String>)>,
    #[serde(default)]
    pub retry_counts: HashMap<String, u32>,
    #[serde(default)]
    pub last_failed_attempt_id: Option<String>,
}

impl BuildSession {
    pub fn is_done(&self) -> bool {
        self.completed_pages.len() + self.failed_pages.len() >= self.pages.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_pages.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectPage {
    pub id: String,
    pub project_id: String,
    pub branch_id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub path: String,
    pub is_home: bool,
    pub sort_order: i64,
    pub html: String,
    #[serde(default)]
    pub js: Option<String>,
    #[serde(default)]
    pub design_system: serde_json::Value,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPlanTaskStatus {
    Todo,
    Running,
    Done,
    Skipped,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildPlanTask {
    pub key: String,
    pub title: String,
    pub status: BuildPlanTaskStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPlanStatus {
    Planning,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildPlan {
    pub id: String,
    pub project_id: String,
    pub status: BuildPlanStatus,
    pub tasks: Vec<BuildPlanTask>,
}

impl BuildPlan {
    pub fn task_mut(&mut self, key: &str) -> Option<&mut BuildPlanTask> {
        self.tasks.iter_mut().find(|t| t.key == key)
    }
}

// --- Version store -------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub files_changed: u32,
    pub lines_added: u32,
    pub lines_deleted: u32,
    pub description: String,
    #[serde(default)]
    pub tasks_completed: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub parent_version_id: Option<String>,
    pub branch_id: String,
    #[serde(default)]
    pub branch_label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub change_summary: ChangeSummary,
    pub validation_status: ValidationStatus,
    pub is_pinned: bool,
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub id: String,
    pub project_id: String,
    pub snapshot_data: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionDiff {
    pub id: String,
    pub project_id: String,
    pub version_id: String,
    pub base_version_id: String,
    pub diff_text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionAttempt {
    pub id: String,
    pub project_id: String,
    pub branch_id: String,
    #[serde(default)]
    pub parent_version_id: Option<String>,
    #[serde(default)]
    pub trigger_message_id: Option<String>,
    pub snapshot_data: serde_json::Value,
    #[serde(default)]
    pub validation_errors: Vec<ErrorDetail>,
    pub error_message: String,
    #[serde(default)]
    pub retry_of: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Externally supplied per-project cap on retained versions; billing/quota
/// computation is out of scope, so the Version Store only consumes this.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VersionQuota {
    /// `-1` means unlimited.
    pub limit: i64,
}

// --- Thumbnail queue -------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailJobType {
    Thumbnail,
    OgImage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThumbnailJob {
    pub id: String,
    pub project_id: String,
    pub page_id: String,
    pub job_type: ThumbnailJobType,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}
