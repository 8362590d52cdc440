//! Single-Page Orchestrator: a deterministic state machine advanced one
//! `step()` per call. Grounded on the original implementation's
//! `_plan_step`/`_implement_step`/`_verify_step`/`_review_step`/
//! `_iterate_step`, each a small function switched on by the current phase.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use webforge_tools::{CheckTools, RepoTools};
use webforge_types::{
    BuildOutcome, BuildState, Card, CheckReport, Envelope, Event, IterationFeedback, Mode, Phase,
    PatchSet, ReviewDecision, TaskStatus, ValidationReport,
};

use crate::agents::{AgentError, ChatCompletion, ImplementerAgent, PlannerAgent, ReviewerAgent};
use crate::events::EventBus;
use crate::store::{BuildStateStore, StoreError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),
    #[error("build {0} is already in a terminal phase")]
    Terminal(String),
}

/// Inputs that do not change across `step()` calls for one build.
pub struct BuildInputs {
    pub brief: Value,
    pub build_plan: Value,
    pub product_doc: Value,
    pub html_path: String,
    pub js_path: Option<String>,
}

pub struct SinglePageOrchestrator {
    chat: Arc<dyn ChatCompletion>,
    store: Arc<dyn BuildStateStore>,
    events: EventBus,
    repo: RepoTools,
    checks: CheckTools,
    planner: PlannerAgent,
    implementer: ImplementerAgent,
    reviewer: ReviewerAgent,
}

impl SinglePageOrchestrator {
    pub fn new(
        chat: Arc<dyn ChatCompletion>,
        store: Arc<dyn BuildStateStore>,
        events: EventBus,
        project_path: impl Into<std::path::PathBuf> + Clone,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            chat,
            store,
            events,
            repo: RepoTools::new(project_path.clone()),
            checks: CheckTools::new(project_path),
            planner: PlannerAgent::new(model.clone()),
            implementer: ImplementerAgent::new(model.clone()),
            reviewer: ReviewerAgent::new(model),
        }
    }

    /// Abort a build: persists `phase = aborted` regardless of current phase.
    pub async fn abort(&self, build_id: &str) -> Result<BuildState, OrchestratorError> {
        let mut state = self.store.load(build_id).await?;
        state.phase = Phase::Aborted;
        state.push_history("aborted by caller");
        self.store.save(state.clone()).await?;
        self.publish(
            &state,
            Event::TaskFailed {
                task_id: state.current_task_id.clone().unwrap_or_default(),
                title: "aborted".to_string(),
                error: Some("aborted by caller".to_string()),
            },
        );
        Ok(state)
    }

    fn publish(&self, state: &BuildState, event: Event) {
        self.events.publish(Envelope::new(state.build_id.clone(), event));
    }

    /// Advance the state machine by exactly one step. `auto` runs whichever
    /// phase the state is currently in; `plan_only`/`implement_only`/
    /// `verify_only` run that one step regardless of the current phase.
    pub async fn step(
        &self,
        build_id: &str,
        mode: Mode,
        inputs: &BuildInputs,
    ) -> Result<BuildState, OrchestratorError> {
        let mut state = self.store.load(build_id).await?;
        if state.phase.is_terminal() {
            return Err(OrchestratorError::Terminal(build_id.to_string()));
        }
        state.mode = mode;

        match mode {
            Mode::PlanOnly => self.plan_step(&mut state, inputs).await?,
            Mode::ImplementOnly => self.implement_step(&mut state, inputs).await?,
            Mode::VerifyOnly => self.verify_step(&mut state, inputs).await,
            Mode::Auto => match state.phase {
                Phase::Planning => self.plan_step(&mut state, inputs).await?,
                Phase::Implementing => self.implement_step(&mut state, inputs).await?,
                Phase::Verifying => self.verify_step(&mut state, inputs).await,
                Phase::Reviewing => self.review_step(&mut state, inputs).await?,
                Phase::Iterating => self.iterate_step(&mut state),
                Phase::Ready | Phase::Error | Phase::Aborted => {
                    return Err(OrchestratorError::Terminal(build_id.to_string()))
                }
            },
        }

        self.store.save(state.clone()).await?;
        Ok(state)
    }

    async fn plan_step(
        &self,
        state: &mut BuildState,
        inputs: &BuildInputs,
    ) -> Result<(), OrchestratorError> {
        if state.graph.is_none() {
            let result = self
                .planner
                .run(self.chat.as_ref(), &inputs.brief, &inputs.build_plan, &inputs.product_doc)
                .await?;
            state.cumulative_tokens.accumulate(&result.token_usage);
            state.last_tokens = result.token_usage;
            state.graph = Some(result.output);
            let tasks: Vec<Value> = state
                .graph
                .as_ref()
                .unwrap()
                .tasks
                .iter()
                .map(|t| json!(t))
                .collect();
            self.publish(
                state,
                Event::Card(Card::BuildPlan {
                    pages: Vec::new(),
                    estimated_tasks: tasks.len() as u32,
                    tasks,
                    features: Vec::new(),
                    design_system: Value::Null,
                    estimated_complexity: None,
                }),
            );
        }

        let graph = state.graph.as_ref().unwrap();
        match graph.next_runnable().cloned() {
            Some(task) => {
                let task_id = task.id.clone();
                state.graph.as_mut().unwrap().task_mut(&task_id).unwrap().status = TaskStatus::Doing;
                state.current_task_id = Some(task_id.clone());
                state.phase = Phase::Implementing;
                state.push_history(format!("selected task {task_id}"));
                self.publish(state, Event::TaskStarted { task_id, title: task.title });
            }
            None => {
                state.phase = Phase::Ready;
                state.current_task_id = None;
                state.push_history("all tasks done");
                self.publish(
                    state,
                    Event::BuildComplete {
                        status: BuildOutcome::Done,
                        message: Some("build complete".to_string()),
                    },
                );
            }
        }
        Ok(())
    }

    async fn implement_step(
        &self,
        state: &mut BuildState,
        inputs: &BuildInputs,
    ) -> Result<(), OrchestratorError> {
        let task_id = state.current_task_id.clone().expect("implementing requires a current task");
        let task = state
            .graph
            .as_ref()
            .unwrap()
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .expect("current task must exist in graph");

        let mut relevant_files = std::collections::HashMap::new();
        for path in task.files_expected.iter().take(5) {
            if let Ok(content) = self.repo.read(path, 0, None).await {
                relevant_files.insert(path.clone(), content);
            }
        }

        let state_digest = json!({
            "phase": state.phase,
            "current_task_id": task_id,
        });
        let feedback_json = state.pending_feedback.as_ref().map(|f| json!(f));

        let task_value = json!(task);
        let result = self
            .implementer
            .run(
                self.chat.as_ref(),
                &task_value,
                &relevant_files,
                Some(&state_digest),
                feedback_json.as_ref(),
            )
            .await?;
        state.cumulative_tokens.accumulate(&result.token_usage);
        state.last_tokens = result.token_usage;

        let patch: PatchSet = result.output;
        let apply_result = self.repo.apply_patch(&patch.diff).await;

        if !apply_result.applied {
            if let Some(t) = state.graph.as_mut().unwrap().task_mut(&task_id) {
                t.status = TaskStatus::Blocked;
            }
            state.phase = Phase::Error;
            state.push_history(format!("patch apply failed: {}", apply_result.errors.join("; ")));
            self.publish(
                state,
                Event::TaskFailed {
                    task_id,
                    title: task.title.clone(),
                    error: Some(apply_result.errors.join("; ")),
                },
            );
            state.last_patch = Some(patch);
            return Ok(());
        }

        state.last_patch = Some(patch);
        state.pending_feedback = None;
        state.phase = Phase::Verifying;
        state.push_history("patch applied");
        let _ = inputs;
        Ok(())
    }

    async fn verify_step(&self, state: &mut BuildState, inputs: &BuildInputs) {
        let html_path = inputs.html_path.clone();
        let js_path = inputs.js_path.clone();

        let html_read = self.repo.read(&html_path, 0, None);
        let js_read = async {
            match &js_path {
                Some(path) => self.repo.read(path, 0, None).await.ok(),
                None => None,
            }
        };

        let (html, js) = tokio::join!(html_read, js_read);
        let html = html.unwrap_or_default();

        let (validation, check_report): (ValidationReport, CheckReport) = tokio::join!(
            async {
                webforge_validator::validate_page(
                    &html,
                    js.as_deref(),
                    Some(html_path.as_str()),
                    js_path.as_deref(),
                )
            },
            self.checks.all(),
        );

        if !validation.ok {
            let suggestions = validation
                .error_details
                .iter()
                .filter_map(|d| d.suggested_fix.clone())
                .collect();
            self.publish(
                state,
                Event::Card(Card::Validation {
                    errors: validation.error_details.clone(),
                    suggestions,
                    page_id: Some(state.build_id.clone()),
                    page_name: None,
                    page_path: Some(html_path.clone()),
                    retry_count: Some(0),
                }),
            );
        }

        state.last_validation = Some(validation);
        state.last_check = Some(check_report);
        state.phase = Phase::Reviewing;
        state.push_history("verification complete");
    }

    async fn review_step(
        &self,
        state: &mut BuildState,
        _inputs: &BuildInputs,
    ) -> Result<(), OrchestratorError> {
        let task_id = state.current_task_id.clone().expect("reviewing requires a current task");
        let task = state
            .graph
            .as_ref()
            .unwrap()
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .unwrap();

        let result = self
            .reviewer
            .run(
                self.chat.as_ref(),
                &json!(task),
                &json!(state.last_patch),
                &json!(state.last_validation),
                &json!(state.last_check),
            )
            .await?;
        state.cumulative_tokens.accumulate(&result.token_usage);
        state.last_tokens = result.token_usage;

        let review = result.output;
        match review.decision {
            ReviewDecision::Approve => {
                if let Some(t) = state.graph.as_mut().unwrap().task_mut(&task_id) {
                    t.status = TaskStatus::Done;
                }
                self.publish(
                    state,
                    Event::TaskDone {
                        task_id: task_id.clone(),
                        title: task.title.clone(),
                    },
                );

                if state.graph.as_ref().unwrap().all_done() {
                    state.phase = Phase::Ready;
                    state.current_task_id = None;
                    self.publish(
                        state,
                        Event::BuildComplete {
                            status: BuildOutcome::Done,
                            message: Some("build complete".to_string()),
                        },
                    );
                } else {
                    state.current_task_id = None;
                    state.phase = Phase::Planning;
                }
                state.push_history(format!("task {task_id} approved"));
            }
            ReviewDecision::RequestChanges => {
                state.pending_feedback = Some(IterationFeedback {
                    reasons: review.reasons,
                    required_fixes: review.required_fixes,
                    user_message: None,
                });
                state.phase = Phase::Iterating;
                state.push_history(format!("task {task_id} changes requested"));
            }
        }
        state.last_review = Some(review);
        Ok(())
    }

    fn iterate_step(&self, state: &mut BuildState) {
        state.phase = Phase::Implementing;
        state.push_history("re-entering implementing with reviewer feedback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ChatMessage, ChatResponse};
    use crate::store::InMemoryBuildStateStore;
    use async_trait::async_trait;
    use webforge_types::TokenUsage;

    struct ScriptedTransport {
        responses: tokio::sync::Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: tokio::sync::Mutex::new(responses.into_iter().map(String::from).rev().collect()),
            }
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedTransport {
        async fn chat_complete(
            &self,
            _model: &str,
            _messages: Vec<ChatMessage>,
            _temperature: f32,
        ) -> anyhow::Result<ChatResponse> {
            let content = self.responses.lock().await.pop().expect("no more scripted responses");
            Ok(ChatResponse {
                content,
                usage: TokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                },
                model: "mock-model".to_string(),
            })
        }
    }

    fn inputs() -> BuildInputs {
        BuildInputs {
            brief: json!({}),
            build_plan: json!({}),
            product_doc: json!({}),
            html_path: "index.html".to_string(),
            js_path: None,
        }
    }

    #[tokio::test]
    async fn full_happy_path_reaches_ready() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("index.html"), "<html></html>").await.unwrap();

        let plan = r#"{"tasks":[{"id":"t1","title":"Build hero","goal":"g","acceptance":["works"],"depends_on":[],"files_expected":["index.html"],"status":"todo"}],"notes":null}"#;
        let patch = json!({
            "id": "p1",
            "task_id": "t1",
            "diff": "",
            "touched_files": [],
            "notes": null
        })
        .to_string();
        let review = r#"{"decision":"approve","reasons":[],"required_fixes":[]}"#;

        let transport = Arc::new(ScriptedTransport::new(vec![plan, &patch, review]));
        let store: Arc<dyn BuildStateStore> = Arc::new(InMemoryBuildStateStore::new());
        store.save(BuildState::new("b1")).await.unwrap();

        let orch = SinglePageOrchestrator::new(
            transport,
            store.clone(),
            EventBus::new(),
            dir.path().to_path_buf(),
            "mock-model",
        );
        let build_inputs = inputs();

        let s1 = orch.step("b1", Mode::Auto, &build_inputs).await.unwrap();
        assert_eq!(s1.phase, Phase::Implementing);

        let s2 = orch.step("b1", Mode::Auto, &build_inputs).await.unwrap();
        assert_eq!(s2.phase, Phase::Verifying);

        let s3 = orch.step("b1", Mode::Auto, &build_inputs).await.unwrap();
        assert_eq!(s3.phase, Phase::Reviewing);

        let s4 = orch.step("b1", Mode::Auto, &build_inputs).await.unwrap();
        assert_eq!(s4.phase, Phase::Ready);
    }

    #[tokio::test]
    async fn patch_apply_failure_sets_error_phase_and_blocks_task() {
        let dir = tempfile::tempdir().unwrap();
        // No index.html on disk and a patch against an existing, non-new file fails.
        let plan = r#"{"tasks":[{"id":"t1","title":"Build hero","goal":"g","acceptance":["works"],"depends_on":[],"files_expected":[],"status":"todo"}],"notes":null}"#;
        let bad_diff = "diff --git a/missing.html b/missing.html\n--- a/missing.html\n+++ b/missing.html\n@@ -1,1 +1,1 @@\n-old\n+new\n";
        let patch = json!({
            "id": "p1",
            "task_id": "t1",
            "diff": bad_diff,
            "touched_files": ["missing.html"],
            "notes": null
        })
        .to_string();

        let transport = Arc::new(ScriptedTransport::new(vec![plan, &patch]));
        let store: Arc<dyn BuildStateStore> = Arc::new(InMemoryBuildStateStore::new());
        store.save(BuildState::new("b2")).await.unwrap();

        let orch = SinglePageOrchestrator::new(
            transport,
            store.clone(),
            EventBus::new(),
            dir.path().to_path_buf(),
            "mock-model",
        );
        let build_inputs = inputs();

        orch.step("b2", Mode::Auto, &build_inputs).await.unwrap();
        let s2 = orch.step("b2", Mode::Auto, &build_inputs).await.unwrap();
        assert_eq!(s2.phase, Phase::Error);
        let task = s2.graph.as_ref().unwrap().tasks.iter().find(|t| t.id == "t1").unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn plan_only_mode_runs_plan_step_regardless_of_current_phase() {
        let dir = tempfile::tempdir().unwrap();
        let plan = r#"{"tasks":[{"id":"t1","title":"Build hero","goal":"g","acceptance":["works"],"depends_on":[],"files_expected":["index.html"],"status":"todo"}],"notes":null}"#;
        let transport = Arc::new(ScriptedTransport::new(vec![plan]));
        let store: Arc<dyn BuildStateStore> = Arc::new(InMemoryBuildStateStore::new());
        let mut initial = BuildState::new("b4");
        initial.phase = Phase::Verifying;
        store.save(initial).await.unwrap();

        let orch = SinglePageOrchestrator::new(
            transport,
            store.clone(),
            EventBus::new(),
            dir.path().to_path_buf(),
            "mock-model",
        );
        let build_inputs = inputs();

        let state = orch.step("b4", Mode::PlanOnly, &build_inputs).await.unwrap();
        assert!(state.graph.is_some());
        assert_eq!(state.phase, Phase::Implementing);
    }

    #[tokio::test]
    async fn verify_only_mode_runs_verify_step_regardless_of_current_phase() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("index.html"), "<html></html>").await.unwrap();
        let store: Arc<dyn BuildStateStore> = Arc::new(InMemoryBuildStateStore::new());
        let mut initial = BuildState::new("b5");
        initial.phase = Phase::Planning;
        store.save(initial).await.unwrap();

        let orch = SinglePageOrchestrator::new(
            Arc::new(ScriptedTransport::new(vec![])),
            store.clone(),
            EventBus::new(),
            dir.path().to_path_buf(),
            "mock-model",
        );
        let build_inputs = inputs();

        let state = orch.step("b5", Mode::VerifyOnly, &build_inputs).await.unwrap();
        assert!(state.last_validation.is_some());
        assert_eq!(state.phase, Phase::Reviewing);
    }

    #[tokio::test]
    async fn abort_transitions_to_aborted_from_any_phase() {
        let store: Arc<dyn BuildStateStore> = Arc::new(InMemoryBuildStateStore::new());
        store.save(BuildState::new("b3")).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let orch = SinglePageOrchestrator::new(
            Arc::new(ScriptedTransport::new(vec![])),
            store.clone(),
            EventBus::new(),
            dir.path().to_path_buf(),
            "mock-model",
        );
        let aborted = orch.abort("b3").await.unwrap();
        assert_eq!(aborted.phase, Phase::Aborted);
    }
}
