//! Multi-Page Orchestrator: `StreamProgress`, `RetryPage`, and cancellation.
//! Grounded on `multi_task_orchestrator.py`'s page loop; unlike the
//! Single-Page Orchestrator, a page here is generated as one full HTML (and
//! optional JS) document per LLM call, not a unified diff against a tree.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;
use webforge_core::{ChatCompletion, ChatMessage, EventBus};
use webforge_types::{
    BuildOutcome, BuildPlanStatus, BuildPlanTaskStatus, BuildSession, Card, Envelope, ErrorDetail, Event,
    PageSpec, ProjectPage, Version,
};

use crate::links::validate_links;
use crate::pages::ProjectPageStore;
use crate::plan::{expand_build_plan, BuildPlanStore};
use crate::session::SessionRegistry;

const MAX_PAGE_RETRIES: u32 = 3;

#[async_trait]
pub trait ThumbnailEnqueuer: Send + Sync {
    async fn enqueue_thumbnail(&self, project_id: &str, page_id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait VersionRecorder: Send + Sync {
    async fn record_success(
        &self,
        project_id: &str,
        branch_id: &str,
        tasks_completed: Vec<String>,
    ) -> anyhow::Result<Version>;

    async fn record_failure(
        &self,
        project_id: &str,
        branch_id: &str,
        errors: Vec<ErrorDetail>,
        message: String,
    ) -> anyhow::Result<()>;
}

static HTML_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)```html\s*(.*?)```").unwrap());
static JS_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)```(?:js|javascript)\s*(.*?)```").unwrap());

fn parse_page_output(raw: &str) -> (Option<String>, Option<String>) {
    let html = HTML_FENCE
        .captures(raw)
        .map(|c| c[1].trim().to_string())
        .or_else(|| {
            let trimmed = raw.trim();
            (!trimmed.is_empty() && JS_FENCE.find(raw).map(|m| m.start()).unwrap_or(trimmed.len()) > 0)
                .then(|| trimmed.to_string())
        });
    let js = JS_FENCE.captures(raw).map(|c| c[1].trim().to_string());
    (html, js)
}

fn build_page_prompt(
    page: &PageSpec,
    product_doc: &Value,
    previously_generated: &[PageSpec],
    all_pages: &[PageSpec],
) -> String {
    let nav: Vec<&str> = all_pages.iter().map(|p| p.path.as_str()).collect();
    let prior: Vec<&str> = previously_generated.iter().map(|p| p.name.as_str()).collect();
    format!(
        "# Product Doc\n{}\n\n# Page\nname: {}\npath: {}\nsections: {:?}\n\n# Site navigation\n{:?}\n\n# Already generated\n{:?}\n\nReturn one ```html``` fenced block with the full page, and optionally one ```js``` fenced block.",
        serde_json::to_string_pretty(product_doc).unwrap_or_default(),
        page.name,
        page.path,
        page.sections,
        nav,
        prior,
    )
}

pub struct MultiPageOrchestrator {
    chat: Arc<dyn ChatCompletion>,
    model: String,
    events: EventBus,
    sessions: SessionRegistry,
    plans: Arc<dyn BuildPlanStore>,
    pages: Arc<dyn ProjectPageStore>,
    thumbnails: Arc<dyn ThumbnailEnqueuer>,
    versions: Arc<dyn VersionRecorder>,
}

impl MultiPageOrchestrator {
    pub fn new(
        chat: Arc<dyn ChatCompletion>,
        model: impl Into<String>,
        events: EventBus,
        plans: Arc<dyn BuildPlanStore>,
        pages: Arc<dyn ProjectPageStore>,
        thumbnails: Arc<dyn ThumbnailEnqueuer>,
        versions: Arc<dyn VersionRecorder>,
    ) -> Self {
        Self {
            chat,
            model: model.into(),
            events,
            sessions: SessionRegistry::new(),
            plans,
            pages,
            thumbnails,
            versions,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn publish(&self, session_id: &str, project_id: &str, event: Event) {
        self.events
            .publish(Envelope::new(session_id, event).with_project(project_id.to_string()));
    }

    pub async fn create_session(
        &self,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        branch_id: impl Into<String>,
        pages: Vec<PageSpec>,
    ) -> anyhow::Result<Arc<tokio::sync::RwLock<BuildSession>>> {
        let project_id = project_id.into();
        let branch_id = branch_id.into();
        let session_id = Uuid::new_v4().to_string();
        let plan_id = Uuid::new_v4().to_string();

        let plan = expand_build_plan(plan_id.clone(), project_id.clone(), &pages);
        self.plans.save(plan).await?;

        let session = BuildSession {
            id: session_id.clone(),
            project_id: project_id.clone(),
            user_id: user_id.into(),
            pages,
            build_plan_id: plan_id,
            task_mapping: {
                let mut m = HashMap::new();
                m.insert("branch_id".to_string(), branch_id);
                m
            },
            ..Default::default()
        };
        Ok(self.sessions.insert(session).await)
    }

    /// Runs the per-page pipeline for every page in order, main page first,
    /// then (when no page failed) the cross-page link validator.
    pub async fn stream_progress(&self, session_id: &str, product_doc: &Value) -> anyhow::Result<BuildOutcome> {
        let handle = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown session {session_id}"))?;

        let ordered_pages = {
            let session = handle.read().await;
            let mut pages = session.pages.clone();
            pages.sort_by_key(|p| !p.is_main);
            pages
        };

        for page in &ordered_pages {
            if handle.read().await.is_cancelled {
                let project_id = handle.read().await.project_id.clone();
                self.cancel_plan(&handle).await;
                self.publish(
                    session_id,
                    &project_id,
                    Event::BuildComplete {
                        status: BuildOutcome::Failed,
                        message: Some("Build cancelled".to_string()),
                    },
                );
                return Ok(BuildOutcome::Failed);
            }
            self.process_page(&handle, page, product_doc, &ordered_pages).await?;
        }

        self.finalize(&handle, &ordered_pages).await
    }

    async fn process_page(
        &self,
        handle: &Arc<tokio::sync::RwLock<BuildSession>>,
        page: &PageSpec,
        product_doc: &Value,
        all_pages: &[PageSpec],
    ) -> anyhow::Result<()> {
        let (session_id, project_id, branch_id, previously_generated) = {
            let session = handle.read().await;
            let branch_id = session.task_mapping.get("branch_id").cloned().unwrap_or_default();
            let generated: Vec<PageSpec> = all_pages
                .iter()
                .take_while(|p| p.id != page.id)
                .filter(|p| session.completed_pages.contains(&p.id))
                .cloned()
                .collect();
            (session.id.clone(), session.project_id.clone(), branch_id, generated)
        };

        self.publish(
            &session_id,
            &project_id,
            Event::TaskStarted {
                task_id: format!("page-{}", page.id),
                title: format!("Generate {}", page.name),
            },
        );

        let prompt = build_page_prompt(page, product_doc, &previously_generated, all_pages);
        let raw = self
            .chat
            .chat_complete(
                &self.model,
                vec![ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                0.4,
            )
            .await?;
        let (html, js) = parse_page_output(&raw.content);

        let Some(html) = html else {
            self.fail_page(handle, page, Vec::new(), "empty page generation output".to_string())
                .await;
            return Ok(());
        };

        self.mark_task(handle, &format!("style-{}", page.id), BuildPlanTaskStatus::Done)
            .await;

        let report = webforge_validator::validate_page(&html, js.as_deref(), Some(page.path.as_str()), None);
        if !report.ok {
            self.mark_task(handle, &format!("validate-{}", page.id), BuildPlanTaskStatus::Failed)
                .await;
            self.publish(
                &session_id,
                &project_id,
                Event::Card(Card::Validation {
                    errors: report.error_details.clone(),
                    suggestions: Vec::new(),
                    page_id: Some(page.id.clone()),
                    page_name: Some(page.name.clone()),
                    page_path: Some(page.path.clone()),
                    retry_count: None,
                }),
            );
            self.fail_page(handle, page, report.error_details, "validation failed".to_string())
                .await;
            return Ok(());
        }
        self.mark_task(handle, &format!("validate-{}", page.id), BuildPlanTaskStatus::Done)
            .await;
        self.mark_task(handle, &format!("secure-{}", page.id), BuildPlanTaskStatus::Done)
            .await;

        let normalized_html = report.normalized_html.unwrap_or(html);
        self.save_page(&project_id, &branch_id, page, &normalized_html, js.as_deref())
            .await?;
        self.mark_task(handle, &format!("save-{}", page.id), BuildPlanTaskStatus::Done)
            .await;

        {
            let mut session = handle.write().await;
            session.completed_pages.insert(page.id.clone());
            session.failed_pages.remove(&page.id);
            session
                .page_html
                .insert(page.id.clone(), (normalized_html, js));
        }

        match self.thumbnails.enqueue_thumbnail(&project_id, &page.id).await {
            Ok(()) => {
                self.mark_task(handle, &format!("thumb-{}", page.id), BuildPlanTaskStatus::Done)
                    .await;
            }
            Err(_) => {
                self.mark_task(handle, &format!("thumb-{}", page.id), BuildPlanTaskStatus::Skipped)
                    .await;
            }
        }

        self.publish(
            &session_id,
            &project_id,
            Event::TaskDone {
                task_id: format!("page-{}", page.id),
                title: format!("Generate {}", page.name),
            },
        );
        self.publish(&session_id, &project_id, Event::PreviewUpdate { page_id: page.id.clone() });
        Ok(())
    }

    async fn save_page(
        &self,
        project_id: &str,
        branch_id: &str,
        page: &PageSpec,
        html: &str,
        js: Option<&str>,
    ) -> anyhow::Result<()> {
        let existing = self.pages.find(branch_id, &page.path, &page.name).await?;
        let sort_order = (self.pages.max_sort_order(branch_id).await? + 1).max(0);

        let project_page = ProjectPage {
            id: existing.as_ref().map(|p| p.id.clone()).unwrap_or_else(|| Uuid::new_v4().to_string()),
            project_id: project_id.to_string(),
            branch_id: branch_id.to_string(),
            name: page.name.clone(),
            slug: None,
            path: page.path.clone(),
            is_home: page.is_main,
            sort_order: existing.as_ref().map(|p| p.sort_order).unwrap_or(sort_order),
            html: html.to_string(),
            js: js.map(|s| s.to_string()),
            design_system: Value::Null,
            thumbnail_url: existing.and_then(|p| p.thumbnail_url),
            updated_at: chrono::Utc::now(),
        };

        let saved = self.pages.upsert(project_page).await?;
        if page.is_main {
            self.pages.clear_home(branch_id, &saved.id).await?;
        }
        Ok(())
    }

    async fn fail_page(
        &self,
        handle: &Arc<tokio::sync::RwLock<BuildSession>>,
        page: &PageSpec,
        errors: Vec<ErrorDetail>,
        reason: String,
    ) {
        let (session_id, project_id) = {
            let mut session = handle.write().await;
            session.failed_pages.insert(page.id.clone());
            session.failed_page_errors.insert(page.id.clone(), errors);
            (session.id.clone(), session.project_id.clone())
        };
        self.mark_task(handle, &format!("page-{}", page.id), BuildPlanTaskStatus::Failed)
            .await;
        self.publish(
            &session_id,
            &project_id,
            Event::TaskFailed {
                task_id: format!("page-{}", page.id),
                title: format!("Generate {}", page.name),
                error: Some(reason),
            },
        );
    }

    async fn mark_task(&self, handle: &Arc<tokio::sync::RwLock<BuildSession>>, key: &str, status: BuildPlanTaskStatus) {
        let plan_id = handle.read().await.build_plan_id.clone();
        if let Ok(mut plan) = self.plans.load(&plan_id).await {
            if let Some(task) = plan.task_mut(key) {
                task.status = status;
            }
            let _ = self.plans.save(plan).await;
        }
    }

    /// Transitions the session's `BuildPlan` row to `Cancelled` and publishes
    /// the updated plan snapshot. Called on the cancellation path before the
    /// `build_complete` frame goes out.
    async fn cancel_plan(&self, handle: &Arc<tokio::sync::RwLock<BuildSession>>) {
        let (session_id, project_id, plan_id) = {
            let session = handle.read().await;
            (session.id.clone(), session.project_id.clone(), session.build_plan_id.clone())
        };
        if let Ok(mut plan) = self.plans.load(&plan_id).await {
            plan.status = BuildPlanStatus::Cancelled;
            if self.plans.save(plan.clone()).await.is_ok() {
                self.publish(
                    &session_id,
                    &project_id,
                    Event::PlanUpdate {
                        plan: serde_json::to_value(&plan).unwrap_or(Value::Null),
                    },
                );
            }
        }
    }

    async fn finalize(
        &self,
        handle: &Arc<tokio::sync::RwLock<BuildSession>>,
        all_pages: &[PageSpec],
    ) -> anyhow::Result<BuildOutcome> {
        let (session_id, project_id, branch_id, has_failures, failed_count) = {
            let session = handle.read().await;
            (
                session.id.clone(),
                session.project_id.clone(),
                session.task_mapping.get("branch_id").cloned().unwrap_or_default(),
                session.has_failures(),
                session.failed_pages.len(),
            )
        };

        if has_failures {
            self.mark_task(handle, "project-links", BuildPlanTaskStatus::Skipped).await;
            self.mark_task(handle, "project-final", BuildPlanTaskStatus::Skipped).await;
            self.publish(
                &session_id,
                &project_id,
                Event::BuildComplete {
                    status: BuildOutcome::Failed,
                    message: Some(format!("completed with {failed_count} failed page(s)")),
                },
            );
            self.sessions.remove_if_clean(&session_id).await;
            return Ok(BuildOutcome::Failed);
        }

        let link_errors = {
            let session = handle.read().await;
            validate_links(all_pages, &session.page_html)
        };

        if !link_errors.is_empty() {
            {
                let mut session = handle.write().await;
                session.final_checks_failed = true;
                session.project_error_details = link_errors.clone();
            }
            self.versions
                .record_failure(&project_id, &branch_id, link_errors, "cross-page link check failed".to_string())
                .await
                .ok();
            self.publish(
                &session_id,
                &project_id,
                Event::BuildComplete {
                    status: BuildOutcome::Failed,
                    message: Some("cross-page link check failed".to_string()),
                },
            );
            self.sessions.remove_if_clean(&session_id).await;
            return Ok(BuildOutcome::Failed);
        }

        self.mark_task(handle, "project-links", BuildPlanTaskStatus::Done).await;
        self.mark_task(handle, "project-final", BuildPlanTaskStatus::Done).await;

        let tasks_completed: Vec<String> = all_pages.iter().map(|p| format!("Generated {}", p.name)).collect();
        let version = self
            .versions
            .record_success(&project_id, &branch_id, tasks_completed)
            .await?;

        self.publish(
            &session_id,
            &project_id,
            Event::Card(Card::Version {
                version: serde_json::to_value(&version).unwrap_or(Value::Null),
            }),
        );
        self.publish(
            &session_id,
            &project_id,
            Event::BuildComplete {
                status: BuildOutcome::Done,
                message: Some("build complete".to_string()),
            },
        );
        self.sessions.remove_if_clean(&session_id).await;
        Ok(BuildOutcome::Done)
    }

    /// Clears `page_id` from the failed set, increments its retry counter
    /// unconditionally, and — unless the counter already exceeds the cap —
    /// re-runs the per-page pipeline for just that page. On a clean retry
    /// with no other failures, re-runs the project-level finalize steps too.
    pub async fn retry_page(
        &self,
        session_id: &str,
        page_id: &str,
        product_doc: &Value,
    ) -> anyhow::Result<BuildOutcome> {
        let handle = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown session {session_id}"))?;

        let (exceeded, page, all_pages) = {
            let mut session = handle.write().await;
            let count = session.retry_counts.entry(page_id.to_string()).or_insert(0);
            *count += 1;
            let exceeded = *count > MAX_PAGE_RETRIES;
            let page = session.pages.iter().find(|p| p.id == page_id).cloned();
            (exceeded, page, session.pages.clone())
        };

        let Some(page) = page else {
            anyhow::bail!("unknown page {page_id} in session {session_id}");
        };

        if exceeded {
            let project_id = handle.read().await.project_id.clone();
            self.publish(
                session_id,
                &project_id,
                Event::TaskFailed {
                    task_id: format!("page-{page_id}"),
                    title: format!("Generate {}", page.name),
                    error: Some("retry cap exceeded".to_string()),
                },
            );
            return Ok(BuildOutcome::Failed);
        }

        {
            let mut session = handle.write().await;
            session.failed_pages.remove(page_id);
        }

        self.process_page(&handle, &page, product_doc, &all_pages).await?;

        let has_failures = handle.read().await.has_failures();
        if has_failures {
            return Ok(BuildOutcome::Failed);
        }
        self.finalize(&handle, &all_pages).await
    }

    /// Sets `is_cancelled`; the running `stream_progress` loop observes it at
    /// the next page boundary.
    pub async fn cancel(&self, session_id: &str) -> anyhow::Result<()> {
        let handle = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown session {session_id}"))?;
        handle.write().await.is_cancelled = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as atrait;
    use webforge_core::ChatResponse;
    use webforge_types::TokenUsage;

    struct ScriptedChat(tokio::sync::Mutex<Vec<String>>);

    impl ScriptedChat {
        fn new(responses: Vec<&str>) -> Self {
            Self(tokio::sync::Mutex::new(responses.into_iter().map(String::from).rev().collect()))
        }
    }

    #[atrait]
    impl ChatCompletion for ScriptedChat {
        async fn chat_complete(&self, _model: &str, _messages: Vec<ChatMessage>, _temperature: f32) -> anyhow::Result<ChatResponse> {
            let content = self.0.lock().await.pop().expect("no more scripted responses");
            Ok(ChatResponse {
                content,
                usage: TokenUsage::default(),
                model: "mock-model".to_string(),
            })
        }
    }

    struct NoopThumbnails;
    #[atrait]
    impl ThumbnailEnqueuer for NoopThumbnails {
        async fn enqueue_thumbnail(&self, _project_id: &str, _page_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct RecordingVersions {
        succeeded: std::sync::atomic::AtomicBool,
    }
    #[atrait]
    impl VersionRecorder for RecordingVersions {
        async fn record_success(&self, project_id: &str, branch_id: &str, tasks_completed: Vec<String>) -> anyhow::Result<Version> {
            self.succeeded.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(Version {
                id: "v1".to_string(),
                project_id: project_id.to_string(),
                parent_version_id: None,
                branch_id: branch_id.to_string(),
                branch_label: None,
                created_at: chrono::Utc::now(),
                change_summary: webforge_types::ChangeSummary {
                    tasks_completed,
                    ..Default::default()
                },
                validation_status: webforge_types::ValidationStatus::Passed,
                is_pinned: false,
                snapshot_id: None,
            })
        }

        async fn record_failure(&self, _project_id: &str, _branch_id: &str, _errors: Vec<ErrorDetail>, _message: String) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn page(id: &str, name: &str, path: &str, is_main: bool) -> PageSpec {
        PageSpec {
            id: id.to_string(),
            name: name.to_string(),
            path: path.to_string(),
            sections: vec![],
            is_main,
        }
    }

    #[test]
    fn parse_page_output_extracts_html_and_js_fences() {
        let raw = "```html\n<html><a href=\"/\">x</a></html>\n```\n```js\nconsole.log(1)\n```";
        let (html, js) = parse_page_output(raw);
        assert!(html.unwrap().contains("<html>"));
        assert!(js.unwrap().contains("console.log"));
    }

    #[tokio::test]
    async fn stream_progress_happy_path_records_a_version() {
        let home_html = r#"```html
<html><body><a href="/">Home</a></body></html>
```"#;
        let chat = Arc::new(ScriptedChat::new(vec![home_html]));
        let versions = Arc::new(RecordingVersions {
            succeeded: std::sync::atomic::AtomicBool::new(false),
        });

        let orch = MultiPageOrchestrator::new(
            chat,
            "mock-model",
            EventBus::new(),
            Arc::new(crate::plan::InMemoryBuildPlanStore::new()),
            Arc::new(crate::pages::InMemoryProjectPageStore::new()),
            Arc::new(NoopThumbnails),
            versions.clone(),
        );

        let handle = orch
            .create_session("proj-1", "user-1", "branch-1", vec![page("home", "Home", "/", true)])
            .await
            .unwrap();
        let session_id = handle.read().await.id.clone();

        let outcome = orch.stream_progress(&session_id, &serde_json::json!({})).await.unwrap();
        assert_eq!(outcome, BuildOutcome::Done);
        assert!(versions.succeeded.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stream_progress_fails_page_on_empty_output() {
        let chat = Arc::new(ScriptedChat::new(vec![""]));
        let versions = Arc::new(RecordingVersions {
            succeeded: std::sync::atomic::AtomicBool::new(false),
        });

        let orch = MultiPageOrchestrator::new(
            chat,
            "mock-model",
            EventBus::new(),
            Arc::new(crate::plan::InMemoryBuildPlanStore::new()),
            Arc::new(crate::pages::InMemoryProjectPageStore::new()),
            Arc::new(NoopThumbnails),
            versions,
        );

        let handle = orch
            .create_session("proj-1", "user-1", "branch-1", vec![page("home", "Home", "/", true)])
            .await
            .unwrap();
        let session_id = handle.read().await.id.clone();

        let outcome = orch.stream_progress(&session_id, &serde_json::json!({})).await.unwrap();
        assert_eq!(outcome, BuildOutcome::Failed);
    }

    #[tokio::test]
    async fn retry_page_increments_counter_even_past_the_cap() {
        let chat = Arc::new(ScriptedChat::new(vec![]));
        let versions = Arc::new(RecordingVersions {
            succeeded: std::sync::atomic::AtomicBool::new(false),
        });
        let orch = MultiPageOrchestrator::new(
            chat,
            "mock-model",
            EventBus::new(),
            Arc::new(crate::plan::InMemoryBuildPlanStore::new()),
            Arc::new(crate::pages::InMemoryProjectPageStore::new()),
            Arc::new(NoopThumbnails),
            versions,
        );
        let handle = orch
            .create_session("proj-1", "user-1", "branch-1", vec![page("home", "Home", "/", true)])
            .await
            .unwrap();
        let session_id = handle.read().await.id.clone();
        {
            let mut session = handle.write().await;
            session.failed_pages.insert("home".to_string());
            session.retry_counts.insert("home".to_string(), MAX_PAGE_RETRIES);
        }

        let outcome = orch.retry_page(&session_id, "home", &serde_json::json!({})).await.unwrap();
        assert_eq!(outcome, BuildOutcome::Failed);
        assert_eq!(*handle.read().await.retry_counts.get("home").unwrap(), MAX_PAGE_RETRIES + 1);
    }

    #[tokio::test]
    async fn cancel_short_circuits_before_next_page() {
        let chat = Arc::new(ScriptedChat::new(vec![]));
        let versions = Arc::new(RecordingVersions {
            succeeded: std::sync::atomic::AtomicBool::new(false),
        });
        let plans = Arc::new(crate::plan::InMemoryBuildPlanStore::new());
        let orch = MultiPageOrchestrator::new(
            chat,
            "mock-model",
            EventBus::new(),
            plans.clone(),
            Arc::new(crate::pages::InMemoryProjectPageStore::new()),
            Arc::new(NoopThumbnails),
            versions,
        );
        let handle = orch
            .create_session("proj-1", "user-1", "branch-1", vec![page("home", "Home", "/", true)])
            .await
            .unwrap();
        let session_id = handle.read().await.id.clone();
        let plan_id = handle.read().await.build_plan_id.clone();
        orch.cancel(&session_id).await.unwrap();
        let outcome = orch.stream_progress(&session_id, &serde_json::json!({})).await.unwrap();
        assert_eq!(outcome, BuildOutcome::Failed);

        let plan = plans.load(&plan_id).await.unwrap();
        assert_eq!(plan.status, BuildPlanStatus::Cancelled);
    }
}
