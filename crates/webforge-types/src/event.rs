//! Wire event taxonomy published on the Event Bus. Modeled as a tagged enum
//! (the teacher's convention for mission events) rather than the flat
//! all-optional-fields struct the pre-distillation service used internally.

use serde::{Deserialize, Serialize};

use crate::model::ErrorDetail;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Running,
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Done,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "card_type", rename_all = "snake_case")]
pub enum Card {
    Page {
        id: String,
        name: String,
        path: String,
    },
    BuildPlan {
        pages: Vec<serde_json::Value>,
        tasks: Vec<serde_json::Value>,
        estimated_tasks: u32,
        #[serde(default)]
        features: Vec<String>,
        #[serde(default)]
        design_system: serde_json::Value,
        #[serde(default)]
        estimated_complexity: Option<String>,
    },
    Validation {
        errors: Vec<ErrorDetail>,
        suggestions: Vec<String>,
        #[serde(default)]
        page_id: Option<String>,
        #[serde(default)]
        page_name: Option<String>,
        #[serde(default)]
        page_path: Option<String>,
        #[serde(default)]
        retry_count: Option<u32>,
    },
    Version {
        version: serde_json::Value,
    },
}

/// One event on the bus. Every variant carries enough identifying fields
/// (`session_id` at the envelope level, see [`Envelope`]) that a reconnecting
/// subscriber can make sense of it without replay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TaskStarted {
        task_id: String,
        title: String,
    },
    TaskDone {
        task_id: String,
        title: String,
    },
    TaskFailed {
        task_id: String,
        title: String,
        #[serde(default)]
        error: Option<String>,
    },
    AgentThinking {
        task_id: String,
        title: String,
    },
    ToolCall {
        task_id: String,
        title: String,
    },
    Card(Card),
    PlanUpdate {
        plan: serde_json::Value,
    },
    PreviewUpdate {
        page_id: String,
    },
    BuildComplete {
        status: BuildOutcome,
        #[serde(default)]
        message: Option<String>,
    },
}

/// The unit actually carried on the broadcast channel: an [`Event`] plus the
/// session/build identifier it belongs to, so a single bus can multiplex
/// many concurrent builds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub session_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub event: Event,
}

impl Envelope {
    pub fn new(session_id: impl Into<String>, event: Event) -> Self {
        Self {
            session_id: session_id.into(),
            project_id: None,
            event,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// SSE event name this envelope renders as. `task_started`/`task_done`/
    /// `task_failed`/`agent_thinking`/`tool_call`/`build_complete` all ride
    /// the same `task` frame, distinguished by `data.type`.
    pub fn sse_event_name(&self) -> &'static str {
        match &self.event {
            Event::TaskStarted { .. }
            | Event::TaskDone { .. }
            | Event::TaskFailed { .. }
            | Event::AgentThinking { .. }
            | Event::ToolCall { .. }
            | Event::BuildComplete { .. } => "task",
            Event::Card(_) => "card",
            Event::PlanUpdate { .. } => "plan_update",
            Event::PreviewUpdate { .. } => "preview_update",
        }
    }
}
