//! Agent Bridge: adapts an LLM transport to typed request/response pairs
//! for the Planner, Implementer, and Reviewer. Grounded on the original
//! implementation's `BaseAgent`: build a JSON user message, call the
//! transport, run a fixed three-step JSON repair pipeline, validate against
//! the agent's output schema.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use webforge_types::{BuildGraph, PatchSet, ReviewReport, TokenUsage};

#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// The LLM transport boundary (§6, consumed). No production implementation
/// ships here; a mock implementation backs tests and `mock_llm` settings.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn chat_complete(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        temperature: f32,
    ) -> anyhow::Result<ChatResponse>;
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("empty response from model")]
    EmptyResponse,
    #[error("invalid JSON from model: {0}")]
    InvalidJson(String),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct AgentResult<T> {
    pub output: T,
    pub raw_response: String,
    pub token_usage: TokenUsage,
    pub model: String,
}

/// Strips a wrapping ``` ``` ``` fence, if present.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.first().map(|l| l.starts_with("```")).unwrap_or(false) {
        lines.remove(0);
    }
    if lines.last().map(|l| l.trim().starts_with("```")).unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

/// Slices from the first `{` to the last `}`.
fn extract_json_text(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Escapes raw control characters found inside JSON string literals via a
/// quote/escape state machine — not a blind global replace, since control
/// bytes outside strings (indentation newlines) must be left alone.
fn sanitize_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape = false;
    for ch in text.chars() {
        if escape {
            out.push(ch);
            escape = false;
            continue;
        }
        if ch == '\\' {
            out.push(ch);
            escape = true;
            continue;
        }
        if ch == '"' {
            out.push(ch);
            in_string = !in_string;
            continue;
        }
        if in_string && (ch as u32) < 0x20 {
            match ch {
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                other => out.push_str(&format!("\\u{:04x}", other as u32)),
            }
            continue;
        }
        out.push(ch);
    }
    out
}

fn parse_output<T: DeserializeOwned>(response: &str) -> Result<T, AgentError> {
    let text = strip_code_fence(response);
    if text.is_empty() {
        return Err(AgentError::EmptyResponse);
    }

    let mut candidates: Vec<String> = vec![text.clone()];
    if let Some(extracted) = extract_json_text(&text) {
        candidates.push(extracted.to_string());
    }

    for candidate in &candidates {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if let Ok(parsed) = serde_json::from_value(value) {
                return Ok(parsed);
            }
        }
        let sanitized = sanitize_json(candidate);
        if let Ok(value) = serde_json::from_str::<Value>(&sanitized) {
            if let Ok(parsed) = serde_json::from_value(value) {
                return Ok(parsed);
            }
        }
    }

    Err(AgentError::InvalidJson(text.chars().take(200).collect()))
}

const TRANSPORT_RETRIES: u32 = 3;

/// Calls the transport with up to [`TRANSPORT_RETRIES`] attempts, sleeping
/// `2^attempt` seconds between retries; the last failure is returned as-is.
async fn chat_complete_with_retry(
    chat: &dyn ChatCompletion,
    model: &str,
    messages: Vec<ChatMessage>,
    temperature: f32,
) -> anyhow::Result<ChatResponse> {
    let mut attempt = 0;
    loop {
        match chat.chat_complete(model, messages.clone(), temperature).await {
            Ok(response) => return Ok(response),
            Err(err) if attempt + 1 < TRANSPORT_RETRIES => {
                tracing::warn!(attempt, error = %err, "chat transport failed, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(2u64.pow(attempt))).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn run_agent<T: DeserializeOwned>(
    chat: &dyn ChatCompletion,
    model: &str,
    temperature: f32,
    system_prompt: &str,
    user_message: String,
) -> Result<AgentResult<T>, AgentError> {
    let response = chat_complete_with_retry(
        chat,
        model,
        vec![
            ChatMessage {
                role: "system",
                content: system_prompt.to_string(),
            },
            ChatMessage {
                role: "user",
                content: user_message,
            },
        ],
        temperature,
    )
    .await?;

    let output = parse_output::<T>(&response.content)?;
    Ok(AgentResult {
        output,
        raw_response: response.content,
        token_usage: response.usage,
        model: response.model,
    })
}

fn json_block<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

const PLANNER_PROMPT: &str = "You are the planning agent. Create a BuildGraph from the brief, build plan, and product document.\n\nOutput ONLY valid JSON matching the BuildGraph schema: tasks (<=15, each <=5 files, testable acceptance criteria) and notes.";

pub struct PlannerAgent {
    pub model: String,
}

impl PlannerAgent {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }

    pub async fn run(
        &self,
        chat: &dyn ChatCompletion,
        brief: &Value,
        build_plan: &Value,
        product_doc: &Value,
    ) -> Result<AgentResult<BuildGraph>, AgentError> {
        let user_message = format!(
            "# Brief\n{}\n\n# Build Plan\n{}\n\n# Product Doc\n{}\n\nCreate BuildGraph:",
            json_block(brief),
            json_block(build_plan),
            json_block(product_doc)
        );
        run_agent(chat, &self.model, 0.3, PLANNER_PROMPT, user_message).await
    }
}

const IMPLEMENTER_PROMPT: &str = "You are the implementing agent. Generate a unified diff for the given task.\n\nOutput ONLY valid JSON matching the PatchSet schema: id, task_id, diff, touched_files (<=5), notes.";

pub struct ImplementerAgent {
    pub model: String,
}

impl ImplementerAgent {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }

    pub async fn run(
        &self,
        chat: &dyn ChatCompletion,
        task: &Value,
        relevant_files: &std::collections::HashMap<String, String>,
        state_digest: Option<&Value>,
        feedback: Option<&Value>,
    ) -> Result<AgentResult<PatchSet>, AgentError> {
        let acceptance = task
            .get("acceptance")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut message = format!("# Task\n{}\n\n# Acceptance\n", json_block(task));
        if acceptance.is_empty() {
            message.push_str("- None");
        } else {
            for item in &acceptance {
                message.push_str(&format!("- {}\n", item.as_str().unwrap_or_default()));
            }
        }
        if let Some(state) = state_digest {
            message.push_str(&format!("\n\n# Build State\n{}", json_block(state)));
        }
        if let Some(feedback) = feedback {
            message.push_str(&format!("\n\n# Context\n{}", json_block(feedback)));
        }
        for (path, content) in relevant_files {
            let snippet: String = content.chars().take(500).collect();
            message.push_str(&format!("\n\n## {path}\n```\n{snippet}\n```\n"));
        }

        run_agent(chat, &self.model, 0.2, IMPLEMENTER_PROMPT, message).await
    }
}

const REVIEWER_PROMPT: &str = "You are the reviewing agent. Review the patch against the task's acceptance criteria, the validation report, and the check report.\n\nApprove only if all criteria are met, validation passed, checks passed, and there are no security issues. Otherwise request changes.\n\nOutput ONLY valid JSON matching the ReviewReport schema: decision (approve|request_changes), reasons, required_fixes.";

pub struct ReviewerAgent {
    pub model: String,
}

impl ReviewerAgent {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }

    pub async fn run(
        &self,
        chat: &dyn ChatCompletion,
        task: &Value,
        patchset: &Value,
        validation_report: &Value,
        check_report: &Value,
    ) -> Result<AgentResult<ReviewReport>, AgentError> {
        let message = format!(
            "# Task\n{}\n\n# Patch\n{}\n\n# Validation\n{}\n\n# Checks\n{}\n\nReview:",
            json_block(task),
            json_block(patchset),
            json_block(validation_report),
            json_block(check_report)
        );
        run_agent(chat, &self.model, 0.3, REVIEWER_PROMPT, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTransport(String);

    #[async_trait]
    impl ChatCompletion for EchoTransport {
        async fn chat_complete(
            &self,
            _model: &str,
            _messages: Vec<ChatMessage>,
            _temperature: f32,
        ) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse {
                content: self.0.clone(),
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
                model: "mock-model".to_string(),
            })
        }
    }

    struct FlakyTransport {
        remaining_failures: std::sync::atomic::AtomicU32,
        content: String,
    }

    #[async_trait]
    impl ChatCompletion for FlakyTransport {
        async fn chat_complete(
            &self,
            _model: &str,
            _messages: Vec<ChatMessage>,
            _temperature: f32,
        ) -> anyhow::Result<ChatResponse> {
            if self
                .remaining_failures
                .fetch_update(std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                })
                .is_ok()
            {
                anyhow::bail!("synthetic transport failure");
            }
            Ok(ChatResponse {
                content: self.content.clone(),
                usage: TokenUsage::default(),
                model: "mock-model".to_string(),
            })
        }
    }

    #[test]
    fn strip_code_fence_removes_wrapping_fence() {
        let text = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fence(text), "{\"a\":1}");
    }

    #[test]
    fn sanitize_json_escapes_only_inside_strings() {
        let raw = "{\"a\":\"line1\nline2\"}\n";
        let sanitized = sanitize_json(raw);
        assert!(sanitized.contains("line1\\nline2"));
        // The structural trailing newline outside any string is untouched.
        assert!(sanitized.ends_with('\n'));
    }

    #[tokio::test]
    async fn planner_parses_fenced_build_graph() {
        let fenced = "```json\n{\"tasks\":[],\"notes\":\"ok\"}\n```";
        let transport = EchoTransport(fenced.to_string());
        let planner = PlannerAgent::new("mock-model");
        let result = planner
            .run(&transport, &json!({}), &json!({}), &json!({}))
            .await
            .unwrap();
        assert_eq!(result.output.notes.as_deref(), Some("ok"));
        assert_eq!(result.token_usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn parse_output_repairs_control_characters_in_strings() {
        let broken = "{\"decision\":\"approve\",\"reasons\":[\"has a\nnewline\"],\"required_fixes\":[]}";
        let transport = EchoTransport(broken.to_string());
        let reviewer = ReviewerAgent::new("mock-model");
        let result = reviewer
            .run(&transport, &json!({}), &json!({}), &json!({}), &json!({}))
            .await
            .unwrap();
        assert_eq!(result.output.reasons.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_retries_twice_then_succeeds() {
        let fenced = "```json\n{\"tasks\":[],\"notes\":\"ok\"}\n```";
        let transport = FlakyTransport {
            remaining_failures: std::sync::atomic::AtomicU32::new(2),
            content: fenced.to_string(),
        };
        let planner = PlannerAgent::new("mock-model");
        let result = planner
            .run(&transport, &json!({}), &json!({}), &json!({}))
            .await
            .unwrap();
        assert_eq!(result.output.notes.as_deref(), Some("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_gives_up_after_max_retries() {
        let transport = FlakyTransport {
            remaining_failures: std::sync::atomic::AtomicU32::new(10),
            content: String::new(),
        };
        let planner = PlannerAgent::new("mock-model");
        let err = planner.run(&transport, &json!({}), &json!({}), &json!({})).await;
        assert!(matches!(err, Err(AgentError::Transport(_))));
    }

    #[tokio::test]
    async fn empty_response_is_an_error() {
        let transport = EchoTransport(String::new());
        let planner = PlannerAgent::new("mock-model");
        let err = planner
            .run(&transport, &json!({}), &json!({}), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::EmptyResponse));
    }
}
