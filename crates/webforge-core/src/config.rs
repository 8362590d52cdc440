//! Typed runtime settings, read once at process start. No config-file
//! parser beyond what the rest of the stack already pulls in; everything
//! else the caller wants reaches the core through explicit arguments.

use std::env;

#[derive(Clone, Debug)]
pub struct Settings {
    pub model: String,
    pub mock_llm: bool,
    pub logs_dir: std::path::PathBuf,
    pub log_retention_days: u64,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            model: env::var("BUILD_RUNTIME_MODEL").unwrap_or_else(|_| "default-model".to_string()),
            mock_llm: env::var("BUILD_RUNTIME_MOCK_LLM")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            logs_dir: env::var("BUILD_RUNTIME_LOGS_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| std::path::PathBuf::from("./logs")),
            log_retention_days: env::var("BUILD_RUNTIME_LOG_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(14),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "default-model".to_string(),
            mock_llm: false,
            logs_dir: std::path::PathBuf::from("./logs"),
            log_retention_days: 14,
        }
    }
}
