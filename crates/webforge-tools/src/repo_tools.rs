//! `ReadFile`/`Search`/`ApplyPatch` facades over a project checkout. Ported
//! from the original implementation's unified-diff hunk applier: refuses
//! paths that escape the project root, refuses overlapping hunks, verifies
//! context/removal lines before writing anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoToolError {
    #[error("path escapes project root: {0}")]
    PathEscape(String),
    #[error("malformed diff: {0}")]
    MalformedDiff(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct ApplyPatchResult {
    pub applied: bool,
    pub touched: Vec<String>,
    pub errors: Vec<String>,
}

pub struct RepoTools {
    project_path: PathBuf,
}

impl RepoTools {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, RepoToolError> {
        let full = self.project_path.join(path);
        let normalized = normalize_path(&full);
        let root = normalize_path(&self.project_path);
        if !normalized.starts_with(&root) {
            return Err(RepoToolError::PathEscape(path.to_string()));
        }
        Ok(full)
    }

    pub async fn read(
        &self,
        path: &str,
        start_line: usize,
        end_line: Option<usize>,
    ) -> Result<String, RepoToolError> {
        let full = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&full).await?;
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let end = end_line.unwrap_or(lines.len()).min(lines.len());
        let start = start_line.min(end);
        Ok(lines[start..end].concat())
    }

    /// Case-sensitive `*`/`?` glob match against file names, skipping VCS
    /// and dependency directories. Capped at 50 results.
    pub async fn search(&self, query: &str) -> Result<Vec<String>, RepoToolError> {
        let mut matches = Vec::new();
        let mut stack = vec![self.project_path.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_name = entry.file_name();
                let name = file_name.to_string_lossy();
                if path.is_dir() {
                    if matches!(name.as_ref(), ".git" | "node_modules" | "target" | "__pycache__") {
                        continue;
                    }
                    stack.push(path);
                    continue;
                }
                if glob_match(query, &name) {
                    if let Ok(rel) = path.strip_prefix(&self.project_path) {
                        matches.push(rel.to_string_lossy().replace('\\', "/"));
                    }
                }
                if matches.len() >= 50 {
                    return Ok(matches);
                }
            }
        }
        Ok(matches)
    }

    pub async fn apply_patch(&self, diff: &str) -> ApplyPatchResult {
        let mut result = ApplyPatchResult::default();
        let file_hunks = match parse_diff(diff) {
            Ok(parsed) => parsed,
            Err(err) => {
                result.errors.push(err.to_string());
                return result;
            }
        };

        for (file_path, payload) in file_hunks {
            let outcome = self.apply_one(&file_path, &payload).await;
            match outcome {
                Ok(Some(touched)) => result.touched.push(touched),
                Ok(None) => {}
                Err(err) => result.errors.push(format!("{file_path}: {err}")),
            }
        }

        result.applied = result.errors.is_empty();
        result
    }

    async fn apply_one(
        &self,
        file_path: &str,
        payload: &FileHunks,
    ) -> Result<Option<String>, RepoToolError> {
        let full_path = self.resolve(file_path)?;

        if payload.delete {
            if full_path.exists() {
                tokio::fs::remove_file(&full_path).await?;
                return Ok(Some(file_path.to_string()));
            }
            return Ok(None);
        }

        let original = if full_path.exists() {
            tokio::fs::read_to_string(&full_path).await?
        } else if payload.new_file {
            String::new()
        } else {
            return Err(RepoToolError::MalformedDiff(format!(
                "file not found: {file_path}"
            )));
        };

        let new_content = apply_hunks(&original, &payload.hunks)?;
        if new_content != original || !full_path.exists() {
            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full_path, new_content).await?;
            return Ok(Some(file_path.to_string()));
        }
        Ok(None)
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(pat: &[char], text: &[char]) -> bool {
        match (pat.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                helper(&pat[1..], text) || (!text.is_empty() && helper(pat, &text[1..]))
            }
            (Some('?'), Some(_)) => helper(&pat[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => helper(&pat[1..], &text[1..]),
            _ => false,
        }
    }
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    helper(&pat, &txt)
}

#[derive(Debug, Default)]
struct Hunk {
    old_start: usize,
    lines: Vec<(char, String)>,
}

#[derive(Debug, Default)]
struct FileHunks {
    hunks: Vec<Hunk>,
    delete: bool,
    new_file: bool,
}

fn parse_diff(diff: &str) -> Result<HashMap<String, FileHunks>, RepoToolError> {
    let mut files: HashMap<String, FileHunks> = HashMap::new();
    let mut current_file: Option<String> = None;
    let mut current_old: Option<String> = None;

    let hunk_header = regex::Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap();

    for line in diff.lines() {
        if line.starts_with("diff --git") {
            current_file = None;
            current_old = None;
            continue;
        }
        if let Some(rest) = line.strip_prefix("--- ") {
            current_old = Some(rest.split('\t').next().unwrap_or(rest).to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            let new_path = rest.split('\t').next().unwrap_or(rest).to_string();
            if new_path == "/dev/null" {
                let old = current_old
                    .clone()
                    .ok_or_else(|| RepoToolError::MalformedDiff("delete without original path".into()))?;
                let path = old.strip_prefix("a/").unwrap_or(&old).to_string();
                files.insert(
                    path.clone(),
                    FileHunks {
                        hunks: Vec::new(),
                        delete: true,
                        new_file: false,
                    },
                );
                current_file = Some(path);
                continue;
            }
            let path = new_path.strip_prefix("b/").unwrap_or(&new_path).to_string();
            let new_file = current_old.as_deref() == Some("/dev/null");
            files.insert(
                path.clone(),
                FileHunks {
                    hunks: Vec::new(),
                    delete: false,
                    new_file,
                },
            );
            current_file = Some(path);
            continue;
        }
        if let Some(caps) = hunk_header.captures(line) {
            let file = current_file
                .clone()
                .ok_or_else(|| RepoToolError::MalformedDiff("hunk without file header".into()))?;
            let old_start: usize = caps[1].parse().unwrap_or(1);
            files
                .get_mut(&file)
                .expect("file registered by header")
                .hunks
                .push(Hunk {
                    old_start,
                    lines: Vec::new(),
                });
            continue;
        }
        if let Some(file) = &current_file {
            if let Some(entry) = files.get_mut(file) {
                if let Some(hunk) = entry.hunks.last_mut() {
                    if let Some(tag) = line.chars().next() {
                        if tag == ' ' || tag == '+' || tag == '-' {
                            hunk.lines.push((tag, line[1..].to_string()));
                        }
                    }
                }
            }
        }
    }

    Ok(files)
}

fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, RepoToolError> {
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let mut result = String::new();
    let mut idx = 0usize;

    for hunk in hunks {
        let start_index = hunk.old_start.saturating_sub(1);
        if start_index < idx {
            return Err(RepoToolError::MalformedDiff("overlapping hunks detected".into()));
        }
        for line in &lines[idx..start_index.min(lines.len())] {
            result.push_str(line);
        }
        idx = start_index;

        for (tag, text) in &hunk.lines {
            match tag {
                ' ' => {
                    let current = lines.get(idx).map(|l| l.trim_end_matches('\n'));
                    if current != Some(text.as_str()) {
                        return Err(RepoToolError::MalformedDiff("hunk context mismatch".into()));
                    }
                    result.push_str(lines[idx]);
                    idx += 1;
                }
                '-' => {
                    let current = lines.get(idx).map(|l| l.trim_end_matches('\n'));
                    if current != Some(text.as_str()) {
                        return Err(RepoToolError::MalformedDiff("hunk removal mismatch".into()));
                    }
                    idx += 1;
                }
                '+' => {
                    result.push_str(text);
                    result.push('\n');
                }
                _ => {}
            }
        }
    }

    for line in &lines[idx..] {
        result.push_str(line);
    }

    Ok(result)
}
