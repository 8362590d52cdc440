//! Line-based diffing, grounded on the `similar` crate the way the pack's
//! git-internals and coding-agent repos use it for unified diffs. Two
//! distinct uses: `compute_change_summary` reports human-facing
//! files/lines-changed stats over the page HTML/JS content; `unified_diff_text`
//! / `apply_unified_diff` diff the serialized page list itself so a
//! `VersionDiff` can reconstruct the exact prior `Vec<ProjectPage>`.

use std::collections::{BTreeMap, BTreeSet};

use similar::{ChangeTag, TextDiff};
use webforge_types::{ChangeSummary, ProjectPage};

/// `pages/<slug>.html` / `pages/<slug>.js` file map, mirroring the original
/// implementation's change-summary file naming.
pub fn page_file_map(pages: &[ProjectPage]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for page in pages {
        let slug = page.slug.clone().unwrap_or_else(|| page.id.clone());
        map.insert(format!("pages/{slug}.html"), page.html.clone());
        if let Some(js) = &page.js {
            map.insert(format!("pages/{slug}.js"), js.clone());
        }
    }
    map
}

pub fn compute_change_summary(
    prev: &[ProjectPage],
    curr: &[ProjectPage],
    tasks_completed: Vec<String>,
) -> ChangeSummary {
    let prev_map = page_file_map(prev);
    let curr_map = page_file_map(curr);

    let all_paths: BTreeSet<&String> = prev_map.keys().chain(curr_map.keys()).collect();
    let mut files_changed = 0u32;
    let mut lines_added = 0u32;
    let mut lines_deleted = 0u32;
    let mut changed_files = Vec::new();

    for path in all_paths {
        let old = prev_map.get(path).map(String::as_str).unwrap_or("");
        let new = curr_map.get(path).map(String::as_str).unwrap_or("");
        if old == new {
            continue;
        }
        files_changed += 1;
        changed_files.push(path.clone());
        for change in TextDiff::from_lines(old, new).iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => lines_added += 1,
                ChangeTag::Delete => lines_deleted += 1,
                ChangeTag::Equal => {}
            }
        }
    }

    let description = if changed_files.is_empty() {
        "No page content changed".to_string()
    } else {
        format!("Updated {} file(s): {}", changed_files.len(), changed_files.join(", "))
    };

    ChangeSummary {
        files_changed,
        lines_added,
        lines_deleted,
        description,
        tasks_completed,
    }
}

/// A unified diff between two whole-document texts (here, pretty-printed
/// JSON page lists), with a plain two-line header and `@@ -a,b +c,d @@` hunks.
pub fn unified_diff_text(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header("base", "version")
        .to_string()
}

/// Reconstructs `new` from `old` and a diff produced by [`unified_diff_text`].
/// Hunk handling mirrors `webforge-tools`' patch applier: context lines must
/// match, `-` lines are dropped, `+` lines are inserted; unlike the tool
/// layer's applier this is never asked to reject a malformed diff since the
/// input always comes from `unified_diff_text` itself.
pub fn apply_unified_diff(old: &str, diff_text: &str) -> String {
    let hunk_header = regex_lite_header();
    let old_lines: Vec<&str> = old.split_inclusive('\n').collect();
    let mut result = String::new();
    let mut idx = 0usize;
    let mut in_hunk = false;

    for line in diff_text.lines() {
        if let Some(start) = hunk_header(line) {
            for l in &old_lines[idx..start.min(old_lines.len())] {
                result.push_str(l);
            }
            idx = start;
            in_hunk = true;
            continue;
        }
        if !in_hunk {
            continue;
        }
        if let Some(tag) = line.chars().next() {
            match tag {
                ' ' => {
                    if idx < old_lines.len() {
                        result.push_str(old_lines[idx]);
                    } else {
                        result.push_str(&line[1..]);
                        result.push('\n');
                    }
                    idx += 1;
                }
                '-' => {
                    idx += 1;
                }
                '+' => {
                    result.push_str(&line[1..]);
                    result.push('\n');
                }
                '\\' => {}
                _ => {}
            }
        }
    }
    for l in &old_lines[idx..] {
        result.push_str(l);
    }
    result
}

/// Parses an `@@ -a,b +c,d @@` header into the 0-indexed old-file start line.
fn regex_lite_header() -> impl Fn(&str) -> Option<usize> {
    let re = once_cell::sync::Lazy::new(|| regex::Regex::new(r"^@@ -(\d+)").unwrap());
    move |line: &str| {
        re.captures(line)
            .and_then(|c| c[1].parse::<usize>().ok())
            .map(|n| n.saturating_sub(1))
    }
}
