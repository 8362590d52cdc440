//! The fixed regex ruleset scanned against generated HTML/JS. Rule ids are
//! stable wire identifiers; do not rename one without treating it as a
//! breaking change for any caller persisting `error_details`.

use once_cell::sync::Lazy;
use regex::Regex;
use webforge_types::{ErrorDetail, Severity};

struct Rule {
    rule_id: &'static str,
    category: &'static str,
    pattern: Lazy<Regex>,
    message: &'static str,
    suggested_fix: &'static str,
}

macro_rules! rule {
    ($id:expr, $category:expr, $pattern:expr, $message:expr, $fix:expr) => {
        Rule {
            rule_id: $id,
            category: $category,
            pattern: Lazy::new(|| Regex::new($pattern).expect("valid rule pattern")),
            message: $message,
            suggested_fix: $fix,
        }
    };
}

static HTML_RULES: &[Rule] = &[
    rule!(
        "csp-no-tailwind-cdn",
        "csp",
        r"(?i)cdn\.tailwindcss\.com",
        "External Tailwind CDN not allowed",
        "Inline Tailwind styles using the built-in compiler."
    ),
    rule!(
        "html-no-script-tag",
        "js-security",
        r"(?i)<script[^>]*>",
        "Script tag detected",
        "Remove script tags and use the platform runtime helpers instead."
    ),
    rule!(
        "html-no-iframe",
        "html-whitelist",
        r"(?i)<iframe",
        "Iframe tag detected",
        "Remove iframe elements from the page."
    ),
    rule!(
        "html-no-object",
        "html-whitelist",
        r"(?i)<object",
        "Object tag detected",
        "Remove object/embed elements from the page."
    ),
    rule!(
        "html-no-embed",
        "html-whitelist",
        r"(?i)<embed",
        "Embed tag detected",
        "Remove object/embed elements from the page."
    ),
    rule!(
        "html-no-javascript-protocol",
        "js-security",
        r"(?i)javascript:",
        "javascript: protocol detected",
        "Replace javascript: URLs with safe event handlers."
    ),
    rule!(
        "html-no-inline-event",
        "js-security",
        r"(?i)\son\w+\s*=",
        "Inline event handler detected",
        "Remove inline event handlers and use approved JS helpers."
    ),
];

static JS_RULES: &[Rule] = &[
    rule!(
        "js-no-eval",
        "js-security",
        r"eva\w*l\s*\(",
        "Code execution not allowed",
        "Remove eval usage and use safe helpers."
    ),
    rule!(
        "js-no-function-constructor",
        "js-security",
        r"Function\s*\(",
        "Function constructor not allowed",
        "Remove Function constructor usage."
    ),
    rule!(
        "js-no-fetch",
        "js-security",
        r"fetch\s*\(",
        "Network requests not allowed",
        "Avoid fetch calls; use the platform form/track helpers."
    ),
    rule!(
        "js-no-xhr",
        "js-security",
        r"XMLHttpRequest",
        "Network requests not allowed",
        "Avoid XMLHttpRequest; use the platform form/track helpers."
    ),
    rule!(
        "js-no-websocket",
        "js-security",
        r"WebSocket",
        "WebSockets not allowed",
        "Remove WebSocket usage."
    ),
    rule!(
        "js-no-localstorage",
        "js-security",
        r"localStorage",
        "Local storage not allowed",
        "Remove localStorage usage."
    ),
    rule!(
        "js-no-sessionstorage",
        "js-security",
        r"sessionStorage",
        "Session storage not allowed",
        "Remove sessionStorage usage."
    ),
    rule!(
        "js-no-cookie",
        "js-security",
        r"document\.cookie",
        "Cookie access not allowed",
        "Remove document.cookie access."
    ),
    rule!(
        "js-no-frame-access",
        "js-security",
        r"window\.(top|parent|opener)",
        "Frame access not allowed",
        "Remove window.top/parent/opener usage."
    ),
    rule!(
        "js-no-string-timeout",
        "js-security",
        r#"setTimeout\s*\(\s*["']"#,
        "String-based setTimeout not allowed",
        "Use function callbacks instead of string-based timers."
    ),
    rule!(
        "js-no-string-interval",
        "js-security",
        r#"setInterval\s*\(\s*["']"#,
        "String-based setInterval not allowed",
        "Use function callbacks instead of string-based timers."
    ),
];

const BLOCKED_GLOBALS: &[&str] = &["fetch", "XMLHttpRequest", "WebSocket", "localStorage", "sessionStorage"];

/// 1-indexed line number and a <=200 char excerpt of the line the match
/// falls on, truncated to exactly the original's rule: first 197 chars plus
/// `"..."` when the line would otherwise exceed 200.
fn line_excerpt(text: &str, match_start: usize, match_end: usize) -> (usize, String) {
    let line = text[..match_start].matches('\n').count() + 1;
    let line_start = text[..match_start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[match_end..]
        .find('\n')
        .map(|i| match_end + i)
        .unwrap_or(text.len());
    let mut excerpt = text[line_start..line_end].trim().to_string();
    if excerpt.len() > 200 {
        excerpt = format!("{}...", &excerpt[..197]);
    }
    (line, excerpt)
}

fn build_detail(
    rule_id: &str,
    category: &str,
    message: &str,
    suggested_fix: &str,
    path: Option<&str>,
    line: usize,
    excerpt: String,
) -> ErrorDetail {
    ErrorDetail {
        rule_id: rule_id.to_string(),
        rule_category: category.to_string(),
        path: path.map(|p| p.to_string()),
        line,
        excerpt,
        message: message.to_string(),
        suggested_fix: Some(suggested_fix.to_string()),
        severity: Severity::Critical,
    }
}

pub fn scan_html(html: &str, path: Option<&str>) -> Vec<ErrorDetail> {
    let mut out = Vec::new();
    for rule in HTML_RULES {
        if let Some(m) = rule.pattern.find(html) {
            let (line, excerpt) = line_excerpt(html, m.start(), m.end());
            out.push(build_detail(
                rule.rule_id,
                rule.category,
                rule.message,
                rule.suggested_fix,
                path,
                line,
                excerpt,
            ));
        }
    }
    out
}

pub fn scan_js(code: &str, path: Option<&str>) -> Vec<ErrorDetail> {
    let mut out = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    for rule in JS_RULES {
        if seen.contains(rule.rule_id) {
            continue;
        }
        if let Some(m) = rule.pattern.find(code) {
            let (line, excerpt) = line_excerpt(code, m.start(), m.end());
            out.push(build_detail(
                rule.rule_id,
                rule.category,
                rule.message,
                rule.suggested_fix,
                path,
                line,
                excerpt,
            ));
            seen.insert(rule.rule_id.to_string());
        }
    }

    for global_name in BLOCKED_GLOBALS {
        let rule_id = format!("js-no-{}", global_name.to_lowercase());
        if seen.contains(&rule_id) {
            continue;
        }
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(global_name)))
            .expect("valid global pattern");
        if let Some(m) = pattern.find(code) {
            let (line, excerpt) = line_excerpt(code, m.start(), m.end());
            out.push(build_detail(
                &rule_id,
                "js-security",
                &format!("{global_name} is not allowed"),
                &format!("Remove {global_name} usage."),
                path,
                line,
                excerpt,
            ));
            seen.insert(rule_id);
        }
    }

    out
}
