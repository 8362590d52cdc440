//! Sanitization and normalization of generated HTML. Sanitization runs
//! through `ammonia` (the ecosystem's html-sanitizer crate) against a
//! conservative allow-list; normalization wraps partial markup in a
//! standard document skeleton.

use once_cell::sync::Lazy;
use regex::Regex;

const ALLOWED_TAGS: &[&str] = &[
    "div", "span", "p", "h1", "h2", "h3", "h4", "h5", "h6", "a", "img", "ul", "ol", "li", "button",
    "form", "input", "textarea", "label", "select", "option", "section", "article", "header",
    "footer", "nav", "main", "table", "tr", "td", "th", "thead", "tbody", "strong", "em", "br",
    "hr", "small", "sub", "sup",
];

fn allowed_attrs_for(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "title", "target"],
        "img" => &["src", "alt", "title"],
        "input" => &["type", "name", "value", "placeholder", "required", "disabled"],
        "textarea" => &["name", "placeholder", "required", "disabled", "rows", "cols"],
        "select" => &["name", "required", "disabled"],
        "option" => &["value", "disabled", "selected"],
        "button" => &["type", "disabled", "name", "value"],
        "form" => &["method", "action"],
        _ => &[],
    }
}

const GLOBAL_ATTRS: &[&str] = &["class", "id", "style"];

/// Strips disallowed tags/attributes. `data-*` attributes are always kept.
pub fn sanitize_html(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .generic_attributes(GLOBAL_ATTRS.iter().copied().collect())
        .add_generic_attribute_prefixes(&["data-"])
        .strip_comments(true);

    let mut per_tag_attrs = std::collections::HashMap::new();
    for tag in ALLOWED_TAGS {
        let attrs = allowed_attrs_for(tag);
        if !attrs.is_empty() {
            per_tag_attrs.insert(*tag, attrs.iter().copied().collect());
        }
    }
    builder.tag_attributes(per_tag_attrs);

    builder.clean(html).to_string()
}

static FULL_DOCUMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<!DOCTYPE|<html").unwrap());
static HEAD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(<head[^>]*>)").unwrap());
static BODY_EXTRACT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body[^>]*>(.*?)</body>").unwrap());

/// Inserts a viewport meta tag into an existing document, or wraps partial
/// markup in a standard document skeleton with a generic title placeholder.
pub fn normalize_html(html: &str) -> String {
    if FULL_DOCUMENT.is_match(html) {
        if html.contains("viewport") {
            return html.to_string();
        }
        return HEAD_OPEN
            .replace(
                html,
                "$1\n    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">",
            )
            .to_string();
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n    <meta charset=\"UTF-8\">\n    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n    <title>Untitled Page</title>\n</head>\n<body>\n{html}\n</body>\n</html>"
    )
}

pub fn extract_body_content(html: &str) -> String {
    BODY_EXTRACT
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| html.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_wraps_partial_markup() {
        let wrapped = normalize_html("<p>hi</p>");
        assert!(wrapped.starts_with("<!DOCTYPE html>"));
        assert!(wrapped.contains("<title>Untitled Page</title>"));
        assert!(wrapped.contains("viewport"));
    }

    #[test]
    fn normalize_is_idempotent_on_full_document() {
        let once = normalize_html("<p>hi</p>");
        let twice = normalize_html(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_inserts_viewport_when_missing() {
        let doc = "<!DOCTYPE html><html><head><title>x</title></head><body></body></html>";
        let normalized = normalize_html(doc);
        assert!(normalized.contains("viewport"));
    }

    #[test]
    fn sanitize_strips_script_tags() {
        let cleaned = sanitize_html("<div>hi<script>alert(1)</script></div>");
        assert!(!cleaned.contains("script"));
        assert!(cleaned.contains("hi"));
    }

    #[test]
    fn sanitize_keeps_per_tag_attributes_for_every_allowed_tag_not_just_the_last() {
        let cleaned = sanitize_html(
            r#"<a href="/about">About</a><img src="/hero.png" alt="hero"><form method="post" action="/submit"><input name="email" type="email"></form>"#,
        );
        assert!(cleaned.contains(r#"href="/about""#));
        assert!(cleaned.contains(r#"src="/hero.png""#));
        assert!(cleaned.contains(r#"method="post""#));
        assert!(cleaned.contains(r#"action="/submit""#));
        assert!(cleaned.contains(r#"name="email""#));
    }

    #[test]
    fn sanitize_keeps_data_attributes() {
        let cleaned = sanitize_html(r#"<div data-testid="hero">x</div>"#);
        assert!(cleaned.contains("data-testid"));
    }

    #[test]
    fn extract_body_pulls_inner_content() {
        let html = "<html><body><p>hi</p></body></html>";
        assert_eq!(extract_body_content(html).trim(), "<p>hi</p>");
    }

    #[test]
    fn extract_body_falls_back_to_full_input() {
        assert_eq!(extract_body_content("<p>hi</p>"), "<p>hi</p>");
    }
}
