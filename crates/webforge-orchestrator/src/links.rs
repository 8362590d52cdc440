//! Cross-page link validator. Checks every ordered pair `(source, target)`
//! among session pages — including `source == target` — for a
//! quote-normalized `href="<target.path>"` reference, matching the
//! original's loop rather than special-casing the diagonal.

use webforge_types::{ErrorDetail, PageSpec, Severity};

fn has_link_to(html: &str, target_path: &str) -> bool {
    html.contains(&format!("href=\"{target_path}\"")) || html.contains(&format!("href='{target_path}'"))
}

/// Returns one `ErrorDetail` per missing ordered pair.
pub fn validate_links(
    pages: &[PageSpec],
    page_html: &std::collections::HashMap<String, (String, Option<String>)>,
) -> Vec<ErrorDetail> {
    let mut errors = Vec::new();
    for source in pages {
        let Some((html, _)) = page_html.get(&source.id) else {
            continue;
        };
        for target in pages {
            if !has_link_to(html, &target.path) {
                errors.push(ErrorDetail {
                    rule_id: "cross-page-link-missing".to_string(),
                    rule_category: "navigation".to_string(),
                    path: Some(source.path.clone()),
                    line: 0,
                    excerpt: String::new(),
                    message: format!(
                        "page \"{}\" does not link to \"{}\" ({})",
                        source.name, target.name, target.path
                    ),
                    suggested_fix: Some(format!(r#"add href="{}" somewhere in the page"#, target.path)),
                    severity: Severity::Warning,
                });
            }
        }
    }
    errors
}
