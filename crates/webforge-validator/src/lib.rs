//! Pure, synchronous scanning and normalization of generated HTML/JS. No
//! I/O, no async — callers (the Tool Layer, the orchestrators) own wiring
//! this into the rest of the build runtime.

mod rules;
mod sanitize;

pub use sanitize::{extract_body_content, normalize_html, sanitize_html};

use webforge_types::ValidationReport;

/// `ValidateHTML` from the component design: scans for the fixed ruleset,
/// then normalizes (sanitize body, wrap/augment with a document skeleton).
pub fn validate_html(html: &str, path: Option<&str>) -> ValidationReport {
    let error_details = rules::scan_html(html, path);
    let errors: Vec<String> = error_details.iter().map(|d| d.message.clone()).collect();

    let body = sanitize::extract_body_content(html);
    let sanitized = sanitize::sanitize_html(&body);
    let normalized = sanitize::normalize_html(&sanitized);

    ValidationReport {
        ok: errors.is_empty(),
        errors,
        warnings: Vec::new(),
        normalized_html: Some(normalized),
        error_details,
        js_valid: true,
    }
}

/// `ValidateJS` from the component design.
pub fn validate_js(code: &str, path: Option<&str>) -> (bool, Vec<String>, Vec<webforge_types::ErrorDetail>) {
    let error_details = rules::scan_js(code, path);
    let errors: Vec<String> = error_details.iter().map(|d| d.message.clone()).collect();
    (errors.is_empty(), errors, error_details)
}

/// Combined HTML+JS pass used by the Tool Layer's `RunValidator`.
pub fn validate_page(html: &str, js: Option<&str>, html_path: Option<&str>, js_path: Option<&str>) -> ValidationReport {
    let mut report = validate_html(html, html_path);
    if let Some(js) = js {
        let (js_valid, js_errors, js_details) = validate_js(js, js_path);
        report.js_valid = js_valid;
        report.errors.extend(js_errors);
        report.error_details.extend(js_details);
        report.ok = report.ok && js_valid;
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_html_flags_script_tag_as_not_ok() {
        let report = validate_html("<script>alert(1)</script>", Some("pages/home.html"));
        assert!(!report.ok);
        assert!(report
            .error_details
            .iter()
            .any(|d| d.rule_id == "html-no-script-tag"));
    }

    #[test]
    fn validate_html_clean_input_is_ok_and_normalized() {
        let report = validate_html("<section><h1>Hi</h1></section>", None);
        assert!(report.ok);
        assert!(report.normalized_html.unwrap().starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn validate_page_aggregates_html_and_js_errors() {
        let report = validate_page(
            "<div>ok</div>",
            Some("localStorage.setItem('x', '1')"),
            None,
            None,
        );
        assert!(!report.ok);
        assert!(!report.js_valid);
        assert!(report
            .error_details
            .iter()
            .any(|d| d.rule_id == "js-no-localstorage"));
    }
}
