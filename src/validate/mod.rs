//! Checks run over a generated email before it is shown.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{MappingLogEntry, MappingOrigin, ValidationReport};

const SUBJECT_MAX_CHARS: usize = 100;
const PREHEADER_MAX_CHARS: usize = 150;
/// Gmail clips messages above roughly this size.
const HTML_MAX_BYTES: usize = 102_400;

static IMG_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("img pattern is valid"));
static ALT_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\balt\s*=\s*("[^"]*"|'[^']*')"#).expect("alt pattern is valid"));
static HREF_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("href pattern is valid")
});

impl ValidationReport {
    fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Subject, preheader and required-variable checks.
pub fn validate_content(
    subject: &str,
    preheader: &str,
    required_variables: &[String],
    mapping_log: &[MappingLogEntry],
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let subject_chars = subject.trim().chars().count();
    if subject_chars == 0 {
        errors.push("Subject is empty".to_string());
    } else if subject_chars > SUBJECT_MAX_CHARS {
        warnings.push(format!(
            "Subject is {} characters; keep it under {}",
            subject_chars, SUBJECT_MAX_CHARS
        ));
    }

    let preheader_chars = preheader.trim().chars().count();
    if preheader_chars == 0 {
        warnings.push("Preheader is empty".to_string());
    } else if preheader_chars > PREHEADER_MAX_CHARS {
        warnings.push(format!(
            "Preheader is {} characters; keep it under {}",
            preheader_chars, PREHEADER_MAX_CHARS
        ));
    }

    for variable in required_variables {
        let resolved = mapping_log
            .iter()
            .any(|entry| &entry.variable == variable && entry.origin != MappingOrigin::Unresolved);
        if !resolved {
            errors.push(format!("Required variable {} has no value", variable));
        }
    }

    ValidationReport::from_findings(errors, warnings)
}

/// Structural checks over rendered HTML.
pub fn validate_html(html: &str) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if html.contains("{{") || html.contains("{%") {
        errors.push("Rendered HTML still contains template syntax".to_string());
    }

    if html.len() > HTML_MAX_BYTES {
        warnings.push(format!(
            "HTML is {} bytes; messages over {} bytes may be clipped",
            html.len(),
            HTML_MAX_BYTES
        ));
    }

    let missing_alt = IMG_TAG
        .find_iter(html)
        .filter(|img| !ALT_ATTR.is_match(img.as_str()))
        .count();
    if missing_alt > 0 {
        warnings.push(format!("{} image(s) without alt text", missing_alt));
    }

    let mut has_unsubscribe = false;
    let mut empty_links = 0;
    for caps in HREF_ATTR.captures_iter(html) {
        let href = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        if href.is_empty() || href == "#" {
            empty_links += 1;
        }
        if href.to_lowercase().contains("unsubscribe") {
            has_unsubscribe = true;
        }
    }
    if empty_links > 0 {
        warnings.push(format!("{} link(s) with an empty or # target", empty_links));
    }

    let lower = html.to_lowercase();
    if !has_unsubscribe && !lower.contains("unsubscribe") && !lower.contains("отписаться") {
        warnings.push("No unsubscribe link found".to_string());
    }

    ValidationReport::from_findings(errors, warnings)
}
