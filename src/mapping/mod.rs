//! Template variable mapping.
//!
//! Resolves each template variable to a value from a mapping rule or the
//! rendering context, applies an optional transform and records how the value
//! was obtained.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::context::{insert_path, lookup_path};
use crate::generator::truncate_on_word;
use crate::models::{MappingLogEntry, MappingOrigin, MappingRule};

pub const PREVIEW_CHARS: usize = 60;

static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("html tag pattern is valid"));

/// Merge stored template rules with per-request rules; request rules win per variable.
pub fn effective_rules(stored: &[MappingRule], requested: &[MappingRule]) -> Vec<MappingRule> {
    let mut rules: Vec<MappingRule> = stored
        .iter()
        .filter(|rule| !requested.iter().any(|r| r.variable == rule.variable))
        .cloned()
        .collect();
    rules.extend(requested.iter().cloned());
    rules
}

/// Resolve every variable against `context`, writing rule values back into it.
pub fn resolve_mappings(
    context: &mut Value,
    variables: &[String],
    rules: &[MappingRule],
) -> Vec<MappingLogEntry> {
    variables
        .iter()
        .map(|variable| {
            let rule = rules.iter().find(|r| &r.variable == variable);
            resolve_one(context, variable, rule)
        })
        .collect()
}

fn resolve_one(context: &mut Value, variable: &str, rule: Option<&MappingRule>) -> MappingLogEntry {
    let mut entry = MappingLogEntry {
        variable: variable.to_string(),
        origin: MappingOrigin::Unresolved,
        path: None,
        transform: rule.and_then(|r| r.transform.clone()),
        value_preview: None,
        note: None,
    };

    let static_value = rule.and_then(|r| r.static_value.clone());
    let source = rule.and_then(|r| r.source.as_deref());

    let resolved = if let Some(value) = static_value {
        entry.origin = MappingOrigin::Static;
        Some(value)
    } else if let Some(value) = source.and_then(|path| lookup_path(context, path)) {
        entry.origin = MappingOrigin::Source;
        entry.path = source.map(str::to_string);
        Some(value_to_string(value))
    } else if let Some(value) = lookup_path(context, variable) {
        entry.origin = MappingOrigin::Context;
        entry.path = Some(variable.to_string());
        if let Some(path) = source {
            entry.note = Some(format!("source {} not found in context", path));
        }
        Some(value_to_string(value))
    } else {
        if let Some(path) = source {
            entry.note = Some(format!("source {} not found in context", path));
        }
        None
    };

    let Some(mut value) = resolved else {
        return entry;
    };

    let mut transformed = false;
    if let Some(spec) = entry.transform.clone() {
        match apply_transform(&value, &spec) {
            Ok(result) => {
                value = result;
                transformed = true;
            }
            Err(reason) => {
                tracing::warn!("Transform {} for {} not applied: {}", spec, variable, reason);
                entry.note = Some(reason);
            }
        }
    }

    // Context values are already in place unless a transform changed them
    if entry.origin != MappingOrigin::Context || transformed {
        if !insert_path(context, variable, Value::String(value.clone())) {
            tracing::warn!("Cannot write mapped value at {}", variable);
            entry.note = Some(format!("cannot write a value at {}", variable));
        }
    }

    entry.value_preview = Some(value.chars().take(PREVIEW_CHARS).collect());
    entry
}

/// Plain-text form of a context value.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Apply a named transform. `Err` carries the reason the value was left as is.
pub fn apply_transform(value: &str, spec: &str) -> Result<String, String> {
    let (name, arg) = match spec.split_once(':') {
        Some((name, arg)) => (name.trim(), Some(arg.trim())),
        None => (spec.trim(), None),
    };

    match name {
        "upper" => Ok(value.to_uppercase()),
        "lower" => Ok(value.to_lowercase()),
        "trim" => Ok(value.trim().to_string()),
        "capitalize" => {
            let mut chars = value.chars();
            Ok(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            })
        }
        "strip_html" => Ok(HTML_TAG
            .replace_all(value, " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")),
        "truncate" => {
            let limit = arg
                .and_then(|a| a.parse::<usize>().ok())
                .ok_or_else(|| format!("truncate needs a length, got {}", spec))?;
            Ok(truncate_on_word(value, limit))
        }
        "date" => format_date(value)
            .ok_or_else(|| format!("{} is not a date", value)),
        _ => Err(format!("unknown transform {}", name)),
    }
}

/// `2025-05-15` or an RFC 3339 timestamp to `15 May 2025`.
fn format_date(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(trimmed).ok().map(|dt| dt.date_naive()))?;
    Some(date.format("%-d %B %Y").to_string())
}
