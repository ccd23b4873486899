//! Email template rendering on top of Tera.
//!
//! Templates are registered under an `.html` name so Tera's autoescaping
//! applies to every interpolated value. Placeholders the content does not
//! define render as empty strings.

use std::error::Error as _;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};
use thiserror::Error;

use crate::context::{insert_path, lookup_path};

const TEMPLATE_NAME: &str = "email.html";
const TEXT_TEMPLATE_NAME: &str = "subject.txt";

/// `{{ path.to.value | filter }}` with optional whitespace control dashes.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{-?\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*(?:\|[^}]*)?-?\}\}")
        .expect("placeholder pattern is valid")
});

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    InvalidContext(String),

    #[error("template parse error: {0}")]
    Parse(String),

    #[error("template rendering failed: {0}")]
    Render(String),
}

/// Render `template_html` with `content` as the root context.
///
/// `content` must be a JSON object; its top-level keys become template variables.
pub fn render_template(template_html: &str, content: &Value) -> Result<String, RenderError> {
    render_named(TEMPLATE_NAME, template_html, content)
}

/// Render a plain-text template such as a subject line, without escaping.
pub fn render_text(template: &str, content: &Value) -> Result<String, RenderError> {
    render_named(TEXT_TEMPLATE_NAME, template, content)
}

// Tera picks autoescaping from the template name suffix.
fn render_named(name: &str, source: &str, content: &Value) -> Result<String, RenderError> {
    if !content.is_object() {
        return Err(RenderError::InvalidContext(
            "content must be a JSON object".to_string(),
        ));
    }

    let mut tera = Tera::default();
    tera.set_escape_fn(escape_html);
    tera.add_raw_template(name, source)
        .map_err(|e| RenderError::Parse(describe(&e)))?;

    let mut values = content.clone();
    for path in placeholders(source) {
        let defined = lookup_path(&values, &path).is_some_and(|v| !v.is_null());
        if !defined && !insert_path(&mut values, &path, Value::String(String::new())) {
            tracing::debug!("Placeholder {} crosses a non-object value", path);
        }
    }

    let context = Context::from_value(values)
        .map_err(|e| RenderError::InvalidContext(describe(&e)))?;

    tera.render(name, &context)
        .map_err(|e| RenderError::Render(describe(&e)))
}

/// HTML escaping for `&`, `<`, `>`, quotes and backslashes; `/` is left as is.
fn escape_html(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&#39;"),
            '\\' => output.push_str("&#92;"),
            _ => output.push(c),
        }
    }
    output
}

/// Top-level keys of a content object, in input order.
pub fn content_keys(content: &Value) -> Vec<String> {
    content
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

/// Unique placeholder paths in order of first appearance.
pub fn placeholders(html: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(html) {
        let path = &caps[1];
        if !found.iter().any(|p| p == path) {
            found.push(path.to_string());
        }
    }
    found
}

/// Whether `html` contains a `{{ path }}` placeholder.
pub fn has_placeholder(html: &str, path: &str) -> bool {
    PLACEHOLDER
        .captures_iter(html)
        .any(|caps| &caps[1] == path)
}

// Tera keeps the useful part of the message in the source chain.
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
