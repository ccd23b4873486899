//! Request and response shapes for rendering, context building and email generation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::MappingRule;

/// Body of `POST /api/render`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    #[serde(default, alias = "template_html")]
    pub template_html: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    pub html: String,
    pub content_keys: Vec<String>,
    pub rendered_at: String,
}

/// Caller-supplied values that win over campaign and default values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_top_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cta_bottom_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preheader: Option<String>,
}

/// Body of `POST /api/context`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRequest {
    #[serde(default, alias = "event_id")]
    pub event_id: String,
    #[serde(default, alias = "template_type")]
    pub campaign_type: Option<String>,
    #[serde(default)]
    pub overrides: ContextOverrides,
}

fn default_max_length() -> usize {
    500
}

fn default_top_k() -> usize {
    5
}

/// A retrieval-augmented generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(default, alias = "event_id")]
    pub event_id: String,
    #[serde(default)]
    pub prompt: String,
    /// Restrict retrieval to these knowledge content types; empty means all
    #[serde(default, alias = "content_types")]
    pub content_types: Vec<String>,
    #[serde(default = "default_max_length", alias = "max_length")]
    pub max_length: usize,
    #[serde(default = "default_top_k", alias = "top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnippet {
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedText {
    pub generated_text: String,
    pub sources_used: usize,
    #[serde(default)]
    pub sources: Vec<SourceSnippet>,
}

/// Body of `POST /api/emails/compose`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRequest {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content_plan: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedEmail {
    pub subject: String,
    pub html: String,
    /// Generated text keyed by the dotted placeholder it filled
    pub generated: BTreeMap<String, String>,
    pub context_keys: Vec<String>,
}

/// Body of `POST /api/emails/generate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEmailRequest {
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub content_type_code: Option<String>,
    #[serde(default)]
    pub content_plan: Option<String>,
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Where a variable's final value came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MappingOrigin {
    Static,
    Source,
    Context,
    /// Default value registered for the content type
    Default,
    Unresolved,
}

/// One line of the trace explaining how a template variable was resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingLogEntry {
    pub variable: String,
    pub origin: MappingOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedEmail {
    pub subject: String,
    pub preheader: String,
    pub html: String,
    pub content_validation: ValidationReport,
    pub html_validation: ValidationReport,
    pub mapping_log: Vec<MappingLogEntry>,
    pub template_id: String,
    pub event_id: String,
}
