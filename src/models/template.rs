//! Email template model and the template-analysis result shapes.

use serde::{Deserialize, Serialize};

/// Binds one template placeholder to a value.
///
/// Resolution order is `static_value`, then `source` (a dotted path into the
/// rendering context), optionally passed through `transform`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    pub variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub name: String,
    /// Code of the content type this template belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub html_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_template: Option<String>,
    /// Placeholders detected in `html_content`, recomputed on every save
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub required_variables: Vec<String>,
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(alias = "template_html")]
    pub html_content: String,
    #[serde(default)]
    pub subject_template: Option<String>,
    #[serde(default)]
    pub required_variables: Vec<String>,
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub html_content: Option<String>,
    #[serde(default)]
    pub subject_template: Option<String>,
    #[serde(default)]
    pub required_variables: Option<Vec<String>>,
    #[serde(default)]
    pub mappings: Option<Vec<MappingRule>>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Query parameters for listing templates.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFilter {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Marketing role of a block of text inside an email.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Preheader,
    Headline,
    Subheadline,
    Body,
    Cta,
    Agenda,
    Speaker,
    Benefits,
    SocialProof,
    Deadline,
    Footer,
    Other,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Preheader => "preheader",
            BlockKind::Headline => "headline",
            BlockKind::Subheadline => "subheadline",
            BlockKind::Body => "body",
            BlockKind::Cta => "cta",
            BlockKind::Agenda => "agenda",
            BlockKind::Speaker => "speaker",
            BlockKind::Benefits => "benefits",
            BlockKind::SocialProof => "social_proof",
            BlockKind::Deadline => "deadline",
            BlockKind::Footer => "footer",
            BlockKind::Other => "other",
        }
    }
}

/// A run of visible text found in template HTML.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedBlock {
    pub text: String,
    /// Innermost enclosing tag, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub length: usize,
    pub kind: BlockKind,
    pub variable_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedVariable {
    pub name: String,
    pub kind: BlockKind,
    pub original_text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAnalysis {
    pub original_html: String,
    pub template_html: String,
    pub blocks: Vec<DetectedBlock>,
    pub variables: Vec<DetectedVariable>,
    /// Placeholders already present in the submitted HTML
    pub existing_placeholders: Vec<String>,
    pub blocks_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeTemplateRequest {
    #[serde(default, alias = "html_content")]
    pub html_content: Option<String>,
}
