//! Content type and template variable registries.
//!
//! A content type is a named kind of email (announcement, digest, ...). Its
//! registered variables describe what templates of that kind expect.

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTENT_TYPE_ICON: &str = "FileText";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentType {
    pub id: String,
    /// Stable key referenced by templates and generation requests
    pub code: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub icon: String,
    /// Templates tagged with this code
    #[serde(default)]
    pub templates_count: i64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContentTypeRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContentTypeRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVariable {
    pub id: String,
    /// Code of the owning content type
    pub content_type: String,
    pub variable_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_required: bool,
    pub display_order: i64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub version: i64,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateVariableRequest {
    pub content_type: String,
    pub variable_name: String,
    #[serde(alias = "variableDescription")]
    pub description: String,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default = "default_required")]
    pub is_required: bool,
    #[serde(default)]
    pub display_order: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateVariableRequest {
    #[serde(default)]
    pub variable_name: Option<String>,
    #[serde(default, alias = "variableDescription")]
    pub description: Option<String>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub is_required: Option<bool>,
    #[serde(default)]
    pub display_order: Option<i64>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Query parameters for listing template variables.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVariableFilter {
    #[serde(default)]
    pub content_type: Option<String>,
}
