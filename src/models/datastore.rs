//! Datastore snapshot served to the dashboard.

use serde::{Deserialize, Serialize};

use super::{Campaign, ContentType, EmailTemplate, Event, KnowledgeEntry, TemplateVariable};

/// The root datastore containing all dashboard data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datastore {
    pub schema_version: i32,
    pub generated_at: String,
    pub revision_id: i64,
    pub events: Vec<Event>,
    pub templates: Vec<EmailTemplate>,
    pub knowledge: Vec<KnowledgeEntry>,
    pub campaigns: Vec<Campaign>,
    pub content_types: Vec<ContentType>,
    pub template_variables: Vec<TemplateVariable>,
}

/// Revision information for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub revision_id: i64,
    pub generated_at: String,
}
