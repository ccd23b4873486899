//! Database repository for CRUD operations.
//!
//! Every mutation bumps the datastore revision. Updates use a conditional
//! `WHERE version = ?` so concurrent writers cannot silently overwrite each other.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::errors::AppError;
use crate::models::{
    Campaign, CampaignFilter, CampaignType, ContentType, CreateCampaignRequest,
    CreateContentTypeRequest, CreateEventRequest, CreateKnowledgeRequest, CreateTemplateRequest,
    CreateTemplateVariableRequest, Datastore, EmailTemplate, Event, EventStatus, KnowledgeEntry,
    KnowledgeFilter, RevisionInfo, TemplateFilter, TemplateVariable, TemplateVariableFilter,
    UpdateCampaignRequest, UpdateContentTypeRequest, UpdateEventRequest, UpdateKnowledgeRequest,
    UpdateTemplateRequest, UpdateTemplateVariableRequest, DEFAULT_CONTENT_TYPE_ICON,
};
use crate::render::placeholders;

const EVENT_COLUMNS: &str = "id, name, description, status, site_url, landing_url, location, venue, starts_at, ends_at, contacts, subscribers_count, created_at, updated_at, version";
const TEMPLATE_COLUMNS: &str = "id, event_id, name, content_type, html_content, subject_template, variables, required_variables, mappings, created_at, updated_at, version";
const KNOWLEDGE_COLUMNS: &str = "id, event_id, content_type, title, content, source_url, tags, created_at, updated_at, version";
const CAMPAIGN_COLUMNS: &str = "id, event_id, name, campaign_type, description, subject_a, subject_b, preheader, created_at, updated_at, version";
const CONTENT_TYPE_COLUMNS: &str = "ct.id, ct.code, ct.name, ct.description, ct.icon, ct.created_at, ct.updated_at, ct.version, (SELECT COUNT(*) FROM templates t WHERE t.content_type = ct.code) AS templates_count";
const VARIABLE_COLUMNS: &str = "id, content_type, variable_name, description, default_value, is_required, display_order, created_at, updated_at, version";

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    /// Increment the revision ID and return the new value.
    pub async fn increment_revision(&self) -> Result<i64, AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        self.get_revision_id().await
    }

    /// Get the full datastore.
    pub async fn get_datastore(&self) -> Result<Datastore, AppError> {
        let meta =
            sqlx::query("SELECT schema_version, revision_id, generated_at FROM meta WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;

        let events = self.list_events().await?;
        let templates = self.list_templates(&TemplateFilter::default()).await?;
        let knowledge = self.list_knowledge(&KnowledgeFilter::default()).await?;
        let campaigns = self.list_campaigns(&CampaignFilter::default()).await?;
        let content_types = self.list_content_types().await?;
        let template_variables = self
            .list_template_variables(&TemplateVariableFilter::default())
            .await?;

        Ok(Datastore {
            schema_version: meta.get("schema_version"),
            revision_id: meta.get("revision_id"),
            generated_at: meta.get("generated_at"),
            events,
            templates,
            knowledge,
            campaigns,
            content_types,
            template_variables,
        })
    }

    // ==================== EVENT OPERATIONS ====================

    /// List all events, newest first.
    pub async fn list_events(&self) -> Result<Vec<Event>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM events ORDER BY created_at DESC",
            EVENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(event_from_row).collect())
    }

    /// Get an event by ID.
    pub async fn get_event(&self, id: &str) -> Result<Option<Event>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(event_from_row))
    }

    /// Create a new event.
    pub async fn create_event(&self, request: &CreateEventRequest) -> Result<Event, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let status = request.status.unwrap_or_default();
        let subscribers_count = request.subscribers_count.unwrap_or(0);

        sqlx::query(
            "INSERT INTO events (id, name, description, status, site_url, landing_url, location, venue, starts_at, ends_at, contacts, subscribers_count, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"
        )
        .bind(&id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(status.as_str())
        .bind(&request.site_url)
        .bind(&request.landing_url)
        .bind(&request.location)
        .bind(&request.venue)
        .bind(&request.starts_at)
        .bind(&request.ends_at)
        .bind(encode_json(&request.contacts))
        .bind(subscribers_count)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.increment_revision().await?;

        Ok(Event {
            id,
            name: request.name.clone(),
            description: request.description.clone(),
            status,
            site_url: request.site_url.clone(),
            landing_url: request.landing_url.clone(),
            location: request.location.clone(),
            venue: request.venue.clone(),
            starts_at: request.starts_at.clone(),
            ends_at: request.ends_at.clone(),
            contacts: request.contacts.clone(),
            subscribers_count,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Update an event with optimistic concurrency control.
    pub async fn update_event(
        &self,
        id: &str,
        request: &UpdateEventRequest,
    ) -> Result<Event, AppError> {
        let existing = self
            .get_event(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", id)))?;

        check_version(request.expected_version, existing.version)?;

        let updated = Event {
            id: existing.id.clone(),
            name: request.name.clone().unwrap_or(existing.name),
            description: request.description.clone().or(existing.description),
            status: request.status.unwrap_or(existing.status),
            site_url: request.site_url.clone().or(existing.site_url),
            landing_url: request.landing_url.clone().or(existing.landing_url),
            location: request.location.clone().or(existing.location),
            venue: request.venue.clone().or(existing.venue),
            starts_at: request.starts_at.clone().or(existing.starts_at),
            ends_at: request.ends_at.clone().or(existing.ends_at),
            contacts: request.contacts.clone().unwrap_or(existing.contacts),
            subscribers_count: request
                .subscribers_count
                .unwrap_or(existing.subscribers_count),
            created_at: existing.created_at,
            updated_at: Utc::now().to_rfc3339(),
            version: existing.version + 1,
        };

        let result = sqlx::query(
            "UPDATE events SET name = ?, description = ?, status = ?, site_url = ?, landing_url = ?, location = ?, venue = ?, starts_at = ?, ends_at = ?, contacts = ?, subscribers_count = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&updated.name)
        .bind(&updated.description)
        .bind(updated.status.as_str())
        .bind(&updated.site_url)
        .bind(&updated.landing_url)
        .bind(&updated.location)
        .bind(&updated.venue)
        .bind(&updated.starts_at)
        .bind(&updated.ends_at)
        .bind(encode_json(&updated.contacts))
        .bind(updated.subscribers_count)
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_event(id).await?;
            return Err(concurrent_modification(current.map(|e| e.version)));
        }

        self.increment_revision().await?;
        Ok(updated)
    }

    /// Delete an event together with its knowledge entries.
    ///
    /// Returns the IDs of the removed knowledge entries so the caller can
    /// drop them from the search index.
    pub async fn delete_event(&self, id: &str) -> Result<Vec<String>, AppError> {
        let mut tx = self.pool.begin().await?;

        let knowledge_ids: Vec<String> =
            sqlx::query("SELECT id FROM knowledge WHERE event_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?
                .iter()
                .map(|row| row.get("id"))
                .collect();

        let result = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Event {} not found", id)));
        }

        sqlx::query("DELETE FROM knowledge WHERE event_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(knowledge_ids)
    }

    // ==================== TEMPLATE OPERATIONS ====================

    /// List templates, optionally for a single event or content type.
    pub async fn list_templates(
        &self,
        filter: &TemplateFilter,
    ) -> Result<Vec<EmailTemplate>, AppError> {
        let mut sql = format!("SELECT {} FROM templates WHERE 1=1", TEMPLATE_COLUMNS);
        if filter.event_id.is_some() {
            sql.push_str(" AND event_id = ?");
        }
        if filter.content_type.is_some() {
            sql.push_str(" AND content_type = ?");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query(&sql);
        if let Some(event_id) = &filter.event_id {
            query = query.bind(event_id);
        }
        if let Some(content_type) = &filter.content_type {
            query = query.bind(content_type);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(template_from_row).collect())
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<EmailTemplate>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM templates WHERE id = ?",
            TEMPLATE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(template_from_row))
    }

    /// Create a template. Its variable list is derived from the HTML.
    pub async fn create_template(
        &self,
        request: &CreateTemplateRequest,
    ) -> Result<EmailTemplate, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let variables = placeholders(&request.html_content);

        sqlx::query(
            "INSERT INTO templates (id, event_id, name, content_type, html_content, subject_template, variables, required_variables, mappings, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"
        )
        .bind(&id)
        .bind(&request.event_id)
        .bind(&request.name)
        .bind(&request.content_type)
        .bind(&request.html_content)
        .bind(&request.subject_template)
        .bind(encode_json(&variables))
        .bind(encode_json(&request.required_variables))
        .bind(encode_json(&request.mappings))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.increment_revision().await?;

        Ok(EmailTemplate {
            id,
            event_id: request.event_id.clone(),
            name: request.name.clone(),
            content_type: request.content_type.clone(),
            html_content: request.html_content.clone(),
            subject_template: request.subject_template.clone(),
            variables,
            required_variables: request.required_variables.clone(),
            mappings: request.mappings.clone(),
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    pub async fn update_template(
        &self,
        id: &str,
        request: &UpdateTemplateRequest,
    ) -> Result<EmailTemplate, AppError> {
        let existing = self
            .get_template(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Template {} not found", id)))?;

        check_version(request.expected_version, existing.version)?;

        let html_content = request
            .html_content
            .clone()
            .unwrap_or(existing.html_content);

        let updated = EmailTemplate {
            id: existing.id.clone(),
            event_id: request.event_id.clone().or(existing.event_id),
            name: request.name.clone().unwrap_or(existing.name),
            content_type: request.content_type.clone().or(existing.content_type),
            variables: placeholders(&html_content),
            html_content,
            subject_template: request
                .subject_template
                .clone()
                .or(existing.subject_template),
            required_variables: request
                .required_variables
                .clone()
                .unwrap_or(existing.required_variables),
            mappings: request.mappings.clone().unwrap_or(existing.mappings),
            created_at: existing.created_at,
            updated_at: Utc::now().to_rfc3339(),
            version: existing.version + 1,
        };

        let result = sqlx::query(
            "UPDATE templates SET event_id = ?, name = ?, content_type = ?, html_content = ?, subject_template = ?, variables = ?, required_variables = ?, mappings = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&updated.event_id)
        .bind(&updated.name)
        .bind(&updated.content_type)
        .bind(&updated.html_content)
        .bind(&updated.subject_template)
        .bind(encode_json(&updated.variables))
        .bind(encode_json(&updated.required_variables))
        .bind(encode_json(&updated.mappings))
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_template(id).await?;
            return Err(concurrent_modification(current.map(|t| t.version)));
        }

        self.increment_revision().await?;
        Ok(updated)
    }

    pub async fn delete_template(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM templates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Template {} not found", id)));
        }

        self.increment_revision().await?;
        Ok(())
    }

    // ==================== KNOWLEDGE OPERATIONS ====================

    /// List knowledge entries filtered by event and/or content type, newest first.
    pub async fn list_knowledge(
        &self,
        filter: &KnowledgeFilter,
    ) -> Result<Vec<KnowledgeEntry>, AppError> {
        let mut sql = format!("SELECT {} FROM knowledge WHERE 1=1", KNOWLEDGE_COLUMNS);
        if filter.event_id.is_some() {
            sql.push_str(" AND event_id = ?");
        }
        if filter.content_type.is_some() {
            sql.push_str(" AND content_type = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");

        let mut query = sqlx::query(&sql);
        if let Some(event_id) = &filter.event_id {
            query = query.bind(event_id);
        }
        if let Some(content_type) = &filter.content_type {
            query = query.bind(content_type);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(knowledge_from_row).collect())
    }

    pub async fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeEntry>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM knowledge WHERE id = ?",
            KNOWLEDGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(knowledge_from_row))
    }

    pub async fn create_knowledge(
        &self,
        request: &CreateKnowledgeRequest,
    ) -> Result<KnowledgeEntry, AppError> {
        let mut created = self
            .create_knowledge_batch(std::slice::from_ref(request))
            .await?;
        created
            .pop()
            .ok_or_else(|| AppError::Internal("Knowledge entry was not created".to_string()))
    }

    /// Insert many entries in one transaction with a single revision bump.
    pub async fn create_knowledge_batch(
        &self,
        requests: &[CreateKnowledgeRequest],
    ) -> Result<Vec<KnowledgeEntry>, AppError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();
        let mut created = Vec::with_capacity(requests.len());

        for request in requests {
            let entry = KnowledgeEntry {
                id: uuid::Uuid::new_v4().to_string(),
                event_id: request.event_id.clone(),
                content_type: request.content_type.clone(),
                title: request.title.clone(),
                content: request.content.clone(),
                source_url: request.source_url.clone(),
                tags: request.tags.clone(),
                created_at: now.clone(),
                updated_at: now.clone(),
                version: 1,
            };

            sqlx::query(
                "INSERT INTO knowledge (id, event_id, content_type, title, content, source_url, tags, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"
            )
            .bind(&entry.id)
            .bind(&entry.event_id)
            .bind(&entry.content_type)
            .bind(&entry.title)
            .bind(&entry.content)
            .bind(&entry.source_url)
            .bind(encode_json(&entry.tags))
            .bind(&entry.created_at)
            .bind(&entry.updated_at)
            .execute(&mut *tx)
            .await?;

            created.push(entry);
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(created)
    }

    pub async fn update_knowledge(
        &self,
        id: &str,
        request: &UpdateKnowledgeRequest,
    ) -> Result<KnowledgeEntry, AppError> {
        let existing = self
            .get_knowledge(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Knowledge entry {} not found", id)))?;

        check_version(request.expected_version, existing.version)?;

        let updated = KnowledgeEntry {
            id: existing.id.clone(),
            event_id: existing.event_id,
            content_type: request
                .content_type
                .clone()
                .unwrap_or(existing.content_type),
            title: request.title.clone().unwrap_or(existing.title),
            content: request.content.clone().unwrap_or(existing.content),
            source_url: request.source_url.clone().or(existing.source_url),
            tags: request.tags.clone().unwrap_or(existing.tags),
            created_at: existing.created_at,
            updated_at: Utc::now().to_rfc3339(),
            version: existing.version + 1,
        };

        let result = sqlx::query(
            "UPDATE knowledge SET content_type = ?, title = ?, content = ?, source_url = ?, tags = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&updated.content_type)
        .bind(&updated.title)
        .bind(&updated.content)
        .bind(&updated.source_url)
        .bind(encode_json(&updated.tags))
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_knowledge(id).await?;
            return Err(concurrent_modification(current.map(|k| k.version)));
        }

        self.increment_revision().await?;
        Ok(updated)
    }

    pub async fn delete_knowledge(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM knowledge WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Knowledge entry {} not found",
                id
            )));
        }

        self.increment_revision().await?;
        Ok(())
    }

    // ==================== CAMPAIGN OPERATIONS ====================

    pub async fn list_campaigns(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>, AppError> {
        let rows = match &filter.event_id {
            Some(event_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM campaigns WHERE event_id = ? ORDER BY created_at DESC",
                    CAMPAIGN_COLUMNS
                ))
                .bind(event_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM campaigns ORDER BY created_at DESC",
                    CAMPAIGN_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(campaign_from_row).collect())
    }

    pub async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM campaigns WHERE id = ?",
            CAMPAIGN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(campaign_from_row))
    }

    /// The oldest campaign of the given type for an event.
    pub async fn find_campaign(
        &self,
        event_id: &str,
        campaign_type: &str,
    ) -> Result<Option<Campaign>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM campaigns WHERE event_id = ? AND campaign_type = ? ORDER BY created_at ASC LIMIT 1",
            CAMPAIGN_COLUMNS
        ))
        .bind(event_id)
        .bind(campaign_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(campaign_from_row))
    }

    pub async fn create_campaign(
        &self,
        request: &CreateCampaignRequest,
    ) -> Result<Campaign, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO campaigns (id, event_id, name, campaign_type, description, subject_a, subject_b, preheader, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"
        )
        .bind(&id)
        .bind(&request.event_id)
        .bind(&request.name)
        .bind(request.campaign_type.as_str())
        .bind(&request.description)
        .bind(&request.subject_a)
        .bind(&request.subject_b)
        .bind(&request.preheader)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.increment_revision().await?;

        Ok(Campaign {
            id,
            event_id: request.event_id.clone(),
            name: request.name.clone(),
            campaign_type: request.campaign_type,
            description: request.description.clone(),
            subject_a: request.subject_a.clone(),
            subject_b: request.subject_b.clone(),
            preheader: request.preheader.clone(),
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    pub async fn update_campaign(
        &self,
        id: &str,
        request: &UpdateCampaignRequest,
    ) -> Result<Campaign, AppError> {
        let existing = self
            .get_campaign(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", id)))?;

        check_version(request.expected_version, existing.version)?;

        let updated = Campaign {
            id: existing.id.clone(),
            event_id: request.event_id.clone().or(existing.event_id),
            name: request.name.clone().unwrap_or(existing.name),
            campaign_type: request.campaign_type.unwrap_or(existing.campaign_type),
            description: request.description.clone().or(existing.description),
            subject_a: request.subject_a.clone().or(existing.subject_a),
            subject_b: request.subject_b.clone().or(existing.subject_b),
            preheader: request.preheader.clone().or(existing.preheader),
            created_at: existing.created_at,
            updated_at: Utc::now().to_rfc3339(),
            version: existing.version + 1,
        };

        let result = sqlx::query(
            "UPDATE campaigns SET event_id = ?, name = ?, campaign_type = ?, description = ?, subject_a = ?, subject_b = ?, preheader = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&updated.event_id)
        .bind(&updated.name)
        .bind(updated.campaign_type.as_str())
        .bind(&updated.description)
        .bind(&updated.subject_a)
        .bind(&updated.subject_b)
        .bind(&updated.preheader)
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_campaign(id).await?;
            return Err(concurrent_modification(current.map(|c| c.version)));
        }

        self.increment_revision().await?;
        Ok(updated)
    }

    pub async fn delete_campaign(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Campaign {} not found", id)));
        }

        self.increment_revision().await?;
        Ok(())
    }

    // ==================== CONTENT TYPE OPERATIONS ====================

    /// List content types by name, each with the number of templates using it.
    pub async fn list_content_types(&self) -> Result<Vec<ContentType>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM content_types ct ORDER BY ct.name, ct.created_at",
            CONTENT_TYPE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(content_type_from_row).collect())
    }

    pub async fn get_content_type(&self, id: &str) -> Result<Option<ContentType>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_types ct WHERE ct.id = ?",
            CONTENT_TYPE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(content_type_from_row))
    }

    pub async fn get_content_type_by_code(
        &self,
        code: &str,
    ) -> Result<Option<ContentType>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_types ct WHERE ct.code = ?",
            CONTENT_TYPE_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(content_type_from_row))
    }

    pub async fn create_content_type(
        &self,
        request: &CreateContentTypeRequest,
    ) -> Result<ContentType, AppError> {
        let code = request.code.trim();
        if self.get_content_type_by_code(code).await?.is_some() {
            return Err(AppError::Validation(format!(
                "Content type {} already exists",
                code
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let icon = request
            .icon
            .clone()
            .filter(|icon| !icon.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE_ICON.to_string());

        sqlx::query(
            "INSERT INTO content_types (id, code, name, description, icon, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, 1)"
        )
        .bind(&id)
        .bind(code)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&icon)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.increment_revision().await?;

        self.get_content_type(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Content type was not created".to_string()))
    }

    /// Update name, description and icon. The code is fixed once created.
    pub async fn update_content_type(
        &self,
        id: &str,
        request: &UpdateContentTypeRequest,
    ) -> Result<ContentType, AppError> {
        let existing = self
            .get_content_type(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Content type {} not found", id)))?;

        check_version(request.expected_version, existing.version)?;

        let updated = ContentType {
            name: request.name.clone().unwrap_or(existing.name),
            description: request.description.clone().or(existing.description),
            icon: request
                .icon
                .clone()
                .filter(|icon| !icon.is_empty())
                .unwrap_or(existing.icon),
            updated_at: Utc::now().to_rfc3339(),
            version: existing.version + 1,
            ..existing
        };

        let result = sqlx::query(
            "UPDATE content_types SET name = ?, description = ?, icon = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&updated.name)
        .bind(&updated.description)
        .bind(&updated.icon)
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(updated.version - 1)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_content_type(id).await?;
            return Err(concurrent_modification(current.map(|c| c.version)));
        }

        self.increment_revision().await?;
        Ok(updated)
    }

    /// Delete a content type together with its registered variables.
    pub async fn delete_content_type(&self, id: &str) -> Result<(), AppError> {
        let existing = self
            .get_content_type(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Content type {} not found", id)))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM template_variables WHERE content_type = ?")
            .bind(&existing.code)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM content_types WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Content type {} not found", id)));
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    // ==================== TEMPLATE VARIABLE OPERATIONS ====================

    /// List registered variables in display order.
    pub async fn list_template_variables(
        &self,
        filter: &TemplateVariableFilter,
    ) -> Result<Vec<TemplateVariable>, AppError> {
        let rows = match &filter.content_type {
            Some(content_type) => {
                sqlx::query(&format!(
                    "SELECT {} FROM template_variables WHERE content_type = ? ORDER BY display_order, variable_name",
                    VARIABLE_COLUMNS
                ))
                .bind(content_type)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM template_variables ORDER BY content_type, display_order, variable_name",
                    VARIABLE_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(variable_from_row).collect())
    }

    pub async fn get_template_variable(
        &self,
        id: &str,
    ) -> Result<Option<TemplateVariable>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM template_variables WHERE id = ?",
            VARIABLE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(variable_from_row))
    }

    /// Register a variable for an existing content type.
    pub async fn create_template_variable(
        &self,
        request: &CreateTemplateVariableRequest,
    ) -> Result<TemplateVariable, AppError> {
        if self
            .get_content_type_by_code(&request.content_type)
            .await?
            .is_none()
        {
            return Err(AppError::Validation(format!(
                "Content type {} does not exist",
                request.content_type
            )));
        }
        self.ensure_variable_name_free(&request.content_type, &request.variable_name, None)
            .await?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO template_variables (id, content_type, variable_name, description, default_value, is_required, display_order, created_at, updated_at, version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"
        )
        .bind(&id)
        .bind(&request.content_type)
        .bind(&request.variable_name)
        .bind(&request.description)
        .bind(&request.default_value)
        .bind(request.is_required)
        .bind(request.display_order)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.increment_revision().await?;

        Ok(TemplateVariable {
            id,
            content_type: request.content_type.clone(),
            variable_name: request.variable_name.clone(),
            description: request.description.clone(),
            default_value: request.default_value.clone(),
            is_required: request.is_required,
            display_order: request.display_order,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    pub async fn update_template_variable(
        &self,
        id: &str,
        request: &UpdateTemplateVariableRequest,
    ) -> Result<TemplateVariable, AppError> {
        let existing = self
            .get_template_variable(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Template variable {} not found", id)))?;

        check_version(request.expected_version, existing.version)?;

        if let Some(name) = &request.variable_name {
            self.ensure_variable_name_free(&existing.content_type, name, Some(id))
                .await?;
        }

        let updated = TemplateVariable {
            variable_name: request
                .variable_name
                .clone()
                .unwrap_or(existing.variable_name),
            description: request.description.clone().unwrap_or(existing.description),
            default_value: request.default_value.clone().or(existing.default_value),
            is_required: request.is_required.unwrap_or(existing.is_required),
            display_order: request.display_order.unwrap_or(existing.display_order),
            updated_at: Utc::now().to_rfc3339(),
            version: existing.version + 1,
            ..existing
        };

        let result = sqlx::query(
            "UPDATE template_variables SET variable_name = ?, description = ?, default_value = ?, is_required = ?, display_order = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(&updated.variable_name)
        .bind(&updated.description)
        .bind(&updated.default_value)
        .bind(updated.is_required)
        .bind(updated.display_order)
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(updated.version - 1)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_template_variable(id).await?;
            return Err(concurrent_modification(current.map(|v| v.version)));
        }

        self.increment_revision().await?;
        Ok(updated)
    }

    pub async fn delete_template_variable(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM template_variables WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Template variable {} not found",
                id
            )));
        }

        self.increment_revision().await?;
        Ok(())
    }

    async fn ensure_variable_name_free(
        &self,
        content_type: &str,
        variable_name: &str,
        except_id: Option<&str>,
    ) -> Result<(), AppError> {
        let taken: Option<String> = sqlx::query_scalar(
            "SELECT id FROM template_variables WHERE content_type = ? AND variable_name = ?",
        )
        .bind(content_type)
        .bind(variable_name)
        .fetch_optional(&self.pool)
        .await?;

        match taken {
            Some(taken) if Some(taken.as_str()) != except_id => Err(AppError::Validation(format!(
                "Variable {} is already registered for {}",
                variable_name, content_type
            ))),
            _ => Ok(()),
        }
    }
}

// Helper functions

async fn bump_revision(tx: &mut Transaction<'_, Sqlite>) -> Result<(), AppError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(&now)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn check_version(expected: Option<i64>, current: i64) -> Result<(), AppError> {
    match expected {
        Some(expected) if expected != current => Err(AppError::Conflict {
            message: format!(
                "Version mismatch: expected {}, current {}",
                expected, current
            ),
            current_version: current,
        }),
        _ => Ok(()),
    }
}

/// Version changed between read and write.
fn concurrent_modification(current_version: Option<i64>) -> AppError {
    AppError::Conflict {
        message: "Concurrent modification detected".to_string(),
        current_version: current_version.unwrap_or(0),
    }
}

fn encode_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn decode_json<T: DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Event {
    let status: String = row.get("status");
    Event {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        status: EventStatus::parse(&status).unwrap_or_default(),
        site_url: row.get("site_url"),
        landing_url: row.get("landing_url"),
        location: row.get("location"),
        venue: row.get("venue"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        contacts: decode_json(row.get("contacts")),
        subscribers_count: row.get("subscribers_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn template_from_row(row: &sqlx::sqlite::SqliteRow) -> EmailTemplate {
    EmailTemplate {
        id: row.get("id"),
        event_id: row.get("event_id"),
        name: row.get("name"),
        content_type: row.get("content_type"),
        html_content: row.get("html_content"),
        subject_template: row.get("subject_template"),
        variables: decode_json(row.get("variables")),
        required_variables: decode_json(row.get("required_variables")),
        mappings: decode_json(row.get("mappings")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn knowledge_from_row(row: &sqlx::sqlite::SqliteRow) -> KnowledgeEntry {
    KnowledgeEntry {
        id: row.get("id"),
        event_id: row.get("event_id"),
        content_type: row.get("content_type"),
        title: row.get("title"),
        content: row.get("content"),
        source_url: row.get("source_url"),
        tags: decode_json(row.get("tags")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn campaign_from_row(row: &sqlx::sqlite::SqliteRow) -> Campaign {
    let campaign_type: String = row.get("campaign_type");
    Campaign {
        id: row.get("id"),
        event_id: row.get("event_id"),
        name: row.get("name"),
        campaign_type: CampaignType::parse(&campaign_type).unwrap_or_default(),
        description: row.get("description"),
        subject_a: row.get("subject_a"),
        subject_b: row.get("subject_b"),
        preheader: row.get("preheader"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn content_type_from_row(row: &sqlx::sqlite::SqliteRow) -> ContentType {
    ContentType {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        icon: row.get("icon"),
        templates_count: row.get("templates_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn variable_from_row(row: &sqlx::sqlite::SqliteRow) -> TemplateVariable {
    TemplateVariable {
        id: row.get("id"),
        content_type: row.get("content_type"),
        variable_name: row.get("variable_name"),
        description: row.get("description"),
        default_value: row.get("default_value"),
        is_required: row.get("is_required"),
        display_order: row.get("display_order"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}
