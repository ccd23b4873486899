//! Email template API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::analyze::analyze_template;
use crate::errors::AppError;
use crate::models::{
    AnalyzeTemplateRequest, CreateTemplateRequest, EmailTemplate, TemplateAnalysis,
    TemplateFilter, UpdateTemplateRequest,
};
use crate::AppState;

/// GET /api/templates?eventId=&contentType= - List templates.
pub async fn list_templates(
    State(state): State<AppState>,
    Query(filter): Query<TemplateFilter>,
) -> ApiResult<Vec<EmailTemplate>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_templates(&filter).await {
        Ok(templates) => success(templates, revision_id),
        Err(e) => error(e, revision_id),
    }
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<EmailTemplate> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_template(&id).await {
        Ok(Some(template)) => success(template, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Template {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/templates - Create a template.
pub async fn create_template(
    State(state): State<AppState>,
    Json(request): Json<CreateTemplateRequest>,
) -> ApiResult<EmailTemplate> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.name.trim().is_empty() || request.html_content.trim().is_empty() {
        return error(
            AppError::Validation("Template name and htmlContent are required".to_string()),
            revision_id,
        );
    }

    match state.repo.create_template(&request).await {
        Ok(template) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(template, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/templates/:id - Update a template.
pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTemplateRequest>,
) -> ApiResult<EmailTemplate> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.update_template(&id, &request).await {
        Ok(template) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(template, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_template(&id).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/templates/analyze - Detect text blocks and propose variables.
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeTemplateRequest>,
) -> ApiResult<TemplateAnalysis> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match request.html_content.as_deref().filter(|h| !h.trim().is_empty()) {
        Some(html) => success(analyze_template(html), revision_id),
        None => error(
            AppError::Validation("htmlContent is required".to_string()),
            revision_id,
        ),
    }
}
