//! Content type and template variable registry endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    ContentType, CreateContentTypeRequest, CreateTemplateVariableRequest, TemplateVariable,
    TemplateVariableFilter, UpdateContentTypeRequest, UpdateTemplateVariableRequest,
};
use crate::AppState;

/// GET /api/content-types - List content types with their template counts.
pub async fn list_content_types(State(state): State<AppState>) -> ApiResult<Vec<ContentType>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_content_types().await {
        Ok(content_types) => success(content_types, revision_id),
        Err(e) => error(e, revision_id),
    }
}

pub async fn get_content_type(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ContentType> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_content_type(&id).await {
        Ok(Some(content_type)) => success(content_type, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Content type {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

pub async fn create_content_type(
    State(state): State<AppState>,
    Json(request): Json<CreateContentTypeRequest>,
) -> ApiResult<ContentType> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let code = request.code.trim();
    if code.is_empty() || code.chars().any(char::is_whitespace) {
        return error(
            AppError::Validation(
                "Content type code is required and cannot contain spaces".to_string(),
            ),
            revision_id,
        );
    }
    if request.name.trim().is_empty() {
        return error(
            AppError::Validation("Content type name is required".to_string()),
            revision_id,
        );
    }

    match state.repo.create_content_type(&request).await {
        Ok(content_type) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(content_type, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

pub async fn update_content_type(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateContentTypeRequest>,
) -> ApiResult<ContentType> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return error(
            AppError::Validation("Content type name cannot be empty".to_string()),
            revision_id,
        );
    }

    match state.repo.update_content_type(&id, &request).await {
        Ok(content_type) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(content_type, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/content-types/{id} - Also removes the type's registered variables.
pub async fn delete_content_type(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_content_type(&id).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/template-variables?contentType= - List registered variables in display order.
pub async fn list_template_variables(
    State(state): State<AppState>,
    Query(filter): Query<TemplateVariableFilter>,
) -> ApiResult<Vec<TemplateVariable>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_template_variables(&filter).await {
        Ok(variables) => success(variables, revision_id),
        Err(e) => error(e, revision_id),
    }
}

pub async fn get_template_variable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<TemplateVariable> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_template_variable(&id).await {
        Ok(Some(variable)) => success(variable, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Template variable {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

pub async fn create_template_variable(
    State(state): State<AppState>,
    Json(request): Json<CreateTemplateVariableRequest>,
) -> ApiResult<TemplateVariable> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.content_type.trim().is_empty()
        || request.variable_name.trim().is_empty()
        || request.description.trim().is_empty()
    {
        return error(
            AppError::Validation(
                "contentType, variableName and description are required".to_string(),
            ),
            revision_id,
        );
    }

    match state.repo.create_template_variable(&request).await {
        Ok(variable) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(variable, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

pub async fn update_template_variable(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTemplateVariableRequest>,
) -> ApiResult<TemplateVariable> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request
        .variable_name
        .as_deref()
        .is_some_and(|n| n.trim().is_empty())
    {
        return error(
            AppError::Validation("variableName cannot be empty".to_string()),
            revision_id,
        );
    }

    match state.repo.update_template_variable(&id, &request).await {
        Ok(variable) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(variable, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

pub async fn delete_template_variable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_template_variable(&id).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
