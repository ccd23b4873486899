//! Campaign API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{Campaign, CampaignFilter, CreateCampaignRequest, UpdateCampaignRequest};
use crate::AppState;

/// GET /api/campaigns?eventId= - List campaigns.
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(filter): Query<CampaignFilter>,
) -> ApiResult<Vec<Campaign>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_campaigns(&filter).await {
        Ok(campaigns) => success(campaigns, revision_id),
        Err(e) => error(e, revision_id),
    }
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Campaign> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_campaign(&id).await {
        Ok(Some(campaign)) => success(campaign, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Campaign {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> ApiResult<Campaign> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.name.trim().is_empty() {
        return error(
            AppError::Validation("Campaign name is required".to_string()),
            revision_id,
        );
    }

    match state.repo.create_campaign(&request).await {
        Ok(campaign) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(campaign, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateCampaignRequest>,
) -> ApiResult<Campaign> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.update_campaign(&id, &request).await {
        Ok(campaign) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(campaign, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_campaign(&id).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
