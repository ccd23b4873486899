//! Template rendering and context assembly endpoints.

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::Value;

use super::{error, success, ApiResult};
use crate::context::{build_context, campaign_type_or_default};
use crate::errors::AppError;
use crate::models::{ContextRequest, RenderRequest, RenderResponse};
use crate::render::{content_keys, render_template};
use crate::AppState;

/// POST /api/render - Render template HTML against caller-supplied content.
pub async fn render_email(
    State(state): State<AppState>,
    Json(request): Json<RenderRequest>,
) -> ApiResult<RenderResponse> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let (html, content) = match (
        request.template_html.as_deref().filter(|h| !h.is_empty()),
        request.content.as_ref(),
    ) {
        (Some(html), Some(content)) => (html, content),
        _ => {
            return error(
                AppError::Validation("templateHtml and content are required".to_string()),
                revision_id,
            )
        }
    };

    match render_template(html, content) {
        Ok(rendered) => success(
            RenderResponse {
                html: rendered,
                content_keys: content_keys(content),
                rendered_at: Utc::now().to_rfc3339(),
            },
            revision_id,
        ),
        Err(e) => {
            tracing::debug!("Render failed: {}", e);
            error(e.into(), revision_id)
        }
    }
}

/// POST /api/context - Assemble the rendering context for an event.
pub async fn build_context_handler(
    State(state): State<AppState>,
    Json(request): Json<ContextRequest>,
) -> ApiResult<Value> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let campaign_type = campaign_type_or_default(request.campaign_type.as_deref());

    match build_context(
        &state.repo,
        &state.config.brand,
        &request.event_id,
        &campaign_type,
        &request.overrides,
    )
    .await
    {
        Ok(context) => success(context, revision_id),
        Err(e) => error(e, revision_id),
    }
}
