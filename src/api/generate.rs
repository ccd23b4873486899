//! Content generation and email assembly endpoints.

use axum::{extract::State, Json};

use super::{error, success, ApiResult};
use crate::compose::{compose_email, generate_email};
use crate::models::{
    ComposeRequest, ComposedEmail, GenerateEmailRequest, GeneratedEmail, GeneratedText,
    GenerationRequest,
};
use crate::AppState;

/// POST /api/rag/generate - Generate text grounded in an event's knowledge base.
pub async fn rag_generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> ApiResult<GeneratedText> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.generator.generate(&request).await {
        Ok(generated) => success(generated, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/emails/compose
pub async fn compose(
    State(state): State<AppState>,
    Json(request): Json<ComposeRequest>,
) -> ApiResult<ComposedEmail> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match compose_email(
        &state.repo,
        &state.config.brand,
        state.generator.as_ref(),
        &request,
    )
    .await
    {
        Ok(email) => success(email, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/emails/generate
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateEmailRequest>,
) -> ApiResult<GeneratedEmail> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match generate_email(
        &state.repo,
        &state.config.brand,
        state.generator.as_ref(),
        &request,
    )
    .await
    {
        Ok(email) => success(email, revision_id),
        Err(e) => error(e, revision_id),
    }
}
