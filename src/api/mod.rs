//! REST API handlers.
//!
//! Every handler answers with the same envelope: `success`, `data` and the
//! datastore `revisionId` observed while serving the request.

mod campaigns;
mod content_types;
mod datastore;
mod events;
mod generate;
mod knowledge;
mod render;
mod templates;

pub use campaigns::*;
pub use content_types::*;
pub use datastore::*;
pub use events::*;
pub use generate::*;
pub use knowledge::*;
pub use render::*;
pub use templates::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::{AppError, AppErrorWithRevision};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub revision_id: i64,
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, AppErrorWithRevision>;

pub fn success<T: Serialize>(data: T, revision_id: i64) -> ApiResult<T> {
    Ok(ApiResponse {
        success: true,
        data,
        revision_id,
    })
}

pub fn error<T: Serialize>(error: AppError, revision_id: i64) -> ApiResult<T> {
    Err(AppErrorWithRevision { error, revision_id })
}
