//! Knowledge base endpoints: CRUD, bulk import, chunked upload, reindex and search.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::ingest::chunk_upload;
use crate::models::{
    ChunkUploadRequest, CreateKnowledgeRequest, ImportKnowledgeRequest, ImportReport,
    KnowledgeEntry, KnowledgeFilter, ReindexReport, ReindexRequest, UpdateKnowledgeRequest,
};
use crate::search::SearchFilter;
use crate::AppState;

/// Maximum number of search results allowed.
const MAX_SEARCH_LIMIT: usize = 100;
const MAX_SEARCH_OFFSET: usize = 10_000;

/// GET /api/knowledge?eventId=&contentType= - List entries.
pub async fn list_knowledge(
    State(state): State<AppState>,
    Query(filter): Query<KnowledgeFilter>,
) -> ApiResult<Vec<KnowledgeEntry>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_knowledge(&filter).await {
        Ok(entries) => success(entries, revision_id),
        Err(e) => error(e, revision_id),
    }
}

pub async fn get_knowledge(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<KnowledgeEntry> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_knowledge(&id).await {
        Ok(Some(entry)) => success(entry, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Knowledge entry {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/knowledge - Create an entry.
pub async fn create_knowledge(
    State(state): State<AppState>,
    Json(mut request): Json<CreateKnowledgeRequest>,
) -> ApiResult<KnowledgeEntry> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.event_id.trim().is_empty() || request.content_type.trim().is_empty() {
        return error(
            AppError::Validation("eventId and contentType are required".to_string()),
            revision_id,
        );
    }
    if request.title.trim().is_empty() && request.content.trim().is_empty() {
        return error(
            AppError::Validation("Either title or content is required".to_string()),
            revision_id,
        );
    }
    if request.title.trim().is_empty() {
        request.title = "Untitled".to_string();
    }
    if request.content.trim().is_empty() {
        request.content = request.title.clone();
    }

    match state.repo.create_knowledge(&request).await {
        Ok(entry) => {
            if let Err(e) = state.search.index_entry(&entry).await {
                tracing::warn!("Failed to index knowledge entry: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(entry, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/knowledge/:id - Update an entry.
pub async fn update_knowledge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateKnowledgeRequest>,
) -> ApiResult<KnowledgeEntry> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.update_knowledge(&id, &request).await {
        Ok(entry) => {
            if let Err(e) = state.search.index_entry(&entry).await {
                tracing::warn!("Failed to re-index knowledge entry: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(entry, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/knowledge/:id - Delete an entry.
pub async fn delete_knowledge(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.delete_knowledge(&id).await {
        Ok(()) => {
            if let Err(e) = state.search.remove_entries(std::slice::from_ref(&id)).await {
                tracing::warn!("Failed to remove knowledge entry from index: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/knowledge/import - Import a spreadsheet or document.
pub async fn import_knowledge(
    State(state): State<AppState>,
    Json(request): Json<ImportKnowledgeRequest>,
) -> ApiResult<ImportReport> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let (kind, requests) = match state.importer.prepare(&request).await {
        Ok(prepared) => prepared,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.create_knowledge_batch(&requests).await {
        Ok(entries) => {
            if let Err(e) = state.search.index_entries(&entries).await {
                tracing::warn!("Failed to index imported knowledge: {}", e);
            }
            tracing::info!(
                "Imported {} knowledge entries for event {}",
                entries.len(),
                request.event_id
            );

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(
                ImportReport {
                    imported: entries.len(),
                    kind,
                },
                new_revision,
            )
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/knowledge/chunks - Split free text into indexed entries.
pub async fn upload_chunks(
    State(state): State<AppState>,
    Json(request): Json<ChunkUploadRequest>,
) -> ApiResult<Vec<KnowledgeEntry>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let requests = match chunk_upload(&request) {
        Ok(requests) => requests,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.create_knowledge_batch(&requests).await {
        Ok(entries) => {
            if let Err(e) = state.search.index_entries(&entries).await {
                tracing::warn!("Failed to index knowledge chunks: {}", e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(entries, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/knowledge/reindex - Rebuild the index for one event or everything.
pub async fn reindex_knowledge(
    State(state): State<AppState>,
    body: Option<Json<ReindexRequest>>,
) -> ApiResult<ReindexReport> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let event_id = body
        .and_then(|Json(r)| r.event_id)
        .filter(|id| !id.trim().is_empty());

    let filter = KnowledgeFilter {
        event_id: event_id.clone(),
        content_type: None,
    };
    let entries = match state.repo.list_knowledge(&filter).await {
        Ok(entries) => entries,
        Err(e) => return error(e, revision_id),
    };

    let rebuilt = match &event_id {
        Some(id) => state.search.rebuild_event(id, &entries).await,
        None => state.search.rebuild(&entries).await,
    };

    match rebuilt {
        Ok(()) => success(
            ReindexReport {
                indexed: entries.len(),
                event_id,
            },
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// Search query parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub event_id: Option<String>,
    /// Comma-separated content types.
    #[serde(default)]
    pub content_types: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSearchResponse {
    pub results: Vec<KnowledgeSearchHit>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSearchHit {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

/// GET /api/knowledge/search - Full-text search over the knowledge base.
pub async fn search_knowledge(
    State(state): State<AppState>,
    Query(params): Query<KnowledgeSearchQuery>,
) -> ApiResult<KnowledgeSearchResponse> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let limit = params.limit.min(MAX_SEARCH_LIMIT);
    let offset = params.offset.min(MAX_SEARCH_OFFSET);
    let content_types: Vec<String> = params
        .content_types
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    let filter = SearchFilter {
        event_id: params.event_id.as_deref().filter(|id| !id.is_empty()),
        content_types: &content_types,
    };

    let hits = match state.search.search(&params.q, &filter, limit, offset) {
        Ok(hits) => hits,
        Err(e) => return error(e, revision_id),
    };

    let mut results = Vec::new();
    for hit in hits {
        if let Ok(Some(entry)) = state.repo.get_knowledge(&hit.entry_id).await {
            results.push(KnowledgeSearchHit {
                entry,
                score: hit.score,
            });
        }
    }

    let total = results.len();

    success(
        KnowledgeSearchResponse {
            results,
            total,
            limit,
            offset,
        },
        revision_id,
    )
}
