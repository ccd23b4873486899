//! Content generation seam.
//!
//! The orchestrator only talks to [`ContentGenerator`]. Two implementations
//! exist: a client for an external retrieval-augmented generation service and
//! a local extractive generator that stitches knowledge entries together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{GeneratedText, GenerationRequest, KnowledgeEntry, KnowledgeFilter, SourceSnippet};
use crate::search::{SearchFilter, SearchIndex};

/// Number of sources echoed back in a response.
const MAX_REPORTED_SOURCES: usize = 3;
const SOURCE_PREVIEW_CHARS: usize = 150;
const MAX_TOP_K: usize = 20;

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, AppError>;
}

fn validate_request(request: &GenerationRequest) -> Result<(), AppError> {
    if request.event_id.trim().is_empty() || request.prompt.trim().is_empty() {
        return Err(AppError::Validation(
            "eventId and prompt are required".to_string(),
        ));
    }
    Ok(())
}

// ==================== HTTP ====================

#[derive(Serialize)]
struct WireRequest<'a> {
    event_id: &'a str,
    prompt: &'a str,
    content_types: &'a [String],
    max_length: usize,
    top_k: usize,
}

#[derive(Deserialize)]
struct WireResponse {
    generated_text: String,
    #[serde(default)]
    sources_used: usize,
    #[serde(default)]
    sources: Vec<WireSource>,
}

#[derive(Deserialize)]
struct WireSource {
    text: String,
    #[serde(default, alias = "score")]
    similarity: f32,
}

#[derive(Deserialize)]
struct WireError {
    error: String,
}

/// Client for an external generation endpoint speaking snake_case JSON.
pub struct HttpGenerator {
    client: Client,
    endpoint: String,
}

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ContentGenerator for HttpGenerator {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, AppError> {
        validate_request(request)?;

        let body = WireRequest {
            event_id: &request.event_id,
            prompt: &request.prompt,
            content_types: &request.content_types,
            max_length: request.max_length,
            top_k: request.top_k,
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WireError>(&raw)
                .map(|e| e.error)
                .unwrap_or(raw);
            tracing::warn!("Generator endpoint returned {}: {}", status, message);
            return Err(AppError::Upstream(format!(
                "Generator returned {}: {}",
                status.as_u16(),
                message
            )));
        }

        let wire: WireResponse = response.json().await?;
        Ok(GeneratedText {
            generated_text: wire.generated_text,
            sources_used: wire.sources_used,
            sources: wire
                .sources
                .into_iter()
                .map(|s| SourceSnippet {
                    text: s.text,
                    score: s.similarity,
                })
                .collect(),
        })
    }
}

// ==================== EXTRACTIVE ====================

/// Builds text from the lead sentences of the most relevant knowledge entries.
pub struct ExtractiveGenerator {
    repo: Arc<Repository>,
    search: Arc<SearchIndex>,
}

impl ExtractiveGenerator {
    pub fn new(repo: Arc<Repository>, search: Arc<SearchIndex>) -> Self {
        Self { repo, search }
    }

    async fn retrieve(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<(KnowledgeEntry, f32)>, AppError> {
        let top_k = request.top_k.clamp(1, MAX_TOP_K);

        let mut candidates: HashMap<String, KnowledgeEntry> = HashMap::new();
        let mut recent: Vec<String> = Vec::new();
        for entry in self
            .repo
            .list_knowledge(&KnowledgeFilter {
                event_id: Some(request.event_id.clone()),
                content_type: None,
            })
            .await?
        {
            if request.content_types.is_empty() || request.content_types.contains(&entry.content_type) {
                recent.push(entry.id.clone());
                candidates.insert(entry.id.clone(), entry);
            }
        }

        let hits = self.search.search_relevant(
            &request.prompt,
            &SearchFilter {
                event_id: Some(&request.event_id),
                content_types: &request.content_types,
            },
            top_k,
        )?;

        let mut selected: Vec<(KnowledgeEntry, f32)> = hits
            .into_iter()
            .filter_map(|hit| candidates.remove(&hit.entry_id).map(|e| (e, hit.score)))
            .collect();

        // Nothing matched the prompt text; fall back to the newest entries
        if selected.is_empty() {
            selected = recent
                .iter()
                .filter_map(|id| candidates.remove(id))
                .take(top_k)
                .map(|e| (e, 0.0))
                .collect();
        }

        Ok(selected)
    }
}

#[async_trait]
impl ContentGenerator for ExtractiveGenerator {
    fn name(&self) -> &'static str {
        "extractive"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, AppError> {
        validate_request(request)?;

        let selected = self.retrieve(request).await?;
        if selected.is_empty() {
            return Err(AppError::Validation(format!(
                "No knowledge found for event {}. Add knowledge entries first.",
                request.event_id
            )));
        }

        let text = selected
            .iter()
            .map(|(entry, _)| lead_sentence(entry))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        tracing::debug!(
            "Extractive generation for event {} used {} entries",
            request.event_id,
            selected.len()
        );

        Ok(GeneratedText {
            generated_text: truncate_on_word(&text, request.max_length),
            sources_used: selected.len(),
            sources: selected
                .iter()
                .take(MAX_REPORTED_SOURCES)
                .map(|(entry, score)| SourceSnippet {
                    text: preview(&entry.content, SOURCE_PREVIEW_CHARS),
                    score: *score,
                })
                .collect(),
        })
    }
}

/// First sentence of the entry's content, or its title when there is no content.
fn lead_sentence(entry: &KnowledgeEntry) -> String {
    let source = if entry.content.trim().is_empty() {
        &entry.title
    } else {
        &entry.content
    };
    let normalized = source.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut chars = normalized.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                return normalized[..i + c.len_utf8()].to_string();
            }
        }
    }
    normalized
}

/// Shorten to at most `max_chars` characters, cutting at a word boundary and
/// ending with an ellipsis.
pub fn truncate_on_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    let head: String = text.chars().take(max_chars - 1).collect();
    let ends_on_word = text
        .chars()
        .nth(max_chars - 1)
        .is_some_and(char::is_whitespace);
    let cut = match head.rfind(char::is_whitespace) {
        _ if ends_on_word => head.as_str(),
        Some(pos) if pos > 0 => &head[..pos],
        _ => head.as_str(),
    };
    let cut = cut.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-'));
    format!("{}…", cut)
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}
