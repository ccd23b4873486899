//! Bulk knowledge ingestion: spreadsheet and document imports, text chunking.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;

use crate::errors::AppError;
use crate::models::{ChunkUploadRequest, CreateKnowledgeRequest, ImportKind, ImportKnowledgeRequest};

const GOOGLE_DOCS_BASE: &str = "https://docs.google.com";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONTENT_TYPE: &str = "general";
const UNTITLED: &str = "Untitled";

pub const DEFAULT_CHUNK_CHARS: usize = 800;
pub const MIN_CHUNK_CHARS: usize = 100;

static SHEET_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/spreadsheets/d/([A-Za-z0-9_-]+)").expect("sheet pattern is valid")
});
static SHEET_GID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"gid=(\d+)").expect("gid pattern is valid"));
static DOC_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/document/d/([A-Za-z0-9_-]+)").expect("doc pattern is valid"));
static BLANK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("blank line pattern is valid"));

/// A shared link to a Google spreadsheet or document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    Sheet { id: String, gid: String },
    Document { id: String },
}

impl ImportSource {
    pub fn parse(url: &str) -> Result<Self, AppError> {
        if let Some(caps) = SHEET_ID.captures(url) {
            let gid = SHEET_GID
                .captures(url)
                .map(|g| g[1].to_string())
                .unwrap_or_else(|| "0".to_string());
            return Ok(ImportSource::Sheet {
                id: caps[1].to_string(),
                gid,
            });
        }
        if let Some(caps) = DOC_ID.captures(url) {
            return Ok(ImportSource::Document {
                id: caps[1].to_string(),
            });
        }
        Err(AppError::Validation(
            "Unsupported URL format. Use a Google Sheets or Google Docs link".to_string(),
        ))
    }

    fn export_path(&self) -> String {
        match self {
            ImportSource::Sheet { id, gid } => {
                format!("/spreadsheets/d/{}/export?format=csv&gid={}", id, gid)
            }
            ImportSource::Document { id } => format!("/document/d/{}/export?format=txt", id),
        }
    }

    fn kind(&self) -> ImportKind {
        match self {
            ImportSource::Sheet { .. } => ImportKind::Spreadsheet,
            ImportSource::Document { .. } => ImportKind::Document,
        }
    }
}

/// Fetches exports of shared spreadsheets and documents.
pub struct Importer {
    client: Client,
    base_url: String,
}

impl Importer {
    pub fn new() -> Result<Self, AppError> {
        Self::with_base_url(GOOGLE_DOCS_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, source: &ImportSource) -> Result<String, AppError> {
        let url = format!("{}{}", self.base_url, source.export_path());
        tracing::info!("Fetching knowledge export from {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "Export request failed with status {}. Is the link shared publicly?",
                status.as_u16()
            )));
        }
        Ok(response.text().await?)
    }

    /// Turn an import request into knowledge entries ready to insert.
    ///
    /// Inline `csv` or `text` wins over `url`.
    pub async fn prepare(
        &self,
        request: &ImportKnowledgeRequest,
    ) -> Result<(ImportKind, Vec<CreateKnowledgeRequest>), AppError> {
        if request.event_id.trim().is_empty() {
            return Err(AppError::Validation("eventId is required".to_string()));
        }

        let content_type = request
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        let url = request.url.as_deref().map(str::trim).filter(|u| !u.is_empty());

        if let Some(csv) = &request.csv {
            let entries = parse_sheet(csv, &request.event_id, content_type, url)?;
            return Ok((ImportKind::Spreadsheet, entries));
        }
        if let Some(text) = &request.text {
            let entries = parse_document(text, &request.event_id, content_type, url);
            return Ok((ImportKind::Document, entries));
        }

        let url = url.ok_or_else(|| {
            AppError::Validation("One of url, csv or text is required".to_string())
        })?;
        let source = ImportSource::parse(url)?;
        let body = self.fetch(&source).await?;

        let entries = match source.kind() {
            ImportKind::Spreadsheet => parse_sheet(&body, &request.event_id, content_type, Some(url))?,
            ImportKind::Document => parse_document(&body, &request.event_id, content_type, Some(url)),
        };
        Ok((source.kind(), entries))
    }
}

fn column_role(header: &str) -> Option<&'static str> {
    match header.trim().to_lowercase().as_str() {
        "title" | "заголовок" => Some("title"),
        "content" | "контент" => Some("content"),
        "source" | "источник" => Some("source"),
        "content_type" | "type" | "тип" => Some("content_type"),
        _ => None,
    }
}

/// Parse CSV rows. Recognised headers map by name; otherwise the first two
/// columns are used as title and content.
pub fn parse_sheet(
    csv_text: &str,
    event_id: &str,
    default_type: &str,
    source_url: Option<&str>,
) -> Result<Vec<CreateKnowledgeRequest>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let roles: Vec<Option<&'static str>> = reader.headers()?.iter().map(column_role).collect();
    let position = |role: &str| roles.iter().position(|r| *r == Some(role));
    let (title_col, content_col, source_col, type_col) = (
        position("title"),
        position("content"),
        position("source"),
        position("content_type"),
    );

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = |col: Option<usize>| {
            col.and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let mut title = cell(title_col);
        let mut content = cell(content_col);
        if title.is_none() && content.is_none() {
            title = cell(Some(0));
            content = cell(Some(1));
        }
        if title.is_none() && content.is_none() {
            continue;
        }

        let title = title.unwrap_or_else(|| UNTITLED.to_string());
        entries.push(CreateKnowledgeRequest {
            event_id: event_id.to_string(),
            content_type: cell(type_col).unwrap_or_else(|| default_type.to_string()),
            content: content.unwrap_or_else(|| title.clone()),
            title,
            source_url: cell(source_col).or_else(|| source_url.map(str::to_string)),
            tags: Vec::new(),
        });
    }

    Ok(entries)
}

/// One entry per paragraph; a paragraph's first line is its title.
pub fn parse_document(
    text: &str,
    event_id: &str,
    content_type: &str,
    source_url: Option<&str>,
) -> Vec<CreateKnowledgeRequest> {
    paragraphs(text)
        .into_iter()
        .map(|paragraph| {
            let (title, content) = match paragraph.split_once('\n') {
                Some((first, rest)) if !rest.trim().is_empty() => {
                    (first.trim().to_string(), rest.trim().to_string())
                }
                _ => (paragraph.trim().to_string(), paragraph.trim().to_string()),
            };
            CreateKnowledgeRequest {
                event_id: event_id.to_string(),
                content_type: content_type.to_string(),
                title,
                content,
                source_url: source_url.map(str::to_string),
                tags: Vec::new(),
            }
        })
        .collect()
}

fn paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    BLANK_LINE
        .split(&normalized)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pack paragraphs greedily into chunks of at most `max_chars` characters.
///
/// Paragraphs longer than the limit are split on word boundaries.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(MIN_CHUNK_CHARS);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String| {
        if !current.is_empty() {
            chunks.push(std::mem::take(current));
        }
    };

    for paragraph in paragraphs(text) {
        let pieces = if paragraph.chars().count() > max_chars {
            split_words(&paragraph, max_chars)
        } else {
            vec![paragraph]
        };

        for piece in pieces {
            let joined_len = current.chars().count() + 2 + piece.chars().count();
            if !current.is_empty() && joined_len > max_chars {
                flush(&mut current);
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }
    flush(&mut current);

    chunks
}

fn split_words(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in paragraph.split_whitespace() {
        let word_len = word.chars().count();
        if !current.is_empty() && current.chars().count() + 1 + word_len > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if word_len > max_chars {
            // A single unbreakable run longer than a chunk
            let chars: Vec<char> = word.chars().collect();
            for slice in chars.chunks(max_chars) {
                pieces.push(slice.iter().collect());
            }
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

/// Knowledge entries for a manual text upload.
pub fn chunk_upload(request: &ChunkUploadRequest) -> Result<Vec<CreateKnowledgeRequest>, AppError> {
    if request.event_id.trim().is_empty()
        || request.content_type.trim().is_empty()
        || request.text.trim().is_empty()
    {
        return Err(AppError::Validation(
            "eventId, contentType and text are required".to_string(),
        ));
    }

    let chunks = split_into_chunks(
        &request.text,
        request.max_chunk_chars.unwrap_or(DEFAULT_CHUNK_CHARS),
    );
    let base_title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED);
    let total = chunks.len();

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, content)| CreateKnowledgeRequest {
            event_id: request.event_id.clone(),
            content_type: request.content_type.clone(),
            title: if total > 1 {
                format!("{} (part {})", base_title, i + 1)
            } else {
                base_title.to_string()
            },
            content,
            source_url: request.source_url.clone(),
            tags: Vec::new(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_source_urls() {
        assert_eq!(
            ImportSource::parse("https://docs.google.com/spreadsheets/d/abc_123-X/edit#gid=42").unwrap(),
            ImportSource::Sheet {
                id: "abc_123-X".to_string(),
                gid: "42".to_string()
            }
        );
        assert_eq!(
            ImportSource::parse("https://docs.google.com/document/d/doc1/edit").unwrap(),
            ImportSource::Document {
                id: "doc1".to_string()
            }
        );
        assert!(ImportSource::parse("https://example.com/file.csv").is_err());
    }

    #[test]
    fn test_sheet_columns_by_name() {
        let csv = "Type,Title,Content,Source\n\
                   speaker,Jane Doe,Leads the compiler team,https://jane.example.com\n\
                   ,Networking,,\n\
                   ,,,\n";
        let entries = parse_sheet(csv, "evt", "general", Some("https://sheet")).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content_type, "speaker");
        assert_eq!(entries[0].source_url.as_deref(), Some("https://jane.example.com"));
        assert_eq!(entries[1].content_type, "general");
        assert_eq!(entries[1].content, "Networking");
        assert_eq!(entries[1].source_url.as_deref(), Some("https://sheet"));
    }

    #[test]
    fn test_sheet_falls_back_to_first_columns() {
        let csv = "Name,Bio\nJane Doe,Leads the compiler team\n";
        let entries = parse_sheet(csv, "evt", "speaker", None).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Jane Doe");
        assert_eq!(entries[0].content, "Leads the compiler team");
        assert_eq!(entries[0].content_type, "speaker");
    }

    #[test]
    fn test_document_paragraphs() {
        let text = "Keynote\nOpening talk by Jane.\r\n\r\nSingle line paragraph\n\n\n";
        let entries = parse_document(text, "evt", "talk", None);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Keynote");
        assert_eq!(entries[0].content, "Opening talk by Jane.");
        assert_eq!(entries[1].title, "Single line paragraph");
        assert_eq!(entries[1].content, "Single line paragraph");
    }

    #[test]
    fn test_chunks_respect_limit() {
        let paragraph = "word ".repeat(60);
        let text = format!("{}\n\n{}\n\nshort tail", paragraph.trim(), paragraph.trim());
        let chunks = split_into_chunks(&text, 150);

        assert!(chunks.len() >= 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= 150));
        assert!(chunks.last().unwrap().ends_with("short tail"));
    }

    #[test]
    fn test_chunk_limit_has_a_floor() {
        let text = "a ".repeat(80);
        assert_eq!(split_into_chunks(&text, 10).len(), 2);
    }

    #[test]
    fn test_chunk_upload_titles() {
        let request = ChunkUploadRequest {
            event_id: "evt".to_string(),
            content_type: "talk".to_string(),
            title: Some("Program".to_string()),
            text: format!("{}\n\n{}", "x".repeat(90), "y".repeat(90)),
            source_url: None,
            max_chunk_chars: Some(100),
        };
        let entries = chunk_upload(&request).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Program (part 1)");
        assert_eq!(entries[1].title, "Program (part 2)");
    }

    #[tokio::test]
    async fn test_import_fetches_sheet_export() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/d/sheet1/export"))
            .and(query_param("format", "csv"))
            .and(query_param("gid", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "title,content\nWorkshops,Hands-on sessions\nCoffee,Free coffee all day\n",
            ))
            .mount(&server)
            .await;

        let importer = Importer::with_base_url(server.uri()).unwrap();
        let request = ImportKnowledgeRequest {
            event_id: "evt".to_string(),
            url: Some("https://docs.google.com/spreadsheets/d/sheet1/edit?gid=7".to_string()),
            csv: None,
            text: None,
            content_type: Some("benefit".to_string()),
        };

        let (kind, entries) = importer.prepare(&request).await.unwrap();
        assert_eq!(kind, ImportKind::Spreadsheet);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].title, "Coffee");
        assert_eq!(entries[1].content_type, "benefit");
    }

    #[tokio::test]
    async fn test_import_reports_private_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let importer = Importer::with_base_url(server.uri()).unwrap();
        let request = ImportKnowledgeRequest {
            event_id: "evt".to_string(),
            url: Some("https://docs.google.com/document/d/doc1/edit".to_string()),
            csv: None,
            text: None,
            content_type: None,
        };

        let err = importer.prepare(&request).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }
}
