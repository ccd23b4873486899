//! Tantivy-based knowledge index.
//!
//! SQLite stays the source of truth; this index only maps query text to
//! knowledge entry IDs and can be rebuilt at any time.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::KnowledgeEntry;

const BOOST_TITLE: f32 = 3.0;
const BOOST_CONTENT: f32 = 1.0;

/// Most hits collected for a single page, counting the skipped ones.
const MAX_RESULT_WINDOW: usize = 10_100;

/// Search hit with relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub entry_id: String,
    pub score: f32,
}

/// Optional restrictions applied on top of the text query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter<'a> {
    pub event_id: Option<&'a str>,
    /// Match any of these content types; empty means all
    pub content_types: &'a [String],
}

struct SearchFields {
    entry_id: Field,
    event_id: Field,
    content_type: Field,
    title: Field,
    content: Field,
}

/// Tantivy search index for knowledge entries.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let entry_id = schema_builder.add_text_field("entry_id", STRING | STORED);
        let event_id = schema_builder.add_text_field("event_id", STRING);
        let content_type = schema_builder.add_text_field("content_type", STRING);
        let title = schema_builder.add_text_field("title", TEXT | STORED);
        let content = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            entry_id,
            event_id,
            content_type,
            title,
            content,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000)
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Replace the whole index with `entries`.
    pub async fn rebuild(&self, entries: &[KnowledgeEntry]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for entry in entries {
            writer.add_document(self.create_document(entry))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} knowledge entries", entries.len());
        Ok(())
    }

    /// Replace every document of one event with `entries`.
    pub async fn rebuild_event(
        &self,
        event_id: &str,
        entries: &[KnowledgeEntry],
    ) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.event_id, event_id));
        for entry in entries {
            writer.add_document(self.create_document(entry))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!(
            "Search index rebuilt for event {} with {} entries",
            event_id,
            entries.len()
        );
        Ok(())
    }

    /// Index a single entry, replacing any previous version.
    pub async fn index_entry(&self, entry: &KnowledgeEntry) -> Result<(), AppError> {
        self.index_entries(std::slice::from_ref(entry)).await
    }

    /// Index several entries with a single commit.
    pub async fn index_entries(&self, entries: &[KnowledgeEntry]) -> Result<(), AppError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.write().await;
        for entry in entries {
            writer.delete_term(Term::from_field_text(self.fields.entry_id, &entry.id));
            writer.add_document(self.create_document(entry))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Remove entries from the index.
    pub async fn remove_entries(&self, entry_ids: &[String]) -> Result<(), AppError> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.write().await;
        for id in entry_ids {
            writer.delete_term(Term::from_field_text(self.fields.entry_id, id));
        }
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Search with strict query syntax; malformed queries are an error.
    pub fn search(
        &self,
        query_str: &str,
        filter: &SearchFilter<'_>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut subqueries: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for (field, boost) in [
            (self.fields.title, BOOST_TITLE),
            (self.fields.content, BOOST_CONTENT),
        ] {
            let parser = QueryParser::for_index(&self.index, vec![field]);
            let field_query = parser
                .parse_query(query_str)
                .map_err(|e| AppError::Search(format!("Invalid search query: {}", e)))?;
            subqueries.push((Occur::Should, Box::new(BoostQuery::new(field_query, boost))));
        }

        self.execute(Box::new(BooleanQuery::new(subqueries)), filter, limit, offset)
    }

    /// Search with lenient parsing, for free-form prompts.
    ///
    /// Unparsable fragments are dropped instead of failing the whole query.
    pub fn search_relevant(
        &self,
        text: &str,
        filter: &SearchFilter<'_>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut parser =
            QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.content]);
        parser.set_field_boost(self.fields.title, BOOST_TITLE);
        let (query, errors) = parser.parse_query_lenient(text);
        if !errors.is_empty() {
            tracing::debug!("Ignored {} malformed fragments in prompt query", errors.len());
        }

        self.execute(query, filter, limit, 0)
    }

    fn execute(
        &self,
        text_query: Box<dyn Query>,
        filter: &SearchFilter<'_>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        let window = limit.saturating_add(offset).min(MAX_RESULT_WINDOW);
        if limit == 0 || offset >= window {
            return Ok(Vec::new());
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];

        if let Some(event_id) = filter.event_id {
            clauses.push((Occur::Must, self.term_query(self.fields.event_id, event_id)));
        }

        if !filter.content_types.is_empty() {
            let any_type: Vec<(Occur, Box<dyn Query>)> = filter
                .content_types
                .iter()
                .map(|ct| (Occur::Should, self.term_query(self.fields.content_type, ct)))
                .collect();
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(any_type))));
        }

        let query = BooleanQuery::new(clauses);
        let searcher = self.reader.searcher();

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(window))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let entry_id = doc.get_first(self.fields.entry_id)?.as_str()?.to_string();
                Some(SearchResult { entry_id, score })
            })
            .collect();

        Ok(results)
    }

    fn term_query(&self, field: Field, value: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(field, value),
            IndexRecordOption::Basic,
        ))
    }

    fn create_document(&self, entry: &KnowledgeEntry) -> TantivyDocument {
        doc!(
            self.fields.entry_id => entry.id.clone(),
            self.fields.event_id => entry.event_id.clone(),
            self.fields.content_type => entry.content_type.clone(),
            self.fields.title => entry.title.clone(),
            self.fields.content => entry.content.clone()
        )
    }
}
