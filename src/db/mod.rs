//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for events, templates, knowledge, campaigns
//! and the content type registry.
//! The search index is derived from it and can always be rebuilt.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run embedded, idempotent migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL DEFAULT 1,
            revision_id INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO meta (id, schema_version, revision_id, generated_at)
        VALUES (1, 1, 0, datetime('now'));
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            site_url TEXT,
            landing_url TEXT,
            location TEXT,
            venue TEXT,
            starts_at TEXT,
            ends_at TEXT,
            contacts TEXT,
            subscribers_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id TEXT PRIMARY KEY,
            event_id TEXT,
            name TEXT NOT NULL,
            content_type TEXT,
            html_content TEXT NOT NULL,
            subject_template TEXT,
            variables TEXT,
            required_variables TEXT,
            mappings TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            source_url TEXT,
            tags TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            id TEXT PRIMARY KEY,
            event_id TEXT,
            name TEXT NOT NULL,
            campaign_type TEXT NOT NULL DEFAULT 'announcement',
            description TEXT,
            subject_a TEXT,
            subject_b TEXT,
            preheader TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before templates carried a content type
    let has_content_type: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('templates') WHERE name = 'content_type'",
    )
    .fetch_one(pool)
    .await?;
    if has_content_type == 0 {
        sqlx::query("ALTER TABLE templates ADD COLUMN content_type TEXT")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_types (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            icon TEXT NOT NULL DEFAULT 'FileText',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS template_variables (
            id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            variable_name TEXT NOT NULL,
            description TEXT NOT NULL,
            default_value TEXT,
            is_required INTEGER NOT NULL DEFAULT 1,
            display_order INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            UNIQUE (content_type, variable_name)
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
        CREATE INDEX IF NOT EXISTS idx_templates_event_id ON templates(event_id);
        CREATE INDEX IF NOT EXISTS idx_knowledge_event_id ON knowledge(event_id);
        CREATE INDEX IF NOT EXISTS idx_knowledge_content_type ON knowledge(event_id, content_type);
        CREATE INDEX IF NOT EXISTS idx_campaigns_event_type ON campaigns(event_id, campaign_type);
        CREATE INDEX IF NOT EXISTS idx_templates_content_type ON templates(content_type);
        CREATE INDEX IF NOT EXISTS idx_template_variables_type ON template_variables(content_type, display_order);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
