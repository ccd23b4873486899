//! Eventmail Backend
//!
//! REST backend for event email campaigns: events, templates, a knowledge
//! base with full-text search, and an email generation pipeline rendered
//! with Tera.

mod analyze;
mod api;
mod auth;
mod compose;
mod config;
mod context;
mod db;
mod errors;
mod generator;
mod ingest;
mod mapping;
mod models;
mod render;
mod search;
mod validate;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use generator::{ContentGenerator, ExtractiveGenerator, HttpGenerator};
use ingest::Importer;
use models::KnowledgeFilter;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub generator: Arc<dyn ContentGenerator>,
    pub importer: Arc<Importer>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Eventmail Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (EVENTMAIL_API_PSK). Authentication is disabled!");
    }

    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let search = Arc::new(SearchIndex::open(&config.index_path)?);

    tracing::info!("Building knowledge index...");
    let entries = repo.list_knowledge(&KnowledgeFilter::default()).await?;
    search.rebuild(&entries).await?;
    tracing::info!("Knowledge index built with {} entries", entries.len());

    let generator: Arc<dyn ContentGenerator> = match &config.rag_endpoint {
        Some(endpoint) => Arc::new(HttpGenerator::new(endpoint.clone(), config.rag_timeout)?),
        None => Arc::new(ExtractiveGenerator::new(repo.clone(), search.clone())),
    };
    tracing::info!("Content generator: {}", generator.name());

    let state = AppState {
        repo,
        search,
        generator,
        importer: Arc::new(Importer::new()?),
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Datastore
        .route("/datastore", get(api::get_datastore))
        .route("/datastore/revision", get(api::get_revision))
        // Events
        .route("/events", get(api::list_events).post(api::create_event))
        .route(
            "/events/{id}",
            get(api::get_event)
                .put(api::update_event)
                .delete(api::delete_event),
        )
        // Templates
        .route(
            "/templates",
            get(api::list_templates).post(api::create_template),
        )
        .route("/templates/analyze", post(api::analyze))
        .route(
            "/templates/{id}",
            get(api::get_template)
                .put(api::update_template)
                .delete(api::delete_template),
        )
        // Knowledge
        .route(
            "/knowledge",
            get(api::list_knowledge).post(api::create_knowledge),
        )
        .route("/knowledge/import", post(api::import_knowledge))
        .route("/knowledge/chunks", post(api::upload_chunks))
        .route("/knowledge/reindex", post(api::reindex_knowledge))
        .route("/knowledge/search", get(api::search_knowledge))
        .route(
            "/knowledge/{id}",
            get(api::get_knowledge)
                .put(api::update_knowledge)
                .delete(api::delete_knowledge),
        )
        // Campaigns
        .route(
            "/campaigns",
            get(api::list_campaigns).post(api::create_campaign),
        )
        .route(
            "/campaigns/{id}",
            get(api::get_campaign)
                .put(api::update_campaign)
                .delete(api::delete_campaign),
        )
        // Content type registry
        .route(
            "/content-types",
            get(api::list_content_types).post(api::create_content_type),
        )
        .route(
            "/content-types/{id}",
            get(api::get_content_type)
                .put(api::update_content_type)
                .delete(api::delete_content_type),
        )
        .route(
            "/template-variables",
            get(api::list_template_variables).post(api::create_template_variable),
        )
        .route(
            "/template-variables/{id}",
            get(api::get_template_variable)
                .put(api::update_template_variable)
                .delete(api::delete_template_variable),
        )
        // Rendering and generation
        .route("/render", post(api::render_email))
        .route("/context", post(api::build_context_handler))
        .route("/rag/generate", post(api::rag_generate))
        .route("/emails/compose", post(api::compose))
        .route("/emails/generate", post(api::generate))
        .layer(middleware::from_fn(move |req, next| {
            auth::require_api_key(psk.clone(), req, next)
        }));

    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
