//! Configuration module for the event email backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_RAG_TIMEOUT_SECS: u64 = 30;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// External RAG generator endpoint. Local extractive generation when unset.
    pub rag_endpoint: Option<String>,
    pub rag_timeout: Duration,
    /// Email context defaults
    pub brand: BrandDefaults,
}

/// Defaults merged into every rendering context.
#[derive(Debug, Clone)]
pub struct BrandDefaults {
    pub name: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub cta_top_text: String,
    pub cta_bottom_text: String,
}

impl Default for BrandDefaults {
    fn default() -> Self {
        Self {
            name: "Events".to_string(),
            utm_source: "email".to_string(),
            utm_medium: "newsletter".to_string(),
            cta_top_text: "Learn more".to_string(),
            cta_bottom_text: "See the program".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = non_empty_var("EVENTMAIL_API_PSK");

        let db_path = env::var("EVENTMAIL_DB_PATH")
            .unwrap_or_else(|_| "./data/app.sqlite".to_string())
            .into();

        let index_path = env::var("EVENTMAIL_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = parse_bind_addr(env::var("EVENTMAIL_BIND_ADDR").ok());

        let log_level = env::var("EVENTMAIL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let rag_endpoint = non_empty_var("EVENTMAIL_RAG_ENDPOINT");
        let rag_timeout = parse_timeout(env::var("EVENTMAIL_RAG_TIMEOUT_SECS").ok());

        let defaults = BrandDefaults::default();
        let brand = BrandDefaults {
            name: env::var("EVENTMAIL_BRAND_NAME").unwrap_or(defaults.name),
            utm_source: env::var("EVENTMAIL_UTM_SOURCE").unwrap_or(defaults.utm_source),
            utm_medium: env::var("EVENTMAIL_UTM_MEDIUM").unwrap_or(defaults.utm_medium),
            cta_top_text: env::var("EVENTMAIL_CTA_TOP_TEXT").unwrap_or(defaults.cta_top_text),
            cta_bottom_text: env::var("EVENTMAIL_CTA_BOTTOM_TEXT")
                .unwrap_or(defaults.cta_bottom_text),
        };

        Self {
            api_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
            rag_endpoint,
            rag_timeout,
            brand,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bind_addr(raw: Option<String>) -> SocketAddr {
    let fallback: SocketAddr = DEFAULT_BIND_ADDR
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080)));

    match raw {
        None => fallback,
        Some(value) => value.parse().unwrap_or_else(|_| {
            eprintln!(
                "Invalid EVENTMAIL_BIND_ADDR {:?}, using {}",
                value, DEFAULT_BIND_ADDR
            );
            fallback
        }),
    }
}

fn parse_timeout(raw: Option<String>) -> Duration {
    let secs = raw
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_RAG_TIMEOUT_SECS);
    Duration::from_secs(secs)
}
