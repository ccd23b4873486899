//! Integration tests for the Eventmail backend.

use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::{BrandDefaults, Config};
use crate::db::{init_database, Repository};
use crate::generator::ExtractiveGenerator;
use crate::ingest::Importer;
use crate::search::SearchIndex;
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some("test-api-key".to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let index_path = temp_dir.path().join("index");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));
        let search = Arc::new(SearchIndex::open(&index_path).expect("Failed to init search"));

        let config = Config {
            api_psk: psk.clone(),
            db_path,
            index_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            rag_endpoint: None,
            rag_timeout: std::time::Duration::from_secs(5),
            brand: BrandDefaults::default(),
        };

        let state = AppState {
            generator: Arc::new(ExtractiveGenerator::new(repo.clone(), search.clone())),
            importer: Arc::new(Importer::new().expect("Failed to build importer")),
            repo,
            search,
            config: Arc::new(config),
        };

        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        (resp.status(), resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        (resp.status(), resp.json().await.unwrap())
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .put(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        (resp.status(), resp.json().await.unwrap())
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.client.delete(self.url(path)).send().await.unwrap();
        (resp.status(), resp.json().await.unwrap())
    }

    /// Create an event and return its id.
    async fn create_event(&self, body: Value) -> String {
        let (status, body) = self.post("/events", body).await;
        assert_eq!(status, StatusCode::OK, "create event failed: {}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn create_knowledge(&self, event_id: &str, content_type: &str, title: &str, content: &str) -> String {
        let (status, body) = self
            .post(
                "/knowledge",
                json!({
                    "eventId": event_id,
                    "contentType": content_type,
                    "title": title,
                    "content": content
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "create knowledge failed: {}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }
}

// ==================== HEALTH & AUTH ====================

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(format!("{}/health", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_key() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/datastore"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_wrong_key_and_bearer() {
    let fixture = TestFixture::new().await;
    let client = Client::new();

    let wrong = client
        .get(fixture.url("/datastore"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let bearer = client
        .get(fixture.url("/datastore"))
        .header("authorization", "Bearer test-api-key")
        .send()
        .await
        .unwrap();
    assert_eq!(bearer.status(), 200);
}

#[tokio::test]
async fn test_auth_disabled_without_key() {
    let fixture = TestFixture::with_psk(None).await;

    let (status, body) = fixture.get("/datastore").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

// ==================== DATASTORE ====================

#[tokio::test]
async fn test_datastore_tracks_revisions() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.get("/datastore").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["events"], json!([]));
    assert_eq!(body["data"]["knowledge"], json!([]));
    let initial = body["revisionId"].as_i64().unwrap();

    fixture.create_event(json!({ "name": "RustConf" })).await;

    let (_, revision) = fixture.get("/datastore/revision").await;
    assert!(revision["data"]["revisionId"].as_i64().unwrap() > initial);

    let (_, body) = fixture.get("/datastore").await;
    assert_eq!(body["data"]["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["events"][0]["name"], "RustConf");
}

// ==================== EVENTS ====================

#[tokio::test]
async fn test_event_crud_and_version_conflict() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.post("/events", json!({ "name": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let id = fixture
        .create_event(json!({ "name": "RustConf", "location": "Montreal" }))
        .await;

    let (status, body) = fixture.get(&format!("/events/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["location"], "Montreal");
    assert_eq!(body["data"]["version"], 1);

    let (status, body) = fixture
        .put(
            &format!("/events/{}", id),
            json!({ "name": "RustConf 2025", "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "RustConf 2025");
    assert_eq!(body["data"]["version"], 2);

    let (status, body) = fixture
        .put(
            &format!("/events/{}", id),
            json!({ "name": "Stale write", "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["currentVersion"], 2);

    let (status, _) = fixture.delete(&format!("/events/{}", id)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = fixture.get(&format!("/events/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_event_delete_removes_knowledge_from_index() {
    let fixture = TestFixture::new().await;

    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;
    let entry_id = fixture
        .create_knowledge(&event_id, "talk", "Tokio internals", "How the scheduler steals work.")
        .await;

    let (_, found) = fixture
        .get(&format!("/knowledge/search?q=scheduler&eventId={}", event_id))
        .await;
    assert_eq!(found["data"]["total"], 1);

    fixture.delete(&format!("/events/{}", event_id)).await;

    let (status, _) = fixture.get(&format!("/knowledge/{}", entry_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, after) = fixture.get("/knowledge/search?q=scheduler").await;
    assert_eq!(after["data"]["total"], 0);
}

// ==================== TEMPLATES ====================

#[tokio::test]
async fn test_template_crud_tracks_variables() {
    let fixture = TestFixture::new().await;

    let (status, _) = fixture
        .post("/templates", json!({ "name": "Empty", "htmlContent": "" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = fixture
        .post(
            "/templates",
            json!({
                "name": "Announcement",
                "htmlContent": "<h1>{{ event.name }}</h1><p>{{ hero.subtitle | upper }}</p>"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["variables"], json!(["event.name", "hero.subtitle"]));

    let (status, body) = fixture
        .put(
            &format!("/templates/{}", id),
            json!({ "htmlContent": "<p>{{ meta.preheader }}</p>" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["variables"], json!(["meta.preheader"]));
    assert_eq!(body["data"]["name"], "Announcement");

    let (_, list) = fixture.get("/templates").await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    let (status, _) = fixture.delete(&format!("/templates/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = fixture.get(&format!("/templates/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_analyze_template() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.post("/templates/analyze", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = fixture
        .post(
            "/templates/analyze",
            json!({
                "htmlContent": "<h1>Rust Summit 2025</h1><p>Three days of talks and workshops for systems programmers.</p><p>{{ meta.preheader }}</p>"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["blocksCount"], 2);
    assert_eq!(data["existingPlaceholders"], json!(["meta.preheader"]));
    let templated = data["templateHtml"].as_str().unwrap();
    assert!(!templated.contains("Rust Summit 2025"));
    assert!(templated.contains("{{ meta.preheader }}"));
}

// ==================== CAMPAIGNS ====================

#[tokio::test]
async fn test_campaign_crud() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;

    let (status, _) = fixture.post("/campaigns", json!({ "name": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = fixture
        .post(
            "/campaigns",
            json!({ "eventId": event_id, "name": "Early bird", "campaignType": "sale" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["campaignType"], "sale");

    let (_, list) = fixture
        .get(&format!("/campaigns?eventId={}", event_id))
        .await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    let (status, body) = fixture
        .put(
            &format!("/campaigns/{}", id),
            json!({ "subjectA": "Last chance", "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subjectA"], "Last chance");

    let (status, _) = fixture.delete(&format!("/campaigns/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = fixture.get(&format!("/campaigns/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ==================== RENDER ====================

#[tokio::test]
async fn test_render_requires_template_and_content() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.post("/render", json!({ "content": {} })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = fixture
        .post("/render", json!({ "templateHtml": "<p>{{ a }}</p>" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = fixture
        .post("/render", json!({ "templateHtml": "<p>{{ a }}</p>", "content": [1, 2] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_render_escapes_and_echoes_keys() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post(
            "/render",
            json!({
                "template_html": "<p>{{ name }}</p>",
                "content": { "name": "<b>Fast & free</b>", "zeta": 1, "alpha": 2 }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["html"],
        "<p>&lt;b&gt;Fast &amp; free&lt;/b&gt;</p>"
    );
    assert_eq!(body["data"]["contentKeys"], json!(["name", "zeta", "alpha"]));
    assert!(body["data"]["renderedAt"].as_str().is_some());
}

#[tokio::test]
async fn test_render_undefined_variable_is_empty() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post(
            "/render",
            json!({
                "templateHtml": "<p>Hi {{ missing }}{{ event.venue }} <a href=\"{{ url }}\">A/B</a></p>",
                "content": { "event": { "name": "RustConf" }, "url": "https://x.io/a/b" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(
        body["data"]["html"],
        "<p>Hi  <a href=\"https://x.io/a/b\">A/B</a></p>"
    );
    assert_eq!(body["data"]["contentKeys"], json!(["event", "url"]));
}

#[tokio::test]
async fn test_render_syntax_error_is_server_error() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .post(
            "/render",
            json!({ "templateHtml": "<p>{% if %}</p>", "content": {} }),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "RENDER_ERROR");
}

// ==================== CONTEXT ====================

#[tokio::test]
async fn test_context_precedence_and_utm() {
    let fixture = TestFixture::new().await;
    let event_id = fixture
        .create_event(json!({
            "name": "RustConf",
            "landingUrl": "https://rustconf.example/tickets?utm_source=partner"
        }))
        .await;
    fixture
        .post(
            "/campaigns",
            json!({
                "eventId": event_id,
                "name": "Flash sale",
                "campaignType": "sale",
                "subjectA": "Sale ends soon"
            }),
        )
        .await;
    fixture
        .create_knowledge(&event_id, "speaker", "Jane Doe", "Maintainer of the async runtime.")
        .await;

    let (status, body) = fixture
        .post(
            "/context",
            json!({
                "eventId": event_id,
                "campaignType": "sale",
                "overrides": { "ctaTopText": "Buy now" }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let meta = &body["data"]["meta"];
    assert_eq!(meta["subjectA"], "Sale ends soon");
    assert_eq!(meta["subjectB"], "RustConf");
    assert_eq!(meta["cta_top_text"], "Buy now");
    assert_eq!(meta["cta_bottom_text"], "See the program");

    let top_url = meta["cta_top_url"].as_str().unwrap();
    assert!(top_url.contains("utm_source=partner"));
    assert!(!top_url.contains("utm_source=email"));
    assert!(top_url.contains("utm_medium=newsletter"));
    assert!(top_url.contains("utm_campaign=sale"));
    assert!(top_url.contains("utm_content=cta_top"));

    assert_eq!(body["data"]["campaign"]["name"], "Flash sale");
    assert_eq!(body["data"]["knowledge"]["speaker"][0]["title"], "Jane Doe");

    let (_, announcement) = fixture
        .post("/context", json!({ "eventId": event_id }))
        .await;
    assert_eq!(announcement["data"]["campaign"], json!({}));
    assert_eq!(announcement["data"]["meta"]["subjectA"], "RustConf");
}

#[tokio::test]
async fn test_context_unknown_event() {
    let fixture = TestFixture::new().await;

    let (status, _) = fixture.post("/context", json!({ "eventId": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = fixture
        .post("/context", json!({ "eventId": "no-such-event" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// ==================== KNOWLEDGE ====================

#[tokio::test]
async fn test_knowledge_create_validation_and_defaults() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;

    let (status, _) = fixture
        .post("/knowledge", json!({ "eventId": event_id, "title": "No type" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = fixture
        .post("/knowledge", json!({ "eventId": event_id, "contentType": "talk" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = fixture
        .post(
            "/knowledge",
            json!({ "eventId": event_id, "contentType": "talk", "content": "Zero-cost futures." }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "Untitled");

    let (status, body) = fixture
        .post(
            "/knowledge",
            json!({ "eventId": event_id, "contentType": "talk", "title": "Pinning" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["content"], "Pinning");
}

#[tokio::test]
async fn test_knowledge_update_reindexes() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;
    let id = fixture
        .create_knowledge(&event_id, "talk", "Allocators", "Arena allocation patterns.")
        .await;

    let (status, _) = fixture
        .put(
            &format!("/knowledge/{}", id),
            json!({ "content": "Borrow checker deep dive.", "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, old) = fixture.get("/knowledge/search?q=arena").await;
    assert_eq!(old["data"]["total"], 0);
    let (_, new) = fixture.get("/knowledge/search?q=borrow").await;
    assert_eq!(new["data"]["total"], 1);

    let (status, _) = fixture.delete(&format!("/knowledge/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, gone) = fixture.get("/knowledge/search?q=borrow").await;
    assert_eq!(gone["data"]["total"], 0);
}

#[tokio::test]
async fn test_knowledge_import_inline_csv_and_text() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;

    let (status, body) = fixture
        .post(
            "/knowledge/import",
            json!({
                "eventId": event_id,
                "csv": "Title,Content,Type\nJane Doe,Keynote on async Rust,speaker\nWorkshops,Hands-on labs,\n,,\n"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["imported"], 2);
    assert_eq!(body["data"]["kind"], "spreadsheet");

    let (_, speakers) = fixture
        .get(&format!("/knowledge?eventId={}&contentType=speaker", event_id))
        .await;
    assert_eq!(speakers["data"].as_array().unwrap().len(), 1);
    let (_, general) = fixture
        .get(&format!("/knowledge?eventId={}&contentType=general", event_id))
        .await;
    assert_eq!(general["data"][0]["title"], "Workshops");

    let (status, body) = fixture
        .post(
            "/knowledge/import",
            json!({
                "eventId": event_id,
                "contentType": "agenda",
                "text": "Opening\nDoors open at nine.\n\nParty\nEvening social on the river."
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["imported"], 2);
    assert_eq!(body["data"]["kind"], "document");

    let (_, hits) = fixture
        .get(&format!("/knowledge/search?q=river&eventId={}", event_id))
        .await;
    assert_eq!(hits["data"]["total"], 1);
    assert_eq!(hits["data"]["results"][0]["entry"]["title"], "Party");
}

#[tokio::test]
async fn test_knowledge_import_rejects_bad_sources() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;

    let (status, _) = fixture
        .post("/knowledge/import", json!({ "eventId": event_id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = fixture
        .post(
            "/knowledge/import",
            json!({ "eventId": event_id, "url": "https://example.com/notes.txt" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = fixture
        .post("/knowledge/import", json!({ "csv": "title\nx\n" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_knowledge_chunks() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;

    let text = [
        "The venue is a short walk from the central station and has step-free access.",
        "Lunch is served on both days and covers vegetarian and vegan options.",
        "Workshops need a laptop with a recent stable toolchain already installed.",
    ]
    .join("\n\n");

    let (status, body) = fixture
        .post(
            "/knowledge/chunks",
            json!({
                "eventId": event_id,
                "contentType": "general",
                "title": "Handbook",
                "text": text,
                "maxChunkChars": 100
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["title"], "Handbook (part 1)");
    assert_eq!(entries[2]["title"], "Handbook (part 3)");

    let (_, hits) = fixture.get("/knowledge/search?q=vegan").await;
    assert_eq!(hits["data"]["total"], 1);

    let (status, _) = fixture
        .post(
            "/knowledge/chunks",
            json!({ "eventId": event_id, "contentType": "general", "text": "  " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_knowledge_search_filters_and_limits() {
    let fixture = TestFixture::new().await;
    let event_a = fixture.create_event(json!({ "name": "RustConf" })).await;
    let event_b = fixture.create_event(json!({ "name": "EuroRust" })).await;

    fixture
        .create_knowledge(&event_a, "talk", "Async traits", "Dynamic dispatch for async functions.")
        .await;
    fixture
        .create_knowledge(&event_a, "speaker", "Jane Doe", "Works on async ergonomics.")
        .await;
    fixture
        .create_knowledge(&event_b, "talk", "Async drop", "Cleanup in async code.")
        .await;

    let (_, all) = fixture.get("/knowledge/search?q=async").await;
    assert_eq!(all["data"]["total"], 3);

    let (_, scoped) = fixture
        .get(&format!("/knowledge/search?q=async&eventId={}", event_a))
        .await;
    assert_eq!(scoped["data"]["total"], 2);

    let (_, typed) = fixture
        .get(&format!(
            "/knowledge/search?q=async&eventId={}&contentTypes=speaker,benefit",
            event_a
        ))
        .await;
    assert_eq!(typed["data"]["total"], 1);
    assert_eq!(typed["data"]["results"][0]["entry"]["title"], "Jane Doe");

    let (_, title_boost) = fixture.get("/knowledge/search?q=traits").await;
    assert_eq!(title_boost["data"]["results"][0]["entry"]["title"], "Async traits");

    let (_, empty) = fixture.get("/knowledge/search?q=").await;
    assert_eq!(empty["data"]["total"], 0);

    let (_, capped) = fixture.get("/knowledge/search?q=async&limit=500").await;
    assert_eq!(capped["data"]["limit"], 100);

    let (_, paged) = fixture.get("/knowledge/search?q=async&limit=2&offset=2").await;
    assert_eq!(paged["data"]["total"], 1);

    let (status, far) = fixture
        .get("/knowledge/search?q=async&offset=18446744073709551615")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(far["data"]["total"], 0);
    assert_eq!(far["data"]["offset"], 10_000);
}

#[tokio::test]
async fn test_knowledge_reindex() {
    let fixture = TestFixture::new().await;
    let event_a = fixture.create_event(json!({ "name": "RustConf" })).await;
    let event_b = fixture.create_event(json!({ "name": "EuroRust" })).await;
    fixture
        .create_knowledge(&event_a, "talk", "Macros", "Procedural macro tricks.")
        .await;
    fixture
        .create_knowledge(&event_a, "talk", "Const generics", "Arrays of any length.")
        .await;
    fixture
        .create_knowledge(&event_b, "talk", "Embedded", "Macros on microcontrollers.")
        .await;

    let (status, body) = fixture
        .post("/knowledge/reindex", json!({ "eventId": event_a }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["indexed"], 2);
    assert_eq!(body["data"]["eventId"], event_a);

    let (_, hits) = fixture.get("/knowledge/search?q=macros").await;
    assert_eq!(hits["data"]["total"], 2);

    let resp = fixture
        .client
        .post(fixture.url("/knowledge/reindex"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["indexed"], 3);
}

// ==================== GENERATION ====================

#[tokio::test]
async fn test_rag_generate_extractive() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;

    let (status, _) = fixture
        .post("/rag/generate", json!({ "eventId": event_id, "prompt": "" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = fixture
        .post(
            "/rag/generate",
            json!({ "eventId": event_id, "prompt": "Why attend?" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    fixture
        .create_knowledge(
            &event_id,
            "benefit",
            "Hallway track",
            "Meet the people who build the compiler. Coffee is on us.",
        )
        .await;

    let (status, body) = fixture
        .post(
            "/rag/generate",
            json!({ "eventId": event_id, "prompt": "Why attend?", "maxLength": 200 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["generatedText"],
        "Meet the people who build the compiler."
    );
    assert_eq!(body["data"]["sourcesUsed"], 1);
}

#[tokio::test]
async fn test_compose_email() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;
    fixture
        .create_knowledge(&event_id, "speaker", "Jane Doe", "Jane Doe maintains the async runtime.")
        .await;

    let (_, template) = fixture
        .post(
            "/templates",
            json!({
                "name": "Hero",
                "htmlContent": "<h1>{{ meta.subjectA }}</h1><p>{{ hero.subtitle }}</p>"
            }),
        )
        .await;
    let template_id = template["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = fixture
        .post(
            "/emails/compose",
            json!({ "eventId": event_id, "templateId": template_id }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = fixture
        .post(
            "/emails/compose",
            json!({
                "eventId": event_id,
                "templateId": template_id,
                "subject": "Join us in Montreal",
                "contentPlan": "Focus on speakers"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let data = &body["data"];
    assert_eq!(data["subject"], "Join us in Montreal");
    assert_eq!(
        data["html"],
        "<h1>Join us in Montreal</h1><p>Jane Doe maintains the async runtime.</p>"
    );
    assert_eq!(
        data["generated"],
        json!({ "hero.subtitle": "Jane Doe maintains the async runtime." })
    );
    let keys: Vec<&str> = data["contextKeys"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(keys.contains(&"brand"));
    assert!(keys.contains(&"hero"));
}

#[tokio::test]
async fn test_compose_with_unset_event_field() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;
    let (_, template) = fixture
        .post(
            "/templates",
            json!({
                "name": "Venue",
                "htmlContent": "<h1>{{ meta.subjectA }}</h1><p>{{ event.venue }}</p>"
            }),
        )
        .await;

    let (status, body) = fixture
        .post(
            "/emails/compose",
            json!({
                "eventId": event_id,
                "templateId": template["data"]["id"],
                "subject": "See you there"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["html"], "<h1>See you there</h1><p></p>");
}

#[tokio::test]
async fn test_compose_fails_without_knowledge() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;
    let (_, template) = fixture
        .post(
            "/templates",
            json!({ "name": "Hero", "htmlContent": "<p>{{ hero.subtitle }}</p>" }),
        )
        .await;

    let (status, body) = fixture
        .post(
            "/emails/compose",
            json!({
                "eventId": event_id,
                "templateId": template["data"]["id"],
                "subject": "Hello"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_generate_email_with_mappings_and_reports() {
    let fixture = TestFixture::new().await;
    let event_id = fixture
        .create_event(json!({
            "name": "RustConf",
            "landingUrl": "https://rustconf.example/",
            "startsAt": "2025-05-15"
        }))
        .await;
    fixture
        .create_knowledge(&event_id, "speaker", "Jane Doe", "Jane Doe maintains the async runtime.")
        .await;
    fixture
        .create_knowledge(
            &event_id,
            "benefit",
            "Workshops",
            "Hands-on workshops with core maintainers. Bring your laptop.",
        )
        .await;

    let html = concat!(
        "<html><body>",
        "<p>{{ meta.preheader }}</p>",
        "<h1>{{ event.name }}</h1>",
        "<h2>{{ hero.subtitle }}</h2>",
        "<p>{{ event_date }}</p>",
        "<p>{{ venue_line }}</p>",
        "<a href=\"{{ meta.cta_top_url }}\">{{ meta.cta_top_text }}</a>",
        "<a href=\"https://rustconf.example/unsubscribe\">Unsubscribe</a>",
        "</body></html>"
    );
    let (status, template) = fixture
        .post(
            "/templates",
            json!({
                "name": "Full",
                "htmlContent": html,
                "subjectTemplate": "{{ event.name }}: {{ headline }}",
                "requiredVariables": ["headline"],
                "mappings": [
                    { "variable": "event_date", "source": "event.startsAt", "transform": "date" },
                    { "variable": "headline", "staticValue": "Stored headline" }
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let template_id = template["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = fixture
        .post(
            "/emails/generate",
            json!({
                "templateId": template_id,
                "eventId": event_id,
                "mappings": [{ "variable": "headline", "staticValue": "Tickets on sale" }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let data = &body["data"];
    assert_eq!(data["subject"], "RustConf: Tickets on sale");
    assert_eq!(data["preheader"], "Hands-on workshops with core maintainers.");
    assert_eq!(data["templateId"], template_id);

    let rendered = data["html"].as_str().unwrap();
    assert!(rendered.contains("<h1>RustConf</h1>"));
    assert!(rendered.contains("<p>15 May 2025</p>"));
    assert!(rendered.contains("<p></p>"));
    assert!(rendered.contains("Jane Doe maintains the async runtime."));

    let origin_of = |variable: &str| {
        data["mappingLog"]
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["variable"] == variable)
            .map(|e| e["origin"].clone())
            .unwrap()
    };
    assert_eq!(origin_of("headline"), "static");
    assert_eq!(origin_of("event_date"), "source");
    assert_eq!(origin_of("event.name"), "context");
    assert_eq!(origin_of("venue_line"), "unresolved");

    assert_eq!(data["contentValidation"]["valid"], true);
    assert_eq!(data["htmlValidation"]["valid"], true);
}

#[tokio::test]
async fn test_generate_email_reports_missing_required_variable() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;

    let (_, template) = fixture
        .post(
            "/templates",
            json!({
                "name": "Plain",
                "htmlContent": "<p>{{ event.name }}</p><p>{{ promo_code }}</p>",
                "requiredVariables": ["promo_code"]
            }),
        )
        .await;

    let (status, body) = fixture
        .post(
            "/emails/generate",
            json!({ "templateId": template["data"]["id"], "eventId": event_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let data = &body["data"];
    assert_eq!(data["subject"], "RustConf");
    assert_eq!(data["contentValidation"]["valid"], false);
    assert!(!data["contentValidation"]["errors"].as_array().unwrap().is_empty());
    let warnings = data["htmlValidation"]["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w == "No unsubscribe link found"));

    let (status, _) = fixture
        .post(
            "/emails/generate",
            json!({ "templateId": "missing", "eventId": event_id }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generate_email_fills_deep_unresolved_variable() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;

    let (_, template) = fixture
        .post(
            "/templates",
            json!({
                "name": "Logo",
                "htmlContent": "<img src=\"{{ brand.logo.url }}\" alt=\"x\"><p>{{ brand.name }}</p>"
            }),
        )
        .await;

    let (status, body) = fixture
        .post(
            "/emails/generate",
            json!({ "templateId": template["data"]["id"], "eventId": event_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let data = &body["data"];
    assert!(data["html"].as_str().unwrap().starts_with("<img src=\"\" alt=\"x\">"));
    let entry = data["mappingLog"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["variable"] == "brand.logo.url")
        .cloned()
        .unwrap();
    assert_eq!(entry["origin"], "unresolved");
    assert_eq!(entry["note"], "rendered as empty");
}

// ==================== CONTENT TYPE REGISTRY ====================

#[tokio::test]
async fn test_content_type_crud() {
    let fixture = TestFixture::new().await;

    let (status, _) = fixture
        .post("/content-types", json!({ "code": "", "name": "Digest" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, created) = fixture
        .post(
            "/content-types",
            json!({ "code": "digest", "name": "Weekly digest", "description": "Roundup" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = created["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["icon"], "FileText");
    assert_eq!(created["data"]["templatesCount"], 0);

    let (status, _) = fixture
        .post("/content-types", json!({ "code": "digest", "name": "Duplicate" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    fixture
        .post(
            "/templates",
            json!({ "name": "Digest A", "contentType": "digest", "htmlContent": "<p>{{ event.name }}</p>" }),
        )
        .await;

    let (_, listed) = fixture.get("/content-types").await;
    assert_eq!(listed["data"][0]["templatesCount"], 1);

    let (_, templates) = fixture.get("/templates?contentType=digest").await;
    assert_eq!(templates["data"].as_array().unwrap().len(), 1);

    let (status, body) = fixture
        .put(
            &format!("/content-types/{}", id),
            json!({ "icon": "Mail", "expectedVersion": 3 }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["details"]["currentVersion"], 1);

    let (status, updated) = fixture
        .put(
            &format!("/content-types/{}", id),
            json!({ "icon": "Mail", "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["icon"], "Mail");
    assert_eq!(updated["data"]["code"], "digest");
    assert_eq!(updated["data"]["version"], 2);

    let (status, _) = fixture.delete(&format!("/content-types/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = fixture.get(&format!("/content-types/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_template_variable_crud() {
    let fixture = TestFixture::new().await;
    fixture
        .post("/content-types", json!({ "code": "digest", "name": "Digest" }))
        .await;

    let (status, _) = fixture
        .post(
            "/template-variables",
            json!({ "contentType": "nope", "variableName": "hero.title", "description": "Title" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = fixture
        .post(
            "/template-variables",
            json!({ "contentType": "digest", "variableName": "hero.title", "description": " " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, created) = fixture
        .post(
            "/template-variables",
            json!({
                "contentType": "digest",
                "variableName": "hero.title",
                "description": "Headline",
                "displayOrder": 2
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["data"]["isRequired"], true);
    let id = created["data"]["id"].as_str().unwrap().to_string();

    fixture
        .post(
            "/template-variables",
            json!({
                "contentType": "digest",
                "variableName": "footer.note",
                "description": "Footer",
                "isRequired": false,
                "displayOrder": 1
            }),
        )
        .await;

    let (_, listed) = fixture.get("/template-variables?contentType=digest").await;
    let names: Vec<&str> = listed["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v["variableName"].as_str())
        .collect();
    assert_eq!(names, vec!["footer.note", "hero.title"]);

    let (status, updated) = fixture
        .put(
            &format!("/template-variables/{}", id),
            json!({ "defaultValue": "This week at RustConf" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["defaultValue"], "This week at RustConf");

    let (status, _) = fixture.delete(&format!("/template-variables/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = fixture.delete(&format!("/template-variables/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generate_email_uses_registered_variables() {
    let fixture = TestFixture::new().await;
    let event_id = fixture.create_event(json!({ "name": "RustConf" })).await;
    fixture
        .post("/content-types", json!({ "code": "digest", "name": "Digest" }))
        .await;
    fixture
        .post(
            "/template-variables",
            json!({
                "contentType": "digest",
                "variableName": "hero.title",
                "description": "Headline",
                "defaultValue": "This week at RustConf"
            }),
        )
        .await;
    fixture
        .post(
            "/template-variables",
            json!({
                "contentType": "digest",
                "variableName": "promo.code",
                "description": "Discount code"
            }),
        )
        .await;

    let (_, template) = fixture
        .post(
            "/templates",
            json!({
                "name": "Digest",
                "contentType": "digest",
                "htmlContent": "<h1>{{ hero.title }}</h1><p>{{ event.name }}</p>"
            }),
        )
        .await;

    let (status, body) = fixture
        .post(
            "/emails/generate",
            json!({
                "templateId": template["data"]["id"],
                "eventId": event_id,
                "contentTypeCode": "digest"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let data = &body["data"];
    assert!(data["html"]
        .as_str()
        .unwrap()
        .starts_with("<h1>This week at RustConf</h1>"));

    let log = data["mappingLog"].as_array().unwrap();
    let hero = log.iter().find(|e| e["variable"] == "hero.title").unwrap();
    assert_eq!(hero["origin"], "default");
    let promo = log.iter().find(|e| e["variable"] == "promo.code").unwrap();
    assert_eq!(promo["origin"], "unresolved");

    assert_eq!(data["contentValidation"]["valid"], false);
    let errors = data["contentValidation"]["errors"].as_array().unwrap();
    assert!(errors
        .iter()
        .any(|e| e.as_str().unwrap().contains("promo.code")));
}
