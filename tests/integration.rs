use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use chat_recall::config::Config;
use chat_recall::search::build_pipeline;
use chat_recall::sqlite_store::SqliteStore;
use chat_recall::{db, migrate, server};
use chat_recall_core::api::{SearchMode, SearchRequest, SearchResults};
use chat_recall_core::config::PipelineConfig;
use chat_recall_core::embedding::Embedder;
use chat_recall_core::models::{Conversation, Message, NewMessage, Role};
use chat_recall_core::store::MessageStore;
use chat_recall_core::{RecallError, RecallPipeline};

const ARCHIVE: &str = concat!(
    r#"{"id":"c1","title":"Garden","messages":["#,
    r#"{"id":"m1","role":"user","content":"How often should I water tomato plants?","created_at":"2024-05-01T10:00:00Z"},"#,
    r#"{"id":"m2","role":"assistant","content":"Water tomato plants deeply twice a week.","created_at":"2024-05-01T10:01:00Z"},"#,
    r#"{"id":"m3","role":"user","content":"What about peppers?","created_at":"2024-05-01T10:02:00Z"},"#,
    r#"{"id":"m4","role":"assistant","content":"Peppers like drier soil.","created_at":"2024-05-01T10:03:00Z"}]}"#,
    "\n",
    r#"{"id":"c2","title":"Cooking","messages":["#,
    r#"{"id":"n1","role":"user","content":"Best pasta sauce recipe?","created_at":"2024-06-01T18:00:00Z"},"#,
    r#"{"id":"n2","role":"assistant","content":"Use ripe tomatoes and basil.","created_at":"2024-06-01T18:01:00Z"}]}"#,
    "\n"
);

// ============ CLI ============

fn recall_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("recall");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(root.join("archive.jsonl"), ARCHIVE).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/recall.sqlite"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("recall.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_recall(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = recall_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run recall binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn imported_env() -> (TempDir, PathBuf) {
    let (tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_recall(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    let archive = tmp.path().join("archive.jsonl");
    let (stdout, stderr, ok) = run_recall(&config, &["import", archive.to_str().unwrap()]);
    assert!(ok, "import failed: {}", stderr);
    assert!(stdout.contains("conversations: 2"));
    assert!(stdout.contains("messages: 6"));
    (tmp, config)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_recall(&config, &["init"]);
    assert!(ok);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/recall.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, _, ok) = run_recall(&config, &["init"]);
    assert!(ok);
    let (_, stderr, ok) = run_recall(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_reimport_does_not_duplicate() {
    let (tmp, config) = imported_env();
    let archive = tmp.path().join("archive.jsonl");
    let (_, _, ok) = run_recall(&config, &["import", archive.to_str().unwrap()]);
    assert!(ok);

    let (stdout, _, ok) = run_recall(&config, &["search", "pasta", "--mode", "lexical"]);
    assert!(ok);
    assert_eq!(stdout.matches("id: n1").count(), 1);
}

#[test]
fn test_search_lexical_legacy() {
    let (_tmp, config) = imported_env();
    let (stdout, stderr, ok) = run_recall(&config, &["search", "pasta", "--mode", "lexical"]);
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.contains("Cooking"));
    assert!(stdout.contains("id: n1"));
    assert!(!stdout.contains("CTX_START"));
}

#[test]
fn test_search_lexical_contextual() {
    let (_tmp, config) = imported_env();
    let (stdout, stderr, ok) = run_recall(
        &config,
        &["search", "peppers", "--mode", "lexical", "--context", "1"],
    );
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.contains("c1"));
    assert!(stdout.contains("CTX_START"));
    assert!(stdout.contains("MATCH_START"));
}

#[test]
fn test_search_json_output() {
    let (_tmp, config) = imported_env();
    let (stdout, _, ok) = run_recall(
        &config,
        &[
            "search", "tomato", "--mode", "lexical", "--context", "1", "--no-markers", "--json",
        ],
    );
    assert!(ok);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["contextual"], true);
    assert_eq!(value["mode"], "lexical");
    let results = value["results"].as_array().unwrap();
    assert!(!results.is_empty());
    for r in results {
        assert!(r["window_id"].as_str().unwrap().starts_with("c1:"));
        assert!(!r["content"].as_str().unwrap().contains("CTX_START"));
    }
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config) = imported_env();
    let args = ["search", "tomato plants", "--mode", "lexical", "--context", "2", "--json"];
    let (first, _, _) = run_recall(&config, &args);
    let (second, _, _) = run_recall(&config, &args);
    assert_eq!(first, second);
}

#[test]
fn test_search_no_results() {
    let (_tmp, config) = imported_env();
    let (stdout, _, ok) = run_recall(&config, &["search", "zucchini", "--mode", "lexical"]);
    assert!(ok);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config) = imported_env();
    let (_, stderr, ok) = run_recall(&config, &["search", "  ", "--mode", "lexical"]);
    assert!(!ok);
    assert!(stderr.contains("must not be empty"));
}

#[test]
fn test_search_context_out_of_range() {
    let (_tmp, config) = imported_env();
    let (_, stderr, ok) = run_recall(
        &config,
        &["search", "tomato", "--mode", "lexical", "--context", "11"],
    );
    assert!(!ok);
    assert!(stderr.contains("context_window"));
}

#[test]
fn test_search_default_mode_errors_when_disabled() {
    let (_tmp, config) = imported_env();
    let (_, stderr, ok) = run_recall(&config, &["search", "tomato"]);
    assert!(!ok);
    assert!(stderr.contains("requires embeddings"));
}

#[test]
fn test_search_mode_semantic_errors_when_disabled() {
    let (_tmp, config) = imported_env();
    let (_, stderr, ok) = run_recall(&config, &["search", "tomato", "--mode", "semantic"]);
    assert!(!ok);
    assert!(stderr.contains("requires embeddings"));
}

#[test]
fn test_search_unknown_mode_errors() {
    let (_tmp, config) = imported_env();
    let (_, stderr, ok) = run_recall(&config, &["search", "tomato", "--mode", "fuzzy"]);
    assert!(!ok);
    assert!(stderr.contains("unknown search mode"));
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config) = imported_env();
    let (_, stderr, ok) = run_recall(&config, &["embed", "pending"]);
    assert!(!ok);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_invalid_weights_rejected_at_startup() {
    let (tmp, _) = setup_test_env();
    let config_path = tmp.path().join("config/bad.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/data/recall.sqlite\"\n\n[retrieval]\nvector_weight = 0.7\nlexical_weight = 0.7\n",
            tmp.path().display()
        ),
    )
    .unwrap();
    let (_, stderr, ok) = run_recall(&config_path, &["init"]);
    assert!(!ok);
    assert!(stderr.contains("invalid configuration"));
}

// ============ Library over SqliteStore ============

/// Returns the same vector for every query.
struct FixedEmbedder(Vec<f32>);

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dims(&self) -> usize {
        self.0.len()
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

async fn seeded_store(tmp: &TempDir) -> SqliteStore {
    let pool = db::connect_path(&tmp.path().join("recall.sqlite"))
        .await
        .unwrap();
    migrate::migrate(&pool).await.unwrap();
    let store = SqliteStore::new(pool);

    let conversations = [
        (
            "c1",
            "Garden",
            vec![
                ("m1", Role::User, "How often should I water tomato plants?", vec![1.0, 0.0]),
                ("m2", Role::Assistant, "Water tomato plants deeply twice a week.", vec![0.6, 0.8]),
                ("m3", Role::User, "What about peppers?", vec![0.0, 1.0]),
                ("m4", Role::Assistant, "Peppers like drier soil.", vec![0.0, 1.0]),
            ],
        ),
        (
            "c2",
            "Cooking",
            vec![
                ("n1", Role::User, "Best pasta sauce recipe?", vec![0.0, 1.0]),
                ("n2", Role::Assistant, "Use ripe tomatoes and basil.", vec![0.0, 1.0]),
            ],
        ),
    ];

    for (day, (cid, title, messages)) in conversations.into_iter().enumerate() {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1 + day as u32, 10, 0, 0)
            .unwrap();
        store
            .upsert_conversation(&Conversation {
                id: cid.to_string(),
                title: Some(title.to_string()),
                created_at: start,
            })
            .await
            .unwrap();
        for (i, (id, role, content, embedding)) in messages.into_iter().enumerate() {
            store
                .insert_message(&NewMessage {
                    message: Message {
                        id: id.to_string(),
                        conversation_id: cid.to_string(),
                        role,
                        content: content.to_string(),
                        created_at: start + chrono::Duration::minutes(i as i64),
                    },
                    embedding: Some(embedding),
                })
                .await
                .unwrap();
        }
    }

    store
}

fn pipeline_over(store: SqliteStore, query_vec: Vec<f32>) -> RecallPipeline {
    RecallPipeline::new(
        PipelineConfig::default(),
        Arc::new(store),
        Arc::new(FixedEmbedder(query_vec)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_sqlite_lexical_search_uses_bm25() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;

    let hits = store.lexical_search("tomato plants", 10).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|c| c.message_id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"m1") && ids.contains(&"m2"));
    assert!(hits.iter().all(|c| c.raw_score > 0.0));

    // FTS syntax in user input is inert.
    let hits = store.lexical_search("content:pasta NEAR(", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].message_id, "n1");
}

#[tokio::test]
async fn test_sqlite_semantic_legacy_search() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let pipeline = pipeline_over(store, vec![1.0, 0.0]);

    let mut request = SearchRequest::new("watering");
    request.mode = SearchMode::Semantic;
    let response = pipeline.search(&request).await.unwrap();

    let SearchResults::Legacy(entries) = response.results else {
        panic!("expected legacy results");
    };
    let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
    assert!((entries[0].relevance - 1.0).abs() < 1e-9);
    assert_eq!(entries[0].title.as_deref(), Some("Garden"));
}

#[tokio::test]
async fn test_sqlite_hybrid_contextual_merges_overlaps() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let pipeline = pipeline_over(store, vec![1.0, 0.0]);

    let response = pipeline
        .search(&SearchRequest::contextual("tomato", 1))
        .await
        .unwrap();

    let SearchResults::Contextual(windows) = response.results else {
        panic!("expected contextual results");
    };
    assert_eq!(windows.len(), 1);
    let meta = &windows[0].metadata;
    assert_eq!(meta.conversation_id, "c1");
    assert_eq!(meta.start_index, 0);
    assert!(meta.merged_matches.contains(&"m1".to_string()));
    assert!(meta.merged_matches.contains(&"m2".to_string()));
    assert_eq!(windows[0].window_id, format!("c1:{}", meta.matched_message_id));
}

#[tokio::test]
async fn test_unreachable_embedder_is_unavailable_not_timeout() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let config: Config = toml::from_str(
        r#"
[db]
path = "unused"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 2
url = "http://127.0.0.1:1"
max_retries = 5
"#,
    )
    .unwrap();
    let pipeline = build_pipeline(&config, Arc::new(store)).unwrap();

    let started = Instant::now();
    let err = pipeline
        .search(&SearchRequest::new("tomato"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, RecallError::RetrievalUnavailable { .. }),
        "unexpected {:?}",
        err
    );
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_sqlite_replace_conversation_drops_stale_rows() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let garden = store.get_conversation("c1").await.unwrap().unwrap();

    let replacement = NewMessage {
        message: Message {
            id: "m1".to_string(),
            conversation_id: "c1".to_string(),
            role: Role::User,
            content: "Do peppers need shade?".to_string(),
            created_at: garden.created_at,
        },
        embedding: None,
    };
    store
        .replace_conversation(&garden, &[replacement.clone()])
        .await
        .unwrap();

    let ids: Vec<String> = store
        .conversation_messages("c1")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["m1"]);
    assert_eq!(store.counts().await.unwrap(), (2, 3));
    assert!(store.lexical_search("tomato", 10).await.unwrap().is_empty());
    let vector_ids: Vec<String> = store
        .vector_search(&[0.6, 0.8], 10)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.message_id)
        .collect();
    assert!(!vector_ids.iter().any(|id| id.starts_with('m')));

    // A message from another conversation rolls the whole call back.
    let stray = NewMessage {
        message: Message {
            conversation_id: "c2".to_string(),
            id: "n9".to_string(),
            ..replacement.message.clone()
        },
        embedding: None,
    };
    assert!(store
        .replace_conversation(&garden, &[stray])
        .await
        .is_err());
    assert_eq!(store.conversation_messages("c1").await.unwrap().len(), 1);
}

// ============ HTTP ============

async fn spawn_server(pipeline: RecallPipeline) -> String {
    let app = server::build_router(Arc::new(pipeline));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_endpoints() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let base = spawn_server(pipeline_over(store, vec![1.0, 0.0])).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/api/rag/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["conversations"], 2);
    assert_eq!(health["messages"], 6);
    assert_eq!(health["embedding_model"], "fixed");

    let resp = client
        .post(format!("{}/api/search", base))
        .json(&serde_json::json!({"query": "tomato", "context_window": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["contextual"], true);
    assert_eq!(body["results"][0]["metadata"]["conversation_id"], "c1");

    let resp = client
        .post(format!("{}/api/rag/query", base))
        .json(&serde_json::json!({"query": "pasta", "search_type": "keyword"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["search_type"], "keyword");
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["id"], "n1");
    assert_eq!(body["results"][0]["title"], "Cooking");
}

#[tokio::test]
async fn test_http_rag_query_search_types() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let base = spawn_server(pipeline_over(store, vec![1.0, 0.0])).await;
    let client = reqwest::Client::new();

    // Default is semantic: the fixed query vector only matches the garden
    // messages, whatever the text says.
    let body: serde_json::Value = client
        .post(format!("{}/api/rag/query", base))
        .json(&serde_json::json!({"query": "pasta"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["search_type"], "semantic");
    let ids: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["m1", "m2"]);

    let body: serde_json::Value = client
        .post(format!("{}/api/rag/query", base))
        .json(&serde_json::json!({"query": "tomato", "search_type": "keyword", "n_results": 1}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 1);

    let resp = client
        .post(format!("{}/api/rag/query", base))
        .json(&serde_json::json!({"query": "pasta", "search_type": "fuzzy"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_rag_query_keyword_works_without_embeddings() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let config: Config = toml::from_str("[db]\npath = \"unused\"\n").unwrap();
    let pipeline = build_pipeline(&config, Arc::new(store)).unwrap();
    let base = spawn_server(pipeline).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/rag/query", base))
        .json(&serde_json::json!({"query": "pasta", "search_type": "keyword"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["results"][0]["id"], "n1");
}

#[tokio::test]
async fn test_http_error_contract() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let base = spawn_server(pipeline_over(store, vec![1.0, 0.0])).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/search", base))
        .json(&serde_json::json!({"query": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/api/search", base))
        .json(&serde_json::json!({"query": "tomato", "n_results": 101}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/search", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}
