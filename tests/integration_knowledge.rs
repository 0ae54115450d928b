#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end ingestion, retrieval and chat against a mock Ollama server

use rag_chat::chat::ChatSession;
use rag_chat::config::{Config, OllamaConfig};
use rag_chat::embeddings::{ChunkingConfig, EmbeddingProvider, OllamaClient};
use rag_chat::knowledge::KnowledgeBase;
use rag_chat::loader::UploadStaging;
use rag_chat::session::{Message, Role, SessionStore};
use serde_json::json;
use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const FOX_TEXT: &str = "The quick brown fox. The fox ran far.";

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok(); // Ignore error if already initialized
}

/// Embeds text by counting words from a few concept groups, so that
/// related wording lands close together
struct ConceptEmbedder;

impl ConceptEmbedder {
    const CONCEPTS: &'static [&'static [&'static str]] = &[
        &["fox", "foxes", "dog", "animal"],
        &["color", "colour", "brown", "red"],
        &["ran", "run", "far"],
    ];

    fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.1, 0.0, 0.0, 0.0];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            for (axis, words) in Self::CONCEPTS.iter().enumerate() {
                if words.contains(&word.as_str()) {
                    vector[axis + 1] += 1.0;
                }
            }
        }
        vector
    }
}

impl Respond for ConceptEmbedder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("embed request should be JSON");
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .expect("input should be a list")
            .iter()
            .map(|text| Self::vector(text.as_str().unwrap_or_default()))
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

/// Answers from the retrieved context when there is any
struct ContextAwareChat;

impl Respond for ContextAwareChat {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("chat request should be JSON");
        let last = body["messages"]
            .as_array()
            .and_then(|messages| messages.last())
            .and_then(|message| message["content"].as_str())
            .unwrap_or_default();

        let answer = if last.starts_with("Context from Knowledge Base:") && last.contains("brown")
        {
            ["The fox ", "is brown."]
        } else {
            ["I do not ", "know."]
        };

        let lines: String = answer
            .iter()
            .map(|part| json!({ "message": { "role": "assistant", "content": part }, "done": false }))
            .chain(std::iter::once(json!({ "done": true })))
            .map(|line| format!("{}\n", line))
            .collect::<Vec<_>>()
            .concat();

        ResponseTemplate::new(200).set_body_raw(lines.into_bytes(), "application/x-ndjson")
    }
}

async fn start_mock_ollama() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ConceptEmbedder)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ContextAwareChat)
        .mount(&server)
        .await;

    server
}

fn create_test_config(port: u16, temp_dir: &TempDir) -> Config {
    Config {
        base_dir: temp_dir.path().join("data"),
        ollama: OllamaConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..OllamaConfig::default()
        },
        chunking: ChunkingConfig {
            chunk_size: 20,
            chunk_overlap: 5,
        },
        ..Config::default()
    }
}

/// A local port with nothing listening on it
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("should bind a free port");
    listener.local_addr().expect("listener has an address").port()
}

fn write_fox(temp_dir: &TempDir) -> PathBuf {
    let path = temp_dir.path().join("fox.txt");
    fs::write(&path, FOX_TEXT).expect("should write fox.txt");
    path
}

async fn open_knowledge(config: &Config) -> (KnowledgeBase, OllamaClient) {
    let client = OllamaClient::new(&config.ollama).expect("Failed to create Ollama client");
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(client.clone());
    let knowledge = KnowledgeBase::from_config(config, embedder)
        .await
        .expect("knowledge base should open");
    (knowledge, client)
}

#[tokio::test(flavor = "multi_thread")]
async fn staged_ingestion_then_query() {
    init_test_tracing();
    let server = start_mock_ollama().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(server.address().port(), &temp_dir);
    let source = write_fox(&temp_dir);

    let (mut knowledge, _client) = open_knowledge(&config).await;

    let mut staging =
        UploadStaging::new(&config.upload_dir_path()).expect("staging area should be created");
    staging.stage(&source).expect("file should stage");
    let staging_dir = staging.path().to_path_buf();

    let report = knowledge
        .add_documents(staging.files())
        .await
        .expect("ingestion should succeed");
    staging.close().expect("staging should clean up");

    info!("Ingested {} chunks", report.chunks_added);
    assert!(report.chunks_added >= 2);
    assert!(!staging_dir.exists());
    assert!(source.exists(), "the caller's file is never touched");

    let results = knowledge
        .query("What color is the fox?", 1)
        .await
        .expect("query should succeed");
    assert_eq!(results.len(), 1);
    assert!(results[0].contains("brown fox"), "got {:?}", results);
}

#[tokio::test(flavor = "multi_thread")]
async fn knowledge_reloads_after_restart() {
    init_test_tracing();
    let server = start_mock_ollama().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(server.address().port(), &temp_dir);

    {
        let (mut knowledge, _client) = open_knowledge(&config).await;
        knowledge
            .add_documents(&[write_fox(&temp_dir)])
            .await
            .expect("ingestion should succeed");
    }

    let (knowledge, _client) = open_knowledge(&config).await;
    assert!(knowledge.has_knowledge().await);
    assert_eq!(
        knowledge.manifest().map(|m| m.embedding_model.as_str()),
        Some("nomic-embed-text")
    );
    let results = knowledge
        .query("What color is the fox?", 1)
        .await
        .expect("query should succeed");
    assert!(results[0].contains("brown fox"));
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_embedding_model_is_detected() {
    init_test_tracing();
    let server = start_mock_ollama().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = create_test_config(server.address().port(), &temp_dir);

    {
        let (mut knowledge, _client) = open_knowledge(&config).await;
        knowledge
            .add_documents(&[write_fox(&temp_dir)])
            .await
            .expect("ingestion should succeed");
    }

    config.ollama.embedding_model = "mxbai-embed-large".to_string();
    let (mut knowledge, _client) = open_knowledge(&config).await;

    assert!(matches!(
        knowledge.query("What color is the fox?", 1).await,
        Err(rag_chat::RagError::EmbeddingMismatch { .. })
    ));

    assert!(knowledge.clear_database().await);
    knowledge
        .add_documents(&[write_fox(&temp_dir)])
        .await
        .expect("re-ingestion with the new model should succeed");
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_turn_uses_retrieved_context() {
    init_test_tracing();
    let server = start_mock_ollama().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(server.address().port(), &temp_dir);

    let (mut knowledge, client) = open_knowledge(&config).await;
    knowledge
        .add_documents(&[write_fox(&temp_dir)])
        .await
        .expect("ingestion should succeed");

    let store = SessionStore::new(config.history_dir_path()).expect("store should open");
    let mut chat = ChatSession::new(&store, &client, client.chat_model()).with_knowledge(&knowledge, 1);

    let mut progress = Vec::new();
    let reply = chat
        .send("What color is the fox?", true, |text| progress.push(text.to_string()))
        .await
        .expect("turn should succeed");

    assert_eq!(reply.as_deref(), Some("The fox is brown."));
    assert_eq!(progress, vec!["The fox ", "The fox is brown."]);

    let stored = store.load_session(chat.session_id()).expect("load");
    assert_eq!(
        stored,
        vec![
            Message::user("What color is the fox?"),
            Message::assistant("The fox is brown.")
        ]
    );

    let reply = chat
        .send("And without context?", false, |_| {})
        .await
        .expect("turn should succeed");
    assert_eq!(reply.as_deref(), Some("I do not know."));
    assert_eq!(chat.messages().len(), 4);
    assert_eq!(chat.messages()[3].role, Role::Assistant);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_chat_keeps_user_message() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(closed_port(), &temp_dir);

    let client = OllamaClient::new(&config.ollama).expect("Failed to create Ollama client");
    let store = SessionStore::new(config.history_dir_path()).expect("store should open");
    let mut chat = ChatSession::new(&store, &client, client.chat_model());

    let result = chat.send("Is anyone there?", false, |_| {}).await;

    assert!(matches!(result, Err(rag_chat::RagError::Connection(_))));
    assert_eq!(
        store.load_session(chat.session_id()).expect("load"),
        vec![Message::user("Is anyone there?")]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_embedder_aborts_ingestion() {
    init_test_tracing();
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = create_test_config(closed_port(), &temp_dir);

    let (mut knowledge, _client) = open_knowledge(&config).await;
    let result = knowledge.add_documents(&[write_fox(&temp_dir)]).await;

    assert!(matches!(result, Err(rag_chat::RagError::Embedding(_))));
    assert!(!knowledge.has_knowledge().await);
}
