//! Service-layer tests with in-memory model clients.
//!
//! The embedder maps text onto a three-dimensional keyword space
//! (`rust`, `python`, bias) so similarity rankings are predictable.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use rag_chat::chat;
use rag_chat::completion::CompletionProvider;
use rag_chat::config::Config;
use rag_chat::context::AppContext;
use rag_chat::documents::{self, SummaryLength};
use rag_chat::embed_cmd;
use rag_chat::embedding::{DisabledProvider, EmbeddingProvider};
use rag_chat::models::{DocumentPatch, Role};
use rag_chat::store::SqliteStore;
use rag_chat::{db, migrate};

// ─── Fakes ──────────────────────────────────────────────────────────

struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    vec![
        if lower.contains("rust") { 1.0 } else { 0.0 },
        if lower.contains("python") { 1.0 } else { 0.0 },
        0.1,
    ]
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

struct RecordingCompleter {
    prompts: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingCompleter {
    fn new(fail: bool) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            fail,
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for RecordingCompleter {
    fn model_name(&self) -> &str {
        "recording"
    }
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail {
            bail!("model unavailable");
        }
        Ok("A generated answer.".to_string())
    }
}

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.db.path = tmp.path().join("data/test.sqlite");
    config.server.upload_dir = tmp.path().join("uploads");
    config.embedding.model = Some("keyword".to_string());
    config.embedding.dims = Some(3);
    config.persistence.initial_delay_ms = 1;
    config
}

async fn test_context(
    config: Config,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
) -> AppContext {
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    AppContext::from_parts(config, SqliteStore::new(pool), embedder, completer)
}

// ─── Documents ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_embeds_and_update_reembeds() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new());
    let ctx = test_context(
        test_config(&tmp),
        embedder.clone(),
        Arc::new(RecordingCompleter::new(false)),
    )
    .await;

    let doc = documents::create_document(&ctx, "Guide", "All about Rust", None)
        .await
        .unwrap();
    assert!(doc.has_embedding);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

    // Title-only change keeps the embedding without another model call.
    let renamed = documents::update_document(
        &ctx,
        &doc.id,
        DocumentPatch {
            title: Some("Rust Guide".to_string()),
            content: None,
        },
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(renamed.title, "Rust Guide");
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

    // Content change regenerates it, and search reflects the new text.
    documents::update_document(
        &ctx,
        &doc.id,
        DocumentPatch {
            title: None,
            content: Some("Now about Python".to_string()),
        },
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

    let hits = documents::search_documents(&ctx, "python", Some(1))
        .await
        .unwrap();
    assert_eq!(hits[0].id, doc.id);
    assert!(hits[0].similarity > 0.9);
}

#[tokio::test]
async fn test_update_missing_document_returns_none() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(
        test_config(&tmp),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(RecordingCompleter::new(false)),
    )
    .await;

    let result = documents::update_document(&ctx, "missing", DocumentPatch::default())
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(!documents::delete_document(&ctx, "missing").await.unwrap());
}

#[tokio::test]
async fn test_search_ranks_by_similarity() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(
        test_config(&tmp),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(RecordingCompleter::new(false)),
    )
    .await;

    let rust = documents::create_document(&ctx, "Rust", "Rust ownership rules", None)
        .await
        .unwrap();
    let python = documents::create_document(&ctx, "Python", "Python generators", None)
        .await
        .unwrap();

    let hits = documents::search_documents(&ctx, "How does Rust borrow?", None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, rust.id);
    assert_eq!(hits[1].id, python.id);
    assert!(hits[0].similarity > hits[1].similarity);
}

#[tokio::test]
async fn test_search_fails_when_embeddings_disabled() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(
        test_config(&tmp),
        Arc::new(DisabledProvider),
        Arc::new(RecordingCompleter::new(false)),
    )
    .await;

    let doc = documents::create_document(&ctx, "Plain", "No vectors here", None)
        .await
        .unwrap();
    assert!(!doc.has_embedding);
    assert!(documents::search_documents(&ctx, "anything", None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_delete_removes_uploaded_file() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(
        test_config(&tmp),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(RecordingCompleter::new(false)),
    )
    .await;

    let file_path = tmp.path().join("stored.pdf");
    std::fs::write(&file_path, b"%PDF-1.4").unwrap();
    let source = rag_chat::models::SourceFile {
        name: "original.pdf".to_string(),
        path: file_path.display().to_string(),
        size: 8,
    };

    let doc = documents::create_document(&ctx, "Uploaded", "Rust text", Some(source))
        .await
        .unwrap();
    assert!(documents::delete_document(&ctx, &doc.id).await.unwrap());
    assert!(!file_path.exists());
}

#[tokio::test]
async fn test_summarize_uses_completion() {
    let tmp = TempDir::new().unwrap();
    let completer = Arc::new(RecordingCompleter::new(false));
    let ctx = test_context(
        test_config(&tmp),
        Arc::new(KeywordEmbedder::new()),
        completer.clone(),
    )
    .await;

    let doc = documents::create_document(&ctx, "Notes", "Long Rust notes", None)
        .await
        .unwrap();
    let summary = documents::summarize_document(&ctx, &doc.id, SummaryLength::Short)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary, "A generated answer.");

    let prompts = completer.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Long Rust notes"));

    assert!(
        documents::summarize_document(&ctx, "missing", SummaryLength::Medium)
            .await
            .unwrap()
            .is_none()
    );
}

// ─── Chat ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_message_uses_retrieved_context() {
    let tmp = TempDir::new().unwrap();
    let completer = Arc::new(RecordingCompleter::new(false));
    let ctx = test_context(
        test_config(&tmp),
        Arc::new(KeywordEmbedder::new()),
        completer.clone(),
    )
    .await;

    documents::create_document(&ctx, "Rust Book", "Rust has ownership", None)
        .await
        .unwrap();
    let chat = chat::create_chat(&ctx, None).await.unwrap();
    assert_eq!(chat.title, "New Chat");

    let exchange = chat::send_message(&ctx, &chat.id, "Explain Rust ownership")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exchange.user_message.role, Role::User);
    assert_eq!(exchange.assistant_message.content, "A generated answer.");
    assert_eq!(exchange.context[0].title, "Rust Book");

    let prompt = &completer.prompts()[0];
    assert!(prompt.starts_with("Based on the following context:"));
    assert!(prompt.contains("Document: Rust Book\nContent: Rust has ownership"));
    assert!(prompt.ends_with("Answer this question: Explain Rust ownership"));

    let stored = chat::get_chat(&ctx, &chat.id).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 2);
}

#[tokio::test]
async fn test_send_message_limits_context_documents() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.retrieval.context_documents = 1;
    let completer = Arc::new(RecordingCompleter::new(false));
    let ctx = test_context(config, Arc::new(KeywordEmbedder::new()), completer.clone()).await;

    documents::create_document(&ctx, "First", "Rust one", None)
        .await
        .unwrap();
    documents::create_document(&ctx, "Second", "Rust two", None)
        .await
        .unwrap();
    let chat = chat::create_chat(&ctx, Some("Q")).await.unwrap();

    let exchange = chat::send_message(&ctx, &chat.id, "rust?")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exchange.context.len(), 2);
    assert_eq!(completer.prompts()[0].matches("Document: ").count(), 1);
}

#[tokio::test]
async fn test_send_message_missing_chat_skips_models() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new());
    let completer = Arc::new(RecordingCompleter::new(false));
    let ctx = test_context(test_config(&tmp), embedder.clone(), completer.clone()).await;

    let result = chat::send_message(&ctx, "no-such-chat", "hello")
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert!(completer.prompts().is_empty());
}

#[tokio::test]
async fn test_failed_completion_persists_nothing() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(
        test_config(&tmp),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(RecordingCompleter::new(true)),
    )
    .await;

    let chat = chat::create_chat(&ctx, None).await.unwrap();
    assert!(chat::send_message(&ctx, &chat.id, "hello").await.is_err());

    let stored = chat::get_chat(&ctx, &chat.id).await.unwrap().unwrap();
    assert!(stored.messages.is_empty());
}

#[tokio::test]
async fn test_send_message_without_embeddings_uses_bare_question() {
    let tmp = TempDir::new().unwrap();
    let completer = Arc::new(RecordingCompleter::new(false));
    let ctx = test_context(test_config(&tmp), Arc::new(DisabledProvider), completer.clone()).await;

    documents::create_document(&ctx, "Doc", "Rust text", None)
        .await
        .unwrap();
    let chat = chat::create_chat(&ctx, None).await.unwrap();
    let exchange = chat::send_message(&ctx, &chat.id, "What is Rust?")
        .await
        .unwrap()
        .unwrap();

    assert!(exchange.context.is_empty());
    assert_eq!(completer.prompts()[0], "What is Rust?");
}

// ─── Embedding backfill ─────────────────────────────────────────────

#[tokio::test]
async fn test_embed_pending_backfills_documents() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    // Documents written while embeddings were off.
    let plain = test_context(
        config.clone(),
        Arc::new(DisabledProvider),
        Arc::new(RecordingCompleter::new(false)),
    )
    .await;
    documents::create_document(&plain, "A", "Rust a", None)
        .await
        .unwrap();
    documents::create_document(&plain, "B", "Python b", None)
        .await
        .unwrap();

    let ctx = test_context(
        config,
        Arc::new(KeywordEmbedder::new()),
        Arc::new(RecordingCompleter::new(false)),
    )
    .await;

    let dry = embed_cmd::embed_pending(&ctx, None, true).await.unwrap();
    assert_eq!(dry.total, 2);
    assert_eq!(dry.embedded, 0);

    let report = embed_cmd::embed_pending(&ctx, None, false).await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.embedded, 2);
    assert_eq!(report.failed, 0);

    let again = embed_cmd::embed_pending(&ctx, None, false).await.unwrap();
    assert_eq!(again.total, 0);

    let hits = documents::search_documents(&ctx, "python", Some(1))
        .await
        .unwrap();
    assert_eq!(hits[0].title, "B");
}

#[tokio::test]
async fn test_embed_pending_requires_provider() {
    let tmp = TempDir::new().unwrap();
    let ctx = test_context(
        test_config(&tmp),
        Arc::new(DisabledProvider),
        Arc::new(RecordingCompleter::new(false)),
    )
    .await;
    assert!(embed_cmd::embed_pending(&ctx, None, false).await.is_err());
}
