//! # RAG Chat CLI (`ragchat`)
//!
//! Manages the document store and chats from the command line and starts
//! the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat init` | Create the SQLite database and run schema migrations |
//! | `ragchat serve` | Start the HTTP API server |
//! | `ragchat doc add\|list\|get\|delete` | Manage documents |
//! | `ragchat doc search "<query>"` | Similarity search over stored documents |
//! | `ragchat doc summarize <id>` | Summarize a document with the completion model |
//! | `ragchat doc upload <file.pdf>` | Ingest a PDF |
//! | `ragchat chat new\|list\|show\|send\|delete` | Manage chats and ask questions |
//! | `ragchat embed pending` | Backfill missing or stale embeddings |
//!
//! Logs go to stderr (filter with `RUST_LOG`); command output goes to stdout.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rag_chat::config::{self, Config};
use rag_chat::context::AppContext;
use rag_chat::documents::{self, validate_new_document, SummaryLength};
use rag_chat::models::{Chat, Document, DocumentPatch};
use rag_chat::upload::{ingest_upload, IncomingFile};
use rag_chat::{chat, db, embed_cmd, migrate, server};

/// RAG Chat: answer questions over your own documents with a local or
/// hosted language model.
#[derive(Parser)]
#[command(
    name = "ragchat",
    about = "RAG Chat: retrieval-augmented chat over your documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    Serve,

    /// Manage documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Manage chats.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Manage embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },
}

#[derive(Subcommand)]
enum DocAction {
    /// Create a document from inline text or a text file.
    Add {
        #[arg(long)]
        title: String,
        /// Document text.
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,
        /// Read the document text from a UTF-8 file.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List documents, newest first.
    List,
    /// Print one document.
    Get { id: String },
    /// Change a document's title or content.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
    },
    /// Delete a document.
    Delete { id: String },
    /// Rank documents by similarity to a query.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Summarize a document.
    Summarize {
        id: String,
        /// short, medium or long.
        #[arg(long, default_value = "medium")]
        length: String,
    },
    /// Ingest a PDF file.
    Upload {
        path: PathBuf,
        /// Defaults to the file name.
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// Start a new chat.
    New {
        #[arg(long)]
        title: Option<String>,
    },
    /// List chats, most recently active first.
    List,
    /// Print a chat with all of its messages.
    Show { id: String },
    /// Ask a question in a chat.
    Send { id: String, message: String },
    /// Delete a chat and its messages.
    Delete { id: String },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed documents whose embedding is missing or stale.
    Pending {
        /// Maximum number of documents to embed.
        #[arg(long)]
        limit: Option<usize>,
        /// Only count the pending documents.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rag_chat=info,tower_http=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Doc { action } => run_doc(&cfg, action).await?,
        Commands::Chat { action } => run_chat(&cfg, action).await?,
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, dry_run } => {
                let ctx = AppContext::open(&cfg).await?;
                let report = embed_cmd::embed_pending(&ctx, limit, dry_run).await?;
                if dry_run {
                    println!("embed pending (dry-run)");
                    println!("  documents needing embeddings: {}", report.total);
                } else {
                    println!("embed pending");
                    println!("  total pending: {}", report.total);
                    println!("  embedded: {}", report.embedded);
                    println!("  failed: {}", report.failed);
                    if report.skipped > 0 {
                        println!("  skipped (changed while embedding): {}", report.skipped);
                    }
                }
            }
        },
    }

    Ok(())
}

async fn run_doc(cfg: &Config, action: DocAction) -> anyhow::Result<()> {
    let ctx = AppContext::open(cfg).await?;

    match action {
        DocAction::Add {
            title,
            content,
            file,
        } => {
            let content = match (content, file) {
                (Some(text), _) => Some(text),
                (None, Some(path)) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                ),
                (None, None) => None,
            };
            let (title, content) = validate_new_document(Some(title.as_str()), content.as_deref())
                .map_err(anyhow::Error::msg)?;
            let doc = documents::create_document(&ctx, &title, &content, None).await?;
            println!("{}", doc.id);
        }
        DocAction::List => {
            let docs = documents::list_documents(&ctx).await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!(
                    "{}  {}  {}{}",
                    doc.id,
                    doc.created_at.format("%Y-%m-%d %H:%M"),
                    doc.title,
                    if doc.has_embedding { "" } else { "  (not embedded)" }
                );
            }
        }
        DocAction::Get { id } => match documents::get_document(&ctx, &id).await? {
            Some(doc) => print_document(&doc),
            None => bail!("document not found: {}", id),
        },
        DocAction::Update { id, title, content } => {
            let patch = DocumentPatch { title, content };
            match documents::update_document(&ctx, &id, patch).await? {
                Some(doc) => println!("Updated {} ({})", doc.id, doc.title),
                None => bail!("document not found: {}", id),
            }
        }
        DocAction::Delete { id } => {
            if !documents::delete_document(&ctx, &id).await? {
                bail!("document not found: {}", id);
            }
            println!("Deleted {}", id);
        }
        DocAction::Search { query, limit } => {
            if query.trim().is_empty() {
                bail!("query must not be empty");
            }
            let hits = documents::search_documents(&ctx, &query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.3}] {}  {}", i + 1, hit.similarity, hit.title, hit.id);
                println!("    {}", snippet(&hit.content, 160));
            }
        }
        DocAction::Summarize { id, length } => {
            let length: SummaryLength = length.parse().map_err(anyhow::Error::msg)?;
            match documents::summarize_document(&ctx, &id, length).await? {
                Some(summary) => println!("{}", summary),
                None => bail!("document not found: {}", id),
            }
        }
        DocAction::Upload { path, title } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document.pdf".to_string());
            let file = IncomingFile {
                file_name,
                content_type: None,
                bytes,
            };
            let doc = ingest_upload(&ctx, file, title.as_deref()).await?;
            println!("{}", doc.id);
        }
    }

    Ok(())
}

async fn run_chat(cfg: &Config, action: ChatAction) -> anyhow::Result<()> {
    let ctx = AppContext::open(cfg).await?;

    match action {
        ChatAction::New { title } => {
            let chat = chat::create_chat(&ctx, title.as_deref()).await?;
            println!("{}", chat.id);
        }
        ChatAction::List => {
            let chats = chat::list_chats(&ctx).await?;
            if chats.is_empty() {
                println!("No chats.");
            }
            for c in chats {
                let preview = c
                    .messages
                    .first()
                    .map(|m| snippet(&m.content, 60))
                    .unwrap_or_default();
                println!(
                    "{}  {}  {}  {}",
                    c.id,
                    c.updated_at.format("%Y-%m-%d %H:%M"),
                    c.title,
                    preview
                );
            }
        }
        ChatAction::Show { id } => match chat::get_chat(&ctx, &id).await? {
            Some(c) => print_chat(&c),
            None => bail!("chat not found: {}", id),
        },
        ChatAction::Send { id, message } => {
            if message.trim().is_empty() {
                bail!("message must not be empty");
            }
            match chat::send_message(&ctx, &id, &message).await? {
                Some(exchange) => {
                    println!("{}", exchange.assistant_message.content);
                    if !exchange.context.is_empty() {
                        println!();
                        println!("Sources:");
                        for hit in &exchange.context {
                            println!("  [{:.3}] {}  {}", hit.similarity, hit.title, hit.id);
                        }
                    }
                }
                None => bail!("chat not found: {}", id),
            }
        }
        ChatAction::Delete { id } => {
            if !chat::delete_chat(&ctx, &id).await? {
                bail!("chat not found: {}", id);
            }
            println!("Deleted {}", id);
        }
    }

    Ok(())
}

fn print_document(doc: &Document) {
    println!("--- {} ---", doc.title);
    println!("id: {}", doc.id);
    if let Some(name) = &doc.file_name {
        println!("file: {}", name);
    }
    println!("created: {}", doc.created_at.to_rfc3339());
    println!("updated: {}", doc.updated_at.to_rfc3339());
    println!("embedded: {}", doc.has_embedding);
    println!();
    println!("{}", doc.content);
}

fn print_chat(c: &Chat) {
    println!("--- {} ---", c.title);
    println!("id: {}", c.id);
    for m in &c.messages {
        println!();
        println!("[{}] {}", m.role, m.created_at.format("%Y-%m-%d %H:%M:%S"));
        println!("{}", m.content);
    }
}

/// First `max` characters of `text` on one line.
fn snippet(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}…", cut)
    }
}
