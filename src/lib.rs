//! # RAG Chat
//!
//! Retrieval-augmented chat over your own documents.
//!
//! Documents are stored in SQLite together with an embedding of their text.
//! When a question arrives in a chat, it is embedded, the most similar
//! documents are folded into a prompt, and a language model answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │  Documents  │──▶│  Embedding  │──▶│  SQLite   │
//! │ JSON / PDF  │   │   client    │   │ docs+chat │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │ similarity
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌────────────┐
//!                 │  Prompt  │──────▶│ Completion │
//!                 │ builder  │       │   client   │
//!                 └──────────┘       └────────────┘
//! ```
//!
//! Both the CLI (`ragchat`) and the HTTP server drive the same service
//! functions in [`documents`] and [`chat`].
//!
//! ## Quick Start
//!
//! ```bash
//! ragchat init
//! ragchat doc add --title "Handbook" --file handbook.txt
//! ragchat chat new --title "Questions"
//! ragchat chat send <chat-id> "How many vacation days do I get?"
//! ragchat serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Core data types |
//! | [`retry`] | Retry loops for store and model calls |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Completion provider abstraction |
//! | [`store`] | Document, similarity and chat persistence |
//! | [`context`] | Shared application state |
//! | [`documents`] | Document operations |
//! | [`chat`] | Chat operations and prompt assembly |
//! | [`extract`] | PDF text extraction |
//! | [`upload`] | PDF upload ingestion |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`server`] | HTTP API server |

pub mod chat;
pub mod completion;
pub mod config;
pub mod context;
pub mod db;
pub mod documents;
pub mod embed_cmd;
pub mod embedding;
pub mod extract;
pub mod migrate;
pub mod models;
pub mod retry;
pub mod server;
pub mod store;
pub mod upload;
