//! Shared application state.
//!
//! [`AppContext`] is built once per process (CLI command or server) and
//! cloned into every request handler.

use anyhow::Result;
use std::sync::Arc;

use crate::completion::{self, CompletionProvider};
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::store::SqliteStore;
use crate::{db, migrate};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: SqliteStore,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub completer: Arc<dyn CompletionProvider>,
}

impl AppContext {
    /// Open the database, apply migrations and construct both model clients.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::from(embedding::create_provider(&config.embedding)?);
        let completer: Arc<dyn CompletionProvider> =
            Arc::from(completion::create_provider(&config.completion)?);

        tracing::debug!(
            embedding = embedder.model_name(),
            completion = completer.model_name(),
            "model clients ready"
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            store: SqliteStore::new(pool),
            embedder,
            completer,
        })
    }

    /// Assemble a context from parts. Used when the model clients are
    /// supplied by the caller.
    pub fn from_parts(
        config: Config,
        store: SqliteStore,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            embedder,
            completer,
        }
    }
}
