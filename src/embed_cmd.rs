use anyhow::{bail, Result};

use crate::context::AppContext;
use crate::embedding::check_dims;
use crate::retry::with_retry;
use crate::store::EmbeddingRecord;

/// Outcome of an `embed pending` run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmbedReport {
    pub total: usize,
    pub embedded: usize,
    pub failed: usize,
    /// Documents whose content changed between read and write.
    pub skipped: usize,
}

/// Find and embed documents whose embedding is missing or stale.
///
/// A failed batch is counted and logged; it does not abort the run.
pub async fn embed_pending(
    ctx: &AppContext,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<EmbedReport> {
    if !ctx.embedder.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let model = ctx.embedder.model_name();
    let batch_size = ctx.config.embedding.batch_size.max(1);

    let pending = with_retry(&ctx.config.persistence, "find pending embeddings", || {
        ctx.store.documents_needing_embedding(model, limit)
    })
    .await?;

    let mut report = EmbedReport {
        total: pending.len(),
        ..EmbedReport::default()
    };
    if dry_run || pending.is_empty() {
        return Ok(report);
    }

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();

        let vectors = match ctx.embedder.embed(&texts).await {
            Ok(v) if v.len() == batch.len() => v,
            Ok(v) => {
                tracing::warn!(
                    expected = batch.len(),
                    got = v.len(),
                    "embedding batch returned wrong number of vectors"
                );
                report.failed += batch.len();
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, size = batch.len(), "embedding batch failed");
                report.failed += batch.len();
                continue;
            }
        };

        for (item, vector) in batch.iter().zip(vectors.iter()) {
            if let Err(e) = check_dims(vector, ctx.embedder.dims()) {
                tracing::warn!(id = %item.id, error = %e, "rejecting embedding");
                report.failed += 1;
                continue;
            }

            let written = with_retry(&ctx.config.persistence, "store embedding", || {
                ctx.store.set_embedding(
                    &item.id,
                    &item.content,
                    EmbeddingRecord { vector, model },
                )
            })
            .await?;

            if written {
                report.embedded += 1;
            } else {
                report.skipped += 1;
            }
        }
    }

    tracing::info!(
        total = report.total,
        embedded = report.embedded,
        failed = report.failed,
        "embed pending finished"
    );
    Ok(report)
}
