//! Document operations.
//!
//! Every operation used by both the HTTP layer and the CLI lives here. Store
//! calls go through [`with_retry`]; model calls rely on the HTTP retry loop
//! in [`crate::retry::post_json`].
//!
//! Input validation is kept in pure functions ([`validate_new_document`],
//! [`normalize_patch`], [`SummaryLength::from_str`]) so callers can reject
//! bad input before any I/O.

use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::context::AppContext;
use crate::embedding::embed_query;
use crate::models::{Document, DocumentPatch, NewDocument, SearchHit, SourceFile};
use crate::retry::with_retry;
use crate::store::{EmbeddingRecord, EmbeddingUpdate};

/// Check a create request. Returns the message to show the caller on
/// rejection.
pub fn validate_new_document(
    title: Option<&str>,
    content: Option<&str>,
) -> std::result::Result<(String, String), String> {
    let title = title.map(str::trim).unwrap_or_default();
    let content = content.unwrap_or_default();

    if title.is_empty() || content.trim().is_empty() {
        return Err("Title and content are required".to_string());
    }
    Ok((title.to_string(), content.to_string()))
}

/// Drop blank fields from an update. Blank values leave the stored field
/// unchanged.
pub fn normalize_patch(patch: DocumentPatch) -> DocumentPatch {
    DocumentPatch {
        title: patch
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        content: patch.content.filter(|c| !c.trim().is_empty()),
    }
}

/// Create a document, embedding its content when a provider is configured.
pub async fn create_document(
    ctx: &AppContext,
    title: &str,
    content: &str,
    file: Option<SourceFile>,
) -> Result<Document> {
    let embedding = if ctx.embedder.is_enabled() {
        Some(embed_query(ctx.embedder.as_ref(), content).await?)
    } else {
        None
    };

    let id = Uuid::new_v4().to_string();
    let doc = NewDocument {
        title: title.to_string(),
        content: content.to_string(),
        file,
    };
    let model = ctx.embedder.model_name();

    let created = with_retry(&ctx.config.persistence, "create document", || {
        let record = embedding
            .as_deref()
            .map(|vector| EmbeddingRecord { vector, model });
        ctx.store.insert_document(&id, &doc, record)
    })
    .await?;

    tracing::info!(
        id = %created.id,
        embedded = created.has_embedding,
        "document created"
    );
    Ok(created)
}

pub async fn list_documents(ctx: &AppContext) -> Result<Vec<Document>> {
    with_retry(&ctx.config.persistence, "list documents", || {
        ctx.store.list_documents()
    })
    .await
}

pub async fn get_document(ctx: &AppContext, id: &str) -> Result<Option<Document>> {
    with_retry(&ctx.config.persistence, "get document", || {
        ctx.store.get_document(id)
    })
    .await
}

/// Apply a partial update. Returns `None` when the document does not exist.
///
/// A content change regenerates the embedding, or clears it when embeddings
/// are disabled, so a stored vector always describes the stored text.
pub async fn update_document(
    ctx: &AppContext,
    id: &str,
    patch: DocumentPatch,
) -> Result<Option<Document>> {
    let patch = normalize_patch(patch);

    let Some(existing) = get_document(ctx, id).await? else {
        return Ok(None);
    };

    let content_changed = patch
        .content
        .as_deref()
        .is_some_and(|c| c != existing.content);

    let embedding = match (&patch.content, content_changed) {
        (Some(content), true) if ctx.embedder.is_enabled() => {
            Some(embed_query(ctx.embedder.as_ref(), content).await?)
        }
        _ => None,
    };
    let model = ctx.embedder.model_name();

    let updated = with_retry(&ctx.config.persistence, "update document", || {
        let change = match (&embedding, content_changed) {
            (Some(vector), _) => EmbeddingUpdate::Replace(EmbeddingRecord { vector, model }),
            (None, true) => EmbeddingUpdate::Clear,
            (None, false) => EmbeddingUpdate::Keep,
        };
        ctx.store.update_document(
            id,
            patch.title.as_deref(),
            patch.content.as_deref(),
            change,
        )
    })
    .await?;

    if updated.is_some() {
        tracing::info!(id, re_embedded = embedding.is_some(), "document updated");
    }
    Ok(updated)
}

/// Delete a document and, best-effort, the file it was uploaded from.
/// Returns `false` when the document does not exist.
pub async fn delete_document(ctx: &AppContext, id: &str) -> Result<bool> {
    let Some(existing) = get_document(ctx, id).await? else {
        return Ok(false);
    };

    let deleted = with_retry(&ctx.config.persistence, "delete document", || {
        ctx.store.delete_document(id)
    })
    .await?;

    if deleted {
        if let Some(path) = &existing.file_path {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(id, path = %path, error = %e, "could not remove uploaded file");
            }
        }
        tracing::info!(id, "document deleted");
    }
    Ok(deleted)
}

/// Rank stored documents by similarity to `query`.
///
/// `limit` defaults to `retrieval.top_k`. Fails when embeddings are disabled.
pub async fn search_documents(
    ctx: &AppContext,
    query: &str,
    limit: Option<usize>,
) -> Result<Vec<SearchHit>> {
    if !ctx.embedder.is_enabled() {
        bail!("embeddings are disabled");
    }

    let limit = limit
        .filter(|l| *l > 0)
        .unwrap_or(ctx.config.retrieval.top_k);
    let vector = embed_query(ctx.embedder.as_ref(), query).await?;

    let hits = with_retry(&ctx.config.persistence, "search documents", || {
        ctx.store.similar_documents(&vector, limit)
    })
    .await?;

    tracing::debug!(limit, hits = hits.len(), "similarity search");
    Ok(hits)
}

// ============ Summaries ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl SummaryLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryLength::Short => "short",
            SummaryLength::Medium => "medium",
            SummaryLength::Long => "long",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            SummaryLength::Short => "in 2-3 sentences",
            SummaryLength::Medium => "in one or two paragraphs",
            SummaryLength::Long => "in detail, covering every main point",
        }
    }
}

impl fmt::Display for SummaryLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryLength {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "short" => Ok(SummaryLength::Short),
            "medium" => Ok(SummaryLength::Medium),
            "long" => Ok(SummaryLength::Long),
            other => Err(format!(
                "invalid length '{}': expected short, medium or long",
                other
            )),
        }
    }
}

pub fn summary_prompt(doc: &Document, length: SummaryLength) -> String {
    format!(
        "Summarize the following document {}.\n\nTitle: {}\n\n{}",
        length.instruction(),
        doc.title,
        doc.content
    )
}

/// Summarize a stored document. Returns `None` when it does not exist.
pub async fn summarize_document(
    ctx: &AppContext,
    id: &str,
    length: SummaryLength,
) -> Result<Option<String>> {
    let Some(doc) = get_document(ctx, id).await? else {
        return Ok(None);
    };

    let summary = ctx.completer.complete(&summary_prompt(&doc, length)).await?;
    tracing::info!(id, length = %length, "document summarized");
    Ok(Some(summary.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::from_millis;

    #[test]
    fn test_validate_requires_title_and_content() {
        assert!(validate_new_document(None, Some("body")).is_err());
        assert!(validate_new_document(Some("  "), Some("body")).is_err());
        assert!(validate_new_document(Some("Title"), None).is_err());
        assert!(validate_new_document(Some("Title"), Some("\n\t")).is_err());

        let (title, content) = validate_new_document(Some(" Title "), Some("body")).unwrap();
        assert_eq!(title, "Title");
        assert_eq!(content, "body");
    }

    #[test]
    fn test_normalize_patch_drops_blanks() {
        let patch = normalize_patch(DocumentPatch {
            title: Some("   ".to_string()),
            content: Some("new body".to_string()),
        });
        assert!(patch.title.is_none());
        assert_eq!(patch.content.as_deref(), Some("new body"));

        let patch = normalize_patch(DocumentPatch {
            title: Some(" Renamed ".to_string()),
            content: Some("".to_string()),
        });
        assert_eq!(patch.title.as_deref(), Some("Renamed"));
        assert!(patch.content.is_none());
    }

    #[test]
    fn test_summary_length_parse() {
        assert_eq!("short".parse::<SummaryLength>(), Ok(SummaryLength::Short));
        assert_eq!("long".parse::<SummaryLength>(), Ok(SummaryLength::Long));
        assert!("tiny".parse::<SummaryLength>().is_err());
        assert_eq!(SummaryLength::default(), SummaryLength::Medium);
    }

    #[test]
    fn test_summary_prompt_mentions_title_and_length() {
        let doc = Document {
            id: "d1".to_string(),
            title: "Quarterly report".to_string(),
            content: "Revenue grew.".to_string(),
            file_name: None,
            file_path: None,
            file_size: None,
            has_embedding: false,
            created_at: from_millis(0),
            updated_at: from_millis(0),
        };
        let prompt = summary_prompt(&doc, SummaryLength::Short);
        assert!(prompt.contains("2-3 sentences"));
        assert!(prompt.contains("Title: Quarterly report"));
        assert!(prompt.ends_with("Revenue grew."));
    }
}
