//! PDF upload ingestion.
//!
//! An upload is validated (PDF only, size limit), its text extracted on a
//! blocking thread, the file saved under `server.upload_dir`, and a
//! [`Document`] created through the normal create path. If the document
//! cannot be created the saved file is removed again.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::context::AppContext;
use crate::documents::create_document;
use crate::extract::{extract_pdf_text, ExtractError, MIME_PDF};
use crate::models::{now_millis, Document, SourceFile};

#[derive(Debug)]
pub enum UploadError {
    NotPdf,
    TooLarge { limit: usize },
    Unreadable(String),
    Empty,
    Internal(anyhow::Error),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::NotPdf => write!(f, "Only PDF files are allowed"),
            UploadError::TooLarge { limit } => {
                write!(f, "File exceeds the {} byte upload limit", limit)
            }
            UploadError::Unreadable(e) => write!(f, "Could not read PDF: {}", e),
            UploadError::Empty => write!(f, "PDF contains no extractable text"),
            UploadError::Internal(e) => write!(f, "Upload failed: {}", e),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<ExtractError> for UploadError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::NotPdf => UploadError::NotPdf,
            ExtractError::NoText => UploadError::Empty,
            ExtractError::Pdf(msg) => UploadError::Unreadable(msg),
        }
    }
}

/// A file received from a client or read from disk.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Accept `application/pdf`, or a `.pdf` name when no usable type was sent.
///
/// Media type parameters such as `; charset=binary` are ignored.
pub fn is_pdf(file_name: &str, content_type: Option<&str>) -> bool {
    let content_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim);
    match content_type {
        Some(ct) if ct.eq_ignore_ascii_case(MIME_PDF) => true,
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => false,
        _ => Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf")),
    }
}

/// `document-<millis>-<random>.pdf`
pub fn stored_file_name() -> String {
    let suffix = Uuid::new_v4().as_u128() % 1_000_000_000;
    format!("document-{}-{}.pdf", now_millis(), suffix)
}

/// Validate, store and ingest an uploaded PDF.
///
/// `title` falls back to the original file name.
pub async fn ingest_upload(
    ctx: &AppContext,
    file: IncomingFile,
    title: Option<&str>,
) -> Result<Document, UploadError> {
    if !is_pdf(&file.file_name, file.content_type.as_deref()) {
        return Err(UploadError::NotPdf);
    }

    let limit = ctx.config.server.max_upload_bytes;
    if file.bytes.len() > limit {
        return Err(UploadError::TooLarge { limit });
    }

    let bytes = file.bytes;
    let (bytes, extracted) = tokio::task::spawn_blocking(move || {
        let text = extract_pdf_text(&bytes);
        (bytes, text)
    })
    .await
    .map_err(|e| UploadError::Unreadable(format!("extraction task failed: {}", e)))?;
    let content = extracted?;

    let saved = save_file(&ctx.config.server.upload_dir, &bytes)
        .await
        .map_err(UploadError::Internal)?;

    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(&file.file_name)
        .to_string();

    let source = SourceFile {
        name: file.file_name.clone(),
        path: saved.display().to_string(),
        size: bytes.len() as i64,
    };

    match create_document(ctx, &title, &content, Some(source)).await {
        Ok(doc) => {
            tracing::info!(
                id = %doc.id,
                file = %file.file_name,
                bytes = bytes.len(),
                "upload ingested"
            );
            Ok(doc)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&saved).await {
                tracing::warn!(path = %saved.display(), error = %rm, "could not remove saved upload");
            }
            Err(UploadError::Internal(e))
        }
    }
}

async fn save_file(dir: &Path, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    use anyhow::Context;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;

    let path = dir.join(stored_file_name());
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
