//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (status, version, timestamp) |
//! | `GET`    | `/api/documents` | List documents, newest first |
//! | `POST`   | `/api/documents` | Create a document `{title, content}` |
//! | `POST`   | `/api/documents/search` | Similarity search `{query, limit?}` |
//! | `POST`   | `/api/documents/upload` | Multipart PDF upload (`document`, `title?`) |
//! | `GET`    | `/api/documents/{id}` | Fetch one document |
//! | `PUT`    | `/api/documents/{id}` | Partial update `{title?, content?}` |
//! | `DELETE` | `/api/documents/{id}` | Delete a document |
//! | `POST`   | `/api/documents/{id}/summarize` | Summarize `{length?}` |
//! | `GET`    | `/api/chats` | List chats with a first-message preview, as `{chat: [...]}` |
//! | `POST`   | `/api/chats` | Create a chat `{title?}` |
//! | `GET`    | `/api/chats/{id}` | Fetch a chat with all messages |
//! | `DELETE` | `/api/chats/{id}` | Delete a chat and its messages |
//! | `POST`   | `/api/chats/{id}/messages` | Send a message `{content}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Document not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `embeddings_disabled` (400),
//! `payload_too_large` (413), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser UI served
//! from another origin can call the API.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat;
use crate::config::Config;
use crate::context::AppContext;
use crate::documents::{self, validate_new_document, SummaryLength};
use crate::models::{Chat, Document, DocumentPatch, MessageExchange, SearchHit};
use crate::upload::{ingest_upload, IncomingFile, UploadError};

/// Multipart framing allowance on top of `max_upload_bytes`.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Starts the HTTP server.
///
/// Opens the database, builds the model clients and serves on
/// `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = AppContext::open(config).await?;
    let bind_addr = config.server.bind.clone();

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router around an existing context.
pub fn build_router(ctx: AppContext) -> Router {
    let upload_limit = ctx.config.server.max_upload_bytes + MULTIPART_OVERHEAD;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/documents",
            get(handle_list_documents).post(handle_create_document),
        )
        .route("/documents/search", post(handle_search_documents))
        .route(
            "/documents/upload",
            post(handle_upload_document).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/documents/{id}",
            get(handle_get_document)
                .put(handle_update_document)
                .delete(handle_delete_document),
        )
        .route("/documents/{id}/summarize", post(handle_summarize_document))
        .route("/chats", get(handle_list_chats).post(handle_create_chat))
        .route(
            "/chats/{id}",
            get(handle_get_chat).delete(handle_delete_chat),
        )
        .route("/chats/{id}/messages", post(handle_send_message));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn embeddings_disabled() -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "embeddings_disabled".to_string(),
        message: "Embeddings are disabled; configure an [embedding] provider".to_string(),
    }
}

fn payload_too_large(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "payload_too_large".to_string(),
        message: message.into(),
    }
}

/// Log the full cause chain and answer with a generic message.
fn internal(message: &str, err: anyhow::Error) -> AppError {
    tracing::error!(error = ?err, "{}", message);
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.to_string(),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let message = err.to_string();
        match err {
            UploadError::TooLarge { .. } => payload_too_large(message),
            UploadError::Internal(e) => internal("Failed to upload document", e),
            _ => bad_request(message),
        }
    }
}

/// Parse an optional JSON body. An empty body yields `T::default()`.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| bad_request(format!("Invalid JSON body: {}", e)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    timestamp: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct CreateDocumentRequest {
    title: Option<String>,
    content: Option<String>,
}

async fn handle_list_documents(
    State(ctx): State<AppContext>,
) -> Result<Json<Vec<Document>>, AppError> {
    documents::list_documents(&ctx)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to fetch documents", e))
}

async fn handle_get_document(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    match documents::get_document(&ctx, &id).await {
        Ok(Some(doc)) => Ok(Json(doc)),
        Ok(None) => Err(not_found("Document not found")),
        Err(e) => Err(internal("Failed to fetch document", e)),
    }
}

async fn handle_create_document(
    State(ctx): State<AppContext>,
    body: Result<Json<CreateDocumentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let Json(req) = body?;
    let (title, content) =
        validate_new_document(req.title.as_deref(), req.content.as_deref()).map_err(bad_request)?;

    let doc = documents::create_document(&ctx, &title, &content, None)
        .await
        .map_err(|e| internal("Failed to create document", e))?;
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn handle_update_document(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    body: Result<Json<DocumentPatch>, JsonRejection>,
) -> Result<Json<Document>, AppError> {
    let Json(patch) = body?;
    match documents::update_document(&ctx, &id, patch).await {
        Ok(Some(doc)) => Ok(Json(doc)),
        Ok(None) => Err(not_found("Document not found")),
        Err(e) => Err(internal("Failed to update document", e)),
    }
}

async fn handle_delete_document(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    match documents::delete_document(&ctx, &id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found("Document not found")),
        Err(e) => Err(internal("Failed to delete document", e)),
    }
}

#[derive(Deserialize)]
struct SearchRequest {
    query: Option<String>,
    limit: Option<usize>,
}

async fn handle_search_documents(
    State(ctx): State<AppContext>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<SearchHit>>, AppError> {
    let Json(req) = body?;
    let query = req.query.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if !ctx.embedder.is_enabled() {
        return Err(embeddings_disabled());
    }

    documents::search_documents(&ctx, query, req.limit)
        .await
        .map(Json)
        .map_err(|e| internal("Failed to search documents", e))
}

#[derive(Debug, Deserialize, Default)]
struct SummarizeRequest {
    length: Option<String>,
}

#[derive(Serialize)]
struct SummaryResponse {
    id: String,
    length: String,
    summary: String,
}

async fn handle_summarize_document(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<SummaryResponse>, AppError> {
    let req: SummarizeRequest = optional_json(&body)?;
    let length = match req.length.as_deref() {
        Some(l) => l.parse::<SummaryLength>().map_err(bad_request)?,
        None => SummaryLength::default(),
    };

    match documents::summarize_document(&ctx, &id, length).await {
        Ok(Some(summary)) => Ok(Json(SummaryResponse {
            id,
            length: length.to_string(),
            summary,
        })),
        Ok(None) => Err(not_found("Document not found")),
        Err(e) => Err(internal("Failed to summarize document", e)),
    }
}

async fn handle_upload_document(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let mut file: Option<IncomingFile> = None;
    let mut title: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("document") => {
                let file_name = field.file_name().unwrap_or("document.pdf").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some(IncomingFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            Some("title") => {
                title = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| bad_request("No file uploaded"))?;
    let doc = ingest_upload(&ctx, file, title.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        payload_too_large(err.body_text())
    } else {
        bad_request(err.body_text())
    }
}

// ============ Chats ============

#[derive(Serialize)]
struct ChatResponse {
    chat: Chat,
}

#[derive(Serialize)]
struct ChatListResponse {
    #[serde(rename = "chat")]
    chats: Vec<Chat>,
}

#[derive(Debug, Deserialize, Default)]
struct CreateChatRequest {
    title: Option<String>,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: Option<String>,
}

async fn handle_list_chats(
    State(ctx): State<AppContext>,
) -> Result<Json<ChatListResponse>, AppError> {
    chat::list_chats(&ctx)
        .await
        .map(|chats| Json(ChatListResponse { chats }))
        .map_err(|e| internal("Failed to fetch chats", e))
}

async fn handle_create_chat(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<ChatResponse>), AppError> {
    let req: CreateChatRequest = optional_json(&body)?;
    let chat = chat::create_chat(&ctx, req.title.as_deref())
        .await
        .map_err(|e| internal("Failed to create chat", e))?;
    Ok((StatusCode::CREATED, Json(ChatResponse { chat })))
}

async fn handle_get_chat(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<ChatResponse>, AppError> {
    match chat::get_chat(&ctx, &id).await {
        Ok(Some(chat)) => Ok(Json(ChatResponse { chat })),
        Ok(None) => Err(not_found("Chat not found")),
        Err(e) => Err(internal("Failed to fetch chat", e)),
    }
}

async fn handle_delete_chat(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    match chat::delete_chat(&ctx, &id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found("Chat not found")),
        Err(e) => Err(internal("Failed to delete chat", e)),
    }
}

async fn handle_send_message(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<MessageExchange>, AppError> {
    let Json(req) = body?;
    let content = req.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(bad_request("Message content is required"));
    }

    match chat::send_message(&ctx, &id, &content).await {
        Ok(Some(exchange)) => Ok(Json(exchange)),
        Ok(None) => Err(not_found("Chat not found")),
        Err(e) => Err(internal("Failed to process message", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_json_empty_body_defaults() {
        let req: CreateChatRequest = optional_json(&Bytes::from_static(b"")).unwrap();
        assert!(req.title.is_none());
        let req: CreateChatRequest = optional_json(&Bytes::from_static(b"  \n")).unwrap();
        assert!(req.title.is_none());
    }

    #[test]
    fn test_optional_json_parses_body() {
        let req: SummarizeRequest =
            optional_json(&Bytes::from_static(br#"{"length":"short"}"#)).unwrap();
        assert_eq!(req.length.as_deref(), Some("short"));
    }

    #[test]
    fn test_optional_json_rejects_garbage() {
        let err = optional_json::<CreateChatRequest>(&Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_upload_error_status_mapping() {
        let err: AppError = UploadError::TooLarge { limit: 10 }.into();
        assert_eq!(err.status, StatusCode::PAYLOAD_TOO_LARGE);
        let err: AppError = UploadError::NotPdf.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
    }
}
