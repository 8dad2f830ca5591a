//! Chat operations and the retrieval-augmented send path.
//!
//! Sending a message runs a fixed pipeline:
//!
//! ```text
//! embed(question) → similar_documents(top_k) → build_context(context_documents)
//!     → build_prompt → complete → append_exchange
//! ```
//!
//! Nothing is written until the completion succeeds, so a failed send leaves
//! the chat unchanged.

use anyhow::Result;

use crate::context::AppContext;
use crate::embedding::embed_query;
use crate::models::{Chat, MessageExchange, SearchHit};
use crate::retry::with_retry;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Format the first `max_docs` hits as prompt context.
pub fn build_context(hits: &[SearchHit], max_docs: usize) -> String {
    hits.iter()
        .take(max_docs)
        .map(|hit| format!("Document: {}\nContent: {}", hit.title, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Wrap the question with retrieved context. An empty context yields the
/// bare question.
pub fn build_prompt(context: &str, question: &str) -> String {
    if context.is_empty() {
        question.to_string()
    } else {
        format!(
            "Based on the following context:\n\n{}\n\nAnswer this question: {}",
            context, question
        )
    }
}

pub async fn create_chat(ctx: &AppContext, title: Option<&str>) -> Result<Chat> {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_CHAT_TITLE);

    let chat = with_retry(&ctx.config.persistence, "create chat", || {
        ctx.store.create_chat(title)
    })
    .await?;

    tracing::info!(id = %chat.id, "chat created");
    Ok(chat)
}

pub async fn list_chats(ctx: &AppContext) -> Result<Vec<Chat>> {
    with_retry(&ctx.config.persistence, "list chats", || ctx.store.list_chats()).await
}

pub async fn get_chat(ctx: &AppContext, id: &str) -> Result<Option<Chat>> {
    with_retry(&ctx.config.persistence, "get chat", || ctx.store.get_chat(id)).await
}

pub async fn delete_chat(ctx: &AppContext, id: &str) -> Result<bool> {
    let deleted = with_retry(&ctx.config.persistence, "delete chat", || {
        ctx.store.delete_chat(id)
    })
    .await?;
    if deleted {
        tracing::info!(id, "chat deleted");
    }
    Ok(deleted)
}

/// Answer `content` in chat `chat_id` using retrieved documents as context.
///
/// Returns `None` when the chat does not exist. The existence check happens
/// before any model call.
pub async fn send_message(
    ctx: &AppContext,
    chat_id: &str,
    content: &str,
) -> Result<Option<MessageExchange>> {
    let exists = with_retry(&ctx.config.persistence, "load chat", || {
        ctx.store.chat_exists(chat_id)
    })
    .await?;
    if !exists {
        return Ok(None);
    }

    let hits = retrieve(ctx, content).await?;
    let context = build_context(&hits, ctx.config.retrieval.context_documents);
    let prompt = build_prompt(&context, content);

    tracing::debug!(
        chat_id,
        hits = hits.len(),
        prompt_chars = prompt.len(),
        "requesting completion"
    );
    let answer = ctx.completer.complete(&prompt).await?;

    let written = with_retry(&ctx.config.persistence, "save messages", || {
        ctx.store.append_exchange(chat_id, content, &answer)
    })
    .await?;

    let Some((user_message, assistant_message)) = written else {
        // The chat was deleted while the completion was running.
        tracing::warn!(chat_id, "chat disappeared before messages were saved");
        return Ok(None);
    };

    tracing::info!(chat_id, context_docs = hits.len(), "message answered");
    Ok(Some(MessageExchange {
        user_message,
        assistant_message,
        context: hits,
    }))
}

async fn retrieve(ctx: &AppContext, question: &str) -> Result<Vec<SearchHit>> {
    if !ctx.embedder.is_enabled() {
        tracing::debug!("embeddings disabled, answering without context");
        return Ok(Vec::new());
    }

    let vector = embed_query(ctx.embedder.as_ref(), question).await?;
    with_retry(&ctx.config.persistence, "search documents", || {
        ctx.store
            .similar_documents(&vector, ctx.config.retrieval.top_k)
    })
    .await
}
