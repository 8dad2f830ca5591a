//! SQLite-backed document and chat store.
//!
//! Wraps a [`SqlitePool`] and translates every operation into SQL against the
//! schema created by [`crate::migrate`]. Lookups that can miss return
//! `Option` or `bool` rather than an error.
//!
//! Similarity search is a scan: every stored vector is scored with
//! [`cosine_similarity`] against the query and the best `limit` rows are kept.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, content_hash, cosine_similarity, vec_to_blob};
use crate::models::{
    from_millis, now_millis, Chat, Document, Message, NewDocument, Role, SearchHit,
};

/// An embedding ready to be written next to its document.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingRecord<'a> {
    pub vector: &'a [f32],
    pub model: &'a str,
}

/// What to do with a document's embedding on update.
#[derive(Debug, Clone, Copy)]
pub enum EmbeddingUpdate<'a> {
    Keep,
    Clear,
    Replace(EmbeddingRecord<'a>),
}

/// A document whose embedding is missing or stale.
#[derive(Debug, Clone)]
pub struct PendingEmbedding {
    pub id: String,
    pub content: String,
}

const DOCUMENT_COLUMNS: &str = "id, title, content, file_name, file_path, file_size, \
     embedding IS NOT NULL AS has_embedding, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Documents ============

    pub async fn insert_document(
        &self,
        id: &str,
        doc: &NewDocument,
        embedding: Option<EmbeddingRecord<'_>>,
    ) -> Result<Document> {
        let now = now_millis();
        let hash = content_hash(&doc.content);

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, content, content_hash, file_name, file_path,
                                   file_size, embedding, embedding_model, embedding_hash,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&hash)
        .bind(doc.file.as_ref().map(|f| f.name.as_str()))
        .bind(doc.file.as_ref().map(|f| f.path.as_str()))
        .bind(doc.file.as_ref().map(|f| f.size))
        .bind(embedding.map(|e| vec_to_blob(e.vector)))
        .bind(embedding.map(|e| e.model))
        .bind(embedding.map(|_| hash.as_str()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("insert document")?;

        self.get_document(id)
            .await?
            .with_context(|| format!("document {} vanished after insert", id))
    }

    /// All documents, newest first.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY created_at DESC, rowid DESC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(document_from_row).collect())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(document_from_row))
    }

    /// Apply a partial update. Returns `None` when the document does not exist.
    pub async fn update_document(
        &self,
        id: &str,
        title: Option<&str>,
        content: Option<&str>,
        embedding: EmbeddingUpdate<'_>,
    ) -> Result<Option<Document>> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let now = now_millis();

        if let Some(title) = title {
            sqlx::query("UPDATE documents SET title = ?, updated_at = ? WHERE id = ?")
                .bind(title)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(content) = content {
            sqlx::query(
                "UPDATE documents SET content = ?, content_hash = ?, updated_at = ? WHERE id = ?",
            )
            .bind(content)
            .bind(content_hash(content))
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        match embedding {
            EmbeddingUpdate::Keep => {}
            EmbeddingUpdate::Clear => {
                sqlx::query(
                    "UPDATE documents SET embedding = NULL, embedding_model = NULL, \
                     embedding_hash = NULL WHERE id = ?",
                )
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
            EmbeddingUpdate::Replace(record) => {
                sqlx::query(
                    "UPDATE documents SET embedding = ?, embedding_model = ?, \
                     embedding_hash = content_hash WHERE id = ?",
                )
                .bind(vec_to_blob(record.vector))
                .bind(record.model)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        self.get_document(id).await
    }

    /// Returns `false` when there was nothing to delete.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The `limit` documents most similar to `query`, best first.
    ///
    /// Documents without an embedding, or whose embedding has a different
    /// length than `query`, are never returned.
    pub async fn similar_documents(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            "SELECT id, title, content, embedding FROM documents WHERE embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                if vector.len() != query.len() {
                    return None;
                }
                Some(SearchHit {
                    id: row.get("id"),
                    title: row.get("title"),
                    content: row.get("content"),
                    similarity: cosine_similarity(query, &vector),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);

        Ok(hits)
    }

    /// Documents whose embedding is missing, was computed from different
    /// content, or by a model other than `model`.
    pub async fn documents_needing_embedding(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEmbedding>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT id, content FROM documents
            WHERE embedding IS NULL
               OR embedding_hash IS NULL
               OR embedding_hash != content_hash
               OR embedding_model IS NULL
               OR embedding_model != ?
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingEmbedding {
                id: row.get("id"),
                content: row.get("content"),
            })
            .collect())
    }

    /// Store an embedding computed from `content`.
    ///
    /// Writes nothing (and returns `false`) when the document's content has
    /// changed since the text was read.
    pub async fn set_embedding(
        &self,
        id: &str,
        content: &str,
        record: EmbeddingRecord<'_>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET embedding = ?, embedding_model = ?, embedding_hash = ? \
             WHERE id = ? AND content_hash = ?",
        )
        .bind(vec_to_blob(record.vector))
        .bind(record.model)
        .bind(content_hash(content))
        .bind(id)
        .bind(content_hash(content))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ============ Chats ============

    pub async fn create_chat(&self, title: &str) -> Result<Chat> {
        let id = Uuid::new_v4().to_string();
        let now = now_millis();

        sqlx::query("INSERT INTO chats (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(title)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("insert chat")?;

        Ok(Chat {
            id,
            title: title.to_string(),
            messages: Vec::new(),
            created_at: from_millis(now),
            updated_at: from_millis(now),
        })
    }

    /// All chats, most recently active first, each carrying at most its
    /// first message.
    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        let rows = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM chats \
             ORDER BY updated_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut chats = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut chat = chat_from_row(row);
            chat.messages = self.fetch_messages(&chat.id, Some(1)).await?;
            chats.push(chat);
        }
        Ok(chats)
    }

    /// A chat with all of its messages in creation order.
    pub async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        let row = sqlx::query("SELECT id, title, created_at, updated_at FROM chats WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut chat = chat_from_row(&row);
                chat.messages = self.fetch_messages(id, None).await?;
                Ok(Some(chat))
            }
            None => Ok(None),
        }
    }

    pub async fn chat_exists(&self, id: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM chats WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Delete a chat and its messages. Returns `false` when it did not exist.
    pub async fn delete_chat(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write a user message and the assistant's reply, and bump the chat's
    /// `updated_at`, in one transaction.
    ///
    /// Returns `None` when the chat does not exist.
    pub async fn append_exchange(
        &self,
        chat_id: &str,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<Option<(Message, Message)>> {
        let mut tx = self.pool.begin().await?;

        let found: Option<String> = sqlx::query_scalar("SELECT id FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(&mut *tx)
            .await?;
        if found.is_none() {
            return Ok(None);
        }

        let now = now_millis();
        let mut written = Vec::with_capacity(2);

        for (role, content) in [(Role::User, user_content), (Role::Assistant, assistant_content)] {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO messages (id, chat_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(chat_id)
            .bind(role.as_str())
            .bind(content)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("insert message")?;

            written.push(Message {
                id,
                chat_id: chat_id.to_string(),
                role,
                content: content.to_string(),
                created_at: from_millis(now),
            });
        }

        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let assistant = written.pop().context("assistant message missing")?;
        let user = written.pop().context("user message missing")?;
        Ok(Some((user, assistant)))
    }

    async fn fetch_messages(&self, chat_id: &str, limit: Option<i64>) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, chat_id, role, content, created_at FROM messages \
             WHERE chat_id = ? ORDER BY created_at ASC, rowid ASC LIMIT ?",
        )
        .bind(chat_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        file_name: row.get("file_name"),
        file_path: row.get("file_path"),
        file_size: row.get("file_size"),
        has_embedding: row.get("has_embedding"),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    }
}

fn chat_from_row(row: &SqliteRow) -> Chat {
    Chat {
        id: row.get("id"),
        title: row.get("title"),
        messages: Vec::new(),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    Ok(Message {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        role: role.parse()?,
        content: row.get("content"),
        created_at: from_millis(row.get("created_at")),
    })
}
