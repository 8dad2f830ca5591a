//! Core data models shared by the store, the service layer and the HTTP API.
//!
//! All types serialize with camelCase keys (`createdAt`, `fileName`, ...).
//! Embedding vectors never leave the store; documents only report whether
//! one is present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stored document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata of the file a document was extracted from.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub path: String,
    pub size: i64,
}

/// Input for creating a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub content: String,
    pub file: Option<SourceFile>,
}

/// Partial update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub content: Option<String>,
}

/// A document matched by similarity search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Cosine similarity to the query, in `[-1, 1]`.
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => anyhow::bail!("invalid message role: {}", other),
        }
    }
}

/// A chat message. Immutable once written.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A chat session with its messages in creation order.
///
/// Listing endpoints fill `messages` with at most the first message, as a
/// preview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The result of sending a message: both persisted messages plus the
/// documents that were used as context.
///
/// The assistant reply is keyed `assistantmessage`, which is what the web
/// client reads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageExchange {
    pub user_message: Message,
    #[serde(rename = "assistantmessage")]
    pub assistant_message: Message,
    pub context: Vec<SearchHit>,
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("system".parse::<Role>().is_err());
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_document_serializes_camel_case() {
        let doc = Document {
            id: "d1".to_string(),
            title: "T".to_string(),
            content: "C".to_string(),
            file_name: Some("a.pdf".to_string()),
            file_path: None,
            file_size: Some(42),
            has_embedding: true,
            created_at: from_millis(0),
            updated_at: from_millis(0),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["fileName"], "a.pdf");
        assert_eq!(json["fileSize"], 42);
        assert_eq!(json["hasEmbedding"], true);
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(Role::User).unwrap();
        assert_eq!(json, "user");
    }
}
