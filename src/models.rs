//! Request, response and record types shared across the service.
//!
//! Field names match the JSON exchanged with clients and stored in the
//! backends, so most types derive both `Serialize` and `Deserialize`.

use serde::{Deserialize, Serialize};

/// Metadata for one ingested file, as stored in the metadata container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Unique file id (UUID v4), also the partition key.
    pub id: String,
    /// Original filename as uploaded.
    pub filename: String,
    /// RFC 3339 UTC timestamp of when the file was stored.
    pub created_at: String,
}

/// A text chunk produced by the splitter, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub chunk_index: usize,
    pub text: String,
    /// Char offset of the first character in the source text.
    pub start_char: usize,
    /// Char offset one past the last character.
    pub end_char: usize,
}

/// A chunk document as stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchChunk {
    pub id: String,
    pub file_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub start_char: usize,
    pub end_char: usize,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_vector: Vec<f32>,
}

/// A chunk returned from similarity search with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: SearchChunk,
    pub score: f64,
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessFileResult {
    pub file_id: String,
    pub chunks_indexed: usize,
}

/// One prior turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `user`, `assistant` or `system`.
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub chat_history: Option<Vec<ChatMessage>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub code: String,
    pub message: String,
}

pub type UploadFileResponse = ProcessFileResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileResponse {
    pub file: FileMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFileResponse {
    pub file_id: String,
    pub deleted: bool,
}
