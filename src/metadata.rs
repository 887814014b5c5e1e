//! File metadata storage.
//!
//! The [`MetadataStore`] trait is what the pipeline and the HTTP layer
//! talk to. [`InMemoryMetadataStore`] backs tests and local runs; the
//! Cosmos DB implementation lives in [`crate::cosmos`].

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{Result, ServiceError};
use crate::models::FileMetadata;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Store a new record for `filename` and return its generated id.
    async fn save_file(&self, filename: &str) -> Result<String>;

    /// Fetch one record. Missing ids fail with [`ServiceError::FileNotFound`].
    async fn get_file(&self, file_id: &str) -> Result<FileMetadata>;

    async fn list_files(&self) -> Result<Vec<FileMetadata>>;

    /// Remove a record. Missing ids fail with [`ServiceError::FileNotFound`].
    async fn delete_file(&self, file_id: &str) -> Result<bool>;
}

/// Build a fresh record with a UUID v4 id and the current UTC time.
pub fn new_file_metadata(filename: &str) -> FileMetadata {
    FileMetadata {
        id: uuid::Uuid::new_v4().to_string(),
        filename: filename.to_string(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    }
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    files: RwLock<HashMap<String, FileMetadata>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn save_file(&self, filename: &str) -> Result<String> {
        if filename.trim().is_empty() {
            return Err(ServiceError::Database(
                "Failed to save file : filename is empty".to_string(),
            ));
        }
        let record = new_file_metadata(filename);
        let id = record.id.clone();
        self.files.write().await.insert(id.clone(), record);
        Ok(id)
    }

    async fn get_file(&self, file_id: &str) -> Result<FileMetadata> {
        self.files
            .read()
            .await
            .get(file_id)
            .cloned()
            .ok_or_else(|| ServiceError::FileNotFound(file_id.to_string()))
    }

    async fn list_files(&self) -> Result<Vec<FileMetadata>> {
        let mut files: Vec<FileMetadata> = self.files.read().await.values().cloned().collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(files)
    }

    async fn delete_file(&self, file_id: &str) -> Result<bool> {
        match self.files.write().await.remove(file_id) {
            Some(_) => Ok(true),
            None => Err(ServiceError::FileNotFound(file_id.to_string())),
        }
    }
}
