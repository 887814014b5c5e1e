//! File ingestion pipeline.
//!
//! ```text
//! text ──▶ save metadata ──▶ chunk ──▶ embed + upload chunks
//! ```
//!
//! If anything after the metadata write fails, the metadata record is
//! removed again so a file is either fully indexed or not listed.

use std::sync::Arc;

use crate::chunk::TextChunker;
use crate::error::{Result, ServiceError};
use crate::index::VectorStore;
use crate::metadata::MetadataStore;
use crate::models::ProcessFileResult;

#[derive(Clone)]
pub struct FileService {
    metadata: Arc<dyn MetadataStore>,
    vectors: VectorStore,
    chunker: TextChunker,
}

impl FileService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectors: VectorStore,
        chunker: TextChunker,
    ) -> Self {
        Self {
            metadata,
            vectors,
            chunker,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    /// Ingest one file's extracted text.
    pub async fn process_file(&self, filename: &str, content: &str) -> Result<ProcessFileResult> {
        if content.trim().is_empty() {
            return Err(ServiceError::FileProcessing("File content is empty".to_string()));
        }

        self.ingest(filename, content).await.map_err(|e| {
            ServiceError::FileProcessing(format!("Failed to process file {}: {}", filename, e))
        })
    }

    async fn ingest(&self, filename: &str, content: &str) -> Result<ProcessFileResult> {
        let file_id = self.metadata.save_file(filename).await?;

        let chunks = self.chunker.chunk_text(content);
        tracing::info!(%file_id, filename, chunks = chunks.len(), "chunked file");

        if let Err(e) = self.vectors.upload_chunks(&chunks, &file_id).await {
            if let Err(rollback) = self.metadata.delete_file(&file_id).await {
                tracing::warn!(%file_id, error = %rollback, "failed to roll back file metadata");
            }
            return Err(e);
        }

        tracing::info!(%file_id, filename, chunks_indexed = chunks.len(), "file indexed");
        Ok(ProcessFileResult {
            file_id,
            chunks_indexed: chunks.len(),
        })
    }

    /// Delete a file's chunks and its metadata record.
    pub async fn delete_file(&self, file_id: &str) -> Result<bool> {
        if file_id.trim().is_empty() {
            return Err(ServiceError::Validation("file_id cannot be empty".to_string()));
        }

        // 404 before touching the index
        self.metadata.get_file(file_id).await?;

        let removed = self.vectors.delete_chunks_by_file_id(file_id).await?;
        self.metadata.delete_file(file_id).await?;
        tracing::info!(file_id, chunks_removed = removed, "file deleted");
        Ok(true)
    }
}
