//! Vector index abstraction and the embedding-aware vector store.
//!
//! [`VectorIndex`] stores embedded [`SearchChunk`]s and answers nearest
//! neighbour queries. [`VectorStore`] sits on top: it embeds chunk text
//! and queries through an [`Embedder`] and maps failures into
//! [`ServiceError::SearchIndexing`].

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{Result, ServiceError};
use crate::models::{ScoredChunk, SearchChunk, TextChunk};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Add or replace documents by `id`.
    async fn upload(&self, docs: &[SearchChunk]) -> AnyResult<()>;

    /// Remove every chunk of a file, returning how many were removed.
    async fn delete_by_file_id(&self, file_id: &str) -> AnyResult<usize>;

    /// Top `k` chunks by similarity to `vector`, best first, optionally
    /// restricted to one file.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        file_id: Option<&str>,
    ) -> AnyResult<Vec<ScoredChunk>>;
}

/// Brute-force cosine index held in memory.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    docs: RwLock<Vec<SearchChunk>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upload(&self, docs: &[SearchChunk]) -> AnyResult<()> {
        let mut stored = self.docs.write().await;
        for doc in docs {
            stored.retain(|d| d.id != doc.id);
            stored.push(doc.clone());
        }
        Ok(())
    }

    async fn delete_by_file_id(&self, file_id: &str) -> AnyResult<usize> {
        let mut stored = self.docs.write().await;
        let before = stored.len();
        stored.retain(|d| d.file_id != file_id);
        Ok(before - stored.len())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        file_id: Option<&str>,
    ) -> AnyResult<Vec<ScoredChunk>> {
        let stored = self.docs.read().await;
        let mut scored: Vec<ScoredChunk> = stored
            .iter()
            .filter(|d| file_id.map_or(true, |id| d.file_id == id))
            .map(|d| ScoredChunk {
                chunk: d.clone(),
                score: cosine_similarity(vector, &d.content_vector) as f64,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// Embeds chunks and queries, and delegates storage to a [`VectorIndex`].
#[derive(Clone)]
pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Embed and upload the chunks of one file. Returns the new chunk ids.
    pub async fn upload_chunks(
        &self,
        chunks: &[TextChunk],
        file_id: &str,
    ) -> Result<Vec<String>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        if file_id.is_empty() {
            return Err(ServiceError::Validation(
                "file_id cannot be empty".to_string(),
            ));
        }

        self.embed_and_upload(chunks, file_id)
            .await
            .map_err(|e| ServiceError::SearchIndexing(format!("Failed to upload chunks: {}", e)))
    }

    async fn embed_and_upload(
        &self,
        chunks: &[TextChunk],
        file_id: &str,
    ) -> AnyResult<Vec<String>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let docs: Vec<SearchChunk> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| SearchChunk {
                id: uuid::Uuid::new_v4().to_string(),
                file_id: file_id.to_string(),
                chunk_index: chunk.chunk_index,
                content: chunk.text.clone(),
                start_char: chunk.start_char,
                end_char: chunk.end_char,
                created_at: created_at.clone(),
                content_vector: vector,
            })
            .collect();

        self.index.upload(&docs).await?;
        tracing::debug!(file_id, chunks = docs.len(), "uploaded chunks");
        Ok(docs.into_iter().map(|d| d.id).collect())
    }

    /// Remove every chunk belonging to `file_id`.
    pub async fn delete_chunks_by_file_id(&self, file_id: &str) -> Result<usize> {
        if file_id.is_empty() {
            return Err(ServiceError::Validation(
                "file_id cannot be empty".to_string(),
            ));
        }
        let removed = self.index.delete_by_file_id(file_id).await.map_err(|e| {
            ServiceError::SearchIndexing(format!(
                "Failed to delete chunks for document {}: {}",
                file_id, e
            ))
        })?;
        tracing::debug!(file_id, removed, "deleted chunks");
        Ok(removed)
    }

    /// Chunks most similar to `query`, best first.
    ///
    /// With a `score_threshold`, results scoring below it are dropped.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        score_threshold: Option<f64>,
        file_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Err(ServiceError::Validation("Search query cannot be empty".to_string()));
        }

        let search = async {
            let vector = self.embedder.embed_query(query).await?;
            self.index.search(&vector, k, file_id).await
        };
        let mut results = search.await.map_err(|e| {
            ServiceError::SearchIndexing(format!("Failed to perform similarity search: {}", e))
        })?;

        if let Some(threshold) = score_threshold {
            results.retain(|r| r.score >= threshold);
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Maps known words onto fixed axes so similarity is predictable.
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        if t.contains("rust") { 1.0 } else { 0.0 },
                        if t.contains("azure") { 1.0 } else { 0.0 },
                        if t.contains("chat") { 1.0 } else { 0.0 },
                    ]
                })
                .collect())
        }

        fn dims(&self) -> usize {
            3
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_documents(&self, _texts: &[String]) -> AnyResult<Vec<Vec<f32>>> {
            anyhow::bail!("quota exceeded")
        }

        fn dims(&self) -> usize {
            3
        }
    }

    fn chunk(i: usize, text: &str) -> TextChunk {
        TextChunk {
            chunk_index: i,
            text: text.to_string(),
            start_char: 0,
            end_char: text.chars().count(),
        }
    }

    fn store() -> (VectorStore, Arc<InMemoryVectorIndex>) {
        let index = Arc::new(InMemoryVectorIndex::new());
        (VectorStore::new(Arc::new(AxisEmbedder), index.clone()), index)
    }

    #[tokio::test]
    async fn upload_empty_is_noop() {
        let (store, index) = store();
        assert!(store.upload_chunks(&[], "f1").await.unwrap().is_empty());
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn upload_requires_file_id() {
        let (store, _) = store();
        let err = store.upload_chunks(&[chunk(0, "rust")], "").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn search_ranks_and_filters_by_threshold() {
        let (store, _) = store();
        store
            .upload_chunks(&[chunk(0, "Rust on Azure"), chunk(1, "chat bots")], "f1")
            .await
            .unwrap();
        store.upload_chunks(&[chunk(0, "rust only")], "f2").await.unwrap();

        let results = store.similarity_search("rust", 10, None, None).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk.content, "rust only");
        assert!(results[0].score >= results[1].score);

        let results = store
            .similarity_search("rust", 10, Some(0.6), None)
            .await
            .unwrap();
        let contents: Vec<&str> = results.iter().map(|r| r.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["rust only", "Rust on Azure"]);

        let results = store
            .similarity_search("rust", 10, None, Some("f1"))
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.chunk.file_id == "f1"));
    }

    #[tokio::test]
    async fn empty_query_rejected() {
        let (store, _) = store();
        let err = store.similarity_search("   ", 5, None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Search query cannot be empty");
    }

    #[tokio::test]
    async fn delete_removes_only_that_file() {
        let (store, index) = store();
        store
            .upload_chunks(&[chunk(0, "a"), chunk(1, "b")], "f1")
            .await
            .unwrap();
        store.upload_chunks(&[chunk(0, "c")], "f2").await.unwrap();

        assert_eq!(store.delete_chunks_by_file_id("f1").await.unwrap(), 2);
        assert_eq!(index.len().await, 1);
        assert_eq!(store.delete_chunks_by_file_id("f1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn embedder_failure_is_indexing_error() {
        let store = VectorStore::new(
            Arc::new(FailingEmbedder),
            Arc::new(InMemoryVectorIndex::new()),
        );
        let err = store.upload_chunks(&[chunk(0, "x")], "f1").await.unwrap_err();
        assert_eq!(err.code(), "SEARCH_INDEXING_ERROR");
        assert!(err.to_string().contains("quota exceeded"));
    }
}
