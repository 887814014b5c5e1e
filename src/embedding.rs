//! Embedding provider abstraction and the Azure OpenAI implementation.
//!
//! - **[`Embedder`]**: the trait the vector store depends on.
//! - **[`AzureOpenAiEmbedder`]**: calls an Azure OpenAI embeddings
//!   deployment with batching and retry (see [`crate::http`]).
//! - [`cosine_similarity`]: vector utility used by the in-memory index.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::OpenAiConfig;
use crate::credential::ServiceAuth;
use crate::http::{error_for_status, send_with_retry};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    /// Vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// Embeddings from an Azure OpenAI deployment.
///
/// `POST {endpoint}/openai/deployments/{deployment}/embeddings?api-version={v}`
pub struct AzureOpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    model: Option<String>,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    auth: ServiceAuth,
}

impl AzureOpenAiEmbedder {
    pub fn new(config: &OpenAiConfig, auth: ServiceAuth) -> Result<Self> {
        if config.endpoint.is_empty() || config.embedding_deployment.is_empty() {
            bail!("openai.endpoint and openai.embedding_deployment are required for embeddings");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.embedding_deployment,
            config.embedding_api_version
        );
        Ok(Self {
            client,
            url,
            model: config.embedding_model.clone(),
            dims: config.embedding_dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            auth,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut body = serde_json::json!({ "input": texts });
        if let Some(model) = &self.model {
            body["model"] = serde_json::Value::String(model.clone());
        }

        let client = &self.client;
        let url = self.url.as_str();
        let auth = &self.auth;
        let body = &body;
        let response = send_with_retry("Azure OpenAI embeddings", self.max_retries, move || {
            let request = client.post(url).json(body);
            async move { auth.apply(request).await }
        })
        .await?;

        if !response.status().is_success() {
            return Err(error_for_status("Azure OpenAI embeddings", response).await);
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let vectors = parsed.into_ordered();
        if vectors.len() != texts.len() {
            bail!(
                "Azure OpenAI returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for AzureOpenAiEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// Items may arrive out of order; `index` refers to the input position.
    fn into_ordered(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|item| item.index);
        self.data.into_iter().map(|item| item.embedding).collect()
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
