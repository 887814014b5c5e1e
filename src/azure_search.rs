//! Azure AI Search vector index backend.
//!
//! Uses the data-plane REST API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | upload | `POST indexes/<i>/docs/index` (`@search.action = upload`) |
//! | search | `POST indexes/<i>/docs/search` with a `vector` query on `content_vector` |
//! | delete by file | page `select=id` with `file_id eq '<id>'`, then `@search.action = delete` |
//! | schema | `PUT indexes/<i>` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::SearchConfig;
use crate::credential::ServiceAuth;
use crate::http::{error_for_status, send_with_retry};
use crate::index::VectorIndex;
use crate::models::{ScoredChunk, SearchChunk};

const VECTOR_FIELD: &str = "content_vector";
const DELETE_PAGE_SIZE: usize = 1000;

pub struct AzureSearchIndex {
    client: reqwest::Client,
    endpoint: String,
    index: String,
    api_version: String,
    upload_batch_size: usize,
    max_retries: u32,
    auth: ServiceAuth,
}

#[derive(Deserialize)]
struct IndexResponse {
    #[serde(default)]
    value: Vec<IndexResult>,
}

#[derive(Deserialize)]
struct IndexResult {
    key: String,
    status: bool,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "@search.score")]
    score: f64,
    #[serde(flatten)]
    chunk: SearchChunk,
}

#[derive(Deserialize)]
struct IdHit {
    id: String,
}

#[derive(Deserialize)]
struct IdPage {
    #[serde(default)]
    value: Vec<IdHit>,
}

impl AzureSearchIndex {
    pub fn new(config: &SearchConfig, auth: ServiceAuth) -> Result<Self> {
        if config.endpoint.is_empty() || config.index.is_empty() {
            bail!("search.endpoint and search.index are required");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            api_version: config.api_version.clone(),
            upload_batch_size: config.upload_batch_size.max(1),
            max_retries: config.max_retries,
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/indexes/{}{}?api-version={}",
            self.endpoint, self.index, path, self.api_version
        )
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &Value,
    ) -> Result<reqwest::Response> {
        let client = &self.client;
        let auth = &self.auth;
        let response = send_with_retry("Azure AI Search", self.max_retries, move || {
            let request = client.request(method.clone(), url).json(body);
            async move { auth.apply(request).await }
        })
        .await?;
        if !response.status().is_success() {
            return Err(error_for_status("Azure AI Search", response).await);
        }
        Ok(response)
    }

    /// Submit one indexing batch and fail if any document was rejected.
    async fn index_batch(&self, actions: Vec<Value>) -> Result<()> {
        let body = json!({ "value": actions });
        let response = self
            .send_json(reqwest::Method::POST, &self.url("/docs/index"), &body)
            .await?;
        let parsed: IndexResponse = response.json().await?;
        let failed: Vec<String> = parsed
            .value
            .iter()
            .filter(|r| !r.status)
            .map(|r| match &r.error_message {
                Some(msg) => format!("{} ({})", r.key, msg),
                None => r.key.clone(),
            })
            .collect();
        if !failed.is_empty() {
            bail!("{} document(s) rejected: {}", failed.len(), failed.join(", "));
        }
        Ok(())
    }

    async fn file_chunk_ids(&self, file_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let url = self.url("/docs/search");
        loop {
            let body = json!({
                "search": "*",
                "filter": file_filter(file_id),
                "select": "id",
                "top": DELETE_PAGE_SIZE,
                "skip": ids.len(),
            });
            let response = self.send_json(reqwest::Method::POST, &url, &body).await?;
            let page: IdPage = response.json().await?;
            let count = page.value.len();
            ids.extend(page.value.into_iter().map(|hit| hit.id));
            if count < DELETE_PAGE_SIZE {
                break;
            }
        }
        Ok(ids)
    }

    /// Create or update the index schema for vectors of `dims` dimensions.
    pub async fn ensure_index(&self, dims: usize) -> Result<()> {
        let body = index_schema(&self.index, dims);
        self.send_json(reqwest::Method::PUT, &self.url(""), &body)
            .await?;
        tracing::info!(index = %self.index, dims, "search index is up to date");
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for AzureSearchIndex {
    async fn upload(&self, docs: &[SearchChunk]) -> Result<()> {
        for batch in docs.chunks(self.upload_batch_size) {
            let actions = batch
                .iter()
                .map(|doc| {
                    let mut value = serde_json::to_value(doc)?;
                    value["@search.action"] = Value::String("upload".to_string());
                    Ok(value)
                })
                .collect::<Result<Vec<Value>>>()?;
            self.index_batch(actions).await?;
        }
        Ok(())
    }

    async fn delete_by_file_id(&self, file_id: &str) -> Result<usize> {
        let ids = self.file_chunk_ids(file_id).await?;
        for batch in ids.chunks(self.upload_batch_size) {
            let actions = batch
                .iter()
                .map(|id| json!({ "@search.action": "delete", "id": id }))
                .collect();
            self.index_batch(actions).await?;
        }
        Ok(ids.len())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        file_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let body = search_body(vector, k, file_id);
        let response = self
            .send_json(reqwest::Method::POST, &self.url("/docs/search"), &body)
            .await?;
        let parsed: SearchResponse = response.json().await?;
        Ok(parsed
            .value
            .into_iter()
            .map(|hit| ScoredChunk {
                chunk: hit.chunk,
                score: hit.score,
            })
            .collect())
    }
}

/// OData filter for one file. Single quotes are doubled per OData rules.
fn file_filter(file_id: &str) -> String {
    format!("file_id eq '{}'", file_id.replace('\'', "''"))
}

fn search_body(vector: &[f32], k: usize, file_id: Option<&str>) -> Value {
    let mut body = json!({
        "select": "id,file_id,chunk_index,content,start_char,end_char,created_at",
        "top": k,
        "vectorQueries": [{
            "kind": "vector",
            "vector": vector,
            "fields": VECTOR_FIELD,
            "k": k,
        }],
    });
    if let Some(id) = file_id {
        body["filter"] = Value::String(file_filter(id));
    }
    body
}

fn index_schema(name: &str, dims: usize) -> Value {
    json!({
        "name": name,
        "fields": [
            { "name": "id", "type": "Edm.String", "key": true, "filterable": true },
            { "name": "content", "type": "Edm.String", "searchable": true },
            {
                "name": VECTOR_FIELD,
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "retrievable": false,
                "dimensions": dims,
                "vectorSearchProfile": "default-vector-profile",
            },
            { "name": "file_id", "type": "Edm.String", "filterable": true },
            { "name": "chunk_index", "type": "Edm.Int32", "sortable": true },
            { "name": "start_char", "type": "Edm.Int32" },
            { "name": "end_char", "type": "Edm.Int32" },
            { "name": "created_at", "type": "Edm.String", "filterable": true, "sortable": true },
        ],
        "vectorSearch": {
            "algorithms": [{
                "name": "default-hnsw",
                "kind": "hnsw",
                "hnswParameters": {
                    "metric": "cosine",
                    "m": 4,
                    "efConstruction": 400,
                    "efSearch": 500,
                },
            }],
            "profiles": [{ "name": "default-vector-profile", "algorithm": "default-hnsw" }],
        },
    })
}
