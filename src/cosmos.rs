//! Azure Cosmos DB (SQL API) metadata backend.
//!
//! Talks to the Cosmos REST API directly. Each file is one document in a
//! container partitioned on `/id`.
//!
//! # Request Signing
//!
//! With a master key, every request carries
//!
//! ```text
//! Authorization: type=master&ver=1.0&sig=<base64(HMAC-SHA256(key, payload))>
//! payload = verb + "\n" + resourceType + "\n" + resourceLink + "\n" + date + "\n" + "\n"
//! ```
//!
//! where verb, resource type and date are lower-cased and the whole
//! header value is URL-encoded. Without a key an Entra ID token is sent as
//! `type=aad&ver=1.0&sig=<token>`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CosmosConfig;
use crate::credential::{TokenCredential, COSMOS_SCOPE};
use crate::error::{Result, ServiceError};
use crate::http::{error_for_status, send_with_retry};
use crate::metadata::{new_file_metadata, MetadataStore};
use crate::models::FileMetadata;

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2018-12-31";
const LIST_QUERY: &str = "SELECT c.id, c.filename, c.created_at FROM c";

enum CosmosAuth {
    MasterKey(Vec<u8>),
    Aad(Arc<dyn TokenCredential>),
}

pub struct CosmosMetadataStore {
    client: reqwest::Client,
    endpoint: String,
    collection_link: String,
    auth: CosmosAuth,
    max_retries: u32,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(rename = "Documents", default)]
    documents: Vec<FileMetadata>,
}

impl CosmosMetadataStore {
    /// Build a store for `config`, signing with the master key when one is
    /// configured and with `credential` otherwise.
    pub fn new(
        config: &CosmosConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> anyhow::Result<Self> {
        if config.uri.is_empty() || config.database.is_empty() || config.container.is_empty() {
            anyhow::bail!("cosmos.uri, cosmos.database and cosmos.container are required");
        }
        let auth = match config.key.as_deref() {
            Some(key) if !key.is_empty() => {
                let decoded = STANDARD
                    .decode(key.trim())
                    .map_err(|e| anyhow::anyhow!("cosmos.key is not valid base64: {}", e))?;
                CosmosAuth::MasterKey(decoded)
            }
            _ => CosmosAuth::Aad(credential),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.uri.trim_end_matches('/').to_string(),
            collection_link: format!("dbs/{}/colls/{}", config.database, config.container),
            auth,
            max_retries: config.max_retries,
        })
    }

    /// Link for one document, or `None` when `file_id` could not be a
    /// Cosmos id. `/`, `\`, `?` and `#` are not allowed in ids and would
    /// otherwise address a different resource.
    fn doc_link(&self, file_id: &str) -> Option<String> {
        if file_id.is_empty() || file_id.contains(['/', '\\', '?', '#']) {
            return None;
        }
        Some(format!("{}/docs/{}", self.collection_link, file_id))
    }

    async fn authorization(
        &self,
        verb: &str,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> anyhow::Result<String> {
        match &self.auth {
            CosmosAuth::MasterKey(key) => Ok(master_key_signature(
                key,
                verb,
                resource_type,
                resource_link,
                date,
            )),
            CosmosAuth::Aad(credential) => {
                let token = credential.get_token(COSMOS_SCOPE).await?;
                Ok(uri_encode(&format!("type=aad&ver=1.0&sig={}", token.token)))
            }
        }
    }

    /// Attach the date, version and authorization headers for one attempt.
    async fn sign(
        &self,
        request: RequestBuilder,
        verb: &str,
        resource_type: &str,
        resource_link: &str,
    ) -> anyhow::Result<RequestBuilder> {
        let date = rfc1123_now();
        let authorization = self
            .authorization(verb, resource_type, resource_link, &date)
            .await?;
        Ok(request
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("authorization", authorization))
    }

    async fn send(
        &self,
        method: Method,
        resource_type: &'static str,
        resource_link: &str,
        customize: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}/{}", self.endpoint, request_path(resource_type, resource_link));
        let verb = method.as_str().to_string();
        let client = &self.client;
        let customize = &customize;
        send_with_retry("Cosmos DB", self.max_retries, || {
            let request = customize(client.request(method.clone(), &url));
            let verb = verb.as_str();
            async move { self.sign(request, verb, resource_type, resource_link).await }
        })
        .await
    }

    async fn upsert(&self, record: &FileMetadata) -> anyhow::Result<()> {
        let partition_key = serde_json::to_string(&[&record.id])?;
        let response = self
            .send(Method::POST, "docs", &self.collection_link, |request| {
                request
                    .header("x-ms-documentdb-is-upsert", "True")
                    .header("x-ms-documentdb-partitionkey", &partition_key)
                    .json(record)
            })
            .await?;
        if !response.status().is_success() {
            return Err(error_for_status("Cosmos DB", response).await);
        }
        Ok(())
    }

    async fn query_all(&self) -> anyhow::Result<Vec<FileMetadata>> {
        let body = serde_json::json!({ "query": LIST_QUERY, "parameters": [] });
        let mut files = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let token = continuation.clone();
            let response = self
                .send(Method::POST, "docs", &self.collection_link, |request| {
                    let request = request
                        .header("x-ms-documentdb-isquery", "True")
                        .header("x-ms-documentdb-query-enablecrosspartition", "True")
                        .header("content-type", "application/query+json")
                        .body(body.to_string());
                    match &token {
                        Some(token) => request.header("x-ms-continuation", token),
                        None => request,
                    }
                })
                .await?;
            if !response.status().is_success() {
                return Err(error_for_status("Cosmos DB", response).await);
            }

            continuation = response
                .headers()
                .get("x-ms-continuation")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            let page: QueryResponse = response.json().await?;
            files.extend(page.documents);

            if continuation.is_none() {
                break;
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl MetadataStore for CosmosMetadataStore {
    async fn save_file(&self, filename: &str) -> Result<String> {
        let record = new_file_metadata(filename);
        self.upsert(&record)
            .await
            .map_err(|e| {
                ServiceError::Database(format!("Failed to save file {}: {}", filename, e))
            })?;
        tracing::info!(file_id = %record.id, filename, "saved file metadata");
        Ok(record.id)
    }

    async fn get_file(&self, file_id: &str) -> Result<FileMetadata> {
        let link = self
            .doc_link(file_id)
            .ok_or_else(|| ServiceError::FileNotFound(file_id.to_string()))?;
        let partition_key = serde_json::to_string(&[file_id]).map_err(anyhow::Error::from)?;
        let response = self
            .send(Method::GET, "docs", &link, |request| {
                request.header("x-ms-documentdb-partitionkey", &partition_key)
            })
            .await
            .map_err(|e| ServiceError::Database(format!("Failed to get file {}: {}", file_id, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ServiceError::FileNotFound(file_id.to_string())),
            status if status.is_success() => response.json().await.map_err(|e| {
                ServiceError::Database(format!("Failed to get file {}: {}", file_id, e))
            }),
            _ => {
                let e = error_for_status("Cosmos DB", response).await;
                Err(ServiceError::Database(format!("Failed to get file {}: {}", file_id, e)))
            }
        }
    }

    async fn list_files(&self) -> Result<Vec<FileMetadata>> {
        let mut files = self
            .query_all()
            .await
            .map_err(|e| ServiceError::Database(format!("Failed to list files: {}", e)))?;
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(files)
    }

    async fn delete_file(&self, file_id: &str) -> Result<bool> {
        let link = self
            .doc_link(file_id)
            .ok_or_else(|| ServiceError::FileNotFound(file_id.to_string()))?;
        let partition_key = serde_json::to_string(&[file_id]).map_err(anyhow::Error::from)?;
        let response = self
            .send(Method::DELETE, "docs", &link, |request| {
                request.header("x-ms-documentdb-partitionkey", &partition_key)
            })
            .await
            .map_err(|e| {
                ServiceError::Database(format!("Failed to delete file {}: {}", file_id, e))
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ServiceError::FileNotFound(file_id.to_string())),
            status if status.is_success() => {
                tracing::info!(file_id, "deleted file metadata");
                Ok(true)
            }
            _ => {
                let e = error_for_status("Cosmos DB", response).await;
                Err(ServiceError::Database(format!("Failed to delete file {}: {}", file_id, e)))
            }
        }
    }
}

/// Path for a request: feeds are addressed as `<parent>/<type>`, items by
/// their own link.
fn request_path(resource_type: &str, resource_link: &str) -> String {
    let is_feed = !resource_link
        .rsplit('/')
        .nth(1)
        .map(|segment| segment == resource_type)
        .unwrap_or(false);
    if is_feed {
        format!("{}/{}", resource_link, resource_type)
    } else {
        resource_link.to_string()
    }
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn string_to_sign(verb: &str, resource_type: &str, resource_link: &str, date: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    )
}

fn master_key_signature(
    key: &[u8],
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
) -> String {
    let payload = string_to_sign(verb, resource_type, resource_link, date);
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());
    uri_encode(&format!("type=master&ver=1.0&sig={}", signature))
}

/// Percent-encode everything except unreserved characters (RFC 3986).
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
