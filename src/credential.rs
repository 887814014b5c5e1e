//! Azure identity: bearer tokens and API keys for the REST backends.
//!
//! [`default_credential`] mirrors the usual credential chain:
//!
//! | Order | Source | Trigger |
//! |-------|--------|---------|
//! | 1 | [`StaticTokenCredential`] | `AZURE_ACCESS_TOKEN` is set |
//! | 2 | [`ClientSecretCredential`] | `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET` are set |
//! | 3 | [`AzureCliCredential`] | fallback; requires a prior `az login` |
//!
//! The chosen credential is wrapped in a [`CachedCredential`] so each scope
//! is fetched once and refreshed shortly before it expires.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";
pub const SEARCH_SCOPE: &str = "https://search.azure.com/.default";
pub const COSMOS_SCOPE: &str = "https://cosmos.azure.com/.default";
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// Tokens are refreshed this long before their stated expiry.
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

// ============ Static token ============

/// A fixed token, typically injected by the hosting environment.
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        })
    }
}

// ============ Azure CLI ============

/// Obtains tokens from a logged-in Azure CLI (`az login`).
pub struct AzureCliCredential;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenOutput {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let output = tokio::process::Command::new("az")
            .args(["account", "get-access-token", "--scope", scope, "--output", "json"])
            .output()
            .await
            .context("Failed to run Azure CLI (is `az` installed?)")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Azure CLI could not get a token (run `az login`): {}", stderr.trim());
        }

        parse_cli_token(&output.stdout)
    }
}

fn parse_cli_token(stdout: &[u8]) -> Result<AccessToken> {
    let parsed: CliTokenOutput =
        serde_json::from_slice(stdout).context("Unexpected Azure CLI token output")?;

    let expires_at = match (parsed.expires_on_epoch, parsed.expires_on.as_deref()) {
        (Some(epoch), _) => Utc
            .timestamp_opt(epoch, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("Invalid expires_on: {}", epoch))?,
        (None, Some(local)) => parse_cli_local_time(local)?,
        (None, None) => bail!("Azure CLI token output has no expiry"),
    };

    Ok(AccessToken {
        token: parsed.access_token,
        expires_at,
    })
}

/// Older CLI versions report `expiresOn` in local time without an offset.
fn parse_cli_local_time(value: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .with_context(|| format!("Invalid expiresOn: {}", value))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow::anyhow!("Invalid local time: {}", value))
}

// ============ Client secret ============

/// OAuth2 client-credentials flow for a service principal.
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    expires_in: i64,
}

impl ClientSecretCredential {
    pub fn new(tenant_id: String, client_id: String, client_secret: String) -> Self {
        Self {
            tenant_id,
            client_id,
            client_secret,
            authority: "https://login.microsoftonline.com".to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("Token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Token endpoint error {}: {}", status, body);
        }

        let body: TokenEndpointResponse = response.json().await?;
        Ok(AccessToken {
            token: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in),
        })
    }
}

// ============ Cache ============

/// Caches tokens per scope until shortly before expiry.
pub struct CachedCredential {
    inner: Box<dyn TokenCredential>,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl CachedCredential {
    pub fn new(inner: Box<dyn TokenCredential>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TokenCredential for CachedCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(scope) {
            if is_fresh(token, Utc::now()) {
                return Ok(token.clone());
            }
        }
        let token = self.inner.get_token(scope).await?;
        tracing::debug!(scope, expires_at = %token.expires_at, "fetched access token");
        cache.insert(scope.to_string(), token.clone());
        Ok(token)
    }
}

fn is_fresh(token: &AccessToken, now: DateTime<Utc>) -> bool {
    token.expires_at - chrono::Duration::seconds(REFRESH_MARGIN_SECS) > now
}

/// Pick a credential from the environment, falling back to the Azure CLI.
pub fn default_credential() -> Arc<dyn TokenCredential> {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    let inner: Box<dyn TokenCredential> = if let Some(token) = env("AZURE_ACCESS_TOKEN") {
        tracing::info!("using static access token from AZURE_ACCESS_TOKEN");
        Box::new(StaticTokenCredential::new(token))
    } else if let (Some(tenant), Some(client), Some(secret)) = (
        env("AZURE_TENANT_ID"),
        env("AZURE_CLIENT_ID"),
        env("AZURE_CLIENT_SECRET"),
    ) {
        tracing::info!("using client secret credential");
        Box::new(ClientSecretCredential::new(tenant, client, secret))
    } else {
        tracing::info!("using Azure CLI credential");
        Box::new(AzureCliCredential)
    };

    Arc::new(CachedCredential::new(inner))
}

// ============ Per-service auth ============

/// How a request to one Azure service is authenticated.
#[derive(Clone)]
pub enum ServiceAuth {
    /// `api-key: <key>` header (Azure OpenAI, AI Search).
    ApiKey(String),
    /// `Authorization: Bearer <token>` for the given scope.
    Bearer {
        credential: Arc<dyn TokenCredential>,
        scope: String,
    },
}

impl ServiceAuth {
    /// Use the key when configured, otherwise a bearer token.
    pub fn from_key_or_token(
        key: Option<&str>,
        credential: &Arc<dyn TokenCredential>,
        scope: &str,
    ) -> Self {
        match key {
            Some(key) if !key.is_empty() => ServiceAuth::ApiKey(key.to_string()),
            _ => ServiceAuth::Bearer {
                credential: credential.clone(),
                scope: scope.to_string(),
            },
        }
    }

    pub async fn apply(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match self {
            ServiceAuth::ApiKey(key) => Ok(request.header("api-key", key)),
            ServiceAuth::Bearer { credential, scope } => {
                let token = credential.get_token(scope).await?;
                Ok(request.bearer_auth(token.token))
            }
        }
    }
}
