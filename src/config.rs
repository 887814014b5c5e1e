//! Service configuration.
//!
//! Values come from three layers, later layers winning:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file (`--config`),
//! 3. environment variables (a `.env` file is loaded first by the binary).
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [openai]
//! endpoint = "https://my-openai.openai.azure.com"
//! embedding_deployment = "text-embedding-3-small"
//! chat_deployment = "gpt-4o-mini"
//!
//! [cosmos]
//! uri = "https://my-account.documents.azure.com:443/"
//! database = "files"
//! container = "metadata"
//!
//! [search]
//! endpoint = "https://my-search.search.windows.net"
//! index = "chunks"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub key_vault: KeyVaultConfig,
    pub openai: OpenAiConfig,
    pub cosmos: CosmosConfig,
    pub search: SearchConfig,
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub secret_key: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            secret_key: String::new(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KeyVaultConfig {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub embedding_deployment: String,
    pub embedding_model: Option<String>,
    pub embedding_api_version: String,
    pub embedding_dims: usize,
    pub chat_deployment: String,
    pub chat_api_version: String,
    pub max_completion_tokens: u32,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            embedding_deployment: String::new(),
            embedding_model: None,
            embedding_api_version: "2024-02-01".to_string(),
            embedding_dims: 1536,
            chat_deployment: String::new(),
            chat_api_version: "2024-10-21".to_string(),
            max_completion_tokens: 1000,
            api_key: None,
            batch_size: 16,
            max_retries: 5,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CosmosConfig {
    pub uri: String,
    pub database: String,
    pub container: String,
    /// Account master key. When absent, Entra ID tokens are used.
    pub key: Option<String>,
    pub max_retries: u32,
}

impl Default for CosmosConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            database: String::new(),
            container: String::new(),
            key: None,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub index: String,
    pub api_version: String,
    pub api_key: Option<String>,
    pub top_k: usize,
    pub score_threshold: Option<f64>,
    pub upload_batch_size: usize,
    pub max_retries: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            index: String::new(),
            api_version: "2024-07-01".to_string(),
            api_key: None,
            top_k: 10,
            score_threshold: Some(0.6),
            upload_batch_size: 1000,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
        }
    }
}

/// Load configuration from an optional TOML file plus the process environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Override fields from environment-style lookups.
    ///
    /// Takes a lookup function so tests can supply a map instead of
    /// mutating the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SERVER_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = v
                .parse()
                .with_context(|| format!("MAX_UPLOAD_BYTES is not a number: {}", v))?;
        }

        if let Some(v) = get("AUTH_USERNAME") {
            self.auth.username = v;
        }
        if let Some(v) = get("AUTH_PASSWORD") {
            self.auth.password = v;
        }
        if let Some(v) = get("AUTH_SECRET_KEY") {
            self.auth.secret_key = v;
        }
        if let Some(v) = get("AUTH_ALGORITHM") {
            self.auth.algorithm = v;
        }
        if let Some(v) = get("ACCESS_TOKEN_EXPIRE_MINUTES") {
            self.auth.access_token_expire_minutes = v
                .parse()
                .with_context(|| format!("ACCESS_TOKEN_EXPIRE_MINUTES is not a number: {}", v))?;
        }

        if let Some(v) = get("KEY_VAULT_URL") {
            self.key_vault.url = Some(v);
        }

        if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
            self.openai.endpoint = v;
        }
        if let Some(v) = get("AZURE_OPENAI_DEPLOYMENT") {
            self.openai.embedding_deployment = v;
        }
        if let Some(v) = get("AZURE_OPENAI_MODEL") {
            self.openai.embedding_model = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_API_VERSION") {
            self.openai.embedding_api_version = v;
        }
        if let Some(v) = get("AZURE_OPENAI_CHAT_DEPLOYMENT") {
            self.openai.chat_deployment = v;
        }
        if let Some(v) = get("AZURE_OPENAI_CHAT_API_VERSION") {
            self.openai.chat_api_version = v;
        }
        if let Some(v) = get("AZURE_OPENAI_API_KEY") {
            self.openai.api_key = Some(v);
        }

        if let Some(v) = get("COSMOS_DB_URI") {
            self.cosmos.uri = v;
        }
        if let Some(v) = get("COSMOS_DB_DATABASE") {
            self.cosmos.database = v;
        }
        if let Some(v) = get("COSMOS_DB_CONTAINER") {
            self.cosmos.container = v;
        }
        if let Some(v) = get("COSMOS_DB_KEY") {
            self.cosmos.key = Some(v);
        }

        if let Some(v) = get("AZURE_SEARCH_ENDPOINT") {
            self.search.endpoint = v;
        }
        if let Some(v) = get("AZURE_SEARCH_INDEX") {
            self.search.index = v;
        }
        if let Some(v) = get("AZURE_SEARCH_API_KEY") {
            self.search.api_key = Some(v);
        }

        Ok(())
    }

    /// Check value ranges that apply regardless of which backends are used.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.server.max_upload_bytes == 0 {
            bail!("server.max_upload_bytes must be > 0");
        }
        if let Some(threshold) = self.search.score_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                bail!("search.score_threshold must be in [0.0, 1.0]");
            }
        }
        if self.search.top_k == 0 {
            bail!("search.top_k must be >= 1");
        }
        if self.search.upload_batch_size == 0 {
            bail!("search.upload_batch_size must be >= 1");
        }
        if self.openai.batch_size == 0 {
            bail!("openai.batch_size must be >= 1");
        }
        match self.auth.algorithm.as_str() {
            "HS256" | "HS384" | "HS512" => {}
            other => bail!(
                "Unsupported auth.algorithm: '{}'. Must be HS256, HS384, or HS512.",
                other
            ),
        }
        if self.auth.access_token_expire_minutes <= 0 {
            bail!("auth.access_token_expire_minutes must be > 0");
        }
        Ok(())
    }

    /// Ensure every Azure setting needed to serve requests is present.
    pub fn require_azure(&self) -> Result<()> {
        let required = [
            (&self.openai.endpoint, "openai.endpoint", "AZURE_OPENAI_ENDPOINT"),
            (
                &self.openai.embedding_deployment,
                "openai.embedding_deployment",
                "AZURE_OPENAI_DEPLOYMENT",
            ),
            (
                &self.openai.chat_deployment,
                "openai.chat_deployment",
                "AZURE_OPENAI_CHAT_DEPLOYMENT",
            ),
            (&self.cosmos.uri, "cosmos.uri", "COSMOS_DB_URI"),
            (&self.cosmos.database, "cosmos.database", "COSMOS_DB_DATABASE"),
            (&self.cosmos.container, "cosmos.container", "COSMOS_DB_CONTAINER"),
            (&self.search.endpoint, "search.endpoint", "AZURE_SEARCH_ENDPOINT"),
            (&self.search.index, "search.index", "AZURE_SEARCH_INDEX"),
        ];
        for (value, field, env) in required {
            if value.trim().is_empty() {
                bail!("{} must be set (config file or {})", field, env);
            }
        }
        Ok(())
    }

    /// Ensure login can work: credentials and a signing key are present.
    pub fn require_auth(&self) -> Result<()> {
        if self.auth.username.is_empty()
            || self.auth.password.is_empty()
            || self.auth.secret_key.is_empty()
        {
            bail!(
                "auth.username, auth.password and auth.secret_key must be set \
                 (config file, AUTH_* variables, or Key Vault)"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.server.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.search.score_threshold, Some(0.6));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [search]
            endpoint = "https://s.search.windows.net"
            index = "chunks"
            top_k = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.search.top_k, 4);
        assert_eq!(config.search.api_version, "2024-07-01");
        assert_eq!(config.auth.algorithm, "HS256");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config.cosmos.database = "from-file".to_string();
        config
            .apply_env(lookup(&[
                ("COSMOS_DB_DATABASE", "from-env"),
                ("AZURE_OPENAI_MODEL", "text-embedding-3-small"),
                ("ACCESS_TOKEN_EXPIRE_MINUTES", "15"),
                ("AZURE_SEARCH_API_KEY", "   "),
            ]))
            .unwrap();
        assert_eq!(config.cosmos.database, "from-env");
        assert_eq!(
            config.openai.embedding_model.as_deref(),
            Some("text-embedding-3-small")
        );
        assert_eq!(config.auth.access_token_expire_minutes, 15);
        // blank values are ignored
        assert!(config.search.api_key.is_none());
    }

    #[test]
    fn non_numeric_env_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(lookup(&[("MAX_UPLOAD_BYTES", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_UPLOAD_BYTES"));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut config = Config::default();
        config.chunking.chunk_overlap = 512;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_algorithm_rejected() {
        let mut config = Config::default();
        config.auth.algorithm = "RS256".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("RS256"));
    }

    #[test]
    fn require_azure_names_missing_variable() {
        let mut config = Config::default();
        config.openai.endpoint = "https://x".to_string();
        let err = config.require_azure().unwrap_err();
        assert!(err.to_string().contains("AZURE_OPENAI_DEPLOYMENT"));
    }
}
