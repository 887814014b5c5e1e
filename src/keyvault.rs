//! Loads login credentials and the token signing key from Azure Key Vault.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AuthConfig;
use crate::credential::{ServiceAuth, TokenCredential, KEY_VAULT_SCOPE};
use crate::http::{error_for_status, send_with_retry};

const API_VERSION: &str = "7.4";

pub const SECRET_JWT: &str = "auth-jwt-secret";
pub const SECRET_USERNAME: &str = "auth-app-username";
pub const SECRET_PASSWORD: &str = "auth-app-password";

#[derive(Deserialize)]
struct SecretBundle {
    #[serde(default)]
    value: String,
}

/// Fetch the auth secrets into `auth`.
///
/// Fails if any secret is missing or empty; every error is prefixed with
/// `Failed to load secrets from Azure Key Vault`.
pub async fn load_auth_secrets(
    vault_url: &str,
    credential: Arc<dyn TokenCredential>,
    auth: &mut AuthConfig,
) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let service_auth = ServiceAuth::Bearer {
        credential,
        scope: KEY_VAULT_SCOPE.to_string(),
    };

    let fetched = async {
        let secret_key = get_secret(&client, &service_auth, vault_url, SECRET_JWT).await?;
        let username = get_secret(&client, &service_auth, vault_url, SECRET_USERNAME).await?;
        let password = get_secret(&client, &service_auth, vault_url, SECRET_PASSWORD).await?;

        if secret_key.is_empty() || username.is_empty() || password.is_empty() {
            bail!("One or more secrets retrieved from Key Vault are empty");
        }
        Ok((secret_key, username, password))
    }
    .await
    .map_err(|e| anyhow::anyhow!("Failed to load secrets from Azure Key Vault: {}", e))?;

    auth.secret_key = fetched.0;
    auth.username = fetched.1;
    auth.password = fetched.2;
    tracing::info!(vault = vault_url, "loaded auth secrets from Key Vault");
    Ok(())
}

async fn get_secret(
    client: &reqwest::Client,
    auth: &ServiceAuth,
    vault_url: &str,
    name: &str,
) -> Result<String> {
    let url = secret_url(vault_url, name);
    let response = send_with_retry("Key Vault", 3, move || {
        let request = client.get(&url);
        async move { auth.apply(request).await }
    })
    .await?;

    if !response.status().is_success() {
        return Err(error_for_status("Key Vault", response).await);
    }
    let bundle: SecretBundle = response.json().await?;
    Ok(bundle.value)
}

fn secret_url(vault_url: &str, name: &str) -> String {
    format!(
        "{}/secrets/{}?api-version={}",
        vault_url.trim_end_matches('/'),
        name,
        API_VERSION
    )
}
