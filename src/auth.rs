//! Bearer-token authentication for the HTTP API.
//!
//! A single configured user logs in with a form post and receives an
//! HMAC-signed JWT (`HS256`, `HS384` or `HS512`) carrying `sub` and `exp`.
//! Every protected handler takes an [`AuthUser`], which verifies the
//! `Authorization: Bearer <token>` header before the handler runs.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::error::{Result, ServiceError};

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct AuthService {
    username: String,
    password: String,
    secret_key: String,
    algorithm: String,
    expire_minutes: i64,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            secret_key: config.secret_key.clone(),
            algorithm: config.algorithm.clone(),
            expire_minutes: config.access_token_expire_minutes,
        }
    }

    /// Sign a token for `sub`, expiring after `expires_delta` or the
    /// configured lifetime.
    pub fn create_access_token(
        &self,
        sub: &str,
        expires_delta: Option<Duration>,
    ) -> Result<String> {
        let expire =
            Utc::now() + expires_delta.unwrap_or_else(|| Duration::minutes(self.expire_minutes));
        let header = Header {
            alg: self.algorithm.clone(),
            typ: "JWT".to_string(),
        };
        let claims = Claims {
            sub: Some(sub.to_string()),
            exp: expire.timestamp(),
        };

        let signing_input = format!(
            "{}.{}",
            encode_part(&header)?,
            encode_part(&claims)?
        );
        let signature = sign(&self.algorithm, self.secret_key.as_bytes(), signing_input.as_bytes())
            .map_err(ServiceError::Internal)?;
        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
    }

    pub fn validate_user(&self, username: &str, password: &str) -> Result<()> {
        let user_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        if !(user_ok & pass_ok) {
            return Err(ServiceError::Authentication(
                "Invalid username or password".to_string(),
            ));
        }
        Ok(())
    }

    /// Verify a bearer token and return its subject.
    pub fn verify_token(&self, token: Option<&str>) -> Result<String> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Err(ServiceError::Authorization("Missing bearer token".to_string())),
        };

        let claims = self
            .decode(token)
            .map_err(|e| ServiceError::Authorization(format!("Token validation error: {}", e)))?;

        match claims.sub {
            Some(sub) if sub == self.username => Ok(sub),
            _ => Err(ServiceError::Authorization(
                "Invalid authentication credentials".to_string(),
            )),
        }
    }

    fn decode(&self, token: &str) -> anyhow::Result<Claims> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => anyhow::bail!("Not enough segments"),
            };

        let header: Header = decode_part(header_b64)
            .map_err(|_| anyhow::anyhow!("Invalid header string"))?;
        if header.alg != self.algorithm {
            anyhow::bail!("The specified alg value is not allowed");
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| anyhow::anyhow!("Invalid crypto padding"))?;
        let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
        verify(
            &self.algorithm,
            self.secret_key.as_bytes(),
            signing_input.as_bytes(),
            &signature,
        )?;

        let claims: Claims = decode_part(claims_b64)
            .map_err(|_| anyhow::anyhow!("Invalid payload string"))?;
        if claims.exp <= Utc::now().timestamp() {
            anyhow::bail!("Signature has expired.");
        }
        Ok(claims)
    }
}

fn encode_part<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(anyhow::Error::from)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_part<T: for<'de> Deserialize<'de>>(part: &str) -> anyhow::Result<T> {
    let bytes = URL_SAFE_NO_PAD.decode(part)?;
    Ok(serde_json::from_slice(&bytes)?)
}

macro_rules! with_mac {
    ($alg:expr, $key:expr, |$mac:ident| $body:expr) => {
        match $alg {
            "HS256" => {
                let mut $mac = <Hmac<Sha256>>::new_from_slice($key)?;
                $body
            }
            "HS384" => {
                let mut $mac = <Hmac<Sha384>>::new_from_slice($key)?;
                $body
            }
            "HS512" => {
                let mut $mac = <Hmac<Sha512>>::new_from_slice($key)?;
                $body
            }
            other => anyhow::bail!("Algorithm {} not supported", other),
        }
    };
}

fn sign(alg: &str, key: &[u8], data: &[u8]) -> anyhow::Result<Vec<u8>> {
    with_mac!(alg, key, |mac| {
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    })
}

/// Constant-time signature check.
fn verify(alg: &str, key: &[u8], data: &[u8], signature: &[u8]) -> anyhow::Result<()> {
    with_mac!(alg, key, |mac| {
        mac.update(data);
        mac.verify_slice(signature)
            .map_err(|_| anyhow::anyhow!("Signature verification failed."))
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim())
}

/// The authenticated username. Rejects with `AUTHORIZATION_ERROR`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let auth = Arc::<AuthService>::from_ref(state);
        let username = auth.verify_token(bearer_token(parts))?;
        Ok(AuthUser(username))
    }
}
