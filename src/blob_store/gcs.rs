use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{BlobInfo, BlobObject, BlobStore, BlobStoreError, PresignVerb};

const GCS_HOST: &str = "storage.googleapis.com";

/// Longest validity GCS accepts for a V4 signed URL (7 days).
const MAX_SIGNED_URL_SECS: u64 = 604_800;

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Google Cloud Storage backend using the XML API.
pub struct GcsStore {
    client: Client,
    access_token: tokio::sync::RwLock<AccessToken>,
    service_account: Option<ServiceAccountKey>,
}

#[derive(Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn expired() -> Self {
        Self {
            value: String::new(),
            expires_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Self {
        let lifetime = resp.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Self {
            value: resp.access_token,
            expires_at: now + chrono::Duration::seconds(lifetime),
        }
    }

    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) >= self.expires_at
    }
}

impl GcsStore {
    /// Without a credentials file, tokens come from the metadata server and
    /// presigning is unavailable.
    pub async fn new(credentials_file: Option<&str>) -> Result<Self, anyhow::Error> {
        let client = Client::builder().build()?;

        let service_account = match credentials_file {
            Some(path) => {
                let key_json = tokio::fs::read_to_string(path).await?;
                Some(serde_json::from_str::<ServiceAccountKey>(&key_json)?)
            }
            None => None,
        };

        let store = Self {
            client,
            access_token: tokio::sync::RwLock::new(AccessToken::expired()),
            service_account,
        };

        store.refresh_token().await?;
        Ok(store)
    }

    async fn refresh_token(&self) -> Result<String, anyhow::Error> {
        let mut lock = self.access_token.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if !lock.needs_refresh(Utc::now()) {
            return Ok(lock.value.clone());
        }

        let token = match &self.service_account {
            Some(key) => self.token_from_service_account(key).await?,
            None => self.token_from_metadata_server().await?,
        };
        tracing::debug!(expires_at = %token.expires_at, "Refreshed GCS access token");

        *lock = token;
        Ok(lock.value.clone())
    }

    async fn token_from_service_account(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<AccessToken, anyhow::Error> {
        let issued = Utc::now();
        let now = issued.timestamp();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": "https://www.googleapis.com/auth/devstorage.read_write",
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        // Build JWT (header.claims.signature)
        let header = base64_url_encode(&serde_json::to_vec(&serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        }))?);
        let payload = base64_url_encode(&serde_json::to_vec(&claims)?);
        let unsigned = format!("{header}.{payload}");

        let signature = sign_rs256(unsigned.as_bytes(), &key.private_key)?;
        let jwt = format!("{unsigned}.{}", base64_url_encode(&signature));

        let resp: TokenResponse = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?
            .json()
            .await?;

        Ok(AccessToken::from_response(resp, issued))
    }

    async fn token_from_metadata_server(&self) -> Result<AccessToken, anyhow::Error> {
        let issued = Utc::now();
        let resp: TokenResponse = self
            .client
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .json()
            .await?;

        Ok(AccessToken::from_response(resp, issued))
    }

    fn object_url(bucket: &str, key: &str) -> String {
        format!("https://{GCS_HOST}/{bucket}/{}", uri_encode(key, false))
    }

    /// Current bearer token, refreshed when it is close to expiry.
    async fn token(&self) -> Result<String, BlobStoreError> {
        {
            let current = self.access_token.read().await;
            if !current.needs_refresh(Utc::now()) {
                return Ok(current.value.clone());
            }
        }
        self.refresh_token()
            .await
            .map_err(|e| BlobStoreError::Backend(format!("GCS token refresh failed: {e}")))
    }

    /// Build a V4 signed URL (`GOOG4-RSA-SHA256`).
    fn signed_url(
        key: &ServiceAccountKey,
        bucket: &str,
        object: &str,
        ttl: Duration,
        verb: PresignVerb,
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let datetime = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!("{}/auto/storage/goog4_request", now.format("%Y%m%d"));
        let credential = format!("{}/{scope}", key.client_email);
        let expires = ttl.as_secs().clamp(1, MAX_SIGNED_URL_SECS);
        let path = format!("/{bucket}/{}", uri_encode(object, false));

        // Parameters must be in sorted order.
        let query = format!(
            "X-Goog-Algorithm=GOOG4-RSA-SHA256&X-Goog-Credential={}&X-Goog-Date={datetime}&X-Goog-Expires={expires}&X-Goog-SignedHeaders=host",
            uri_encode(&credential, true)
        );
        let canonical_request =
            format!("{verb}\n{path}\n{query}\nhost:{GCS_HOST}\n\nhost\nUNSIGNED-PAYLOAD");
        let digest = ring::digest::digest(&ring::digest::SHA256, canonical_request.as_bytes());
        let string_to_sign = format!(
            "GOOG4-RSA-SHA256\n{datetime}\n{scope}\n{}",
            hex_encode(digest.as_ref())
        );

        let signature = sign_rs256(string_to_sign.as_bytes(), &key.private_key)?;
        Ok(format!(
            "https://{GCS_HOST}{path}?{query}&X-Goog-Signature={}",
            hex_encode(&signature)
        ))
    }
}

async fn backend_failure(action: &str, resp: reqwest::Response) -> BlobStoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    BlobStoreError::Backend(format!("GCS {action} failed ({status}): {body}"))
}

#[async_trait]
impl BlobStore for GcsStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        size: u64,
        content_type: &str,
        user_metadata: &HashMap<String, String>,
    ) -> Result<(), BlobStoreError> {
        let token = self.token().await?;

        let mut request = self
            .client
            .put(Self::object_url(bucket, key))
            .bearer_auth(&token)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size);
        for (name, value) in user_metadata {
            request = request.header(format!("x-goog-meta-{name}"), value);
        }

        let resp = request
            .body(data)
            .send()
            .await
            .map_err(|e| BlobStoreError::Backend(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(backend_failure("upload", resp).await);
        }

        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, BlobStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .get(Self::object_url(bucket, key))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| BlobStoreError::Backend(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BlobStoreError::NotFound(key.to_string()));
        }

        if !resp.status().is_success() {
            return Err(backend_failure("download", resp).await);
        }

        let content_type = header_str(resp.headers(), CONTENT_TYPE)
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = resp
            .bytes()
            .await
            .map_err(|e| BlobStoreError::Backend(e.to_string()))?;

        Ok(BlobObject {
            size: data.len() as u64,
            content_type,
            data,
        })
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<BlobInfo, BlobStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .head(Self::object_url(bucket, key))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| BlobStoreError::Backend(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BlobStoreError::NotFound(key.to_string()));
        }

        if !resp.status().is_success() {
            return Err(backend_failure("stat", resp).await);
        }

        let headers = resp.headers();
        let size = header_str(headers, CONTENT_LENGTH)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let content_type = header_str(headers, CONTENT_TYPE)
            .unwrap_or("application/octet-stream")
            .to_string();
        let last_modified = header_str(headers, LAST_MODIFIED)
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(BlobInfo {
            size,
            content_type,
            last_modified,
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .delete(Self::object_url(bucket, key))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| BlobStoreError::Backend(e.to_string()))?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(backend_failure("delete", resp).await);
        }

        Ok(())
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        verb: PresignVerb,
    ) -> Result<String, BlobStoreError> {
        let account = self.service_account.as_ref().ok_or_else(|| {
            BlobStoreError::Backend(
                "Presigning requires a service account key (GCS_CREDENTIALS_FILE)".to_string(),
            )
        })?;

        Self::signed_url(account, bucket, key, ttl, verb)
            .map_err(|e| BlobStoreError::Backend(e.to_string()))
    }
}

fn header_str(
    headers: &reqwest::header::HeaderMap,
    name: reqwest::header::HeaderName,
) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// RFC 3986 percent-encoding. Slashes are kept unless `encode_slash` is set.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

fn hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn sign_rs256(data: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    // Strip PEM headers and decode base64
    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &der_b64)?;

    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {e}"))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            data,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign: {e}"))?;

    Ok(signature)
}
