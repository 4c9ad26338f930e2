use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};

use super::{BlobInfo, BlobObject, BlobStore, BlobStoreError, PresignVerb};

/// Local filesystem blob store for development and testing.
///
/// Objects live at `{base}/{bucket}/{key}`. Content type and user metadata are
/// kept in a JSON sidecar under `{base}/.meta/{bucket}/{key}.json`.
pub struct LocalStore {
    base_path: PathBuf,
    public_url: String,
    signing_key: hmac::Key,
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    #[serde(default)]
    user_metadata: HashMap<String, String>,
}

impl LocalStore {
    /// Create a store with a random signing key and a localhost public URL.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, BlobStoreError> {
        Self::with_random_key(base_path, "http://localhost:8080/blobs")
    }

    /// Links signed with a per-process key stop verifying after a restart.
    pub fn with_random_key<P: AsRef<Path>>(
        base_path: P,
        public_url: &str,
    ) -> Result<Self, BlobStoreError> {
        let rng = ring::rand::SystemRandom::new();
        let signing_key = hmac::Key::generate(hmac::HMAC_SHA256, &rng)
            .map_err(|_| BlobStoreError::Backend("Failed to generate signing key".into()))?;
        Self::build(base_path, public_url, signing_key)
    }

    /// Create a store whose presigned URLs point at `public_url` and are signed with `secret`.
    pub fn with_signing<P: AsRef<Path>>(
        base_path: P,
        public_url: &str,
        secret: &[u8],
    ) -> Result<Self, BlobStoreError> {
        Self::build(
            base_path,
            public_url,
            hmac::Key::new(hmac::HMAC_SHA256, secret),
        )
    }

    fn build<P: AsRef<Path>>(
        base_path: P,
        public_url: &str,
        signing_key: hmac::Key,
    ) -> Result<Self, BlobStoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            public_url: public_url.trim_end_matches('/').to_string(),
            signing_key,
        })
    }

    /// Check a signature produced by [`BlobStore::presign`].
    pub fn verify_presigned(
        &self,
        bucket: &str,
        key: &str,
        verb: PresignVerb,
        expires: i64,
        signature: &str,
    ) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(tag) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let message = signing_payload(bucket, key, verb, expires);
        hmac::verify(&self.signing_key, message.as_bytes(), &tag).is_ok()
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BlobStoreError> {
        Ok(self.base_path.join(checked(bucket)?).join(checked(key)?))
    }

    fn sidecar_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BlobStoreError> {
        let mut path = self
            .base_path
            .join(".meta")
            .join(checked(bucket)?)
            .join(checked(key)?)
            .into_os_string();
        path.push(".json");
        Ok(PathBuf::from(path))
    }

    async fn read_sidecar(&self, bucket: &str, key: &str) -> Option<Sidecar> {
        let path = self.sidecar_path(bucket, key).ok()?;
        let raw = tokio::fs::read(&path).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    async fn content_type_of(&self, bucket: &str, key: &str) -> String {
        match self.read_sidecar(bucket, key).await {
            Some(sidecar) => sidecar.content_type,
            None => mime_guess::from_path(key)
                .first_or_octet_stream()
                .to_string(),
        }
    }
}

/// Reject keys that would escape the store root.
fn checked(segment: &str) -> Result<&Path, BlobStoreError> {
    let path = Path::new(segment);
    let valid = !segment.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(BlobStoreError::Backend(format!("Invalid object path: {segment}")))
    }
}

fn signing_payload(bucket: &str, key: &str, verb: PresignVerb, expires: i64) -> String {
    format!("{verb}\n{bucket}\n{key}\n{expires}")
}

async fn write_with_parents(path: &Path, data: &[u8]) -> Result<(), BlobStoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        _size: u64,
        content_type: &str,
        user_metadata: &HashMap<String, String>,
    ) -> Result<(), BlobStoreError> {
        let path = self.object_path(bucket, key)?;
        write_with_parents(&path, &data).await?;

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            user_metadata: user_metadata.clone(),
        };
        let raw = serde_json::to_vec(&sidecar).map_err(|e| BlobStoreError::Backend(e.to_string()))?;
        write_with_parents(&self.sidecar_path(bucket, key)?, &raw).await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, BlobStoreError> {
        let path = self.object_path(bucket, key)?;
        if !path.exists() {
            return Err(BlobStoreError::NotFound(key.to_string()));
        }
        let data = Bytes::from(tokio::fs::read(&path).await?);
        Ok(BlobObject {
            size: data.len() as u64,
            content_type: self.content_type_of(bucket, key).await,
            data,
        })
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<BlobInfo, BlobStoreError> {
        let path = self.object_path(bucket, key)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobStoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(BlobInfo {
            size: metadata.len(),
            content_type: self.content_type_of(bucket, key).await,
            last_modified,
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError> {
        let path = self.object_path(bucket, key)?;
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        let sidecar = self.sidecar_path(bucket, key)?;
        if sidecar.exists() {
            tokio::fs::remove_file(&sidecar).await?;
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
        checked(bucket)?;
        checked(key)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let tag = hmac::sign(
            &self.signing_key,
            signing_payload(bucket, key, verb, expires).as_bytes(),
        );
        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag.as_ref());
        Ok(format!(
            "{}/{bucket}/{key}?verb={verb}&expires={expires}&signature={signature}",
            self.public_url
        ))
    }
}
