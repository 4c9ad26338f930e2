use std::time::Duration;

use thiserror::Error;

use crate::keys::BucketStrategy;
use crate::middleware::CacheConfig;
use crate::thumbnails::{JobQueueConfig, ThumbnailSize, DEFAULT_JPEG_QUALITY};

/// Middleware names the service knows how to build.
pub const KNOWN_MIDDLEWARES: [&str; 6] = [
    "security",
    "validation",
    "thumbnail",
    "encryption",
    "audit",
    "cache",
];

const DEFAULT_MIDDLEWARE_ORDER: &str = "security,validation,thumbnail,encryption,audit,cache";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
    /// Exact content types or `type/*` wildcards. Empty allows everything.
    pub allowed_content_types: Vec<String>,
    pub storage: StorageConfig,
    pub middleware_order: Vec<String>,
    pub thumbnails: ThumbnailConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Gcs,
    Local,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// Base URL presigned local links point at
    pub local_public_url: String,
    /// HMAC key for local presigned links (random per process when unset)
    pub local_signing_key: Option<String>,
    /// Path to GCS service account JSON (optional, defaults to the metadata server)
    pub gcs_credentials_file: Option<String>,
    pub buckets: BucketStrategy,
    pub presign_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ThumbnailConfig {
    /// Generate in background workers instead of during the upload.
    pub async_enabled: bool,
    pub queue: JobQueueConfig,
    pub jpeg_quality: u8,
    pub sizes: Vec<ThumbnailSize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            local_public_url: "http://localhost:8080/blobs".to_string(),
            local_signing_key: None,
            gcs_credentials_file: None,
            buckets: BucketStrategy::Single("files".to_string()),
            presign_ttl: Duration::from_secs(900),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            async_enabled: true,
            queue: JobQueueConfig::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            sizes: vec![ThumbnailSize::new(150, 150), ThumbnailSize::new(300, 300)],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_upload_size: 50 * 1024 * 1024, // 50MB
            allowed_content_types: split_list("image/*,application/pdf,text/plain"),
            storage: StorageConfig::default(),
            middleware_order: split_list(DEFAULT_MIDDLEWARE_ORDER),
            thumbnails: ThumbnailConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup. Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };

        let bind_address = lookup("BIND_ADDRESS").unwrap_or(defaults.bind_address);
        let max_upload_size = number("MAX_UPLOAD_SIZE", defaults.max_upload_size);
        let allowed_content_types = lookup("ALLOWED_CONTENT_TYPES")
            .map(|s| split_list(&s))
            .unwrap_or(defaults.allowed_content_types);

        let backend = match lookup("STORAGE_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            "memory" => StorageBackend::Memory,
            "local" => StorageBackend::Local,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown STORAGE_BACKEND '{other}'"
                )))
            }
        };

        let bucket_name = lookup("BUCKET_NAME").unwrap_or_else(|| "files".to_string());
        let buckets = match lookup("BUCKET_STRATEGY")
            .unwrap_or_else(|| "single".to_string())
            .to_lowercase()
            .as_str()
        {
            "single" => BucketStrategy::Single(bucket_name),
            "per_category" => BucketStrategy::PerCategory {
                prefix: lookup("BUCKET_PREFIX").unwrap_or_else(|| "files-".to_string()),
                fallback: bucket_name,
            },
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown BUCKET_STRATEGY '{other}'"
                )))
            }
        };

        let storage = StorageConfig {
            backend,
            local_storage_path: lookup("LOCAL_STORAGE_PATH")
                .unwrap_or(defaults.storage.local_storage_path),
            local_public_url: lookup("LOCAL_PUBLIC_URL")
                .unwrap_or(defaults.storage.local_public_url),
            local_signing_key: lookup("LOCAL_SIGNING_KEY").filter(|s| !s.is_empty()),
            gcs_credentials_file: lookup("GCS_CREDENTIALS_FILE").filter(|s| !s.is_empty()),
            buckets,
            presign_ttl: Duration::from_secs(number(
                "PRESIGN_TTL_SECS",
                defaults.storage.presign_ttl.as_secs(),
            )),
        };

        let middleware_order = lookup("MIDDLEWARE_ORDER")
            .map(|s| split_list(&s))
            .unwrap_or(defaults.middleware_order);

        let sizes = match lookup("THUMBNAIL_SIZES") {
            Some(raw) => split_list(&raw)
                .iter()
                .map(|s| s.parse::<ThumbnailSize>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(ConfigError::ValidationError)?,
            None => defaults.thumbnails.sizes,
        };

        let queue_defaults = defaults.thumbnails.queue;
        let thumbnails = ThumbnailConfig {
            async_enabled: lookup("THUMBNAIL_ASYNC")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            queue: JobQueueConfig {
                workers: number("THUMBNAIL_WORKERS", queue_defaults.workers as u64) as usize,
                queue_size: number("THUMBNAIL_QUEUE_SIZE", queue_defaults.queue_size as u64)
                    as usize,
                retry_attempts: number(
                    "THUMBNAIL_RETRY_ATTEMPTS",
                    u64::from(queue_defaults.retry_attempts),
                ) as u32,
                retry_delay: Duration::from_millis(number(
                    "THUMBNAIL_RETRY_DELAY_MS",
                    queue_defaults.retry_delay.as_millis() as u64,
                )),
            },
            jpeg_quality: number(
                "THUMBNAIL_JPEG_QUALITY",
                u64::from(defaults.thumbnails.jpeg_quality),
            )
            .min(u64::from(u8::MAX)) as u8,
            sizes,
        };

        let cache = CacheConfig {
            download_ttl: Duration::from_secs(number(
                "CACHE_DOWNLOAD_TTL_SECS",
                defaults.cache.download_ttl.as_secs(),
            )),
            preview_ttl: Duration::from_secs(number(
                "CACHE_PREVIEW_TTL_SECS",
                defaults.cache.preview_ttl.as_secs(),
            )),
            max_entries: number("CACHE_MAX_ENTRIES", defaults.cache.max_entries as u64) as usize,
            sweep_interval: Duration::from_secs(number(
                "CACHE_SWEEP_INTERVAL_SECS",
                defaults.cache.sweep_interval.as_secs(),
            )),
        };

        let config = Config {
            bind_address,
            max_upload_size,
            allowed_content_types,
            storage,
            middleware_order,
            thumbnails,
            cache,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.thumbnails.queue.workers == 0 {
            return invalid("THUMBNAIL_WORKERS must be at least 1".to_string());
        }
        if self.thumbnails.queue.queue_size == 0 {
            return invalid("THUMBNAIL_QUEUE_SIZE must be at least 1".to_string());
        }
        if !(1..=100).contains(&self.thumbnails.jpeg_quality) {
            return invalid(format!(
                "THUMBNAIL_JPEG_QUALITY must be between 1 and 100, got {}",
                self.thumbnails.jpeg_quality
            ));
        }
        if self.thumbnails.sizes.is_empty() {
            return invalid("THUMBNAIL_SIZES must name at least one size".to_string());
        }
        let mut labels: Vec<&str> = self.thumbnails.sizes.iter().map(|s| s.label.as_str()).collect();
        labels.sort_unstable();
        if labels.windows(2).any(|w| w[0] == w[1]) {
            return invalid("THUMBNAIL_SIZES labels must be unique".to_string());
        }

        let mut seen: Vec<&str> = Vec::with_capacity(self.middleware_order.len());
        for name in &self.middleware_order {
            if !KNOWN_MIDDLEWARES.contains(&name.as_str()) {
                return invalid(format!("Unknown middleware '{name}' in MIDDLEWARE_ORDER"));
            }
            if seen.contains(&name.as_str()) {
                return invalid(format!("Middleware '{name}' listed twice in MIDDLEWARE_ORDER"));
            }
            seen.push(name);
        }

        if let BucketStrategy::PerCategory { prefix, .. } = &self.storage.buckets {
            if prefix.is_empty() {
                return invalid(
                    "BUCKET_PREFIX is required when BUCKET_STRATEGY=per_category".to_string(),
                );
            }
        }

        if self.storage.backend == StorageBackend::Memory {
            tracing::warn!("Using the in-memory storage backend; objects are lost on restart");
        }

        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
