//! Canonical object keys, derived artifact keys and bucket resolution.
//!
//! A canonical key is `{entity_type}/{entity_id}/{category}/{unix_ts}_{uuid}{ext}`.
//! It is both the storage path and the object's identifier, and the bucket
//! holding it is a pure function of its category. Artifact keys are derived
//! from the canonical key and a size label, so their addresses are known
//! before the artifacts exist.

use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

/// Extension used for artifact keys when the original key has none.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = ".jpg";

/// Strategy mapping a category to the bucket that stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketStrategy {
    /// Every object lives in one bucket.
    Single(String),
    /// One bucket per category, named `{prefix}{category}`; `fallback` is
    /// used when a request carries no category.
    PerCategory { prefix: String, fallback: String },
}

impl BucketStrategy {
    pub fn bucket_for(&self, category: &str) -> String {
        match self {
            BucketStrategy::Single(bucket) => bucket.clone(),
            BucketStrategy::PerCategory { fallback, .. } if category.is_empty() => {
                fallback.clone()
            }
            BucketStrategy::PerCategory { prefix, .. } => format!("{prefix}{category}"),
        }
    }

    /// Resolve the bucket for an existing key, preferring an explicit category
    /// over the one embedded in the key.
    pub fn bucket_for_key(&self, category: &str, key: &str) -> String {
        if !category.is_empty() {
            return self.bucket_for(category);
        }
        self.bucket_for(category_of(key).unwrap_or_default())
    }
}

/// Build a canonical key from its parts. `ext` includes the leading dot or is empty.
pub fn canonical_key(
    entity_type: &str,
    entity_id: &str,
    category: &str,
    timestamp: i64,
    id: Uuid,
    ext: &str,
) -> String {
    format!("{entity_type}/{entity_id}/{category}/{timestamp}_{id}{ext}")
}

/// Build a fresh canonical key for an upload, taking the extension from the
/// file name or, failing that, from the content type.
pub fn new_canonical_key(
    entity_type: &str,
    entity_id: &str,
    category: &str,
    file_name: &str,
    content_type: &str,
) -> String {
    let ext = extension_for(file_name, content_type);
    canonical_key(
        entity_type,
        entity_id,
        category,
        Utc::now().timestamp(),
        Uuid::new_v4(),
        &ext,
    )
}

/// Lowercased extension with a leading dot, or an empty string.
pub fn extension_for(file_name: &str, content_type: &str) -> String {
    if let Some(ext) = Path::new(file_name).extension().and_then(|e| e.to_str()) {
        if !ext.is_empty() {
            return format!(".{}", ext.to_ascii_lowercase());
        }
    }
    let preferred = match content_type {
        "image/jpeg" | "image/jpg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "application/pdf" => Some(".pdf"),
        "text/plain" => Some(".txt"),
        _ => None,
    };
    if let Some(ext) = preferred {
        return ext.to_string();
    }
    mime_guess::get_mime_extensions_str(content_type)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// The category segment of a canonical key.
pub fn category_of(key: &str) -> Option<&str> {
    let mut segments = key.split('/');
    let category = segments.nth(2)?;
    // A canonical key has exactly four segments.
    match (segments.next(), segments.next()) {
        (Some(_), None) if !category.is_empty() => Some(category),
        _ => None,
    }
}

/// Split a key into its base and extension (with dot). Only the final path
/// segment is considered, and a leading dot does not start an extension.
pub fn split_extension(key: &str) -> (&str, Option<&str>) {
    let name_start = key.rfind('/').map(|i| i + 1).unwrap_or(0);
    match key[name_start..].rfind('.') {
        Some(0) | None => (key, None),
        Some(dot) => {
            let at = name_start + dot;
            (&key[..at], Some(&key[at..]))
        }
    }
}

/// Derived artifact key: `{base}_{label}{ext}`, with `.jpg` when the
/// original key has no extension.
///
/// Artifacts are only ever written as PNG or JPEG (see
/// [`artifact_content_type`]), so a `.gif` or `.webp` original yields an
/// artifact whose extension names the source format while its bytes and
/// stored content type are JPEG.
pub fn thumbnail_key(original_key: &str, label: &str) -> String {
    let (base, ext) = split_extension(original_key);
    let ext = ext.unwrap_or(DEFAULT_ARTIFACT_EXTENSION);
    format!("{base}_{label}{ext}")
}

/// Strip the `_{label}` suffix from an artifact key, returning the original
/// base with the artifact's extension re-appended.
pub fn original_base(artifact_key: &str, label: &str) -> Option<String> {
    let (base, ext) = split_extension(artifact_key);
    let original = base.strip_suffix(&format!("_{label}"))?;
    Some(format!("{original}{}", ext.unwrap_or_default()))
}

/// Content type of an artifact rendered for `key`.
pub fn artifact_content_type(key: &str) -> &'static str {
    match split_extension(key).1.map(|e| e.to_ascii_lowercase()).as_deref() {
        Some(".png") => "image/png",
        _ => "image/jpeg",
    }
}

/// SHA-256 fingerprint (lowercase hex) over the given parts, separated so
/// that `["ab", "c"]` and `["a", "bc"]` differ.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
    for part in parts {
        ctx.update(&(part.len() as u64).to_be_bytes());
        ctx.update(part.as_bytes());
    }
    ctx.finish()
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_extension_ignores_dots_in_directories() {
        assert_eq!(split_extension("a.b/c/name"), ("a.b/c/name", None));
        assert_eq!(split_extension("a/b/.hidden"), ("a/b/.hidden", None));
        assert_eq!(split_extension("a/b/x.tar.gz"), ("a/b/x.tar", Some(".gz")));
    }

    #[test]
    fn fingerprint_separates_parts() {
        assert_ne!(fingerprint(&["ab", "c"]), fingerprint(&["a", "bc"]));
        assert_eq!(fingerprint(&["x"]).len(), 64);
    }
}
