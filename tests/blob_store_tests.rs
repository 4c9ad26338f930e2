use std::collections::HashMap;
use std::time::Duration;

use blob_pipeline::blob_store::{BlobStore, BlobStoreError, LocalStore, MemoryStore, PresignVerb};
use bytes::Bytes;

fn no_metadata() -> HashMap<String, String> {
    HashMap::new()
}

#[tokio::test]
async fn test_local_store_put_get() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    let data = Bytes::from("hello world");
    store
        .put("files", "a/b/c/1_x.txt", data.clone(), 11, "text/plain", &no_metadata())
        .await
        .unwrap();

    let object = store.get("files", "a/b/c/1_x.txt").await.unwrap();
    assert_eq!(object.data, data);
    assert_eq!(object.size, 11);
    assert_eq!(object.content_type, "text/plain");
}

#[tokio::test]
async fn test_local_store_stat() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    assert!(matches!(
        store.stat("files", "missing").await,
        Err(BlobStoreError::NotFound(_))
    ));

    store
        .put("files", "present.png", Bytes::from("data"), 4, "image/png", &no_metadata())
        .await
        .unwrap();
    let info = store.stat("files", "present.png").await.unwrap();
    assert_eq!(info.size, 4);
    assert_eq!(info.content_type, "image/png");
}

#[tokio::test]
async fn test_local_store_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store
        .put("files", "to-delete", Bytes::from("data"), 4, "text/plain", &no_metadata())
        .await
        .unwrap();
    store.delete("files", "to-delete").await.unwrap();

    assert!(matches!(
        store.get("files", "to-delete").await,
        Err(BlobStoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_local_store_delete_nonexistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    // Deleting a nonexistent key should not error
    store.delete("files", "nonexistent").await.unwrap();
}

#[tokio::test]
async fn test_local_store_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).unwrap();

    store
        .put("files", "key", Bytes::from("first"), 5, "text/plain", &no_metadata())
        .await
        .unwrap();
    store
        .put("files", "key", Bytes::from("second"), 6, "text/plain", &no_metadata())
        .await
        .unwrap();

    let object = store.get("files", "key").await.unwrap();
    assert_eq!(object.data, Bytes::from("second"));
}

#[tokio::test]
async fn test_local_store_rejects_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path().join("root")).unwrap();

    let result = store
        .put("files", "../escape", Bytes::from("x"), 1, "text/plain", &no_metadata())
        .await;
    assert!(result.is_err());
    assert!(!dir.path().join("escape").exists());
}

#[tokio::test]
async fn test_local_store_presigned_links_verify() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::with_signing(dir.path(), "http://blobs.test/", b"secret").unwrap();

    let url = store
        .presign("files", "a/b.png", Duration::from_secs(60), PresignVerb::Get)
        .await
        .unwrap();
    assert!(url.starts_with("http://blobs.test/files/a/b.png?verb=GET&expires="));

    let query = url.split_once('?').unwrap().1;
    let params: HashMap<&str, &str> = query.split('&').filter_map(|p| p.split_once('=')).collect();
    let expires: i64 = params["expires"].parse().unwrap();
    let signature = params["signature"];

    assert!(store.verify_presigned("files", "a/b.png", PresignVerb::Get, expires, signature));
    assert!(!store.verify_presigned("files", "a/c.png", PresignVerb::Get, expires, signature));
    assert!(!store.verify_presigned("files", "a/b.png", PresignVerb::Delete, expires, signature));
    assert!(!store.verify_presigned("files", "a/b.png", PresignVerb::Get, expires + 1, signature));
}

#[tokio::test]
async fn test_memory_store_keeps_buckets_apart() {
    let store = MemoryStore::new();
    let metadata = HashMap::from([("source-key".to_string(), "orig".to_string())]);

    store
        .put("one", "key", Bytes::from("1"), 1, "text/plain", &metadata)
        .await
        .unwrap();

    assert!(store.contains("one", "key").await);
    assert!(!store.contains("two", "key").await);
    assert!(matches!(
        store.get("two", "key").await,
        Err(BlobStoreError::NotFound(_))
    ));
    assert_eq!(store.user_metadata("one", "key").await, Some(metadata));
}
