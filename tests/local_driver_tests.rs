use bytes::Bytes;
use futures_util::{StreamExt, stream};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use lumen_photos::storage::driver::{ByteStream, StorageDriver, StorageError};
use lumen_photos::storage::LocalDriver;

fn unique_temp_dir() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "lumen_photos_local_driver_{}_{}",
        std::process::id(),
        nanos
    ))
}

fn body_of(bytes: &'static [u8]) -> ByteStream {
    Box::pin(stream::once(async move { Ok(Bytes::from_static(bytes)) }))
}

async fn collect(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.expect("stream chunk"));
    }
    out
}

#[tokio::test]
async fn upload_then_download_round_trips() {
    let root = unique_temp_dir();
    let driver = LocalDriver::new("local", "Test", root.clone(), None);

    let written = driver
        .upload("2024/01/02/photo.jpg", body_of(b"jpeg-bytes"), "image/jpeg")
        .await
        .expect("upload failed");
    assert_eq!(written, 10);

    let (stream, size) = driver
        .download("2024/01/02/photo.jpg")
        .await
        .expect("download failed");
    assert_eq!(size, 10);
    assert_eq!(collect(stream).await, b"jpeg-bytes");

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn stat_and_exists_report_the_blob() {
    let root = unique_temp_dir();
    let driver = LocalDriver::new("local", "Test", root.clone(), None);

    driver
        .upload("a/b.bin", body_of(b"12345"), "application/octet-stream")
        .await
        .expect("upload failed");

    assert!(driver.exists("a/b.bin").await.expect("exists failed"));
    assert!(!driver.exists("a/missing.bin").await.expect("exists failed"));

    let stat = driver.stat("a/b.bin").await.expect("stat failed");
    assert_eq!(stat.size, 5);
    assert!(stat.modified.is_some());

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let root = unique_temp_dir();
    let driver = LocalDriver::new("local", "Test", root.clone(), None);

    driver
        .upload("x/y.bin", body_of(b"data"), "application/octet-stream")
        .await
        .expect("upload failed");
    driver.delete("x/y.bin").await.expect("first delete failed");
    driver
        .delete("x/y.bin")
        .await
        .expect("second delete should be a no-op");
    assert!(!driver.exists("x/y.bin").await.expect("exists failed"));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn parent_traversal_is_rejected() {
    let root = unique_temp_dir();
    let driver = LocalDriver::new("local", "Test", root.clone(), None);

    let result = driver
        .upload("../outside.bin", body_of(b"nope"), "application/octet-stream")
        .await;
    assert!(matches!(result, Err(StorageError::Permanent(_))));

    let absolute = driver.download("/etc/hostname").await;
    assert!(matches!(absolute, Err(StorageError::Permanent(_))));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn missing_blob_downloads_as_not_found() {
    let root = unique_temp_dir();
    let driver = LocalDriver::new("local", "Test", root.clone(), None);

    let result = driver.download("nothing/here.jpg").await;
    assert!(matches!(result, Err(StorageError::NotFound(_))));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn url_for_joins_the_public_base() {
    let root = unique_temp_dir();
    let with_base = LocalDriver::new(
        "local",
        "Test",
        root.clone(),
        Some("https://cdn.example.com/library/".to_string()),
    );
    assert_eq!(
        with_base.url_for("2024/01/02/a.jpg").as_deref(),
        Some("https://cdn.example.com/library/2024/01/02/a.jpg")
    );

    let without_base = LocalDriver::new("local", "Test", root.clone(), None);
    assert!(without_base.url_for("2024/01/02/a.jpg").is_none());
}
