use serde_json::json;

use lumen_photos::storage::{
    StorageBackendConfig, StorageEntryConfig, StorageSettings, validate_storage_id,
};

#[test]
fn storage_ids_follow_the_local_or_kind_account_format() {
    assert!(validate_storage_id("local"));
    assert!(validate_storage_id("s3:minio-1"));
    assert!(validate_storage_id("aliyun:family_drive"));

    assert!(!validate_storage_id(""));
    assert!(!validate_storage_id("s3"));
    assert!(!validate_storage_id("s3:"));
    assert!(!validate_storage_id("ftp:server"));
    assert!(!validate_storage_id("s3:bad id"));
}

#[test]
fn driver_entries_deserialize_by_kind_tag() {
    let entry: StorageEntryConfig = serde_json::from_value(json!({
        "id": "s3:minio-1",
        "name": "MinIO",
        "kind": "s3",
        "bucket": "photos",
        "region": "us-east-1",
        "accessKeyId": "ak",
        "secretAccessKey": "sk",
        "endpoint": "http://minio.internal:9000",
        "publicBaseUrl": null
    }))
    .expect("s3 entry failed to parse");
    assert!(matches!(entry.backend, StorageBackendConfig::S3(_)));
    assert_eq!(entry.backend.kind(), "s3");

    let entry: StorageEntryConfig = serde_json::from_value(json!({
        "id": "aliyun:main",
        "name": "Aliyun Drive",
        "kind": "aliyun",
        "clientId": "cid",
        "clientSecret": "cs",
        "refreshToken": "rt",
        "rootFolder": "photos"
    }))
    .expect("aliyun entry failed to parse");
    assert!(matches!(entry.backend, StorageBackendConfig::Aliyun(_)));

    let entry: StorageEntryConfig = serde_json::from_value(json!({
        "id": "local",
        "name": "Library",
        "kind": "local",
        "root": "/srv/photos",
        "publicBaseUrl": null
    }))
    .expect("local entry failed to parse");
    assert!(matches!(entry.backend, StorageBackendConfig::Local(_)));
}

#[test]
fn entries_round_trip_through_json() {
    let settings = StorageSettings::default();
    let serialized = serde_json::to_value(&settings).expect("serialize failed");
    let parsed: StorageSettings = serde_json::from_value(serialized).expect("parse failed");
    assert_eq!(parsed.default_id, "local");
    assert_eq!(parsed.thumbnail_id, "local");
    assert_eq!(parsed.drivers.len(), 1);
    assert_eq!(parsed.drivers[0].id, "local");
}

#[test]
fn default_settings_point_everything_at_local() {
    let settings = StorageSettings::default();
    assert!(settings.drivers.iter().any(|driver| driver.id == settings.default_id));
    assert!(settings.drivers.iter().any(|driver| driver.id == settings.thumbnail_id));
}
