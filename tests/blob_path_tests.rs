use chrono::{TimeZone, Utc};
use uuid::Uuid;

use lumen_photos::storage::BlobPath;

#[test]
fn original_path_is_dated_and_uuid_named() {
    let now = Utc.with_ymd_and_hms(2024, 3, 7, 10, 30, 0).unwrap();
    let uuid = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();

    let path = BlobPath::original(now, uuid, "IMG_0042.JPG");
    assert_eq!(path, format!("2024/03/07/{uuid}.jpg"));
}

#[test]
fn thumbnail_path_lives_under_the_thumb_prefix() {
    let now = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
    let uuid = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();

    let path = BlobPath::thumbnail(now, uuid);
    assert_eq!(path, format!("thumb/2024/12/01/{uuid}.jpg"));
}

#[test]
fn extension_is_lowercased_and_falls_back_to_bin() {
    assert_eq!(BlobPath::extension_of("photo.PNG"), "png");
    assert_eq!(BlobPath::extension_of("archive.tar.GZ"), "gz");
    assert_eq!(BlobPath::extension_of("no-extension"), "bin");
    assert_eq!(BlobPath::extension_of(".hidden"), "bin");
    assert_eq!(BlobPath::extension_of("weird.j pg"), "bin");
}
