use uuid::Uuid;

use lumen_photos::services::{UploadSlot, UploadTokenSigner};

#[test]
fn token_verifies_for_the_exact_scope_it_was_signed_for() {
    let signer = UploadTokenSigner::new("secret-key");
    let upload_id = Uuid::new_v4();
    let expires = 2_000_000_000;

    let token = signer.sign(upload_id, UploadSlot::Original, expires);
    assert!(signer.verify(upload_id, UploadSlot::Original, expires, &token, expires - 100));
}

#[test]
fn token_is_rejected_for_other_slots_uploads_or_expiries() {
    let signer = UploadTokenSigner::new("secret-key");
    let upload_id = Uuid::new_v4();
    let expires = 2_000_000_000;
    let token = signer.sign(upload_id, UploadSlot::Original, expires);

    assert!(!signer.verify(upload_id, UploadSlot::Thumbnail, expires, &token, expires - 100));
    assert!(!signer.verify(Uuid::new_v4(), UploadSlot::Original, expires, &token, expires - 100));
    assert!(!signer.verify(upload_id, UploadSlot::Original, expires + 1, &token, expires - 100));
}

#[test]
fn expired_tokens_are_rejected_even_when_authentic() {
    let signer = UploadTokenSigner::new("secret-key");
    let upload_id = Uuid::new_v4();
    let expires = 1_000;
    let token = signer.sign(upload_id, UploadSlot::Original, expires);

    assert!(!signer.verify(upload_id, UploadSlot::Original, expires, &token, expires + 1));
}

#[test]
fn different_secrets_produce_incompatible_tokens() {
    let upload_id = Uuid::new_v4();
    let expires = 2_000_000_000;
    let token = UploadTokenSigner::new("secret-a").sign(upload_id, UploadSlot::Original, expires);

    let other = UploadTokenSigner::new("secret-b");
    assert!(!other.verify(upload_id, UploadSlot::Original, expires, &token, expires - 100));
}
