use lumen_photos::errors::AppError;
use lumen_photos::storage::StorageError;

#[test]
fn storage_errors_map_onto_the_app_taxonomy() {
    let not_found: AppError = StorageError::NotFound("a/b.jpg".to_string()).into();
    assert!(matches!(not_found, AppError::NotFound(_)));

    let denied: AppError = StorageError::PermissionDenied("nope".to_string()).into();
    assert!(matches!(denied, AppError::Forbidden(_)));

    let transient: AppError = StorageError::Transient("503".to_string()).into();
    assert!(matches!(transient, AppError::Transient(_)));
    assert!(transient.is_transient());

    let permanent: AppError = StorageError::Permanent("bad".to_string()).into();
    assert!(matches!(permanent, AppError::Permanent(_)));
    assert!(!permanent.is_transient());
}

#[test]
fn envelope_codes_are_stable_and_non_zero() {
    let cases = [
        (AppError::bad_request("x"), 400),
        (AppError::unauthorized("x"), 401),
        (AppError::forbidden("x"), 403),
        (AppError::not_found("x"), 404),
        (AppError::conflict("x"), 409),
        (AppError::Timeout("x".to_string()), 408),
        (AppError::Transient("x".to_string()), 503),
        (AppError::Cancelled("x".to_string()), 499),
        (AppError::Permanent("x".to_string()), 500),
    ];
    for (error, expected) in cases {
        assert_eq!(error.envelope_code(), expected);
        assert_ne!(error.envelope_code(), 0, "0 is reserved for success");
    }
}

#[test]
fn io_errors_split_along_the_retry_boundary() {
    let not_found: StorageError =
        std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(not_found, StorageError::NotFound(_)));

    let timed_out: StorageError =
        std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
    assert!(timed_out.is_transient());

    let denied: StorageError =
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no").into();
    assert!(matches!(denied, StorageError::PermissionDenied(_)));
}
