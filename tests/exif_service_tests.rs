use lumen_photos::services::ExifService;

#[test]
fn bytes_without_exif_yield_an_empty_model() {
    let service = ExifService::new();
    let exif = service.extract_from_bytes(b"not an image at all");

    assert!(exif.taken_at.is_none());
    assert!(exif.latitude.is_none());
    assert!(exif.longitude.is_none());
    assert!(exif.camera_make.is_none());
    assert!(exif.camera_model.is_none());
    assert!(exif.f_number.is_none());
    assert!(exif.iso.is_none());
}

#[test]
fn plain_png_bytes_yield_an_empty_model() {
    // A minimal PNG header; no EXIF container inside.
    let png_magic = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    let service = ExifService::new();
    let exif = service.extract_from_bytes(&png_magic);
    assert!(exif.taken_at.is_none());
    assert!(exif.camera_make.is_none());
}
