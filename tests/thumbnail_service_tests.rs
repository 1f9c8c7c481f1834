use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;

use lumen_photos::services::ThumbnailService;

fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let buffer = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(buffer)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode sample png");
    bytes
}

#[test]
fn thumbnail_is_bounded_and_keeps_aspect_ratio() {
    let service = ThumbnailService::with_max_edge(128);
    let original = sample_png(1024, 512);

    let (thumbnail, source_width, source_height) =
        service.generate(&original).expect("generate failed");

    assert_eq!(source_width, 1024);
    assert_eq!(source_height, 512);
    assert_eq!(thumbnail.width, 128);
    assert_eq!(thumbnail.height, 64);
    // JPEG magic bytes.
    assert_eq!(&thumbnail.bytes[0..2], &[0xFF, 0xD8]);
}

#[test]
fn small_images_are_not_upscaled() {
    let service = ThumbnailService::with_max_edge(512);
    let original = sample_png(64, 48);

    let (thumbnail, _, _) = service.generate(&original).expect("generate failed");
    assert_eq!(thumbnail.width, 64);
    assert_eq!(thumbnail.height, 48);
}

#[test]
fn undecodable_bytes_are_an_error_not_a_panic() {
    let service = ThumbnailService::new();
    assert!(service.generate(b"definitely not an image").is_err());
}
