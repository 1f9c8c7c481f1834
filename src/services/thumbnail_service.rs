use anyhow::{Context, Result};
use image::ImageFormat;
use image::imageops::FilterType;
use std::io::Cursor;

/// Server-side thumbnail generation for the single-step upload path; the
/// three-step protocol receives a client-rendered thumbnail instead.
pub struct ThumbnailService {
    max_edge: u32,
}

#[derive(Debug, Clone)]
pub struct GeneratedThumbnail {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ThumbnailService {
    const DEFAULT_MAX_EDGE: u32 = 512;

    pub fn new() -> Self {
        Self {
            max_edge: Self::DEFAULT_MAX_EDGE,
        }
    }

    pub fn with_max_edge(max_edge: u32) -> Self {
        Self {
            max_edge: max_edge.max(16),
        }
    }

    /// Decodes the original and emits a bounded JPEG thumbnail; also returns
    /// the original dimensions.
    pub fn generate(&self, original: &[u8]) -> Result<(GeneratedThumbnail, u32, u32)> {
        let decoded = image::load_from_memory(original).context("decode image")?;
        let source_width = decoded.width();
        let source_height = decoded.height();

        // Never upscale; small originals are re-encoded as-is.
        let thumbnail = if source_width <= self.max_edge && source_height <= self.max_edge {
            decoded
        } else {
            decoded.resize(self.max_edge, self.max_edge, FilterType::Triangle)
        };
        let width = thumbnail.width();
        let height = thumbnail.height();

        let mut bytes = Vec::new();
        thumbnail
            .into_rgb8()
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .context("encode thumbnail")?;

        Ok((
            GeneratedThumbnail {
                bytes,
                width,
                height,
            },
            source_width,
            source_height,
        ))
    }
}

impl Default for ThumbnailService {
    fn default() -> Self {
        Self::new()
    }
}
