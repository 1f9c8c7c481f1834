use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use exif::{In, Reader, Tag, Value};
use std::io::Cursor;

use crate::entities::ImageExif;

/// Pulls the capture metadata the library stores from embedded EXIF. Used on
/// the single-step upload path; the three-step protocol receives the same
/// fields from the client.
#[derive(Debug)]
pub struct ExifService;

impl ExifService {
    pub fn new() -> Self {
        Self
    }

    pub fn extract_from_bytes(&self, bytes: &[u8]) -> ImageExif {
        let mut reader = Cursor::new(bytes);
        let exif = match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(_) => return ImageExif::default(),
        };

        ImageExif {
            taken_at: self.taken_at(&exif),
            latitude: self.gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S"),
            longitude: self.gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W"),
            camera_make: self.text_field(&exif, Tag::Make),
            camera_model: self.text_field(&exif, Tag::Model),
            exposure_time: self.text_field(&exif, Tag::ExposureTime),
            f_number: self.rational_field(&exif, Tag::FNumber),
            iso: self
                .uint_field(&exif, Tag::PhotographicSensitivity)
                .map(|value| value as i32),
            focal_length: self.rational_field(&exif, Tag::FocalLength),
        }
    }

    fn taken_at(&self, exif: &exif::Exif) -> Option<DateTime<Utc>> {
        let raw = self
            .text_field(exif, Tag::DateTimeOriginal)
            .or_else(|| self.text_field(exif, Tag::DateTime))?;
        // EXIF timestamps carry no zone; treat them as UTC.
        NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    fn text_field(&self, exif: &exif::Exif, tag: Tag) -> Option<String> {
        exif.get_field(tag, In::PRIMARY).map(|field| {
            field
                .display_value()
                .to_string()
                .trim_matches('"')
                .trim()
                .to_string()
        })
    }

    fn rational_field(&self, exif: &exif::Exif, tag: Tag) -> Option<f32> {
        let field = exif.get_field(tag, In::PRIMARY)?;
        match &field.value {
            Value::Rational(values) => values.first().map(|r| r.to_f32()),
            Value::SRational(values) => values.first().map(|r| r.to_f32()),
            _ => None,
        }
    }

    fn uint_field(&self, exif: &exif::Exif, tag: Tag) -> Option<u32> {
        let field = exif.get_field(tag, In::PRIMARY)?;
        field.value.get_uint(0)
    }

    /// Degrees/minutes/seconds folded to a signed decimal; `negative_ref`
    /// names the hemisphere letter that flips the sign.
    fn gps_coordinate(
        &self,
        exif: &exif::Exif,
        value_tag: Tag,
        ref_tag: Tag,
        negative_ref: &str,
    ) -> Option<f64> {
        let field = exif.get_field(value_tag, In::PRIMARY)?;
        let Value::Rational(parts) = &field.value else {
            return None;
        };
        if parts.len() < 3 {
            return None;
        }
        let degrees = parts[0].to_f64();
        let minutes = parts[1].to_f64();
        let seconds = parts[2].to_f64();
        let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;

        let reference = self.text_field(exif, ref_tag).unwrap_or_default();
        if reference.eq_ignore_ascii_case(negative_ref) {
            decimal = -decimal;
        }
        Some(decimal)
    }
}

impl Default for ExifService {
    fn default() -> Self {
        Self::new()
    }
}
