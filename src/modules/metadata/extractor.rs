use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use exif::{In, Tag, Value};
use serde::Serialize;
use tracing::debug;

use crate::core::error::{AppError, Result};

/// Bytes inspected for a file signature
const SIGNATURE_PROBE_SIZE: usize = 8 * 1024;

/// Image MIME types the decoder can open
const DECODABLE_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/tiff",
    "image/bmp",
];

/// Descriptive attributes of a photo
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhotoMetadata {
    pub taken_at: Option<DateTime<Utc>>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Clone, Default)]
pub struct PhotoMetadataExtractor;

impl PhotoMetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// MIME type of a decodable image, or `None` for anything else.
    ///
    /// The content signature wins; the extension is only consulted when the
    /// signature is unknown.
    pub async fn image_type(&self, path: &Path) -> Result<Option<&'static str>> {
        let path = path.to_path_buf();
        run_blocking(move || detect_image_type(&path)).await
    }

    /// Dimensions and EXIF attributes of an image.
    ///
    /// Fails with `UnsupportedFormat` when the image cannot be decoded. Missing
    /// or unreadable EXIF leaves the corresponding fields empty.
    pub async fn extract(&self, path: &Path) -> Result<Option<PhotoMetadata>> {
        let path = path.to_path_buf();
        run_blocking(move || read_metadata(&path).map(Some)).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Metadata task failed: {}", e)))?
}

fn detect_image_type(path: &Path) -> Result<Option<&'static str>> {
    let mut file = File::open(path)?;
    let mut probe = Vec::with_capacity(SIGNATURE_PROBE_SIZE);
    file.by_ref()
        .take(SIGNATURE_PROBE_SIZE as u64)
        .read_to_end(&mut probe)?;

    let decodable = |mime: &'static str| DECODABLE_IMAGE_TYPES.contains(&mime).then_some(mime);

    if let Some(kind) = infer::get(&probe) {
        return Ok(decodable(kind.mime_type()));
    }

    Ok(mime_guess::from_path(path).first_raw().and_then(decodable))
}

fn read_metadata(path: &Path) -> Result<PhotoMetadata> {
    let (width, height) = image::ImageReader::open(path)?
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| {
            AppError::UnsupportedFormat(format!(
                "Cannot decode image {}: {}",
                path.display(),
                e
            ))
        })?;

    let mut metadata = PhotoMetadata {
        width: Some(width),
        height: Some(height),
        ..PhotoMetadata::default()
    };

    let file = File::open(path)?;
    let exif = match exif::Reader::new().read_from_container(&mut BufReader::new(file)) {
        Ok(exif) => exif,
        Err(e) => {
            debug!("No readable EXIF in {}: {}", path.display(), e);
            return Ok(metadata);
        }
    };

    metadata.taken_at = exif_datetime(&exif, Tag::DateTimeOriginal)
        .or_else(|| exif_datetime(&exif, Tag::DateTime));
    metadata.camera_make = exif_text(&exif, Tag::Make);
    metadata.camera_model = exif_text(&exif, Tag::Model);
    metadata.latitude = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S');
    metadata.longitude = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W');

    Ok(metadata)
}

fn exif_ascii(exif: &exif::Exif, tag: Tag) -> Option<&[u8]> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(values) => values.first().map(|v| v.as_slice()),
        _ => None,
    }
}

fn exif_text(exif: &exif::Exif, tag: Tag) -> Option<String> {
    let raw = exif_ascii(exif, tag)?;
    let text = String::from_utf8_lossy(raw)
        .trim_matches(char::from(0))
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

fn exif_datetime(exif: &exif::Exif, tag: Tag) -> Option<DateTime<Utc>> {
    let parsed = exif::DateTime::from_ascii(exif_ascii(exif, tag)?).ok()?;
    NaiveDate::from_ymd_opt(parsed.year.into(), parsed.month.into(), parsed.day.into())?
        .and_hms_opt(
            parsed.hour.into(),
            parsed.minute.into(),
            parsed.second.into(),
        )
        .map(|naive| naive.and_utc())
}

/// Degrees/minutes/seconds rationals to signed decimal degrees
fn gps_coordinate(exif: &exif::Exif, tag: Tag, ref_tag: Tag, negative_ref: char) -> Option<f64> {
    let rationals = match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(values) if values.len() >= 3 => values,
        _ => return None,
    };
    if rationals.iter().take(3).any(|r| r.denom == 0) {
        return None;
    }

    let degrees = rationals[0].to_f64() + rationals[1].to_f64() / 60.0 + rationals[2].to_f64() / 3600.0;

    let negative = exif_ascii(exif, ref_tag)
        .and_then(|r| r.first())
        .is_some_and(|c| c.eq_ignore_ascii_case(&(negative_ref as u8)));

    Some(if negative { -degrees } else { degrees })
}
