//! Decoded image input — RGB and grayscale planes, EXIF summary.
//!
//! Every liveness request starts from raw image bytes. Decoding happens once
//! and the result owns both an RGB plane and a BT.601 grayscale plane, so the
//! signal battery never re-decodes or re-converts. An undecodable image is a
//! precondition failure reported to the caller before any scoring runs.

use image::RgbImage;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// A decoded camera image with precomputed grayscale plane.
#[derive(Clone)]
pub struct DecodedImage {
    rgb: RgbImage,
    gray: image::GrayImage,
}

impl DecodedImage {
    /// Decode raw image bytes (JPEG, PNG, ...).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        Ok(Self::from_rgb(rgb))
    }

    /// Wrap an already-decoded RGB buffer.
    pub fn from_rgb(rgb: RgbImage) -> Self {
        let (width, height) = rgb.dimensions();

        // ITU-R BT.601 luma (0.299 R + 0.587 G + 0.114 B) — the coefficients
        // the reference thresholds were calibrated against. The image crate's
        // own `to_luma8` uses BT.709 weights, which shifts the measurements.
        let mut gray = Vec::with_capacity((width * height) as usize);
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            gray.push(luma.round().clamp(0.0, 255.0) as u8);
        }
        let gray = image::GrayImage::from_raw(width, height, gray)
            .expect("grayscale buffer matches dimensions");

        Self { rgb, gray }
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    pub fn gray(&self) -> &image::GrayImage {
        &self.gray
    }

    /// Total pixel count.
    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

/// The EXIF fields the spoof battery cares about.
///
/// Extraction is best-effort: images without EXIF (or with corrupt EXIF)
/// yield an empty summary, matching how the reference implementation skips
/// the check rather than failing the request.
#[derive(Debug, Clone, Default)]
pub struct ExifSummary {
    /// EXIF `Software` field (e.g. a screenshot tool's name).
    pub software: Option<String>,
    /// EXIF `Make` field (camera vendor).
    pub make: Option<String>,
}

impl ExifSummary {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut cursor = Cursor::new(bytes);
        let exif = match exif::Reader::new().read_from_container(&mut cursor) {
            Ok(exif) => exif,
            Err(e) => {
                tracing::debug!(error = %e, "EXIF extraction skipped");
                return Self::default();
            }
        };

        Self {
            software: ascii_field(&exif, exif::Tag::Software),
            make: ascii_field(&exif, exif::Tag::Make),
        }
    }
}

fn ascii_field(exif: &exif::Exif, tag: exif::Tag) -> Option<String> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    match &field.value {
        exif::Value::Ascii(lines) => lines
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string()),
        _ => None,
    }
}
