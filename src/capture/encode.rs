use chrono::{DateTime, SecondsFormat, Utc};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, RgbaImage};
use std::io::Cursor;

use crate::error::CaptureError;

pub struct EncodedSnapshot {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Scales the frame by `scale` and encodes it as JPEG at `quality` (1-100).
pub fn encode_snapshot(
    image: &RgbaImage,
    scale: f32,
    quality: u8,
) -> Result<EncodedSnapshot, CaptureError> {
    let scale = if scale.is_finite() && scale > 0.0 { scale.min(1.0) } else { 1.0 };
    let width = ((image.width() as f32 * scale).round() as u32).max(1);
    let height = ((image.height() as f32 * scale).round() as u32).max(1);

    let rgb = if (width, height) == image.dimensions() {
        DynamicImage::ImageRgba8(image.clone()).into_rgb8()
    } else {
        let resized = image::imageops::resize(image, width, height, FilterType::Triangle);
        DynamicImage::ImageRgba8(resized).into_rgb8()
    };

    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;

    Ok(EncodedSnapshot {
        bytes: buffer.into_inner(),
        width,
        height,
    })
}

/// `intruder_<timestamp>.jpg` with `:` and `.` made filesystem-safe.
pub fn export_file_name(taken_at: DateTime<Utc>) -> String {
    let stamp = taken_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("intruder_{stamp}.jpg")
}
