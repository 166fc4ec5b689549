//! Lossless PNG encoding of the normalized canvas.

use image::ImageEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};

use crate::types::{InvalidImage, RgbImage};

/// Encode an RGB canvas as PNG.
///
/// # Errors
///
/// Returns [`InvalidImage::Encode`] if the encoder rejects the buffer.
pub fn encode_png(canvas: &RgbImage) -> Result<Vec<u8>, InvalidImage> {
    let mut png_bytes = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut png_bytes, CompressionType::Best, FilterType::Adaptive);
    encoder
        .write_image(
            canvas.as_raw(),
            canvas.width(),
            canvas.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| InvalidImage::Encode(e.to_string()))?;
    Ok(png_bytes)
}
