//! chartforge-normalize: geometry-preserving chart normalization (sans-IO).
//!
//! Turns raw chart image bytes into a fixed-size square RGB canvas:
//! validate -> canonicalize color -> auto-crop -> letterbox -> encode.
//!
//! This crate has **no I/O dependencies**. It operates on in-memory byte
//! slices and returns the encoded canvas together with the metadata
//! needed to map canvas coordinates back onto the source image.

pub mod color;
pub mod crop;
pub mod encode;
pub mod letterbox;
pub mod stages;
pub mod types;

pub use stages::Normalizer;
pub use types::{
    CropBox, Dimensions, InvalidImage, Letterbox, NormalizeConfig, NormalizedImage,
    PreprocessMeta, ResizeFilter, RgbImage,
};

/// Normalize one source image.
///
/// # Steps
///
/// 1. Decode and validate
/// 2. Convert to RGB, compositing transparency onto the background
/// 3. Crop to the content bounding box plus a margin (full image when blank)
/// 4. Scale the longer side to `target_size` and pad to a centered square
/// 5. Encode as PNG
///
/// The result is a pure function of `bytes` and `config`.
///
/// # Errors
///
/// Returns [`InvalidImage`] when any step fails. Every variant is
/// terminal for the source: the caller should skip it, not retry.
pub fn normalize(bytes: &[u8], config: &NormalizeConfig) -> Result<NormalizedImage, InvalidImage> {
    Normalizer::new(bytes, config.clone())
        .decode()?
        .canonicalize()
        .crop()?
        .letterbox()?
        .encode()
}
