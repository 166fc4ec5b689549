//! Shared types for chart image normalization.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `RgbImage` so downstream crates can inspect normalized
/// rasters without depending on `image` directly.
pub use image::RgbImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Axis-aligned crop rectangle in source pixel coordinates.
///
/// `right` and `bottom` are exclusive, so a box covering a whole
/// `w × h` image is `(0, 0, w, h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    /// First included column.
    pub left: u32,
    /// First included row.
    pub top: u32,
    /// One past the last included column.
    pub right: u32,
    /// One past the last included row.
    pub bottom: u32,
}

impl CropBox {
    /// A box covering the full extent of an image.
    #[must_use]
    pub const fn full(dimensions: Dimensions) -> Self {
        Self {
            left: 0,
            top: 0,
            right: dimensions.width,
            bottom: dimensions.height,
        }
    }

    /// Width of the box; zero when the box is inverted.
    #[must_use]
    pub const fn width(self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    /// Height of the box; zero when the box is inverted.
    #[must_use]
    pub const fn height(self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Returns `true` if the box encloses no pixels.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Resampling filter used for the letterbox resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation.
    Triangle,
    /// Bicubic (Catmull-Rom).
    CatmullRom,
    /// Gaussian: smooth output.
    Gaussian,
    /// Lanczos with 3 lobes: sharpest, keeps thin chart strokes crisp.
    #[default]
    Lanczos3,
}

impl ResizeFilter {
    /// Convert to the `image` crate's `FilterType`.
    #[must_use]
    pub const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Gaussian => image::imageops::FilterType::Gaussian,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResizeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Parameters of the normalization transform.
///
/// The defaults produce the 512×512 RGB canvas on a white background
/// that the downstream perturbation model consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Side length of the square output canvas.
    pub target_size: u32,

    /// Background color used for alpha compositing, crop detection and
    /// letterbox padding.
    pub background: [u8; 3],

    /// A pixel counts as content when any channel differs from the
    /// background by more than this amount.
    pub crop_tolerance: u8,

    /// Margin in pixels kept around the detected content on every side.
    pub crop_margin: u32,

    /// Resampling filter for the letterbox resize.
    pub resize_filter: ResizeFilter,
}

impl NormalizeConfig {
    /// Default output canvas size.
    pub const DEFAULT_TARGET_SIZE: u32 = 512;
    /// Default background (white).
    pub const DEFAULT_BACKGROUND: [u8; 3] = [255, 255, 255];
    /// Default crop tolerance: on white, channels below 245 are content.
    pub const DEFAULT_CROP_TOLERANCE: u8 = 10;
    /// Default crop margin.
    pub const DEFAULT_CROP_MARGIN: u32 = 5;
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            target_size: Self::DEFAULT_TARGET_SIZE,
            background: Self::DEFAULT_BACKGROUND,
            crop_tolerance: Self::DEFAULT_CROP_TOLERANCE,
            crop_margin: Self::DEFAULT_CROP_MARGIN,
            resize_filter: ResizeFilter::default(),
        }
    }
}

/// Scale and placement chosen by the letterbox resize.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Letterbox {
    /// Factor applied to the cropped image (`target / longer side`).
    pub scale: f64,
    /// Horizontal paste offset on the canvas.
    pub offset_x: u32,
    /// Vertical paste offset on the canvas.
    pub offset_y: u32,
    /// Width of the scaled image before padding.
    pub resized_width: u32,
    /// Height of the scaled image before padding.
    pub resized_height: u32,
}

/// Everything needed to map a normalized-canvas coordinate back onto the
/// original image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessMeta {
    /// Content crop applied before resizing, in source pixels.
    pub crop_box: CropBox,
    /// Scale factor from cropped source to canvas.
    pub scale: f64,
    /// Horizontal paste offset on the canvas.
    pub offset_x: u32,
    /// Vertical paste offset on the canvas.
    pub offset_y: u32,
    /// Width of the scaled content on the canvas.
    pub resized_width: u32,
    /// Height of the scaled content on the canvas.
    pub resized_height: u32,
    /// Side length of the square canvas.
    pub target_size: u32,
    /// Decoded color layout of the source, e.g. `"Rgba8"`.
    pub source_color: String,
}

impl PreprocessMeta {
    /// Map a canvas coordinate to the original image.
    #[must_use]
    pub fn to_source(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - f64::from(self.offset_x)) / self.scale + f64::from(self.crop_box.left),
            (y - f64::from(self.offset_y)) / self.scale + f64::from(self.crop_box.top),
        )
    }

    /// Map an original-image coordinate onto the canvas.
    #[must_use]
    pub fn to_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - f64::from(self.crop_box.left)).mul_add(self.scale, f64::from(self.offset_x)),
            (y - f64::from(self.crop_box.top)).mul_add(self.scale, f64::from(self.offset_y)),
        )
    }
}

/// Result of normalizing one source image.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    /// PNG-encoded `target_size × target_size` RGB canvas.
    pub bytes: Vec<u8>,
    /// Source dimensions before cropping.
    pub original: Dimensions,
    /// Transform metadata.
    pub meta: PreprocessMeta,
}

/// Reasons a source image cannot be normalized.
///
/// Every variant is terminal for the source blob: callers skip it and
/// never retry.
#[derive(Debug, thiserror::Error)]
pub enum InvalidImage {
    /// The input bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The bytes did not decode as a supported image.
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// Decoding succeeded but a later step produced unusable geometry.
    #[error("degenerate image: {0}")]
    Degenerate(String),

    /// The canvas could not be encoded.
    #[error("failed to encode normalized image: {0}")]
    Encode(String),
}
