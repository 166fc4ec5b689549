//! Background-border removal.
//!
//! Finds the bounding box of every pixel that differs from the
//! background, grows it by a margin, and crops to it. This maximizes the
//! chart's footprint on the fixed-size canvas produced by the letterbox
//! step.

use image::{Rgb, RgbImage};

use crate::types::{CropBox, Dimensions, InvalidImage};

/// Returns `true` if any channel differs from `background` by more than
/// `tolerance`.
#[must_use]
pub fn is_content(pixel: Rgb<u8>, background: [u8; 3], tolerance: u8) -> bool {
    pixel
        .0
        .iter()
        .zip(background)
        .any(|(&c, bg)| c.abs_diff(bg) > tolerance)
}

/// Tight bounding box of content pixels, or `None` for a blank image.
#[must_use]
pub fn content_bounds(image: &RgbImage, background: [u8; 3], tolerance: u8) -> Option<CropBox> {
    let mut bounds: Option<CropBox> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if !is_content(*pixel, background, tolerance) {
            continue;
        }
        bounds = Some(match bounds {
            None => CropBox {
                left: x,
                top: y,
                right: x + 1,
                bottom: y + 1,
            },
            Some(b) => CropBox {
                left: b.left.min(x),
                top: b.top.min(y),
                right: b.right.max(x + 1),
                bottom: b.bottom.max(y + 1),
            },
        });
    }
    bounds
}

/// Crop box for `image`: content bounds grown by `margin` on every side
/// and clamped to the image, or the full image when nothing is content.
#[must_use]
pub fn crop_box(image: &RgbImage, background: [u8; 3], tolerance: u8, margin: u32) -> CropBox {
    let dimensions = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    content_bounds(image, background, tolerance).map_or_else(
        || CropBox::full(dimensions),
        |b| CropBox {
            left: b.left.saturating_sub(margin),
            top: b.top.saturating_sub(margin),
            right: b.right.saturating_add(margin).min(dimensions.width),
            bottom: b.bottom.saturating_add(margin).min(dimensions.height),
        },
    )
}

/// Crop `image` to `crop`.
///
/// # Errors
///
/// Returns [`InvalidImage::Degenerate`] if the box is empty or extends
/// past the image.
pub fn apply(image: &RgbImage, crop: CropBox) -> Result<RgbImage, InvalidImage> {
    if crop.is_empty() || crop.right > image.width() || crop.bottom > image.height() {
        return Err(InvalidImage::Degenerate(format!(
            "crop box {crop:?} does not fit a {}x{} image",
            image.width(),
            image.height(),
        )));
    }
    if crop == CropBox::full(Dimensions {
        width: image.width(),
        height: image.height(),
    }) {
        return Ok(image.clone());
    }
    Ok(image::imageops::crop_imm(image, crop.left, crop.top, crop.width(), crop.height()).to_image())
}
