//! Aspect-preserving resize onto a square canvas.
//!
//! The longer side is scaled to the target size and the shorter side is
//! padded with the background color. Stretching to fit would distort
//! bar widths, slopes and axis proportions, so it is never done.

use image::{Rgb, RgbImage};

use crate::types::{InvalidImage, Letterbox, ResizeFilter};

/// Scale a side length, rounding to the nearest pixel and keeping at
/// least one pixel.
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is clamped to [1, target] before the cast"
)]
fn scaled_side(side: u32, scale: f64, target: u32) -> u32 {
    (f64::from(side) * scale)
        .round()
        .clamp(1.0, f64::from(target)) as u32
}

/// Compute the letterbox placement for a `width × height` image.
///
/// # Errors
///
/// Returns [`InvalidImage::Degenerate`] if any dimension or the target
/// size is zero.
pub fn plan(width: u32, height: u32, target_size: u32) -> Result<Letterbox, InvalidImage> {
    if width == 0 || height == 0 || target_size == 0 {
        return Err(InvalidImage::Degenerate(format!(
            "cannot letterbox {width}x{height} into {target_size}x{target_size}"
        )));
    }

    let scale = f64::from(target_size) / f64::from(width.max(height));
    let resized_width = scaled_side(width, scale, target_size);
    let resized_height = scaled_side(height, scale, target_size);

    Ok(Letterbox {
        scale,
        offset_x: (target_size - resized_width) / 2,
        offset_y: (target_size - resized_height) / 2,
        resized_width,
        resized_height,
    })
}

/// Resize `image` into a `target_size × target_size` canvas filled with
/// `background`, centered.
///
/// # Errors
///
/// Returns [`InvalidImage::Degenerate`] for zero-sized input or target.
pub fn letterbox(
    image: &RgbImage,
    target_size: u32,
    background: [u8; 3],
    filter: ResizeFilter,
) -> Result<(RgbImage, Letterbox), InvalidImage> {
    let placement = plan(image.width(), image.height(), target_size)?;

    let resized = if (placement.resized_width, placement.resized_height) == image.dimensions() {
        image.clone()
    } else {
        image::imageops::resize(
            image,
            placement.resized_width,
            placement.resized_height,
            filter.to_image_filter(),
        )
    };

    let mut canvas = RgbImage::from_pixel(target_size, target_size, Rgb(background));
    image::imageops::replace(
        &mut canvas,
        &resized,
        i64::from(placement.offset_x),
        i64::from(placement.offset_y),
    );

    Ok((canvas, placement))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn landscape_fills_width() {
        let p = plan(400, 200, 512).unwrap();
        assert_eq!(p.resized_width, 512);
        assert_eq!(p.resized_height, 256);
        assert_eq!(p.offset_x, 0);
        assert_eq!(p.offset_y, 128);
        assert!((p.scale - 1.28).abs() < 1e-12);
    }

    #[test]
    fn portrait_fills_height() {
        let p = plan(300, 900, 512).unwrap();
        assert_eq!(p.resized_height, 512);
        // 300 * 512 / 900 = 170.67 -> 171
        assert_eq!(p.resized_width, 171);
        assert_eq!(p.offset_x, (512 - 171) / 2);
        assert_eq!(p.offset_y, 0);
    }

    #[test]
    fn upscales_small_images() {
        let p = plan(1, 1, 512).unwrap();
        assert_eq!((p.resized_width, p.resized_height), (512, 512));
        assert!((p.scale - 512.0).abs() < 1e-12);
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        let p = plan(5000, 1, 512).unwrap();
        assert_eq!(p.resized_width, 512);
        assert_eq!(p.resized_height, 1);
    }

    #[test]
    fn zero_target_is_degenerate() {
        assert!(matches!(plan(10, 10, 0), Err(InvalidImage::Degenerate(_))));
    }

    #[test]
    fn canvas_is_square_with_background_padding() {
        let img = RgbImage::from_pixel(40, 20, Rgb([0, 0, 0]));
        let (canvas, p) = letterbox(&img, 64, [255, 255, 255], ResizeFilter::Nearest).unwrap();
        assert_eq!(canvas.dimensions(), (64, 64));
        assert_eq!((p.resized_width, p.resized_height), (64, 32));
        // Padding bands above and below.
        assert_eq!(canvas.get_pixel(32, 0), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(32, 63), &Rgb([255, 255, 255]));
        // Content in the middle band.
        assert_eq!(canvas.get_pixel(32, 32), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(0, p.offset_y), &Rgb([0, 0, 0]));
    }

    #[test]
    fn exact_size_skips_resampling() {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([x as u8, y as u8, 7]));
        let (canvas, p) = letterbox(&img, 16, [255, 255, 255], ResizeFilter::Lanczos3).unwrap();
        assert!((p.scale - 1.0).abs() < f64::EPSILON);
        assert_eq!(canvas, img);
    }
}
