//! Image decoding and color canonicalization.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP, GIF) and produces a
//! 3-channel RGB image. Transparency is composited onto the configured
//! background so transparent regions read as background rather than
//! black.

use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

use crate::types::{Dimensions, InvalidImage};

/// Decode raw image bytes, rejecting anything that is not a usable image.
///
/// # Errors
///
/// Returns [`InvalidImage::EmptyInput`] if `bytes` is empty.
/// Returns [`InvalidImage::Decode`] if the format is unrecognized or the
/// data is corrupt.
/// Returns [`InvalidImage::Degenerate`] if the decoded image has a zero
/// dimension.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, InvalidImage> {
    if bytes.is_empty() {
        return Err(InvalidImage::EmptyInput);
    }

    let image = image::load_from_memory(bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(InvalidImage::Degenerate(format!(
            "decoded image is {}x{}",
            image.width(),
            image.height(),
        )));
    }
    Ok(image)
}

/// Dimensions of a decoded image.
#[must_use]
pub fn dimensions_of(image: &DynamicImage) -> Dimensions {
    Dimensions {
        width: image.width(),
        height: image.height(),
    }
}

/// Convert any decoded color layout to RGB on `background`.
///
/// Layouts carrying alpha (RGBA, luminance+alpha, and palettes with a
/// transparency chunk, which the PNG decoder expands to RGBA) go through
/// [`composite_over`]. Opaque layouts are converted directly.
#[must_use]
pub fn to_rgb_on(image: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if image.color().has_alpha() {
        composite_over(&image.to_rgba8(), background)
    } else {
        image.to_rgb8()
    }
}

/// Alpha-composite an RGBA image onto an opaque background color.
#[must_use]
pub fn composite_over(rgba: &RgbaImage, background: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        Rgb([
            blend(r, background[0], a),
            blend(g, background[1], a),
            blend(b, background[2], a),
        ])
    })
}

/// `fg * alpha + bg * (1 - alpha)` in 8-bit fixed point, rounded.
fn blend(fg: u8, bg: u8, alpha: u8) -> u8 {
    let a = u16::from(alpha);
    let mixed = (u16::from(fg) * a + u16::from(bg) * (255 - a) + 127) / 255;
    u8::try_from(mixed).unwrap_or(u8::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode_png(image: &DynamicImage) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        image.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(decode(&[]), Err(InvalidImage::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_return_decode_error() {
        let result = decode(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(InvalidImage::Decode(_))));
    }

    #[test]
    fn truncated_png_returns_decode_error() {
        let png = encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
            8,
            8,
            Rgb([1, 2, 3]),
        )));
        let result = decode(&png[..png.len() / 2]);
        assert!(matches!(result, Err(InvalidImage::Decode(_))));
    }

    #[test]
    fn fully_transparent_pixel_becomes_background() {
        let rgba = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        let rgb = composite_over(&rgba, [255, 255, 255]);
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn opaque_pixel_is_unchanged() {
        let rgba = RgbaImage::from_pixel(1, 1, Rgba([12, 34, 56, 255]));
        let rgb = composite_over(&rgba, [255, 255, 255]);
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([12, 34, 56]));
    }

    #[test]
    fn half_transparent_black_on_white_is_mid_gray() {
        let rgba = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        let rgb = composite_over(&rgba, [255, 255, 255]);
        // 255 * 127 / 255 = 127
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([127, 127, 127]));
    }

    #[test]
    fn luma_alpha_goes_through_compositing() {
        let la = image::GrayAlphaImage::from_pixel(2, 2, image::LumaA([0, 0]));
        let rgb = to_rgb_on(&DynamicImage::ImageLumaA8(la), [200, 100, 50]);
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([200, 100, 50]));
    }

    #[test]
    fn opaque_luma_converts_directly() {
        let gray = image::GrayImage::from_pixel(2, 2, image::Luma([90]));
        let rgb = to_rgb_on(&DynamicImage::ImageLuma8(gray), [255, 255, 255]);
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([90, 90, 90]));
    }

    #[test]
    fn decoded_rgba_png_keeps_alpha_layout() {
        let png = encode_png(&DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            3,
            2,
            Rgba([0, 0, 0, 0]),
        )));
        let decoded = decode(&png).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(
            dimensions_of(&decoded),
            Dimensions {
                width: 3,
                height: 2
            }
        );
    }
}
