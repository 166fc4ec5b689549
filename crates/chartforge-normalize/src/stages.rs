//! Incremental normalization: advance step by step, inspecting each
//! intermediate raster before continuing.
//!
//! [`crate::normalize`] runs the whole chain in one call. [`Normalizer`]
//! lets the caller drive it one step at a time:
//!
//! ```rust
//! # use chartforge_normalize::{InvalidImage, NormalizeConfig, Normalizer};
//! # fn run(png: Vec<u8>) -> Result<(), InvalidImage> {
//! let normalized = Normalizer::new(&png, NormalizeConfig::default())
//!     .decode()?
//!     .canonicalize()
//!     .crop()?
//!     .letterbox()?
//!     .encode()?;
//! # Ok(())
//! # }
//! ```
//!
//! Each step consumes `self` and returns the next state, so the order is
//! fixed at compile time: no state can be encoded before it has been
//! cropped and letterboxed.

use image::{DynamicImage, RgbImage};

use crate::types::{
    CropBox, Dimensions, InvalidImage, Letterbox, NormalizeConfig, NormalizedImage, PreprocessMeta,
};

// ───────────────────────── Step 0: Pending ───────────────────────────

/// Normalization state before the source has been decoded.
#[must_use = "normalization steps are consumed by advancing; call .decode() to continue"]
pub struct Normalizer<'a> {
    config: NormalizeConfig,
    source: &'a [u8],
}

impl<'a> Normalizer<'a> {
    /// Start normalizing `source` with `config`.
    pub const fn new(source: &'a [u8], config: NormalizeConfig) -> Self {
        Self { config, source }
    }

    /// Validate and decode the source.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidImage::EmptyInput`], [`InvalidImage::Decode`] or
    /// [`InvalidImage::Degenerate`] when the bytes are not a usable image.
    pub fn decode(self) -> Result<Decoded, InvalidImage> {
        let image = crate::color::decode(self.source)?;
        Ok(Decoded {
            original: crate::color::dimensions_of(&image),
            source_color: format!("{:?}", image.color()),
            config: self.config,
            image,
        })
    }
}

// ───────────────────────── Step 1: Decoded ───────────────────────────

/// The source has been decoded in its native color layout.
#[must_use = "normalization steps are consumed by advancing; call .canonicalize() to continue"]
pub struct Decoded {
    config: NormalizeConfig,
    image: DynamicImage,
    original: Dimensions,
    source_color: String,
}

impl Decoded {
    /// Source dimensions.
    #[must_use]
    pub const fn original(&self) -> Dimensions {
        self.original
    }

    /// Convert to RGB on the configured background.
    pub fn canonicalize(self) -> Canonical {
        let rgb = crate::color::to_rgb_on(&self.image, self.config.background);
        Canonical {
            config: self.config,
            rgb,
            original: self.original,
            source_color: self.source_color,
        }
    }
}

// ───────────────────────── Step 2: Canonical ─────────────────────────

/// The image is 3-channel RGB with transparency composited away.
#[must_use = "normalization steps are consumed by advancing; call .crop() to continue"]
pub struct Canonical {
    config: NormalizeConfig,
    rgb: RgbImage,
    original: Dimensions,
    source_color: String,
}

impl Canonical {
    /// The RGB image.
    #[must_use]
    pub const fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    /// Crop away background borders.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidImage::Degenerate`] if the computed box is empty.
    pub fn crop(self) -> Result<Cropped, InvalidImage> {
        let crop_box = crate::crop::crop_box(
            &self.rgb,
            self.config.background,
            self.config.crop_tolerance,
            self.config.crop_margin,
        );
        let cropped = crate::crop::apply(&self.rgb, crop_box)?;
        Ok(Cropped {
            config: self.config,
            cropped,
            crop_box,
            original: self.original,
            source_color: self.source_color,
        })
    }
}

// ───────────────────────── Step 3: Cropped ───────────────────────────

/// The image has been cropped to its content.
#[must_use = "normalization steps are consumed by advancing; call .letterbox() to continue"]
pub struct Cropped {
    config: NormalizeConfig,
    cropped: RgbImage,
    crop_box: CropBox,
    original: Dimensions,
    source_color: String,
}

impl Cropped {
    /// The crop applied, in source pixels.
    #[must_use]
    pub const fn crop_box(&self) -> CropBox {
        self.crop_box
    }

    /// The cropped image.
    #[must_use]
    pub const fn cropped(&self) -> &RgbImage {
        &self.cropped
    }

    /// Scale and pad onto the square canvas.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidImage::Degenerate`] when the target size is zero.
    pub fn letterbox(self) -> Result<Letterboxed, InvalidImage> {
        let (canvas, placement) = crate::letterbox::letterbox(
            &self.cropped,
            self.config.target_size,
            self.config.background,
            self.config.resize_filter,
        )?;
        Ok(Letterboxed {
            target_size: self.config.target_size,
            canvas,
            placement,
            crop_box: self.crop_box,
            original: self.original,
            source_color: self.source_color,
        })
    }
}

// ───────────────────────── Step 4: Letterboxed ───────────────────────

/// The square canvas is complete; only encoding remains.
#[must_use = "normalization steps are consumed by advancing; call .encode() to continue"]
pub struct Letterboxed {
    target_size: u32,
    canvas: RgbImage,
    placement: Letterbox,
    crop_box: CropBox,
    original: Dimensions,
    source_color: String,
}

impl Letterboxed {
    /// The square canvas.
    #[must_use]
    pub const fn canvas(&self) -> &RgbImage {
        &self.canvas
    }

    /// Scale and offsets used.
    #[must_use]
    pub const fn placement(&self) -> Letterbox {
        self.placement
    }

    /// Encode the canvas and assemble the metadata.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidImage::Encode`] if PNG encoding fails.
    pub fn encode(self) -> Result<NormalizedImage, InvalidImage> {
        let bytes = crate::encode::encode_png(&self.canvas)?;
        Ok(NormalizedImage {
            bytes,
            original: self.original,
            meta: PreprocessMeta {
                crop_box: self.crop_box,
                scale: self.placement.scale,
                offset_x: self.placement.offset_x,
                offset_y: self.placement.offset_y,
                resized_width: self.placement.resized_width,
                resized_height: self.placement.resized_height,
                target_size: self.target_size,
                source_color: self.source_color,
            },
        })
    }
}
