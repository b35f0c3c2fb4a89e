//! Output format handling service
//!
//! Keeps format-specific decisions (extensions, transparency, quality ranges,
//! flattening) out of the pipeline and the tools.

use crate::{
    config::{BackgroundColor, OutputFormat},
    error::{PixkitError, Result},
    types::{RasterImage, CHANNELS},
};
use image::{DynamicImage, ImageFormat, RgbImage};

/// Service for handling output format conversions
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Convert a raster image into a `DynamicImage` ready for `format`'s encoder
    ///
    /// Formats without an alpha channel get the image flattened onto
    /// `background` first, so transparent regions do not turn black.
    ///
    /// # Errors
    /// - `Processing` if the pixel buffer cannot be wrapped
    pub fn convert_format(
        image: RasterImage,
        format: OutputFormat,
        background: BackgroundColor,
    ) -> Result<DynamicImage> {
        if Self::supports_transparency(format) {
            return image.into_dynamic();
        }

        let (width, height) = image.dimensions();
        let flattened = Self::flatten(&image, background);
        let rgb: Vec<u8> = flattened
            .pixels()
            .flat_map(|px| px.iter().take(3).copied())
            .collect();

        RgbImage::from_raw(width, height, rgb)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| PixkitError::processing("Failed to build RGB buffer for encoding"))
    }

    /// Composite an RGBA image over an opaque background color
    ///
    /// Every output pixel has alpha 255; `c = (src * a + bg * (255 - a)) / 255`.
    #[must_use]
    pub fn flatten(image: &RasterImage, background: BackgroundColor) -> RasterImage {
        let bg = background.to_array();
        let mut flattened = image.clone();

        for px in flattened.as_raw_mut().chunks_exact_mut(CHANNELS) {
            if let [r, g, b, a] = px {
                let alpha = u32::from(*a);
                for (channel, bg_channel) in [r, g, b].into_iter().zip(bg) {
                    let blended = (u32::from(*channel) * alpha
                        + u32::from(bg_channel) * (255 - alpha)
                        + 127)
                        / 255;
                    *channel = blended as u8;
                }
                *a = u8::MAX;
            }
        }

        flattened
    }

    /// File extension for a format (without the dot)
    ///
    /// ```rust
    /// use pixkit::{services::OutputFormatHandler, OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Jpeg), "jpg");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
            OutputFormat::Tiff => "tiff",
        }
    }

    /// Whether a format keeps the alpha channel
    #[must_use]
    pub fn supports_transparency(format: OutputFormat) -> bool {
        match format {
            OutputFormat::Png | OutputFormat::WebP | OutputFormat::Tiff => true,
            OutputFormat::Jpeg => false,
        }
    }

    /// Warn when a transparent result is about to lose its alpha channel
    pub fn validate_for_transparency(format: OutputFormat) {
        if !Self::supports_transparency(format) {
            log::warn!(
                "Output format {} does not support transparency. Transparent areas will be filled with the background color.",
                format
            );
        }
    }

    /// Quality settings as `(default, min, max)` for lossy formats
    #[must_use]
    pub fn get_quality_range(format: OutputFormat) -> Option<(u8, u8, u8)> {
        match format {
            OutputFormat::Jpeg => Some((90, 1, 100)),
            OutputFormat::Png | OutputFormat::WebP | OutputFormat::Tiff => None,
        }
    }

    /// The `image` crate format used to encode `format`
    #[must_use]
    pub fn image_format(format: OutputFormat) -> ImageFormat {
        match format {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::WebP => ImageFormat::WebP,
            OutputFormat::Tiff => ImageFormat::Tiff,
        }
    }

    /// Map a detected input format to an output format, if it can be encoded
    #[must_use]
    pub fn from_image_format(format: ImageFormat) -> Option<OutputFormat> {
        match format {
            ImageFormat::Png => Some(OutputFormat::Png),
            ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
            ImageFormat::WebP => Some(OutputFormat::WebP),
            ImageFormat::Tiff => Some(OutputFormat::Tiff),
            _ => None,
        }
    }
}
