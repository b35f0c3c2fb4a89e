//! Resize to explicit dimensions, optionally deriving one side from the aspect ratio

use crate::{
    error::{PixkitError, Result},
    pipeline::Transform,
    types::RasterImage,
};
use image::imageops::FilterType;

/// Resize tool
///
/// A missing side keeps its original length, unless `keep_aspect` is set, in
/// which case it is derived from the given side and the original ratio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resize {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub keep_aspect: bool,
    last_dimensions: Option<(u32, u32)>,
}

impl Resize {
    /// # Errors
    /// - `InvalidConfig` if neither side is given or a side is zero
    pub fn new(width: Option<u32>, height: Option<u32>, keep_aspect: bool) -> Result<Self> {
        if width.is_none() && height.is_none() {
            return Err(PixkitError::invalid_config(
                "Resize needs a width, a height, or both",
            ));
        }
        if width == Some(0) || height == Some(0) {
            return Err(PixkitError::invalid_config(
                "Resize dimensions must be at least 1 pixel",
            ));
        }

        Ok(Self {
            width,
            height,
            keep_aspect,
            last_dimensions: None,
        })
    }

    /// Output dimensions for an input of `width` x `height`
    #[must_use]
    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let derive = |given: u32, from: u32, to: u32| -> u32 {
            if from == 0 {
                return to.max(1);
            }
            ((f64::from(to) * f64::from(given) / f64::from(from)).round() as u32).max(1)
        };

        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) if self.keep_aspect => (w, derive(w, width, height)),
            (None, Some(h)) if self.keep_aspect => (derive(h, height, width), h),
            (w, h) => (w.unwrap_or(width).max(1), h.unwrap_or(height).max(1)),
        }
    }
}

impl Transform for Resize {
    fn name(&self) -> &str {
        "resize"
    }

    fn output_suffix(&self) -> String {
        match self.last_dimensions.or(self.width.zip(self.height)) {
            Some((w, h)) => format!("-resized-{}x{}", w, h),
            None => "-resized".to_string(),
        }
    }

    fn apply(&mut self, image: &RasterImage) -> Result<RasterImage> {
        if image.is_empty() {
            return Err(PixkitError::empty_input("cannot resize an empty image"));
        }

        let (width, height) = self.target_dimensions(image.width(), image.height());
        self.last_dimensions = Some((width, height));
        if (width, height) == image.dimensions() {
            return Ok(image.clone());
        }

        let resized =
            image::imageops::resize(&image.to_rgba_image()?, width, height, FilterType::Lanczos3);
        Ok(RasterImage::from_rgba_image(resized))
    }
}
