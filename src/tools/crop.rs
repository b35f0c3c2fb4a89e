//! Rectangular crop

use crate::{
    error::{PixkitError, Result},
    pipeline::Transform,
    types::RasterImage,
};

/// Crop to `width` x `height` starting at `(x, y)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Crop {
    #[must_use]
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check that the rectangle is non-empty and inside a `width` x `height` image
    ///
    /// # Errors
    /// - `InvalidConfig` describing the offending rectangle
    pub fn validate_for(&self, width: u32, height: u32) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PixkitError::invalid_config(format!(
                "Crop rectangle {}x{} is empty",
                self.width, self.height
            )));
        }

        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        match (right, bottom) {
            (Some(r), Some(b)) if r <= width && b <= height => Ok(()),
            _ => Err(PixkitError::invalid_config(format!(
                "Crop rectangle {}x{}+{}+{} exceeds image bounds {}x{}",
                self.width, self.height, self.x, self.y, width, height
            ))),
        }
    }
}

impl Transform for Crop {
    fn name(&self) -> &str {
        "crop"
    }

    fn output_suffix(&self) -> String {
        "-cropped".to_string()
    }

    fn apply(&mut self, image: &RasterImage) -> Result<RasterImage> {
        self.validate_for(image.width(), image.height())?;

        let rgba = image.to_rgba_image()?;
        let cropped = image::imageops::crop_imm(&rgba, self.x, self.y, self.width, self.height);
        Ok(RasterImage::from_rgba_image(cropped.to_image()))
    }
}
