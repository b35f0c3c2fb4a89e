//! Pass-through and flatten transforms used by conversion and compression
//!
//! For these tools the real work happens in the pipeline: downscaling on
//! decode and format/quality on encode.

use crate::{
    config::BackgroundColor,
    error::Result,
    pipeline::Transform,
    services::OutputFormatHandler,
    types::RasterImage,
};

/// Composite transparency onto an opaque color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flatten {
    pub background: BackgroundColor,
    name: &'static str,
    suffix: &'static str,
}

impl Flatten {
    /// Standalone flatten (`-flattened`)
    #[must_use]
    pub fn new(background: BackgroundColor) -> Self {
        Self {
            background,
            name: "flatten",
            suffix: "-flattened",
        }
    }

    /// Flatten as the pixel step of converting to an opaque format (`-converted`)
    #[must_use]
    pub fn converted(background: BackgroundColor) -> Self {
        Self {
            background,
            name: "convert",
            suffix: "-converted",
        }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new(BackgroundColor::WHITE)
    }
}

impl Transform for Flatten {
    fn name(&self) -> &str {
        self.name
    }

    fn output_suffix(&self) -> String {
        self.suffix.to_string()
    }

    fn apply(&mut self, image: &RasterImage) -> Result<RasterImage> {
        Ok(OutputFormatHandler::flatten(image, self.background))
    }
}

/// Leaves pixels untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    name: &'static str,
    suffix: &'static str,
}

impl Identity {
    /// Format conversion (`-converted`)
    #[must_use]
    pub fn converted() -> Self {
        Self {
            name: "convert",
            suffix: "-converted",
        }
    }

    /// Compression (`-compressed`)
    #[must_use]
    pub fn compressed() -> Self {
        Self {
            name: "compress",
            suffix: "-compressed",
        }
    }
}

impl Transform for Identity {
    fn name(&self) -> &str {
        self.name
    }

    fn output_suffix(&self) -> String {
        self.suffix.to_string()
    }

    fn apply(&mut self, image: &RasterImage) -> Result<RasterImage> {
        Ok(image.clone())
    }
}
