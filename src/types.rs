//! Core data types: raster images, masks, composite results and metadata

use crate::error::{PixkitError, Result};
use chrono::{DateTime, Utc};
use image::{DynamicImage, GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// Number of bytes per RGBA pixel
pub const CHANNELS: usize = 4;

/// Number of pixels for the given dimensions, or `None` on overflow
fn pixel_len(width: u32, height: u32) -> Option<usize> {
    (width as usize).checked_mul(height as usize)
}

/// Row-major RGBA8 pixel buffer
///
/// The buffer length is always `width * height * 4`. A zero-sized image is
/// representable so that operations can report `EmptyInput` themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RasterImage {
    /// Create a raster image from raw RGBA bytes
    ///
    /// # Errors
    /// - `InvalidConfig` if the buffer length is not `width * height * 4`
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = pixel_len(width, height)
            .and_then(|n| n.checked_mul(CHANNELS))
            .ok_or_else(|| PixkitError::invalid_config("Image dimensions overflow"))?;

        if data.len() != expected {
            return Err(PixkitError::invalid_config(format!(
                "RGBA buffer for {}x{} must be {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Create an image filled with a single RGBA color
    #[must_use]
    pub fn from_pixel(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = pixel_len(width, height).unwrap_or(0);
        let mut data = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Take ownership of an `image::RgbaImage`
    #[must_use]
    pub fn from_rgba_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }

    /// Convert any decoded image to RGBA8
    #[must_use]
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self::from_rgba_image(image.to_rgba8())
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of pixels (not bytes)
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.data.len() / CHANNELS
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw RGBA bytes in row-major order
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// RGBA value at `(x, y)`, or `None` when out of bounds
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let px = self.data.get(offset..offset + CHANNELS)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Iterate over pixels as 4-byte slices
    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(CHANNELS)
    }

    /// Count pixels with alpha 255
    #[must_use]
    pub fn opaque_pixel_count(&self) -> usize {
        self.pixels().filter(|px| px[3] == u8::MAX).count()
    }

    /// Borrow-free conversion to `image::RgbaImage`
    ///
    /// # Errors
    /// - `Processing` if the buffer cannot be wrapped (never for a validated image)
    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        self.clone().into_rgba_image()
    }

    /// Convert into `image::RgbaImage` without copying
    ///
    /// # Errors
    /// - `Processing` if the buffer cannot be wrapped (never for a validated image)
    pub fn into_rgba_image(self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data)
            .ok_or_else(|| PixkitError::processing("Failed to wrap RGBA buffer as image"))
    }

    /// Convert into `image::DynamicImage` for encoding
    ///
    /// # Errors
    /// - `Processing` if the buffer cannot be wrapped
    pub fn into_dynamic(self) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageRgba8(self.into_rgba_image()?))
    }
}

/// Clamp a mask value into [0, 1]; NaN maps to 0
fn normalize_value(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Convert a normalized value to a byte with `round(m * 255)`
#[must_use]
pub fn unit_to_byte(value: f32) -> u8 {
    (normalize_value(value) * 255.0).round() as u8
}

/// Single-channel confidence map with values in [0, 1]
///
/// Masks usually come from a segmentation model at a fixed resolution
/// (e.g. 320x320) that differs from the image being composited.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskBuffer {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl MaskBuffer {
    /// Create a mask from normalized values, clamping them into [0, 1]
    ///
    /// # Errors
    /// - `InvalidConfig` if `values.len() != width * height`
    pub fn new(width: u32, height: u32, mut values: Vec<f32>) -> Result<Self> {
        let expected = pixel_len(width, height)
            .ok_or_else(|| PixkitError::invalid_config("Mask dimensions overflow"))?;
        if values.len() != expected {
            return Err(PixkitError::invalid_config(format!(
                "Mask for {}x{} must have {} values, got {}",
                width,
                height,
                expected,
                values.len()
            )));
        }

        for value in &mut values {
            *value = normalize_value(*value);
        }

        Ok(Self {
            width,
            height,
            values,
        })
    }

    /// Create a mask from a byte channel (0-255)
    ///
    /// # Errors
    /// - `InvalidConfig` if `bytes.len() != width * height`
    pub fn from_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Self> {
        let values = bytes.iter().map(|&b| f32::from(b) / 255.0).collect();
        Self::new(width, height, values)
    }

    /// Create a mask from a grayscale image
    #[must_use]
    pub fn from_gray_image(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            values: image.as_raw().iter().map(|&b| f32::from(b) / 255.0).collect(),
        }
    }

    /// Create a mask with the same value everywhere
    #[must_use]
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        let count = pixel_len(width, height).unwrap_or(0);
        Self {
            width,
            height,
            values: vec![normalize_value(value); count],
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Normalized values in row-major order
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at `(x, y)`, or `None` when out of bounds
    #[must_use]
    pub fn value(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Quantize to bytes with `round(m * 255)`
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().map(|&v| unit_to_byte(v)).collect()
    }

    /// Convert to a grayscale image
    ///
    /// # Errors
    /// - `Processing` if the buffer cannot be wrapped
    pub fn to_gray_image(&self) -> Result<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.to_bytes())
            .ok_or_else(|| PixkitError::processing("Failed to create image from mask data"))
    }

    /// Foreground/background statistics (foreground = value >= 0.5)
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.values.len();
        let foreground_pixels = self.values.iter().filter(|&&v| v >= 0.5).count();
        MaskStatistics::new(total_pixels, foreground_pixels)
    }
}

/// How mask values become alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlphaMode {
    /// Hard cutoff: 0 below the threshold, 255 otherwise
    Binary,
    /// Feathered edges: `round(m * 255)`
    Soft,
}

impl std::fmt::Display for AlphaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Soft => write!(f, "soft"),
        }
    }
}

impl std::str::FromStr for AlphaMode {
    type Err = PixkitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "soft" => Ok(Self::Soft),
            other => Err(PixkitError::invalid_config(format!(
                "Unknown alpha mode '{}' (expected 'binary' or 'soft')",
                other
            ))),
        }
    }
}

/// Foreground cutoff in [0, 1]
///
/// Has no `Default`. Common choices are 0.5 for byte masks and 0.7 for
/// person segmentation.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Threshold(f32);

impl Threshold {
    /// Create a threshold
    ///
    /// # Errors
    /// - `InvalidConfig` if `value` is NaN or outside [0, 1]
    pub fn new(value: f32) -> Result<Self> {
        if value.is_nan() || !(0.0..=1.0).contains(&value) {
            return Err(PixkitError::config_value_error(
                "threshold",
                value,
                "0.0-1.0",
                None,
            ));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }
}

impl TryFrom<f32> for Threshold {
    type Error = PixkitError;

    fn try_from(value: f32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Threshold> for f32 {
    fn from(threshold: Threshold) -> Self {
        threshold.0
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output of the mask compositor
#[derive(Debug, Clone)]
pub struct CompositeResult {
    /// Source RGB with mask-derived alpha
    pub image: RasterImage,

    /// Alpha mode used
    pub mode: AlphaMode,

    /// Threshold supplied by the caller (ignored in soft mode)
    pub threshold: Threshold,

    /// Pixels written with alpha 255
    pub opaque_pixels: usize,
}

impl CompositeResult {
    #[must_use]
    pub fn into_image(self) -> RasterImage {
        self.image
    }

    /// Fraction of pixels that are fully opaque
    #[must_use]
    pub fn opaque_ratio(&self) -> f32 {
        let total = self.image.pixel_count();
        if total == 0 {
            0.0
        } else {
            self.opaque_pixels as f32 / total as f32
        }
    }
}

/// Mask statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
    pub background_ratio: f32,
}

impl MaskStatistics {
    fn new(total_pixels: usize, foreground_pixels: usize) -> Self {
        let background_pixels = total_pixels - foreground_pixels;
        let (foreground_ratio, background_ratio) = if total_pixels == 0 {
            (0.0, 0.0)
        } else {
            (
                foreground_pixels as f32 / total_pixels as f32,
                background_pixels as f32 / total_pixels as f32,
            )
        };
        Self {
            total_pixels,
            foreground_pixels,
            background_pixels,
            foreground_ratio,
            background_ratio,
        }
    }
}

/// Per-stage pipeline timings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTimings {
    /// Size checks, decoding and downscaling
    pub decode_ms: u64,

    /// The tool's transform (inference, resampling, compositing, ...)
    pub transform_ms: u64,

    /// Output encoding
    pub encode_ms: u64,

    /// Total end-to-end time
    pub total_ms: u64,
}

/// Percentage breakdown of `PipelineTimings`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingBreakdown {
    pub decode_pct: f64,
    pub transform_pct: f64,
    pub encode_pct: f64,
    pub other_pct: f64,
}

impl PipelineTimings {
    #[must_use]
    pub fn breakdown_percentages(&self) -> TimingBreakdown {
        if self.total_ms == 0 {
            return TimingBreakdown::default();
        }

        let total = self.total_ms as f64;
        let measured = self.decode_ms + self.transform_ms + self.encode_ms;
        let other_ms = self.total_ms.saturating_sub(measured);

        TimingBreakdown {
            decode_pct: self.decode_ms as f64 / total * 100.0,
            transform_pct: self.transform_ms as f64 / total * 100.0,
            encode_pct: self.encode_ms as f64 / total * 100.0,
            other_pct: other_ms as f64 / total * 100.0,
        }
    }
}

/// Metadata attached to every pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    /// Tool that produced the output
    pub tool: String,

    /// Detailed timing breakdown
    pub timings: PipelineTimings,

    /// Detected input format
    pub input_format: String,

    /// Output format
    pub output_format: String,

    /// Decoded dimensions before any downscaling
    pub original_dimensions: (u32, u32),

    /// Dimensions the transform operated on
    pub working_dimensions: (u32, u32),

    /// When processing finished
    pub completed_at: DateTime<Utc>,
}

impl ProcessingMetadata {
    #[must_use]
    pub fn new(tool: String) -> Self {
        Self {
            tool,
            timings: PipelineTimings::default(),
            input_format: "unknown".to_string(),
            output_format: "png".to_string(),
            original_dimensions: (0, 0),
            working_dimensions: (0, 0),
            completed_at: Utc::now(),
        }
    }

    /// Whether the input was downscaled to fit the dimension cap
    #[must_use]
    pub fn was_downscaled(&self) -> bool {
        self.original_dimensions != self.working_dimensions
    }
}
