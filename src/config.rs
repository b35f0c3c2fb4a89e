//! Configuration types for pipeline runs

use crate::error::{PixkitError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default input size cap (60 MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 60 * 1024 * 1024;

/// Default longest-side cap applied after decoding
pub const DEFAULT_MAX_DIMENSION: u32 = 2000;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Output image format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// JPEG (no transparency, flattened onto the background color)
    Jpeg,
    /// Lossless WebP with alpha channel transparency
    WebP,
    /// TIFF with alpha channel transparency
    Tiff,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::WebP => write!(f, "webp"),
            Self::Tiff => write!(f, "tiff"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = PixkitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::WebP),
            "tiff" | "tif" => Ok(Self::Tiff),
            other => Err(PixkitError::unsupported_format(format!(
                "output format '{}' (expected png, jpeg, webp or tiff)",
                other
            ))),
        }
    }
}

/// Opaque RGB color used when flattening transparency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BackgroundColor {
    pub const WHITE: Self = Self::new(255, 255, 255);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[must_use]
    pub fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Parse `RRGGBB` or `#RRGGBB`
    ///
    /// # Errors
    /// - `InvalidConfig` if the string is not six hex digits
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PixkitError::invalid_config(format!(
                "Background color '{}' must be six hex digits (RRGGBB)",
                hex
            )));
        }

        let channel = |range: std::ops::Range<usize>| {
            digits
                .get(range)
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| PixkitError::invalid_config(format!("Invalid hex color '{}'", hex)))
        };

        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl Default for BackgroundColor {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Configuration shared by every tool run through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Inputs larger than this many bytes are rejected before decoding
    pub max_file_size: u64,

    /// Decoded images are downscaled so the longest side fits
    pub max_dimension: u32,

    /// Output format
    pub output_format: OutputFormat,

    /// JPEG quality (1-100, only used for JPEG output)
    pub jpeg_quality: u8,

    /// Color that transparent pixels are flattened onto for formats without alpha
    pub background: BackgroundColor,

    /// Enable debug mode (extra logging of intermediate stages)
    pub debug: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_dimension: DEFAULT_MAX_DIMENSION,
            output_format: OutputFormat::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            background: BackgroundColor::default(),
            debug: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use pixkit::{OutputFormat, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .output_format(OutputFormat::Jpeg)
    ///     .jpeg_quality(80)
    ///     .max_dimension(1600)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.jpeg_quality, 80);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - JPEG quality outside 1-100
    /// - zero `max_dimension` or `max_file_size`
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PixkitError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
                Some(90),
            ));
        }

        if self.max_dimension == 0 {
            return Err(PixkitError::config_value_error(
                "max dimension",
                self.max_dimension,
                "1 or more pixels",
                Some(DEFAULT_MAX_DIMENSION),
            ));
        }

        if self.max_file_size == 0 {
            return Err(PixkitError::config_value_error(
                "max file size",
                self.max_file_size,
                "1 or more bytes",
                Some(DEFAULT_MAX_FILE_SIZE),
            ));
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// - `Json` for malformed input
    /// - `InvalidConfig` if validation fails
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `Json` / `InvalidConfig` as for [`PipelineConfig::from_json_str`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PixkitError::file_io_error("read config file", path, &e))?;
        log::debug!("Loaded pipeline config from {}", path.display());
        Self::from_json_str(&contents)
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the input size cap in bytes
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    /// Set the input size cap in megabytes
    #[must_use]
    pub fn max_file_size_mb(mut self, megabytes: u64) -> Self {
        self.config.max_file_size = megabytes.saturating_mul(1024 * 1024);
        self
    }

    /// Set the longest-side cap
    #[must_use]
    pub fn max_dimension(mut self, pixels: u32) -> Self {
        self.config.max_dimension = pixels;
        self
    }

    /// Set output format
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Set JPEG quality, clamped to 1-100
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set the flatten background color
    #[must_use]
    pub fn background(mut self, color: BackgroundColor) -> Self {
        self.config.background = color;
        self
    }

    /// Enable debug mode
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - zero `max_dimension` or `max_file_size`
    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
