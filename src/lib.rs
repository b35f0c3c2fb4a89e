#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # pixkit
//!
//! Single-image tools built around one pipeline harness and a mask compositor.
//!
//! Every tool is a [`Transform`]: it receives decoded RGBA pixels and returns
//! new ones. The [`Pipeline`] does everything around it (size caps, format
//! detection, decoding, downscaling to a dimension cap, encoding, output
//! naming, timings and progress), so no tool repeats that sequence.
//!
//! ## Features
//!
//! - **Mask compositing**: apply a segmentation mask of any resolution as
//!   alpha, with bilinear resampling and binary or soft alpha
//! - **Pluggable mask sources**: grayscale mask files, closures, or any model
//!   runtime behind [`InferenceBackend`]
//! - **Tools**: background removal, mask preview, resize, crop, flatten,
//!   format conversion, compression and color picking
//! - **PDF output**: pack up to 20 images into an A4 PDF, one per page
//! - **Formats**: PNG, JPEG, WebP, TIFF output; PNG, JPEG, WebP, BMP, TIFF
//!   and GIF input
//! - **CLI**: the `pixkit` binary (enable with the `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixkit::{
//!     AlphaMode, ImageMaskSource, Pipeline, PipelineConfig, Threshold,
//!     tools::BackgroundRemoval,
//! };
//!
//! # fn example() -> pixkit::Result<()> {
//! let mask = ImageMaskSource::from_path("mask.png")?;
//! let mut tool = BackgroundRemoval::new(mask, Threshold::new(0.5)?, AlphaMode::Binary);
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::default())?;
//! let output = pipeline.run_file("photo.jpg", &mut tool)?;
//! output.save(output.suggested_file_name())?; // photo-no-bg.png
//! # Ok(())
//! # }
//! ```
//!
//! ## Compositing directly
//!
//! ```rust
//! use pixkit::{composite, resample_mask, AlphaMode, MaskBuffer, RasterImage, Threshold};
//!
//! # fn example() -> pixkit::Result<()> {
//! let image = RasterImage::from_pixel(2, 2, [255, 0, 0, 255]);
//! let mask = resample_mask(&MaskBuffer::filled(4, 4, 0.6), 2, 2)?;
//!
//! let kept = composite(&image, &mask, Threshold::new(0.5)?, AlphaMode::Binary)?;
//! assert_eq!(kept.opaque_pixels, 4);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): command-line interface, progress bars and subscriber setup
//! - `webp-support` (default): WebP decoding and encoding
//! - `tracing-json`: JSON log output for the CLI

#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod services;
pub mod tools;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

use tokio::io::AsyncRead;

// Public API exports
pub use compositor::{composite, composite_into, mask_preview, resample_mask};
pub use config::{BackgroundColor, OutputFormat, PipelineConfig, PipelineConfigBuilder};
pub use error::{PixkitError, Result};
pub use inference::{
    ImageMaskSource, ImagePreprocessor, InferenceBackend, Letterbox, MaskFn, MaskSource,
    ModelMaskSource, PreprocessingOptions,
};
pub use pipeline::{
    fit_within, DecodedImage, Generation, GenerationCounter, Pipeline, PipelineOutput, Transform,
};
pub use services::{
    ConsoleProgressReporter, ImageIOService, NoOpProgressReporter, OutputFormatHandler,
    ProcessingStage, ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use types::{
    AlphaMode, CompositeResult, MaskBuffer, MaskStatistics, PipelineTimings, ProcessingMetadata,
    RasterImage, Threshold,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat};

/// Remove the background of an encoded image using an encoded grayscale mask
///
/// The mask may have any resolution; it is resampled to the (possibly
/// downscaled) image before compositing. The output uses
/// `config.output_format`.
///
/// # Examples
///
/// ```rust,no_run
/// use pixkit::{remove_background_from_bytes, AlphaMode, PipelineConfig, Threshold};
///
/// # fn example(photo: Vec<u8>, mask: Vec<u8>) -> pixkit::Result<()> {
/// let output = remove_background_from_bytes(
///     &photo,
///     &mask,
///     Threshold::new(0.7)?,
///     AlphaMode::Soft,
///     &PipelineConfig::default(),
/// )?;
/// std::fs::write(output.suggested_file_name(), &output.bytes)?;
/// # Ok(())
/// # }
/// ```
pub fn remove_background_from_bytes(
    image_bytes: &[u8],
    mask_bytes: &[u8],
    threshold: Threshold,
    mode: AlphaMode,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    let source = ImageMaskSource::from_bytes(mask_bytes)?;
    let mut tool = tools::BackgroundRemoval::new(source, threshold, mode);
    Pipeline::new(config.clone())?.run(image_bytes, &mut tool)
}

/// Like [`remove_background_from_bytes`], reading the image from an async stream
///
/// # Examples
///
/// ```rust,no_run
/// use pixkit::{remove_background_from_reader, AlphaMode, PipelineConfig, Threshold};
/// use tokio::fs::File;
///
/// # async fn example() -> anyhow::Result<()> {
/// let photo = File::open("photo.jpg").await?;
/// let mask = std::fs::read("mask.png")?;
/// let output = remove_background_from_reader(
///     photo,
///     &mask,
///     Threshold::new(0.5)?,
///     AlphaMode::Binary,
///     &PipelineConfig::default(),
/// )
/// .await?;
/// output.save("photo-no-bg.png")?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    reader: R,
    mask_bytes: &[u8],
    threshold: Threshold,
    mode: AlphaMode,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    let source = ImageMaskSource::from_bytes(mask_bytes)?;
    let mut tool = tools::BackgroundRemoval::new(source, threshold, mode);
    Pipeline::new(config.clone())?
        .run_reader(reader, &mut tool)
        .await
}
