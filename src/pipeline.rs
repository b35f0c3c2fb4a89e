//! Pipeline harness shared by every tool
//!
//! Each tool is a [`Transform`]; the pipeline owns everything around it:
//! size caps, format detection, decoding, downscaling, encoding, output
//! naming, timings and progress. Tools never see bytes or files.

use crate::{
    config::{OutputFormat, PipelineConfig},
    error::{PixkitError, Result},
    services::{
        ImageIOService, OutputFormatHandler, ProcessingStage, ProgressReporter, ProgressTracker,
    },
    types::{PipelineTimings, ProcessingMetadata, RasterImage},
};
use image::{imageops::FilterType, ImageFormat};
use instant::Instant;
use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, info, instrument, span, Level};

/// A single-image operation plugged into the pipeline
pub trait Transform {
    /// Tool name used in logs and metadata
    fn name(&self) -> &str;

    /// Suffix appended to the input basename for the output file
    ///
    /// Called after [`Transform::apply`], so it may depend on the result.
    fn output_suffix(&self) -> String;

    /// Produce the output image
    ///
    /// # Errors
    /// - Tool-specific failures (invalid parameters, mask source errors, ...)
    fn apply(&mut self, image: &RasterImage) -> Result<RasterImage>;
}

impl<T: Transform + ?Sized> Transform for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn output_suffix(&self) -> String {
        (**self).output_suffix()
    }

    fn apply(&mut self, image: &RasterImage) -> Result<RasterImage> {
        (**self).apply(image)
    }
}

/// A decoded input ready for a transform
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Pixels after downscaling
    pub image: RasterImage,
    /// Detected input format
    pub format: ImageFormat,
    /// Dimensions before downscaling
    pub original_dimensions: (u32, u32),
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The transform's output before format conversion
    pub image: RasterImage,
    /// Encoded output
    pub bytes: Vec<u8>,
    /// Encoding used for `bytes`
    pub format: OutputFormat,
    pub metadata: ProcessingMetadata,
    suffix: String,
    basename: Option<String>,
}

impl PipelineOutput {
    /// Attach the input file name used for [`PipelineOutput::suggested_file_name`]
    #[must_use]
    pub fn with_source_name(mut self, name: &str) -> Self {
        self.basename = input_basename(name);
        self
    }

    /// `<basename><suffix>.<ext>`, with `image` as the basename when unknown
    #[must_use]
    pub fn suggested_file_name(&self) -> String {
        format!(
            "{}{}.{}",
            self.basename.as_deref().unwrap_or("image"),
            self.suffix,
            OutputFormatHandler::get_extension(self.format)
        )
    }

    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Write the encoded bytes to `path`
    ///
    /// # Errors
    /// - `Io` if the file cannot be written
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ImageIOService::save_bytes(&self.bytes, path)
    }

    /// Write the encoded bytes to an async writer
    ///
    /// # Errors
    /// - `Processing` if the write fails
    pub async fn write_to<W: tokio::io::AsyncWrite + Unpin>(&self, writer: W) -> Result<u64> {
        ImageIOService::save_to_writer(&self.bytes, writer).await
    }
}

/// Input file name without its final extension, `None` when nothing is left
fn input_basename(name: &str) -> Option<String> {
    Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Dimensions that fit inside `max_dimension` on the longest side
///
/// Aspect ratio is preserved with `round(w * scale)`; sides never drop below 1.
#[must_use]
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension || longest == 0 {
        return (width, height);
    }

    let scale = f64::from(max_dimension) / f64::from(longest);
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Decode, transform and encode single images
pub struct Pipeline {
    config: PipelineConfig,
    progress: ProgressTracker,
}

impl Pipeline {
    /// Create a pipeline with a validated configuration
    ///
    /// # Errors
    /// - `InvalidConfig` if the configuration is invalid
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress: ProgressTracker::no_op(),
        })
    }

    /// Report stage transitions to `reporter`
    #[must_use]
    pub fn with_progress(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.progress = ProgressTracker::new(reporter);
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.config.max_file_size {
            return Err(PixkitError::FileTooLarge {
                size,
                limit: self.config.max_file_size,
            });
        }
        Ok(())
    }

    fn check_file_size(&self, path: &Path) -> Result<()> {
        let size = std::fs::metadata(path)
            .map_err(|e| PixkitError::file_io_error("read file metadata", path, &e))?
            .len();
        self.check_size(size)
    }

    /// Validate and decode input bytes, downscaling to the dimension cap
    ///
    /// # Errors
    /// - `FileTooLarge` above `max_file_size`
    /// - `EmptyInput` for zero bytes or a zero-sized image
    /// - `UnsupportedFormat` for non-image content
    /// - `Processing` if decoding fails
    #[instrument(skip(self, bytes), fields(input_bytes = bytes.len()))]
    pub fn decode(&mut self, bytes: &[u8]) -> Result<DecodedImage> {
        self.progress.report_stage(ProcessingStage::Validation);
        self.check_size(bytes.len() as u64)?;
        if bytes.is_empty() {
            return Err(PixkitError::empty_input("input has zero bytes"));
        }
        let format = ImageIOService::detect_format(bytes)?;

        self.progress.report_stage(ProcessingStage::Decoding);
        let decoded = image::load_from_memory_with_format(bytes, format).map_err(|e| {
            PixkitError::processing_stage_error(
                "decode",
                &e.to_string(),
                Some(&format!("{:?}, {} bytes", format, bytes.len())),
            )
        })?;
        let image = RasterImage::from_dynamic(&decoded);
        let original_dimensions = image.dimensions();
        if image.is_empty() {
            return Err(PixkitError::empty_input("decoded image has zero pixels"));
        }

        let (width, height) = fit_within(
            original_dimensions.0,
            original_dimensions.1,
            self.config.max_dimension,
        );
        let image = if (width, height) == original_dimensions {
            image
        } else {
            self.progress.report_stage(ProcessingStage::Downscaling);
            let _span = span!(Level::DEBUG, "downscale", width, height).entered();
            let resized = image::imageops::resize(
                &image.into_rgba_image()?,
                width,
                height,
                FilterType::Triangle,
            );
            debug!(
                from = ?original_dimensions,
                to = ?(width, height),
                "Downscaled input to dimension cap"
            );
            RasterImage::from_rgba_image(resized)
        };

        Ok(DecodedImage {
            image,
            format,
            original_dimensions,
        })
    }

    /// Check the size cap, read and decode a file
    ///
    /// # Errors
    /// - `Io` if the file cannot be read, plus everything [`Pipeline::decode`] returns
    pub fn decode_file<P: AsRef<Path>>(&mut self, path: P) -> Result<DecodedImage> {
        let path = path.as_ref();
        self.check_file_size(path)?;

        let bytes = ImageIOService::read_file(path)?;
        self.decode(&bytes)
    }

    /// Flatten if needed and encode
    ///
    /// # Errors
    /// - `Processing` if the encoder fails
    pub fn encode(&self, image: RasterImage, format: OutputFormat) -> Result<Vec<u8>> {
        if image.opaque_pixel_count() != image.pixel_count() {
            OutputFormatHandler::validate_for_transparency(format);
        }
        let dynamic = OutputFormatHandler::convert_format(image, format, self.config.background)?;
        ImageIOService::encode(&dynamic, format, self.config.jpeg_quality)
    }

    /// Run `transform` on encoded input, producing the configured output format
    ///
    /// # Errors
    /// - Any error from [`Pipeline::decode`], the transform, or encoding
    pub fn run<T: Transform + ?Sized>(
        &mut self,
        bytes: &[u8],
        transform: &mut T,
    ) -> Result<PipelineOutput> {
        let format = self.config.output_format;
        self.run_to(bytes, transform, format)
    }

    /// Run `transform` and encode as `format`
    ///
    /// # Errors
    /// - Any error from [`Pipeline::decode`], the transform, or encoding
    #[instrument(skip(self, bytes, transform), fields(tool = transform.name(), input_bytes = bytes.len(), format = %format))]
    pub fn run_to<T: Transform + ?Sized>(
        &mut self,
        bytes: &[u8],
        transform: &mut T,
        format: OutputFormat,
    ) -> Result<PipelineOutput> {
        self.progress.restart();
        let result = self.run_stages(bytes, transform, format);
        match &result {
            Ok(output) => {
                self.progress.report_stage(ProcessingStage::Completed);
                self.progress
                    .report_completion(transform.name(), &output.metadata.timings);
            },
            Err(e) => self.progress.report_error(&e.to_string()),
        }
        result
    }

    fn run_stages<T: Transform + ?Sized>(
        &mut self,
        bytes: &[u8],
        transform: &mut T,
        format: OutputFormat,
    ) -> Result<PipelineOutput> {
        let total_start = Instant::now();
        let mut timings = PipelineTimings::default();

        let decode_start = Instant::now();
        let decoded = self.decode(bytes)?;
        timings.decode_ms = decode_start.elapsed().as_millis() as u64;

        self.progress.report_stage_with_description(
            ProcessingStage::Transform,
            format!("Applying {}", transform.name()),
        );
        let transform_start = Instant::now();
        let image = {
            let _span = span!(Level::DEBUG, "transform", tool = transform.name()).entered();
            transform.apply(&decoded.image)?
        };
        timings.transform_ms = transform_start.elapsed().as_millis() as u64;
        if self.config.debug {
            debug!(
                input = ?decoded.image.dimensions(),
                output = ?image.dimensions(),
                opaque_pixels = image.opaque_pixel_count(),
                "Transform output"
            );
        }

        self.progress.report_stage(ProcessingStage::Encoding);
        let encode_start = Instant::now();
        let encoded = {
            let _span = span!(Level::DEBUG, "encode", format = %format).entered();
            self.encode(image.clone(), format)?
        };
        timings.encode_ms = encode_start.elapsed().as_millis() as u64;
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        let mut metadata = ProcessingMetadata::new(transform.name().to_string());
        metadata.timings = timings;
        metadata.input_format = format!("{:?}", decoded.format).to_lowercase();
        metadata.output_format = format.to_string();
        metadata.original_dimensions = decoded.original_dimensions;
        metadata.working_dimensions = decoded.image.dimensions();

        info!(
            tool = transform.name(),
            total_ms = metadata.timings.total_ms,
            output_bytes = encoded.len(),
            "Pipeline run finished"
        );

        Ok(PipelineOutput {
            image,
            bytes: encoded,
            format,
            metadata,
            suffix: transform.output_suffix(),
            basename: None,
        })
    }

    /// Run on a file, checking the size cap before reading it
    ///
    /// # Errors
    /// - `Io` if the file cannot be read, plus everything [`Pipeline::run`] returns
    pub fn run_file<P: AsRef<Path>, T: Transform + ?Sized>(
        &mut self,
        path: P,
        transform: &mut T,
    ) -> Result<PipelineOutput> {
        let format = self.config.output_format;
        self.run_file_to(path, transform, format)
    }

    /// Run on a file and encode as `format`
    ///
    /// # Errors
    /// - As for [`Pipeline::run_file`]
    pub fn run_file_to<P: AsRef<Path>, T: Transform + ?Sized>(
        &mut self,
        path: P,
        transform: &mut T,
        format: OutputFormat,
    ) -> Result<PipelineOutput> {
        let path = path.as_ref();
        self.check_file_size(path)?;

        let bytes = ImageIOService::read_file(path)?;
        let output = self.run_to(&bytes, transform, format)?;
        Ok(match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => output.with_source_name(name),
            None => output,
        })
    }

    /// Read from an async reader, then run synchronously
    ///
    /// Reading stops as soon as the stream passes `max_file_size`.
    ///
    /// # Errors
    /// - `FileTooLarge` if the stream is longer than `max_file_size`
    /// - `Processing` if reading fails, plus everything [`Pipeline::run`] returns
    pub async fn run_reader<R, T>(&mut self, reader: R, transform: &mut T) -> Result<PipelineOutput>
    where
        R: tokio::io::AsyncRead + Unpin,
        T: Transform + ?Sized,
    {
        let bytes = ImageIOService::read_from_reader(reader, self.config.max_file_size).await?;
        self.run(&bytes, transform)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Token identifying one request in a sequence of requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

/// Hands out generation tokens so callers can drop stale results
///
/// Starting a new request makes every earlier token stale.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: AtomicU64,
}

impl GenerationCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request; all previously issued tokens become stale
    pub fn begin(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether `generation` belongs to the latest request
    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.current.load(Ordering::SeqCst) == generation.0
    }
}
