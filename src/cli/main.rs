//! pixkit command-line interface
//!
//! One subcommand per tool. Every image-producing command goes through the
//! same [`Pipeline`]; inputs may be files, directories, or `-` for stdin.

use super::config::CliConfigBuilder;
use crate::{
    config::{OutputFormat, PipelineConfig},
    pipeline::{Pipeline, PipelineOutput, Transform},
    services::{ConsoleProgressReporter, ImageIOService, OutputFormatHandler},
    tools::{sample_color, ImagesToPdf, DEFAULT_SWATCH_SIZE, MAX_PDF_IMAGES, PDF_FILE_NAME},
    tracing_config::{init_cli_tracing, spans},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use instant::Instant;

const FAILURE_HINT: &str = "Processing failed. Try again or choose a different image.";

/// Single-image tools: background removal, resize, compress, convert, crop, color picking, PDF
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "pixkit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON pipeline configuration file
    #[arg(long, value_name = "JSON", global = true)]
    pub config: Option<PathBuf>,

    /// Output file (single input) or directory (batch). "-" writes to stdout.
    #[arg(short, long, value_name = "OUTPUT", global = true)]
    pub output: Option<PathBuf>,

    /// Descend into subdirectories
    #[arg(short, long, global = true)]
    pub recursive: bool,

    /// File name filter for directory inputs (e.g. "*.jpg")
    #[arg(long, global = true)]
    pub pattern: Option<String>,

    /// Longest side after decoding; larger inputs are downscaled
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_dimension: Option<u32>,

    /// Largest accepted input file in megabytes
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_file_size_mb: Option<u64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Cut out the foreground using a grayscale mask (white = keep)
    RemoveBg {
        /// Mask image at any resolution; it is resampled to each input
        #[arg(long, value_name = "PATH")]
        mask: PathBuf,

        /// Foreground cutoff between 0 and 1
        #[arg(long)]
        threshold: f32,

        #[arg(long, value_enum, default_value_t = CliAlphaMode::Binary)]
        mode: CliAlphaMode,

        /// Write the resampled mask instead of the cutout
        #[arg(long)]
        preview_mask: bool,

        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Resize to a width and/or height
    Resize {
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        width: Option<u32>,

        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        height: Option<u32>,

        /// Derive the missing side from the original aspect ratio
        #[arg(long)]
        keep_aspect: bool,

        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Downscale to the dimension cap and re-encode
    Compress {
        /// JPEG quality (1-100)
        #[arg(long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: u8,

        /// Output format [default: same as input]
        #[arg(long, value_enum)]
        format: Option<CliOutputFormat>,

        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Convert to another format, flattening transparency where needed
    Convert {
        #[arg(long, value_enum)]
        format: CliOutputFormat,

        /// JPEG quality (1-100)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: Option<u8>,

        /// Flatten color as RRGGBB [default: FFFFFF]
        #[arg(long, value_name = "RRGGBB")]
        background: Option<String>,

        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Crop to a rectangle
    Crop {
        #[arg(long)]
        x: u32,

        #[arg(long)]
        y: u32,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Print the color at a pixel as HEX, RGB and HSL
    PickColor {
        #[arg(long)]
        x: u32,

        #[arg(long)]
        y: u32,

        /// Also write a 200x200 swatch PNG (file or directory)
        #[arg(long, value_name = "PATH")]
        swatch: Option<PathBuf>,

        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Put up to 20 images into an A4 PDF, one per page, in argument order
    ImagesToPdf {
        /// JPEG quality for the embedded pages (1-100)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: Option<u8>,

        /// Color behind transparent pixels as RRGGBB [default: FFFFFF]
        #[arg(long, value_name = "RRGGBB")]
        background: Option<String>,

        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,
    },
}

impl Command {
    #[must_use]
    pub fn inputs(&self) -> &[PathBuf] {
        match self {
            Self::RemoveBg { inputs, .. }
            | Self::Resize { inputs, .. }
            | Self::Compress { inputs, .. }
            | Self::Convert { inputs, .. }
            | Self::Crop { inputs, .. }
            | Self::PickColor { inputs, .. }
            | Self::ImagesToPdf { inputs, .. } => inputs,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
    Webp,
    Tiff,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliAlphaMode {
    Binary,
    Soft,
}

/// Outcome of processing several files
#[derive(Debug, Default)]
struct BatchSummary {
    written: Vec<PathBuf>,
    failed: Vec<(PathBuf, String)>,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    let result = run(&cli).await;
    if result.is_err() {
        eprintln!("{}", FAILURE_HINT);
    }
    result
}

async fn run(cli: &Cli) -> Result<()> {
    CliConfigBuilder::validate_cli(cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(cli).context("Failed to build configuration")?;

    let inputs = cli.command.inputs();
    let from_stdin = inputs.len() == 1 && inputs.first().is_some_and(|p| p == Path::new("-"));

    if let Command::PickColor { x, y, swatch, .. } = &cli.command {
        if from_stdin {
            anyhow::bail!("pick-color reads from a file, not stdin");
        }
        let files = collect_inputs(inputs, cli.recursive, cli.pattern.as_deref())?;
        let input = single_input(&files)?;
        return pick_color(config, input, *x, *y, swatch.as_deref());
    }

    if let Command::ImagesToPdf { .. } = &cli.command {
        if from_stdin {
            anyhow::bail!("images-to-pdf reads files, not stdin");
        }
        let files = expand_inputs(inputs, cli.recursive, cli.pattern.as_deref())?;
        return images_to_pdf(cli, config, &files).await;
    }

    let mut transform = CliConfigBuilder::transform(cli, &config)?
        .context("Command does not produce an image")?;
    let mut pipeline =
        Pipeline::new(config)?.with_progress(Box::new(ConsoleProgressReporter::new(cli.verbose > 0)));

    if from_stdin {
        return process_stdin(cli, &mut pipeline, transform.as_mut()).await;
    }

    let files = collect_inputs(inputs, cli.recursive, cli.pattern.as_deref())?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(());
    }

    let summary = process_batch(cli, &mut pipeline, transform.as_mut(), &files)?;
    if !summary.failed.is_empty() {
        anyhow::bail!(
            "{} of {} file(s) failed",
            summary.failed.len(),
            files.len()
        );
    }
    Ok(())
}

fn process_batch(
    cli: &Cli,
    pipeline: &mut Pipeline,
    transform: &mut dyn Transform,
    files: &[PathBuf],
) -> Result<BatchSummary> {
    let _span = spans::batch_processing(transform.name(), files.len()).entered();
    let batch = files.len() > 1;
    let output_dir = if batch {
        prepare_output_dir(cli.output.as_deref())?
    } else {
        None
    };
    let keep_input_format = CliConfigBuilder::keeps_input_format(cli);

    info!("Found {} image file(s) to process", files.len());

    let progress_bar = if batch {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let batch_start = Instant::now();
    let mut summary = BatchSummary::default();

    for input in files {
        if let Some(pb) = &progress_bar {
            pb.set_message(format!("{}", input.display()));
        }

        let target = if batch {
            output_dir.as_deref()
        } else {
            cli.output.as_deref()
        };

        match process_file(pipeline, transform, input, target, batch, keep_input_format) {
            Ok(path) => {
                log::debug!("Processed {} -> {}", input.display(), path.display());
                summary.written.push(path);
            },
            Err(e) => {
                error!("Failed to process {}: {:#}", input.display(), e);
                summary.failed.push((input.clone(), format!("{:#}", e)));
            },
        }

        if let Some(pb) = &progress_bar {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress_bar {
        pb.finish_with_message(format!(
            "Done. Written: {}, Failed: {}",
            summary.written.len(),
            summary.failed.len()
        ));
    }

    if batch {
        let elapsed = batch_start.elapsed();
        info!("Batch summary:");
        info!("  written: {}", summary.written.len());
        info!("  failed:  {}", summary.failed.len());
        info!("  time:    {:.2}s", elapsed.as_secs_f64());
        for (path, reason) in &summary.failed {
            warn!("  {}: {}", path.display(), reason);
        }
    }

    Ok(summary)
}

fn process_file(
    pipeline: &mut Pipeline,
    transform: &mut dyn Transform,
    input: &Path,
    target: Option<&Path>,
    batch: bool,
    keep_input_format: bool,
) -> Result<PathBuf> {
    let _span = spans::file_processing(input, transform.name()).entered();

    let format = if keep_input_format {
        ImageIOService::detect_file_format(input)
            .ok()
            .and_then(OutputFormatHandler::from_image_format)
            .unwrap_or(OutputFormat::Png)
    } else {
        pipeline.config().output_format
    };

    let output = pipeline
        .run_file_to(input, transform, format)
        .with_context(|| format!("Failed to process {}", input.display()))?;
    let path = resolve_output_path(input, &output, target, batch);
    output
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(
        "{} -> {} ({} bytes, {}ms)",
        input.display(),
        path.display(),
        output.bytes.len(),
        output.metadata.timings.total_ms
    );
    Ok(path)
}

async fn process_stdin(
    cli: &Cli,
    pipeline: &mut Pipeline,
    transform: &mut dyn Transform,
) -> Result<()> {
    info!("Reading image from stdin");
    let output = pipeline
        .run_reader(tokio::io::stdin(), transform)
        .await
        .context("Failed to process stdin")?;

    match cli.output.as_deref() {
        Some(path) if path != Path::new("-") => {
            let path = if path.is_dir() {
                path.join(output.suggested_file_name())
            } else {
                path.to_path_buf()
            };
            output.save(&path)?;
            info!("Wrote {}", path.display());
        },
        _ => {
            output.write_to(tokio::io::stdout()).await?;
        },
    }
    Ok(())
}

fn pick_color(
    config: PipelineConfig,
    input: &Path,
    x: u32,
    y: u32,
    swatch: Option<&Path>,
) -> Result<()> {
    let mut pipeline = Pipeline::new(config)?;
    let bytes = ImageIOService::read_file(input)?;
    let decoded = pipeline.decode(&bytes)?;
    if decoded.original_dimensions != decoded.image.dimensions() {
        warn!(
            "Image was downscaled from {:?} to {:?}; coordinates refer to the downscaled image",
            decoded.original_dimensions,
            decoded.image.dimensions()
        );
    }

    let sample = sample_color(&decoded.image, x, y)?;
    println!("HEX  {}", sample.hex());
    println!("RGB  {}", sample.rgb());
    println!("HSL  {}", sample.hsl());
    println!("at   x:{} y:{}", sample.x, sample.y);

    if let Some(target) = swatch {
        let path = if target.is_dir() {
            target.join(sample.swatch_file_name())
        } else {
            target.to_path_buf()
        };
        let png = pipeline.encode(sample.swatch(DEFAULT_SWATCH_SIZE), OutputFormat::Png)?;
        ImageIOService::save_bytes(&png, &path)?;
        info!("Swatch written to {}", path.display());
    }

    Ok(())
}

async fn images_to_pdf(cli: &Cli, config: PipelineConfig, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        anyhow::bail!("No supported image found in the inputs");
    }
    if files.len() > MAX_PDF_IMAGES {
        anyhow::bail!(
            "images-to-pdf takes at most {} images, the inputs expand to {}",
            MAX_PDF_IMAGES,
            files.len()
        );
    }

    let _span = spans::batch_processing("images-to-pdf", files.len()).entered();
    let builder = ImagesToPdf::new()
        .jpeg_quality(config.jpeg_quality)
        .background(config.background);
    let mut pipeline = Pipeline::new(config)?;

    let mut pages = Vec::with_capacity(files.len());
    for input in files {
        let decoded = pipeline
            .decode_file(input)
            .with_context(|| format!("Failed to load {}", input.display()))?;
        log::debug!(
            "Page {}: {} ({}x{})",
            pages.len() + 1,
            input.display(),
            decoded.image.width(),
            decoded.image.height()
        );
        pages.push(decoded.image);
    }

    let bytes = builder.render(&pages)?;

    match cli.output.as_deref() {
        Some(path) if path == Path::new("-") => {
            ImageIOService::save_to_writer(&bytes, tokio::io::stdout()).await?;
        },
        target => {
            let path = match target {
                Some(dir) if dir.is_dir() => dir.join(PDF_FILE_NAME),
                Some(file) => file.to_path_buf(),
                None => PathBuf::from(PDF_FILE_NAME),
            };
            ImageIOService::save_bytes(&bytes, &path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("PDF ready: {} pages -> {}", pages.len(), path.display());
        },
    }
    Ok(())
}

/// Expand files and directories into a sorted list of image files
fn collect_inputs(inputs: &[PathBuf], recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = expand_inputs(inputs, recursive, pattern)?;
    files.sort();
    files.dedup();
    Ok(files)
}

/// Expand inputs keeping argument order; directory contents come sorted
///
/// Repeated paths keep their first position.
fn expand_inputs(inputs: &[PathBuf], recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();

    for path in inputs {
        let found = if path.is_file() {
            if ImageIOService::is_supported_format(path) {
                vec![path.clone()]
            } else {
                warn!("Skipping unsupported file: {}", path.display());
                Vec::new()
            }
        } else if path.is_dir() {
            let mut found = find_image_files(path, recursive, pattern)?;
            found.sort();
            found
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        };

        for file in found {
            if !files.contains(&file) {
                files.push(file);
            }
        }
    }

    Ok(files)
}

/// The only file of an expanded input list
///
/// A directory that holds several images is ambiguous for single-image commands.
fn single_input(files: &[PathBuf]) -> Result<&Path> {
    match files {
        [] => anyhow::bail!("No supported image found in the inputs"),
        [only] => Ok(only),
        _ => anyhow::bail!(
            "Expected exactly one image, the inputs expand to {} files; pass a single file or use --pattern",
            files.len()
        ),
    }
}

fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let max_depth = if recursive { usize::MAX } else { 1 };

    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file()
            && ImageIOService::is_supported_format(path)
            && matches_pattern(path, pattern)
        {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(name))
                .unwrap_or(false)
        })
}

/// Create the batch output directory if one was requested
fn prepare_output_dir(output: Option<&Path>) -> Result<Option<PathBuf>> {
    let Some(dir) = output else {
        return Ok(None);
    };
    if dir == Path::new("-") {
        anyhow::bail!("Cannot write multiple outputs to stdout");
    }
    if dir.is_file() {
        anyhow::bail!(
            "Output path exists and is a file, not a directory: {}",
            dir.display()
        );
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    Ok(Some(dir.to_path_buf()))
}

/// Where to write one output
///
/// Batch runs and directory targets get the suggested name inside the
/// directory; otherwise an explicit target is used as-is, and without one
/// the output lands next to the input.
fn resolve_output_path(
    input: &Path,
    output: &PipelineOutput,
    target: Option<&Path>,
    batch: bool,
) -> PathBuf {
    let name = output.suggested_file_name();
    match target {
        Some(dir) if batch || dir.is_dir() => dir.join(name),
        Some(file) => file.to_path_buf(),
        None => input.parent().unwrap_or_else(|| Path::new(".")).join(name),
    }
}
