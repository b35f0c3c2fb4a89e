//! Turn parsed CLI arguments into a pipeline configuration and a tool

use crate::cli::main_impl::{Cli, CliAlphaMode, CliOutputFormat, Command};
use crate::{
    config::{BackgroundColor, OutputFormat, PipelineConfig},
    inference::ImageMaskSource,
    pipeline::Transform,
    tools::{pdf::PDF_MAX_IMAGE_BYTES, BackgroundRemoval, Crop, Flatten, Identity, Resize},
    types::{AlphaMode, Threshold},
};
use anyhow::{Context, Result};

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => Self::Png,
            CliOutputFormat::Jpeg => Self::Jpeg,
            CliOutputFormat::Webp => Self::WebP,
            CliOutputFormat::Tiff => Self::Tiff,
        }
    }
}

impl From<CliAlphaMode> for AlphaMode {
    fn from(mode: CliAlphaMode) -> Self {
        match mode {
            CliAlphaMode::Binary => Self::Binary,
            CliAlphaMode::Soft => Self::Soft,
        }
    }
}

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Reject argument combinations clap cannot express
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        match &cli.command {
            Command::RemoveBg { threshold, .. } => {
                Threshold::new(*threshold).context("Invalid --threshold")?;
            },
            Command::Resize { width, height, .. } => {
                if width.is_none() && height.is_none() {
                    anyhow::bail!("resize needs --width, --height, or both");
                }
            },
            Command::Convert {
                background: Some(hex),
                ..
            }
            | Command::ImagesToPdf {
                background: Some(hex),
                ..
            } => {
                BackgroundColor::from_hex(hex).context("Invalid --background")?;
            },
            _ => {},
        }

        if cli.command.inputs().len() > 1 && matches!(cli.command, Command::PickColor { .. }) {
            anyhow::bail!("pick-color takes exactly one input");
        }

        Ok(())
    }

    /// Config file (if any), then global flags, then per-command settings
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let base = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        let mut builder = PipelineConfig::builder()
            .max_file_size(base.max_file_size)
            .max_dimension(base.max_dimension)
            .output_format(base.output_format)
            .jpeg_quality(base.jpeg_quality)
            .background(base.background)
            .debug(base.debug || cli.verbose >= 2);

        if let Some(mb) = cli.max_file_size_mb {
            builder = builder.max_file_size_mb(mb);
        }
        if let Some(pixels) = cli.max_dimension {
            builder = builder.max_dimension(pixels);
        }

        match &cli.command {
            Command::RemoveBg { .. } => {
                builder = builder.output_format(OutputFormat::Png);
            },
            Command::Compress {
                quality, format, ..
            } => {
                builder = builder.jpeg_quality(*quality);
                if let Some(format) = format {
                    builder = builder.output_format((*format).into());
                }
            },
            Command::Convert {
                format,
                quality,
                background,
                ..
            } => {
                builder = builder.output_format((*format).into());
                if let Some(quality) = quality {
                    builder = builder.jpeg_quality(*quality);
                }
                if let Some(hex) = background {
                    builder = builder.background(BackgroundColor::from_hex(hex)?);
                }
            },
            Command::ImagesToPdf {
                quality,
                background,
                ..
            } => {
                if cli.max_file_size_mb.is_none() && cli.config.is_none() {
                    builder = builder.max_file_size(PDF_MAX_IMAGE_BYTES);
                }
                if let Some(quality) = quality {
                    builder = builder.jpeg_quality(*quality);
                }
                if let Some(hex) = background {
                    builder = builder.background(BackgroundColor::from_hex(hex)?);
                }
            },
            Command::Resize { .. } | Command::Crop { .. } | Command::PickColor { .. } => {},
        }

        builder.build().context("Invalid pipeline configuration")
    }

    /// Whether the output format follows the input file's format
    ///
    /// Only compression without an explicit `--format` or config file does
    /// this, so a JPEG stays a JPEG.
    pub(crate) fn keeps_input_format(cli: &Cli) -> bool {
        matches!(cli.command, Command::Compress { format: None, .. }) && cli.config.is_none()
    }

    /// Build the transform for a command; `None` for `pick-color` and `images-to-pdf`
    pub(crate) fn transform(
        cli: &Cli,
        config: &PipelineConfig,
    ) -> Result<Option<Box<dyn Transform>>> {
        let transform: Box<dyn Transform> = match &cli.command {
            Command::RemoveBg {
                mask,
                threshold,
                mode,
                preview_mask,
                ..
            } => {
                let source = ImageMaskSource::from_path(mask)
                    .with_context(|| format!("Failed to load mask {}", mask.display()))?;
                Box::new(
                    BackgroundRemoval::new(source, Threshold::new(*threshold)?, (*mode).into())
                        .preview_mask(*preview_mask),
                )
            },
            Command::Resize {
                width,
                height,
                keep_aspect,
                ..
            } => Box::new(Resize::new(*width, *height, *keep_aspect)?),
            Command::Compress { .. } => Box::new(Identity::compressed()),
            Command::Convert { format, .. } => {
                let output: OutputFormat = (*format).into();
                if output == OutputFormat::Jpeg {
                    // Returned image matches the encoded JPEG
                    Box::new(Flatten::converted(config.background))
                } else {
                    Box::new(Identity::converted())
                }
            },
            Command::Crop {
                x,
                y,
                width,
                height,
                ..
            } => Box::new(Crop::new(*x, *y, *width, *height)),
            Command::PickColor { .. } | Command::ImagesToPdf { .. } => return Ok(None),
        };
        Ok(Some(transform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pixkit").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_remove_bg_requires_threshold() {
        assert!(Cli::try_parse_from(["pixkit", "remove-bg", "--mask", "m.png", "in.png"]).is_err());

        let cli = parse(&["remove-bg", "--mask", "m.png", "--threshold", "0.7", "in.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_ok());
        assert_eq!(
            CliConfigBuilder::from_cli(&cli).unwrap().output_format,
            OutputFormat::Png
        );
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let cli = parse(&["remove-bg", "--mask", "m.png", "--threshold", "1.5", "in.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
    }

    #[test]
    fn test_resize_needs_a_side() {
        let cli = parse(&["resize", "in.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        let cli = parse(&["resize", "--width", "400", "--keep-aspect", "in.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_ok());
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        let transform = CliConfigBuilder::transform(&cli, &config).unwrap().unwrap();
        assert_eq!(transform.name(), "resize");
    }

    #[test]
    fn test_global_flags_override_defaults() {
        let cli = parse(&[
            "--max-dimension",
            "512",
            "--max-file-size-mb",
            "5",
            "compress",
            "--quality",
            "40",
            "in.jpg",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.max_dimension, 512);
        assert_eq!(config.max_file_size, 5 * 1024 * 1024);
        assert_eq!(config.jpeg_quality, 40);
        assert!(CliConfigBuilder::keeps_input_format(&cli));
    }

    #[test]
    fn test_convert_settings() {
        let cli = parse(&[
            "convert",
            "--format",
            "jpeg",
            "--quality",
            "70",
            "--background",
            "000000",
            "in.png",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.output_format, OutputFormat::Jpeg);
        assert_eq!(config.jpeg_quality, 70);
        assert_eq!(config.background, BackgroundColor::new(0, 0, 0));
        assert!(!CliConfigBuilder::keeps_input_format(&cli));

        let transform = CliConfigBuilder::transform(&cli, &config).unwrap().unwrap();
        assert_eq!(transform.name(), "convert");
        assert_eq!(transform.output_suffix(), "-converted");

        // Every target format names its output the same way
        let cli = parse(&["convert", "--format", "webp", "in.png"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        let transform = CliConfigBuilder::transform(&cli, &config).unwrap().unwrap();
        assert_eq!(transform.output_suffix(), "-converted");
    }

    #[test]
    fn test_quality_range_enforced_by_parser() {
        assert!(Cli::try_parse_from(["pixkit", "compress", "--quality", "0", "in.jpg"]).is_err());
        assert!(Cli::try_parse_from(["pixkit", "compress", "--quality", "101", "in.jpg"]).is_err());
    }

    #[test]
    fn test_invalid_background_rejected() {
        let cli = parse(&["convert", "--format", "jpeg", "--background", "xyz", "in.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
    }

    #[test]
    fn test_config_file_is_base() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_dimension": 800, "output_format": "webp"}}"#).unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cli = parse(&["--config", &path, "crop", "--x", "0", "--y", "0", "--width", "1", "--height", "1", "in.png"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.max_dimension, 800);
        assert_eq!(config.output_format, OutputFormat::WebP);
    }

    #[test]
    fn test_pick_color_has_no_transform() {
        let cli = parse(&["pick-color", "--x", "3", "--y", "4", "in.png"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert!(CliConfigBuilder::transform(&cli, &config).unwrap().is_none());

        let cli = parse(&["pick-color", "--x", "3", "--y", "4", "a.png", "b.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
    }

    #[test]
    fn test_images_to_pdf_settings() {
        let cli = parse(&["images-to-pdf", "--quality", "60", "a.png", "b.jpg"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_ok());
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.jpeg_quality, 60);
        assert_eq!(config.max_file_size, PDF_MAX_IMAGE_BYTES);
        assert!(CliConfigBuilder::transform(&cli, &config).unwrap().is_none());

        // An explicit cap wins over the per-image default
        let cli = parse(&["--max-file-size-mb", "30", "images-to-pdf", "a.png"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.max_file_size, 30 * 1024 * 1024);

        let cli = parse(&["images-to-pdf", "--background", "nope", "a.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
    }
}
