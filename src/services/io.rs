//! Image I/O service
//!
//! File and stream access, format detection and encoding, kept separate from
//! the pipeline so tools never touch the filesystem.

use crate::{
    config::OutputFormat,
    error::{PixkitError, Result},
    services::OutputFormatHandler,
};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat};
use std::path::Path;

/// Service for image file and stream input/output
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Tries extension-based detection first and falls back to sniffing the
    /// content, so mislabeled files still load.
    ///
    /// # Errors
    /// - `Io` if the file does not exist or cannot be read
    /// - `Processing` if neither detection method can decode it
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(PixkitError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );

                let data = Self::read_file(path_ref)?;
                image::load_from_memory(&data).map_err(|content_err| {
                    let extension = path_ref
                        .extension()
                        .and_then(|s| s.to_str())
                        .unwrap_or("unknown");

                    PixkitError::processing_stage_error(
                        "image loading",
                        &format!(
                            "Failed with both extension-based ({}) and content-based detection. Extension error: {}. Content error: {}",
                            extension, e, content_err
                        ),
                        Some(&format!("path: {}, size: {} bytes", path_ref.display(), data.len())),
                    )
                })
            },
        }
    }

    /// Read a whole file into memory
    ///
    /// # Errors
    /// - `Io` with the path in the message
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        let path_ref = path.as_ref();
        std::fs::read(path_ref).map_err(|e| PixkitError::file_io_error("read file", path_ref, &e))
    }

    /// Detect the image format from the leading bytes
    ///
    /// # Errors
    /// - `UnsupportedFormat` if the content is not a recognized image
    pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat> {
        image::guess_format(bytes).map_err(|_| {
            PixkitError::unsupported_format("input is not a recognized image (expected PNG, JPEG, WebP, BMP, TIFF or GIF)")
        })
    }

    /// Detect a file's image format from its header, falling back to the extension
    ///
    /// # Errors
    /// - `Io` if the file cannot be opened
    /// - `UnsupportedFormat` if neither the content nor the extension is recognized
    pub fn detect_file_format<P: AsRef<Path>>(path: P) -> Result<ImageFormat> {
        let path_ref = path.as_ref();
        let reader = image::ImageReader::open(path_ref)
            .and_then(image::ImageReader::with_guessed_format)
            .map_err(|e| PixkitError::file_io_error("open image file", path_ref, &e))?;

        reader.format().ok_or_else(|| {
            PixkitError::unsupported_format(format!(
                "cannot determine image format of {}",
                path_ref.display()
            ))
        })
    }

    /// Decode an image from bytes
    ///
    /// # Errors
    /// - `Processing` if decoding fails
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| {
            PixkitError::processing(format!("Failed to decode image from bytes: {}", e))
        })
    }

    /// Read an async stream into memory, stopping once it exceeds `max_bytes`
    ///
    /// At most `max_bytes + 1` bytes are pulled from the reader.
    ///
    /// # Errors
    /// - `FileTooLarge` if the stream is longer than `max_bytes`
    /// - `Processing` if the stream fails
    pub async fn read_from_reader<R: tokio::io::AsyncRead + Unpin>(
        reader: R,
        max_bytes: u64,
    ) -> Result<Vec<u8>> {
        use tokio::io::AsyncReadExt;

        let mut limited = AsyncReadExt::take(reader, max_bytes.saturating_add(1));
        let mut buffer = Vec::new();
        AsyncReadExt::read_to_end(&mut limited, &mut buffer)
            .await
            .map_err(|e| PixkitError::processing(format!("Failed to read from stream: {}", e)))?;

        let size = buffer.len() as u64;
        if size > max_bytes {
            log::debug!("Stream exceeded {} bytes, stopped reading", max_bytes);
            return Err(PixkitError::FileTooLarge {
                size,
                limit: max_bytes,
            });
        }
        Ok(buffer)
    }

    /// Encode an image in the given output format
    ///
    /// `jpeg_quality` is only used for JPEG. WebP output is lossless.
    ///
    /// # Errors
    /// - `Processing` if the encoder fails
    pub fn encode(image: &DynamicImage, format: OutputFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();

        let result = match format {
            OutputFormat::Jpeg => {
                let rgb_image = image.to_rgb8();
                JpegEncoder::new_with_quality(&mut buffer, jpeg_quality.clamp(1, 100))
                    .encode_image(&rgb_image)
            },
            OutputFormat::Png | OutputFormat::WebP | OutputFormat::Tiff => image.write_to(
                &mut std::io::Cursor::new(&mut buffer),
                OutputFormatHandler::image_format(format),
            ),
        };

        result.map_err(|e| {
            PixkitError::processing_stage_error(
                "encode",
                &format!("Failed to encode {}: {}", format, e),
                Some(&format!("{}x{}", image.width(), image.height())),
            )
        })?;

        Ok(buffer)
    }

    /// Write bytes to a file, creating parent directories
    ///
    /// # Errors
    /// - `Io` with the path in the message
    pub fn save_bytes<P: AsRef<Path>>(bytes: &[u8], path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PixkitError::file_io_error("create output directory", parent, &e)
                })?;
            }
        }

        std::fs::write(path_ref, bytes)
            .map_err(|e| PixkitError::file_io_error("write output file", path_ref, &e))
    }

    /// Write bytes to an async writer and flush it
    ///
    /// # Errors
    /// - `Processing` if writing or flushing fails
    pub async fn save_to_writer<W: tokio::io::AsyncWrite + Unpin>(
        bytes: &[u8],
        mut writer: W,
    ) -> Result<u64> {
        use tokio::io::AsyncWriteExt;

        AsyncWriteExt::write_all(&mut writer, bytes)
            .await
            .map_err(|e| PixkitError::processing(format!("Failed to write to stream: {}", e)))?;
        AsyncWriteExt::flush(&mut writer)
            .await
            .map_err(|e| PixkitError::processing(format!("Failed to flush stream: {}", e)))?;

        Ok(bytes.len() as u64)
    }

    /// Whether a path has an image extension the pipeline can decode
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .is_some_and(|ext| {
                matches!(
                    ext.as_str(),
                    "jpg" | "jpeg" | "png" | "webp" | "tiff" | "tif" | "bmp" | "gif"
                )
            })
    }
}
