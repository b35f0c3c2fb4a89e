//! Mask sources and the inference backend seam
//!
//! Segmentation models are injected collaborators. Anything that can turn an
//! image into a confidence map implements [`MaskSource`]; tensor-level model
//! runtimes implement [`InferenceBackend`] and are adapted by
//! [`ModelMaskSource`], which owns the letterbox pre/post-processing.

use crate::{
    error::{PixkitError, Result},
    services::ImageIOService,
    types::{MaskBuffer, RasterImage},
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use instant::{Duration, Instant};
use ndarray::Array4;
use std::path::Path;
use tracing::{debug, info, instrument, span, Level};

/// Produces a segmentation mask for an image
///
/// The mask may be at any resolution; callers resample it to the image size
/// before compositing.
pub trait MaskSource {
    /// Short name used in logs
    fn name(&self) -> &str {
        "mask-source"
    }

    /// Compute a mask for `image`
    ///
    /// # Errors
    /// - `Inference` for model or backend failures
    fn infer(&mut self, image: &RasterImage) -> Result<MaskBuffer>;
}

impl<S: MaskSource + ?Sized> MaskSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn infer(&mut self, image: &RasterImage) -> Result<MaskBuffer> {
        (**self).infer(image)
    }
}

/// Trait for tensor-level model runtimes
pub trait InferenceBackend {
    /// Prepare the backend (load weights, build a session, ...)
    ///
    /// Returns the load time when the backend measures one.
    ///
    /// # Errors
    /// - Backend initialization failures
    fn initialize(&mut self) -> Result<Option<Duration>>;

    /// Run inference on an NCHW `[1, 3, S, S]` tensor
    ///
    /// # Errors
    /// - Backend not initialized or model failures
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Square input side length `S` the model expects
    fn input_size(&self) -> u32;

    fn is_initialized(&self) -> bool;
}

/// Letterbox and normalization settings
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingOptions {
    /// Padding color around the scaled image (RGB)
    pub padding_color: [u8; 3],
    /// Per-channel mean subtracted after scaling to [0, 1]
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation divided out after the mean
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            padding_color: [255, 255, 255],
            normalization_mean: [0.0, 0.0, 0.0],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

/// Where the image content sits inside the square model input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Letterbox {
    pub size: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub content_width: u32,
    pub content_height: u32,
}

impl Letterbox {
    /// Fit `width` x `height` into a centered `size` x `size` square
    ///
    /// # Errors
    /// - `EmptyInput` if any dimension is zero
    pub fn fit(width: u32, height: u32, size: u32) -> Result<Self> {
        if width == 0 || height == 0 || size == 0 {
            return Err(PixkitError::empty_input(format!(
                "cannot letterbox {}x{} into {}x{}",
                width, height, size, size
            )));
        }

        let size_f = size as f32;
        let scale = (size_f / width as f32).min(size_f / height as f32);
        let content_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let content_height = ((height as f32 * scale).round() as u32).clamp(1, size);

        Ok(Self {
            size,
            offset_x: (size - content_width) / 2,
            offset_y: (size - content_height) / 2,
            content_width,
            content_height,
        })
    }
}

/// Image to tensor conversion for square-input models
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox `image` into `size` x `size` and convert it to an NCHW tensor
    ///
    /// # Errors
    /// - `EmptyInput` for zero-sized images
    /// - `Processing` if the pixel buffer cannot be converted
    pub fn letterbox(
        image: &RasterImage,
        size: u32,
        options: &PreprocessingOptions,
    ) -> Result<(Array4<f32>, Letterbox)> {
        let letterbox = Letterbox::fit(image.width(), image.height(), size)?;

        let rgb = DynamicImage::ImageRgba8(image.to_rgba_image()?).to_rgb8();
        let resized = image::imageops::resize(
            &rgb,
            letterbox.content_width,
            letterbox.content_height,
            FilterType::Triangle,
        );

        let mut canvas = RgbImage::from_pixel(size, size, image::Rgb(options.padding_color));
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset_x),
            i64::from(letterbox.offset_y),
        );

        Ok((Self::canvas_to_tensor(&canvas, options), letterbox))
    }

    fn canvas_to_tensor(canvas: &RgbImage, options: &PreprocessingOptions) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor is allocated from the canvas dimensions
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                tensor[[0, c, y as usize, x as usize]] =
                    (value - options.normalization_mean[c]) / options.normalization_std[c];
            }
        }

        tensor
    }

    /// Turn a `[1, 1, h, w]` model output into a mask of the letterboxed content
    ///
    /// Values are clamped into [0, 1]. The crop is scaled when the model's
    /// output resolution differs from its input resolution.
    ///
    /// # Errors
    /// - `Inference` if the tensor shape is not `[1, 1, h, w]`
    pub fn tensor_to_mask(output: &Array4<f32>, letterbox: &Letterbox) -> Result<MaskBuffer> {
        let shape = output.shape();
        let (out_h, out_w) = match shape {
            [1, 1, h, w] if *h > 0 && *w > 0 => (*h, *w),
            _ => {
                return Err(PixkitError::inference(format!(
                    "Expected model output shape [1, 1, h, w], got {:?}",
                    shape
                )))
            },
        };

        let fx = out_w as f32 / letterbox.size as f32;
        let fy = out_h as f32 / letterbox.size as f32;
        let x0 = ((letterbox.offset_x as f32 * fx).round() as usize).min(out_w - 1);
        let y0 = ((letterbox.offset_y as f32 * fy).round() as usize).min(out_h - 1);
        let crop_w = ((letterbox.content_width as f32 * fx).round() as usize).clamp(1, out_w - x0);
        let crop_h = ((letterbox.content_height as f32 * fy).round() as usize).clamp(1, out_h - y0);

        let mut values = Vec::with_capacity(crop_w * crop_h);
        #[allow(clippy::indexing_slicing)]
        // Safe: the crop rectangle is clamped to the output shape
        for y in y0..y0 + crop_h {
            for x in x0..x0 + crop_w {
                values.push(output[[0, 0, y, x]]);
            }
        }

        MaskBuffer::new(crop_w as u32, crop_h as u32, values)
    }
}

/// Adapts an [`InferenceBackend`] to [`MaskSource`]
///
/// The backend is initialized lazily on first use. Masks come back at the
/// model's resolution, cropped to the image content.
pub struct ModelMaskSource<B: InferenceBackend> {
    backend: B,
    options: PreprocessingOptions,
}

impl<B: InferenceBackend> ModelMaskSource<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, PreprocessingOptions::default())
    }

    #[must_use]
    pub fn with_options(backend: B, options: PreprocessingOptions) -> Self {
        Self { backend, options }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    fn ensure_initialized(&mut self) -> Result<()> {
        if !self.backend.is_initialized() {
            if let Some(load_time) = self.backend.initialize()? {
                info!(load_ms = load_time.as_millis() as u64, "Inference backend initialized");
            }
        }
        Ok(())
    }
}

impl<B: InferenceBackend> MaskSource for ModelMaskSource<B> {
    fn name(&self) -> &str {
        "model"
    }

    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn infer(&mut self, image: &RasterImage) -> Result<MaskBuffer> {
        self.ensure_initialized()?;
        let size = self.backend.input_size();

        let (tensor, letterbox) = {
            let _span = span!(Level::DEBUG, "preprocess", size).entered();
            ImagePreprocessor::letterbox(image, size, &self.options)?
        };

        let start = Instant::now();
        let output = self.backend.infer(&tensor)?;
        debug!(
            inference_ms = start.elapsed().as_millis() as u64,
            shape = ?output.shape(),
            "Model inference finished"
        );

        let _span = span!(Level::DEBUG, "postprocess").entered();
        ImagePreprocessor::tensor_to_mask(&output, &letterbox)
    }
}

/// Mask loaded from a grayscale image produced by an external model
#[derive(Debug, Clone)]
pub struct ImageMaskSource {
    mask: MaskBuffer,
}

impl ImageMaskSource {
    /// Load a mask image from disk (luminance, 0-255 mapped to [0, 1])
    ///
    /// # Errors
    /// - `Io` / `Processing` if the file cannot be read or decoded
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = ImageIOService::load_image(path)?;
        Ok(Self::from_dynamic(&image))
    }

    /// Decode a mask image from bytes
    ///
    /// # Errors
    /// - `Processing` if decoding fails
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let image = ImageIOService::load_from_bytes(bytes)?;
        Ok(Self::from_dynamic(&image))
    }

    #[must_use]
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self {
            mask: MaskBuffer::from_gray_image(&image.to_luma8()),
        }
    }

    #[must_use]
    pub fn from_mask(mask: MaskBuffer) -> Self {
        Self { mask }
    }

    #[must_use]
    pub fn mask(&self) -> &MaskBuffer {
        &self.mask
    }
}

impl MaskSource for ImageMaskSource {
    fn name(&self) -> &str {
        "mask-file"
    }

    fn infer(&mut self, _image: &RasterImage) -> Result<MaskBuffer> {
        Ok(self.mask.clone())
    }
}

/// Wraps a closure as a [`MaskSource`]
pub struct MaskFn<F>(pub F);

impl<F> MaskSource for MaskFn<F>
where
    F: FnMut(&RasterImage) -> Result<MaskBuffer>,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn infer(&mut self, image: &RasterImage) -> Result<MaskBuffer> {
        (self.0)(image)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Backend that marks dark input pixels as foreground
    pub(crate) struct MockBackend {
        pub(crate) size: u32,
        pub(crate) initialized: bool,
        pub(crate) init_calls: usize,
        pub(crate) output_override: Option<Array4<f32>>,
    }

    impl MockBackend {
        pub(crate) fn new(size: u32) -> Self {
            Self {
                size,
                initialized: false,
                init_calls: 0,
                output_override: None,
            }
        }
    }

    impl InferenceBackend for MockBackend {
        fn initialize(&mut self) -> Result<Option<Duration>> {
            self.initialized = true;
            self.init_calls += 1;
            Ok(Some(Duration::from_millis(1)))
        }

        fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
            if !self.initialized {
                return Err(PixkitError::inference("backend not initialized"));
            }
            if let Some(output) = &self.output_override {
                return Ok(output.clone());
            }
            let (_, _, h, w) = input.dim();
            Ok(Array4::from_shape_fn((1, 1, h, w), |(_, _, y, x)| {
                if input[[0, 0, y, x]] < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }))
        }

        fn input_size(&self) -> u32 {
            self.size
        }

        fn is_initialized(&self) -> bool {
            self.initialized
        }
    }

    #[test]
    fn test_letterbox_fit() {
        let lb = Letterbox::fit(4, 2, 8).unwrap();
        assert_eq!(
            lb,
            Letterbox {
                size: 8,
                offset_x: 0,
                offset_y: 2,
                content_width: 8,
                content_height: 4
            }
        );

        let lb = Letterbox::fit(1000, 10, 320).unwrap();
        assert_eq!(lb.content_width, 320);
        assert_eq!(lb.content_height, 3);
        assert_eq!(lb.offset_y, 158);

        assert!(matches!(
            Letterbox::fit(0, 10, 320),
            Err(PixkitError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_letterbox_tensor_has_padding() {
        let image = RasterImage::from_pixel(4, 2, [0, 0, 0, 255]);
        let (tensor, _) =
            ImagePreprocessor::letterbox(&image, 8, &PreprocessingOptions::default()).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);
        // Top rows are white padding, middle rows are the black image
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 2, 4, 4]].abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_normalization() {
        let image = RasterImage::from_pixel(2, 2, [255, 255, 255, 255]);
        let options = PreprocessingOptions {
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [0.5, 0.5, 0.5],
            ..PreprocessingOptions::default()
        };
        let (tensor, _) = ImagePreprocessor::letterbox(&image, 2, &options).unwrap();
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_model_mask_source_crops_letterbox() {
        let mut source = ModelMaskSource::new(MockBackend::new(8));
        let image = RasterImage::from_pixel(4, 2, [0, 0, 0, 255]);

        let mask = source.infer(&image).unwrap();

        // Content region only: 8x4 of foreground, no white padding rows
        assert_eq!(mask.dimensions(), (8, 4));
        assert!(mask.values().iter().all(|&v| (v - 1.0).abs() < f32::EPSILON));
        assert_eq!(source.backend().init_calls, 1);

        source.infer(&image).unwrap();
        assert_eq!(source.backend().init_calls, 1);
    }

    #[test]
    fn test_model_output_is_clamped() {
        let mut backend = MockBackend::new(4);
        backend.output_override = Some(Array4::from_elem((1, 1, 4, 4), 3.0));
        let mut source = ModelMaskSource::new(backend);

        let mask = source
            .infer(&RasterImage::from_pixel(4, 4, [9, 9, 9, 255]))
            .unwrap();
        assert!(mask.values().iter().all(|&v| (v - 1.0).abs() < f32::EPSILON));
    }

    #[test]
    fn test_model_output_at_other_resolution_is_scaled() {
        let mut backend = MockBackend::new(8);
        backend.output_override = Some(Array4::from_elem((1, 1, 16, 16), 0.25));
        let mut source = ModelMaskSource::new(backend);

        // 4x2 letterboxes to 8x4 at offset y=2; at 16x16 output that is 16x8
        let mask = source
            .infer(&RasterImage::from_pixel(4, 2, [0, 0, 0, 255]))
            .unwrap();
        assert_eq!(mask.dimensions(), (16, 8));
    }

    #[test]
    fn test_model_output_shape_is_validated() {
        let mut backend = MockBackend::new(4);
        backend.output_override = Some(Array4::zeros((1, 3, 4, 4)));
        let mut source = ModelMaskSource::new(backend);

        let err = source
            .infer(&RasterImage::from_pixel(4, 4, [0, 0, 0, 255]))
            .unwrap_err();
        assert!(matches!(err, PixkitError::Inference(_)));
    }

    #[test]
    fn test_model_source_rejects_empty_image() {
        let mut source = ModelMaskSource::new(MockBackend::new(4));
        let empty = RasterImage::new(0, 0, Vec::new()).unwrap();
        assert!(matches!(
            source.infer(&empty),
            Err(PixkitError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_image_mask_source_from_bytes() {
        let gray = image::GrayImage::from_raw(2, 1, vec![0, 255]).unwrap();
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let mut source = ImageMaskSource::from_bytes(&bytes).unwrap();
        let mask = source
            .infer(&RasterImage::from_pixel(10, 10, [0, 0, 0, 255]))
            .unwrap();
        assert_eq!(mask.values(), &[0.0, 1.0]);
        assert_eq!(source.name(), "mask-file");
    }

    #[test]
    fn test_mask_fn_and_boxed_source() {
        let mut source: Box<dyn MaskSource> = Box::new(MaskFn(|image: &RasterImage| -> Result<MaskBuffer> {
            Ok(MaskBuffer::filled(image.width(), image.height(), 0.7))
        }));
        let mask = source
            .infer(&RasterImage::from_pixel(3, 2, [0, 0, 0, 255]))
            .unwrap();
        assert_eq!(mask.dimensions(), (3, 2));
        assert_eq!(source.name(), "closure");
    }
}
