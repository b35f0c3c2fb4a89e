//! Mask compositor
//!
//! Turns a segmentation mask into the alpha channel of a source image. The
//! pipeline is always: resample the mask to the image size, then composite.
//! Resampling is a separate step so a size mismatch at composite time is a
//! caller error, never something that gets silently stretched or cropped.

use crate::{
    error::{PixkitError, Result},
    types::{unit_to_byte, AlphaMode, CompositeResult, MaskBuffer, RasterImage, Threshold, CHANNELS},
};
use tracing::{debug, instrument};

/// Source position and interpolation weight along one axis
#[derive(Debug, Clone, Copy)]
struct AxisSample {
    lo: usize,
    hi: usize,
    t: f32,
}

/// Pixel-center aligned sample positions for one axis
fn axis_samples(src_len: u32, dst_len: u32) -> Vec<AxisSample> {
    let scale = src_len as f32 / dst_len as f32;
    let last = src_len.saturating_sub(1) as usize;

    (0..dst_len)
        .map(|d| {
            let pos = ((d as f32 + 0.5) * scale - 0.5).clamp(0.0, last as f32);
            let lo = pos.floor();
            let t = pos - lo;
            let lo = lo as usize;
            AxisSample {
                lo,
                hi: (lo + 1).min(last),
                t,
            }
        })
        .collect()
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Resample a mask to `target_width` x `target_height` with bilinear interpolation
///
/// Output values are convex combinations of input values, so they stay inside
/// the input's value range. A mask already at the target size is copied as is.
///
/// # Errors
/// - `EmptyInput` if the mask or the target size has zero pixels
#[instrument(level = "debug", skip(mask), fields(src_width = mask.width(), src_height = mask.height()))]
pub fn resample_mask(mask: &MaskBuffer, target_width: u32, target_height: u32) -> Result<MaskBuffer> {
    if mask.is_empty() {
        return Err(PixkitError::empty_input("mask has zero pixels"));
    }
    if target_width == 0 || target_height == 0 {
        return Err(PixkitError::empty_input(format!(
            "resample target {}x{} has zero pixels",
            target_width, target_height
        )));
    }
    if mask.dimensions() == (target_width, target_height) {
        return Ok(mask.clone());
    }

    let src_width = mask.width() as usize;
    let src = mask.values();
    let xs = axis_samples(mask.width(), target_width);
    let ys = axis_samples(mask.height(), target_height);

    let mut values = Vec::with_capacity(xs.len() * ys.len());

    #[allow(clippy::indexing_slicing)]
    // Safe: axis samples are clamped to [0, len - 1] on both axes
    for y in &ys {
        let row0 = y.lo * src_width;
        let row1 = y.hi * src_width;
        for x in &xs {
            let top = lerp(src[row0 + x.lo], src[row0 + x.hi], x.t);
            let bottom = lerp(src[row1 + x.lo], src[row1 + x.hi], x.t);
            values.push(lerp(top, bottom, y.t));
        }
    }

    debug!(target_width, target_height, "Resampled mask");
    MaskBuffer::new(target_width, target_height, values)
}

fn alpha_for(value: f32, threshold: Threshold, mode: AlphaMode) -> u8 {
    match mode {
        AlphaMode::Binary => {
            if value < threshold.value() {
                0
            } else {
                u8::MAX
            }
        },
        AlphaMode::Soft => unit_to_byte(value),
    }
}

fn check_inputs(source: &RasterImage, mask: &MaskBuffer) -> Result<()> {
    if source.is_empty() {
        return Err(PixkitError::empty_input("source image has zero pixels"));
    }
    if mask.is_empty() {
        return Err(PixkitError::empty_input("mask has zero pixels"));
    }
    if source.dimensions() != mask.dimensions() {
        return Err(PixkitError::dimension_mismatch(
            source.dimensions(),
            mask.dimensions(),
        ));
    }
    Ok(())
}

/// Overwrite the alpha byte of every pixel, returning the opaque count
fn write_alpha(pixels: &mut [u8], mask: &[f32], threshold: Threshold, mode: AlphaMode) -> usize {
    let mut opaque = 0;
    for (px, &value) in pixels.chunks_exact_mut(CHANNELS).zip(mask) {
        let alpha = alpha_for(value, threshold, mode);
        if alpha == u8::MAX {
            opaque += 1;
        }
        if let Some(a) = px.get_mut(3) {
            *a = alpha;
        }
    }
    opaque
}

/// Apply a mask as the alpha channel of `source`
///
/// RGB is copied unchanged. In `Binary` mode alpha is 0 where the mask value is
/// below `threshold` and 255 elsewhere; in `Soft` mode alpha is
/// `round(m * 255)` and the threshold is ignored.
///
/// # Errors
/// - `EmptyInput` if either buffer has zero pixels
/// - `DimensionMismatch` if the mask was not resampled to the source size
#[instrument(
    level = "debug",
    skip(source, mask),
    fields(width = source.width(), height = source.height(), mode = %mode)
)]
pub fn composite(
    source: &RasterImage,
    mask: &MaskBuffer,
    threshold: Threshold,
    mode: AlphaMode,
) -> Result<CompositeResult> {
    check_inputs(source, mask)?;

    let mut image = source.clone();
    let opaque_pixels = write_alpha(image.as_raw_mut(), mask.values(), threshold, mode);

    debug!(opaque_pixels, "Composited mask into alpha channel");
    Ok(CompositeResult {
        image,
        mode,
        threshold,
        opaque_pixels,
    })
}

/// Same as [`composite`], writing into a caller-owned buffer
///
/// Returns the number of fully opaque pixels written.
///
/// # Errors
/// - `EmptyInput` if either input has zero pixels
/// - `DimensionMismatch` if the mask or `output` differ in size from `source`
pub fn composite_into(
    source: &RasterImage,
    mask: &MaskBuffer,
    threshold: Threshold,
    mode: AlphaMode,
    output: &mut RasterImage,
) -> Result<usize> {
    check_inputs(source, mask)?;
    if output.dimensions() != source.dimensions() {
        return Err(PixkitError::dimension_mismatch(
            source.dimensions(),
            output.dimensions(),
        ));
    }

    let pixels = output.as_raw_mut();
    pixels.copy_from_slice(source.as_raw());
    Ok(write_alpha(pixels, mask.values(), threshold, mode))
}

/// Grayscale visualization of a mask (R = G = B = round(m * 255), A = 255)
///
/// # Errors
/// - `EmptyInput` if the mask has zero pixels
pub fn mask_preview(mask: &MaskBuffer) -> Result<RasterImage> {
    if mask.is_empty() {
        return Err(PixkitError::empty_input("mask has zero pixels"));
    }

    let mut data = Vec::with_capacity(mask.len() * CHANNELS);
    for &value in mask.values() {
        let v = unit_to_byte(value);
        data.extend_from_slice(&[v, v, v, u8::MAX]);
    }
    RasterImage::new(mask.width(), mask.height(), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold(value: f32) -> Threshold {
        Threshold::new(value).unwrap()
    }

    /// Image whose pixels all differ so RGB preservation is meaningful
    fn patterned_image(width: u32, height: u32) -> RasterImage {
        let mut data = Vec::new();
        for i in 0..(width * height) {
            data.extend_from_slice(&[(i * 7 % 256) as u8, (i * 13 % 256) as u8, (i * 29 % 256) as u8, 200]);
        }
        RasterImage::new(width, height, data).unwrap()
    }

    fn gradient_mask(width: u32, height: u32) -> MaskBuffer {
        let count = width * height;
        let values = (0..count).map(|i| i as f32 / (count - 1) as f32).collect();
        MaskBuffer::new(width, height, values).unwrap()
    }

    #[test]
    fn test_full_mask_soft_is_identity_with_opaque_alpha() {
        let image = patterned_image(5, 3);
        let mask = MaskBuffer::filled(5, 3, 1.0);

        let result = composite(&image, &mask, threshold(0.9), AlphaMode::Soft).unwrap();

        for (out, src) in result.image.pixels().zip(image.pixels()) {
            assert_eq!(&out[..3], &src[..3]);
            assert_eq!(out[3], 255);
        }
        assert_eq!(result.opaque_pixels, 15);
    }

    #[test]
    fn test_empty_mask_binary_is_fully_transparent() {
        let image = patterned_image(4, 4);
        let mask = MaskBuffer::filled(4, 4, 0.0);

        let result = composite(&image, &mask, threshold(0.5), AlphaMode::Binary).unwrap();

        assert!(result.image.pixels().all(|px| px[3] == 0));
        for (out, src) in result.image.pixels().zip(image.pixels()) {
            assert_eq!(&out[..3], &src[..3]);
        }
        assert_eq!(result.opaque_pixels, 0);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let image = patterned_image(8, 8);
        let mask = gradient_mask(8, 8);

        let mut previous = usize::MAX;
        for step in 0..=20 {
            let t = step as f32 / 20.0;
            let result = composite(&image, &mask, threshold(t), AlphaMode::Binary).unwrap();
            assert!(
                result.opaque_pixels <= previous,
                "opaque count increased at threshold {}",
                t
            );
            previous = result.opaque_pixels;
        }
    }

    #[test]
    fn test_resample_size_invariant() {
        let mask = gradient_mask(7, 5);
        for (w, h) in [(1, 1), (3, 9), (7, 5), (320, 320), (1200, 9), (2, 1)] {
            let resampled = resample_mask(&mask, w, h).unwrap();
            assert_eq!(resampled.width(), w);
            assert_eq!(resampled.height(), h);
            assert_eq!(resampled.len(), (w * h) as usize);
        }
    }

    #[test]
    fn test_resample_preserves_value_range() {
        let mask = MaskBuffer::new(2, 2, vec![0.2, 0.8, 0.4, 0.6]).unwrap();
        let resampled = resample_mask(&mask, 13, 11).unwrap();
        for &v in resampled.values() {
            assert!((0.2 - 1e-6..=0.8 + 1e-6).contains(&v), "value {} out of range", v);
        }
    }

    #[test]
    fn test_resample_is_smooth_when_upscaling() {
        // A hard 0/1 edge must produce intermediate values, not blocks
        let mask = MaskBuffer::new(2, 1, vec![0.0, 1.0]).unwrap();
        let resampled = resample_mask(&mask, 8, 1).unwrap();
        let intermediate = resampled
            .values()
            .iter()
            .filter(|&&v| v > 0.0 && v < 1.0)
            .count();
        assert!(intermediate >= 2);

        // Values increase left to right
        for pair in resampled.values().windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_resample_same_size_is_copy() {
        let mask = gradient_mask(4, 3);
        assert_eq!(resample_mask(&mask, 4, 3).unwrap(), mask);
    }

    #[test]
    fn test_resample_rejects_empty() {
        let mask = gradient_mask(4, 3);
        assert!(matches!(
            resample_mask(&mask, 0, 3),
            Err(PixkitError::EmptyInput(_))
        ));
        let empty = MaskBuffer::filled(0, 0, 1.0);
        assert!(matches!(
            resample_mask(&empty, 3, 3),
            Err(PixkitError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_rgb_preserved_for_all_modes() {
        let image = patterned_image(6, 6);
        let mask = gradient_mask(6, 6);

        for mode in [AlphaMode::Binary, AlphaMode::Soft] {
            for t in [0.0, 0.3, 0.5, 1.0] {
                let result = composite(&image, &mask, threshold(t), mode).unwrap();
                for (out, src) in result.image.pixels().zip(image.pixels()) {
                    assert_eq!(&out[..3], &src[..3]);
                }
            }
        }
    }

    #[test]
    fn test_binary_alpha_is_zero_or_opaque() {
        let image = patterned_image(6, 6);
        let mask = gradient_mask(6, 6);
        let result = composite(&image, &mask, threshold(0.5), AlphaMode::Binary).unwrap();
        assert!(result.image.pixels().all(|px| px[3] == 0 || px[3] == 255));
    }

    #[test]
    fn test_resample_then_composite_scenario() {
        let mask = MaskBuffer::filled(4, 4, 0.6);
        let red = RasterImage::from_pixel(2, 2, [255, 0, 0, 255]);

        let resampled = resample_mask(&mask, 2, 2).unwrap();

        let kept = composite(&red, &resampled, threshold(0.5), AlphaMode::Binary).unwrap();
        assert_eq!(kept.image, RasterImage::from_pixel(2, 2, [255, 0, 0, 255]));
        assert_eq!(kept.opaque_pixels, 4);

        let removed = composite(&red, &resampled, threshold(0.8), AlphaMode::Binary).unwrap();
        assert_eq!(removed.image, RasterImage::from_pixel(2, 2, [255, 0, 0, 0]));
        assert_eq!(removed.opaque_pixels, 0);
    }

    #[test]
    fn test_soft_mode_ignores_threshold() {
        let image = RasterImage::from_pixel(1, 1, [9, 9, 9, 255]);
        let mask = MaskBuffer::filled(1, 1, 0.4);

        for t in [0.0, 0.4, 0.9] {
            let result = composite(&image, &mask, threshold(t), AlphaMode::Soft).unwrap();
            assert_eq!(result.image.pixel(0, 0), Some([9, 9, 9, 102]));
        }
    }

    #[test]
    fn test_byte_mask_matches_half_threshold() {
        // 128 is foreground and 127 background at threshold 0.5
        let image = RasterImage::from_pixel(2, 1, [1, 2, 3, 255]);
        let mask = MaskBuffer::from_bytes(2, 1, &[127, 128]).unwrap();
        let result = composite(&image, &mask, threshold(0.5), AlphaMode::Binary).unwrap();
        assert_eq!(result.image.pixel(0, 0).unwrap()[3], 0);
        assert_eq!(result.image.pixel(1, 0).unwrap()[3], 255);
    }

    #[test]
    fn test_mask_equal_to_threshold_is_opaque() {
        let image = RasterImage::from_pixel(3, 1, [4, 5, 6, 0]);
        let mask = MaskBuffer::new(3, 1, vec![0.25, 0.5, 0.75]).unwrap();

        for t in [0.25, 0.5, 0.75] {
            let result = composite(&image, &mask, threshold(t), AlphaMode::Binary).unwrap();
            let alphas: Vec<u8> = result.image.pixels().map(|px| px[3]).collect();
            let expected: Vec<u8> = mask
                .values()
                .iter()
                .map(|&m| if m < t { 0 } else { 255 })
                .collect();
            assert_eq!(alphas, expected, "threshold {}", t);
        }

        // Exactly on the cutoff
        let on_cutoff = MaskBuffer::filled(3, 1, 0.5);
        let result = composite(&image, &on_cutoff, threshold(0.5), AlphaMode::Binary).unwrap();
        assert!(result.image.pixels().all(|px| px[3] == 255));
        assert_eq!(result.opaque_pixels, 3);
    }

    #[test]
    fn test_composite_dimension_mismatch() {
        let image = patterned_image(4, 4);
        let mask = MaskBuffer::filled(2, 2, 1.0);
        let err = composite(&image, &mask, threshold(0.5), AlphaMode::Binary).unwrap_err();
        assert!(matches!(
            err,
            PixkitError::DimensionMismatch {
                expected: (4, 4),
                actual: (2, 2)
            }
        ));
    }

    #[test]
    fn test_composite_empty_input() {
        let empty_image = RasterImage::new(0, 0, Vec::new()).unwrap();
        let empty_mask = MaskBuffer::filled(0, 0, 0.0);
        let image = patterned_image(2, 2);
        let mask = MaskBuffer::filled(2, 2, 1.0);

        assert!(matches!(
            composite(&empty_image, &mask, threshold(0.5), AlphaMode::Binary),
            Err(PixkitError::EmptyInput(_))
        ));
        assert!(matches!(
            composite(&image, &empty_mask, threshold(0.5), AlphaMode::Soft),
            Err(PixkitError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_composite_does_not_mutate_inputs() {
        let image = patterned_image(3, 3);
        let mask = gradient_mask(3, 3);
        let image_before = image.clone();
        let mask_before = mask.clone();

        let _ = composite(&image, &mask, threshold(0.5), AlphaMode::Binary).unwrap();

        assert_eq!(image, image_before);
        assert_eq!(mask, mask_before);
    }

    #[test]
    fn test_composite_into_matches_composite() {
        let image = patterned_image(5, 4);
        let mask = gradient_mask(5, 4);
        let mut output = RasterImage::from_pixel(5, 4, [0, 0, 0, 0]);

        let opaque =
            composite_into(&image, &mask, threshold(0.3), AlphaMode::Binary, &mut output).unwrap();
        let expected = composite(&image, &mask, threshold(0.3), AlphaMode::Binary).unwrap();

        assert_eq!(output, expected.image);
        assert_eq!(opaque, expected.opaque_pixels);
    }

    #[test]
    fn test_composite_into_rejects_wrong_output_size() {
        let image = patterned_image(2, 2);
        let mask = MaskBuffer::filled(2, 2, 1.0);
        let mut output = RasterImage::from_pixel(3, 3, [0, 0, 0, 0]);
        assert!(matches!(
            composite_into(&image, &mask, threshold(0.5), AlphaMode::Soft, &mut output),
            Err(PixkitError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_mask_preview() {
        let mask = MaskBuffer::new(3, 1, vec![0.0, 0.4, 1.0]).unwrap();
        let preview = mask_preview(&mask).unwrap();

        assert_eq!(preview.dimensions(), (3, 1));
        assert_eq!(preview.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(preview.pixel(1, 0), Some([102, 102, 102, 255]));
        assert_eq!(preview.pixel(2, 0), Some([255, 255, 255, 255]));

        assert!(mask_preview(&MaskBuffer::filled(0, 5, 1.0)).is_err());
    }
}
