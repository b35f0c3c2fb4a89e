//! Background removal: mask source, resample, composite

use crate::{
    compositor::{composite, mask_preview, resample_mask},
    error::Result,
    inference::MaskSource,
    pipeline::Transform,
    types::{AlphaMode, MaskStatistics, RasterImage, Threshold},
};
use tracing::{debug, info_span};

/// Removes the background using a mask from any [`MaskSource`]
///
/// The mask is always resampled to the image size before compositing. With
/// `preview_mask` set, the resampled mask itself is returned as a grayscale
/// image instead of the cutout.
pub struct BackgroundRemoval<S: MaskSource> {
    source: S,
    threshold: Threshold,
    mode: AlphaMode,
    preview_mask: bool,
    last_statistics: Option<MaskStatistics>,
}

impl<S: MaskSource> BackgroundRemoval<S> {
    #[must_use]
    pub fn new(source: S, threshold: Threshold, mode: AlphaMode) -> Self {
        Self {
            source,
            threshold,
            mode,
            preview_mask: false,
            last_statistics: None,
        }
    }

    /// Output the mask visualization instead of the cutout
    #[must_use]
    pub fn preview_mask(mut self, preview: bool) -> Self {
        self.preview_mask = preview;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    #[must_use]
    pub fn mode(&self) -> AlphaMode {
        self.mode
    }

    /// Statistics of the resampled mask from the most recent run
    #[must_use]
    pub fn last_statistics(&self) -> Option<&MaskStatistics> {
        self.last_statistics.as_ref()
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: MaskSource> Transform for BackgroundRemoval<S> {
    fn name(&self) -> &str {
        if self.preview_mask {
            "mask-preview"
        } else {
            "remove-bg"
        }
    }

    fn output_suffix(&self) -> String {
        if self.preview_mask {
            "-mask".to_string()
        } else {
            "-no-bg".to_string()
        }
    }

    fn apply(&mut self, image: &RasterImage) -> Result<RasterImage> {
        let mask = {
            let _span = info_span!("mask_source", source = self.source.name()).entered();
            self.source.infer(image)?
        };
        debug!(
            mask = ?mask.dimensions(),
            image = ?image.dimensions(),
            "Mask received"
        );

        let resampled = resample_mask(&mask, image.width(), image.height())?;
        let statistics = resampled.statistics();
        debug!(
            foreground_ratio = statistics.foreground_ratio,
            "Mask statistics"
        );
        self.last_statistics = Some(statistics);

        if self.preview_mask {
            return mask_preview(&resampled);
        }

        Ok(composite(image, &resampled, self.threshold, self.mode)?.into_image())
    }
}
