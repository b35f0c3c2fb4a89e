//! Color picker: sample one pixel and describe it as HEX, RGB and HSL

use crate::{
    error::{PixkitError, Result},
    types::RasterImage,
};
use serde::{Deserialize, Serialize};

/// Side length of the generated swatch image
pub const DEFAULT_SWATCH_SIZE: u32 = 200;

/// A sampled pixel with the (clamped) coordinates it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorSample {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
    pub x: u32,
    pub y: u32,
}

impl ColorSample {
    /// `#RRGGBB`, uppercase
    #[must_use]
    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// `rgb(r, g, b)`
    #[must_use]
    pub fn rgb(&self) -> String {
        format!("rgb({}, {}, {})", self.r, self.g, self.b)
    }

    /// Compact `r,g,b` form
    #[must_use]
    pub fn rgb_triplet(&self) -> String {
        format!("{},{},{}", self.r, self.g, self.b)
    }

    /// Hue in degrees, saturation and lightness in percent, all rounded
    #[must_use]
    pub fn hsl_components(&self) -> (u16, u8, u8) {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;

        if max == min {
            return (0, 0, (l * 100.0).round() as u8);
        }

        let d = max - min;
        let s = if l > 0.5 {
            d / (2.0 - max - min)
        } else {
            d / (max + min)
        };

        #[allow(clippy::float_cmp)]
        let sector = if max == r {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };
        let h = sector / 6.0;

        (
            (h * 360.0).round() as u16,
            (s * 100.0).round() as u8,
            (l * 100.0).round() as u8,
        )
    }

    /// `hsl(h, s%, l%)`
    #[must_use]
    pub fn hsl(&self) -> String {
        let (h, s, l) = self.hsl_components();
        format!("hsl({}, {}%, {}%)", h, s, l)
    }

    /// Solid, fully opaque `size` x `size` image of this color
    #[must_use]
    pub fn swatch(&self, size: u32) -> RasterImage {
        RasterImage::from_pixel(size, size, [self.r, self.g, self.b, u8::MAX])
    }

    /// Suggested swatch file name, e.g. `FF8800-sample.png`
    #[must_use]
    pub fn swatch_file_name(&self) -> String {
        format!("{}-sample.png", self.hex().trim_start_matches('#'))
    }
}

impl std::fmt::Display for ColorSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.hex(), self.rgb(), self.hsl())
    }
}

/// Sample the pixel at `(x, y)`, clamping coordinates into the image
///
/// # Errors
/// - `EmptyInput` if the image has no pixels
pub fn sample_color(image: &RasterImage, x: u32, y: u32) -> Result<ColorSample> {
    if image.is_empty() {
        return Err(PixkitError::empty_input("cannot sample a color from an empty image"));
    }

    let x = x.min(image.width() - 1);
    let y = y.min(image.height() - 1);
    let [r, g, b, a] = image
        .pixel(x, y)
        .ok_or_else(|| PixkitError::processing(format!("pixel ({}, {}) not readable", x, y)))?;

    log::debug!("Sampled ({}, {}) = #{:02X}{:02X}{:02X}", x, y, r, g, b);
    Ok(ColorSample { r, g, b, a, x, y })
}
