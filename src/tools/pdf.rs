//! Pack several images into a PDF, one image per page
//!
//! Pages are A4 portrait in points. Each image is centred inside the page
//! margin and shrunk to fit; images are never enlarged. Pixels are embedded
//! as baseline JPEG (`DCTDecode`), so transparency is flattened first.

use crate::{
    config::{BackgroundColor, OutputFormat, DEFAULT_JPEG_QUALITY},
    error::{PixkitError, Result},
    services::{ImageIOService, OutputFormatHandler},
    types::RasterImage,
};
use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, ObjectId, Stream,
};
use tracing::{debug, info, instrument};

pub const A4_WIDTH_PT: f32 = 595.28;
pub const A4_HEIGHT_PT: f32 = 841.89;
pub const DEFAULT_PAGE_MARGIN_PT: f32 = 20.0;

/// Most images accepted in one document
pub const MAX_PDF_IMAGES: usize = 20;

/// Default per-image input cap (10 MB)
pub const PDF_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// File name used when no output name is given
pub const PDF_FILE_NAME: &str = "images.pdf";

/// Page size and margin in PDF points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
}

/// Where an image lands on a page, origin at the bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PageLayout {
    #[must_use]
    pub const fn a4() -> Self {
        Self {
            width: A4_WIDTH_PT,
            height: A4_HEIGHT_PT,
            margin: DEFAULT_PAGE_MARGIN_PT,
        }
    }

    /// Fit a `width` x `height` pixel image inside the margins, centred
    ///
    /// One pixel maps to one point before scaling; the scale never exceeds 1.
    #[must_use]
    pub fn place(&self, width: u32, height: u32) -> Placement {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let scale = ((self.width - 2.0 * self.margin) / w)
            .min((self.height - 2.0 * self.margin) / h)
            .min(1.0);
        let (width, height) = (w * scale, h * scale);
        Placement {
            x: (self.width - width) / 2.0,
            y: (self.height - height) / 2.0,
            width,
            height,
        }
    }
}

impl Default for PageLayout {
    fn default() -> Self {
        Self::a4()
    }
}

/// Builds a PDF document from decoded images
#[derive(Debug, Clone)]
pub struct ImagesToPdf {
    layout: PageLayout,
    jpeg_quality: u8,
    background: BackgroundColor,
}

impl Default for ImagesToPdf {
    fn default() -> Self {
        Self {
            layout: PageLayout::a4(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            background: BackgroundColor::WHITE,
        }
    }
}

impl ImagesToPdf {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn layout(mut self, layout: PageLayout) -> Self {
        self.layout = layout;
        self
    }

    /// JPEG quality for embedded pages, clamped to 1-100
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Color behind transparent pixels
    #[must_use]
    pub fn background(mut self, color: BackgroundColor) -> Self {
        self.background = color;
        self
    }

    /// Encode `images` as a PDF with one page per image, in order
    ///
    /// # Errors
    /// - `EmptyInput` for an empty list or a zero-sized image
    /// - `InvalidConfig` for more than [`MAX_PDF_IMAGES`] images
    /// - `Processing` if JPEG encoding or PDF serialization fails
    #[instrument(skip(self, images), fields(pages = images.len()))]
    pub fn render(&self, images: &[RasterImage]) -> Result<Vec<u8>> {
        if images.is_empty() {
            return Err(PixkitError::empty_input("no images to put in the PDF"));
        }
        if images.len() > MAX_PDF_IMAGES {
            return Err(PixkitError::invalid_config(format!(
                "A PDF holds at most {} images, got {}",
                MAX_PDF_IMAGES,
                images.len()
            )));
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::with_capacity(images.len());

        for (index, image) in images.iter().enumerate() {
            if image.is_empty() {
                return Err(PixkitError::empty_input(format!(
                    "image {} has zero pixels",
                    index + 1
                )));
            }
            kids.push(Object::from(self.add_page(&mut doc, pages_id, image)?));
        }

        let page_count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| PixkitError::processing_stage_error("pdf", &e.to_string(), None))?;

        info!(pages = page_count, bytes = bytes.len(), "PDF written");
        Ok(bytes)
    }

    fn add_page(&self, doc: &mut Document, pages_id: ObjectId, image: &RasterImage) -> Result<ObjectId> {
        let (width, height) = image.dimensions();
        let rgb = OutputFormatHandler::convert_format(image.clone(), OutputFormat::Jpeg, self.background)?;
        let jpeg = ImageIOService::encode(&rgb, OutputFormat::Jpeg, self.jpeg_quality)?;

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(width),
                "Height" => i64::from(height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let placed = self.layout.place(width, height);
        debug!(width, height, ?placed, "Placing page image");

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        placed.width.into(),
                        0.into(),
                        0.into(),
                        placed.height.into(),
                        placed.x.into(),
                        placed.y.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| PixkitError::processing_stage_error("pdf", &e.to_string(), None))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        Ok(doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                self.layout.width.into(),
                self.layout.height.into(),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
            "Contents" => content_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_count(bytes: &[u8]) -> usize {
        Document::load_mem(bytes).unwrap().get_pages().len()
    }

    #[test]
    fn test_small_images_keep_their_size_and_are_centred() {
        let placed = PageLayout::a4().place(100, 50);
        assert_eq!((placed.width, placed.height), (100.0, 50.0));
        assert!((placed.x - (A4_WIDTH_PT - 100.0) / 2.0).abs() < 1e-3);
        assert!((placed.y - (A4_HEIGHT_PT - 50.0) / 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_large_images_shrink_inside_margins() {
        let layout = PageLayout::a4();

        // Wide: width bound
        let wide = layout.place(4000, 1000);
        assert!((wide.width - (A4_WIDTH_PT - 40.0)).abs() < 1e-3);
        assert!((wide.width / wide.height - 4.0).abs() < 1e-3);
        assert!((wide.x - 20.0).abs() < 1e-3);

        // Tall: height bound
        let tall = layout.place(1000, 8000);
        assert!((tall.height - (A4_HEIGHT_PT - 40.0)).abs() < 1e-3);
        assert!((tall.y - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_render_one_page_per_image() {
        let images = vec![
            RasterImage::from_pixel(8, 4, [255, 0, 0, 255]),
            RasterImage::from_pixel(3, 9, [0, 255, 0, 128]),
            RasterImage::from_pixel(1, 1, [0, 0, 255, 0]),
        ];
        let bytes = ImagesToPdf::new().jpeg_quality(90).render(&images).unwrap();

        assert!(bytes.starts_with(b"%PDF-1.5"));
        assert_eq!(page_count(&bytes), 3);
    }

    #[test]
    fn test_render_rejects_empty_and_oversized_batches() {
        assert!(matches!(
            ImagesToPdf::new().render(&[]),
            Err(PixkitError::EmptyInput(_))
        ));

        let images = vec![RasterImage::from_pixel(1, 1, [0, 0, 0, 255]); MAX_PDF_IMAGES + 1];
        assert!(matches!(
            ImagesToPdf::new().render(&images),
            Err(PixkitError::InvalidConfig(_))
        ));

        let images = vec![RasterImage::from_pixel(1, 1, [0, 0, 0, 255]); MAX_PDF_IMAGES];
        assert_eq!(page_count(&ImagesToPdf::new().render(&images).unwrap()), MAX_PDF_IMAGES);
    }

    #[test]
    fn test_quality_is_clamped() {
        let builder = ImagesToPdf::new().jpeg_quality(0);
        assert_eq!(builder.jpeg_quality, 1);
    }
}
