//! Single-image tools, each a [`Transform`](crate::pipeline::Transform) for the pipeline
//!
//! Two tools sit outside that shape. The color picker reads a pixel rather
//! than producing a new image, and the PDF builder takes many images and
//! produces a document.

pub mod background;
pub mod color;
pub mod convert;
pub mod crop;
pub mod pdf;
pub mod resize;

pub use background::BackgroundRemoval;
pub use color::{sample_color, ColorSample, DEFAULT_SWATCH_SIZE};
pub use convert::{Flatten, Identity};
pub use crop::Crop;
pub use pdf::{ImagesToPdf, PageLayout, Placement, MAX_PDF_IMAGES, PDF_FILE_NAME};
pub use resize::Resize;
