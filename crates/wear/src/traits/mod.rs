use image::GrayImage;
use nalgebra::Point2;

use crate::{error::ExtractionError, types::Contour};

/// Trait for image preprocessing stages (blur, threshold, cleanup)
pub trait ImagePreprocessor: Send + Sync {
    fn preprocess(&self, image: &GrayImage) -> Result<GrayImage, ExtractionError>;
}

/// Trait for boundary tracing on a binary image
pub trait ContourExtractor: Send + Sync {
    /// Raw pixel loops of every foreground blob, in image coordinates
    fn extract_contours(&self, binary: &GrayImage) -> Vec<Vec<Point2<f64>>>;
}

/// Trait for picking the tooth among candidate contours
pub trait ContourSelector: Send + Sync {
    fn select(&self, candidates: Vec<Contour>) -> Option<Contour>;
}

/// Trait for post-processing the selected contour
pub trait ContourPostProcessor: Send + Sync {
    fn process(&self, contour: Contour) -> Contour;
}
