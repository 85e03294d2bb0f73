use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use nalgebra::Point2;

use crate::traits::ContourExtractor;

/// Imageproc-based contour extractor
///
/// Only top-level outer borders are returned; hole borders and blobs nested
/// inside holes never describe the tooth silhouette.
#[derive(Debug, Clone, Default)]
pub struct ImageprocContourExtractor;

impl ContourExtractor for ImageprocContourExtractor {
    fn extract_contours(&self, binary: &GrayImage) -> Vec<Vec<Point2<f64>>> {
        find_contours::<i32>(binary)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .map(|c| {
                c.points
                    .iter()
                    .map(|p| Point2::new(p.x as f64, p.y as f64))
                    .collect()
            })
            .collect()
    }
}
