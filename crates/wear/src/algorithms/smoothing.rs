use geo::ChaikinSmoothing;
use nalgebra::Point2;

use crate::{traits::ContourPostProcessor, types::Contour};

/// Chaikin smoothing post-processor using geo crate's implementation
///
/// Rounds off the staircase left by pixel tracing. Each pass doubles the
/// point count and pulls corners inward slightly.
#[derive(Debug, Clone)]
pub struct ChaikinSmoothingProcessor {
    pub iterations: usize,
}

impl Default for ChaikinSmoothingProcessor {
    fn default() -> Self {
        Self { iterations: 1 }
    }
}

impl ContourPostProcessor for ChaikinSmoothingProcessor {
    fn process(&self, contour: Contour) -> Contour {
        if self.iterations == 0 {
            return contour;
        }
        let smoothed = contour.to_geo_polygon().chaikin_smoothing(self.iterations);
        let points = smoothed
            .exterior()
            .coords()
            .map(|c| Point2::new(c.x, c.y))
            .collect();
        Contour::new(points).unwrap_or(contour)
    }
}
