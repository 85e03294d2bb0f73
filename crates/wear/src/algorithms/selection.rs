use crate::{traits::ContourSelector, types::Contour};

/// Picks the contour with the largest enclosed area
///
/// Contours shorter than `min_perimeter_px` are ignored as noise. Equal
/// areas are broken by centroid x, then centroid y, so the pick never
/// depends on tracing order.
#[derive(Debug, Clone)]
pub struct LargestAreaSelector {
    pub min_perimeter_px: f64,
}

impl Default for LargestAreaSelector {
    fn default() -> Self {
        Self {
            min_perimeter_px: 20.0,
        }
    }
}

impl ContourSelector for LargestAreaSelector {
    fn select(&self, candidates: Vec<Contour>) -> Option<Contour> {
        candidates
            .into_iter()
            .filter(|c| c.perimeter() >= self.min_perimeter_px)
            .map(|c| (c.area(), c.centroid(), c))
            .min_by(|(area_a, centroid_a, _), (area_b, centroid_b, _)| {
                area_b
                    .total_cmp(area_a)
                    .then_with(|| centroid_a.x.total_cmp(&centroid_b.x))
                    .then_with(|| centroid_a.y.total_cmp(&centroid_b.y))
            })
            .map(|(_, _, contour)| contour)
    }
}

/// Area-descending order with the same tie-break as [`LargestAreaSelector`].
pub fn rank_by_area(candidates: &mut [Contour]) {
    candidates.sort_by(|a, b| {
        b.area()
            .total_cmp(&a.area())
            .then_with(|| a.centroid().x.total_cmp(&b.centroid().x))
            .then_with(|| a.centroid().y.total_cmp(&b.centroid().y))
    });
}
