use std::f64::consts::{PI, TAU};

use geo::{Area, Centroid};
use geo_types::{Coord, LineString, Polygon};
use nalgebra::{Point2, Rotation2, Vector2};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle, used as a region hint for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersection with a `width` x `height` image, `None` when empty.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<Self> {
        let x0 = self.x.min(width);
        let y0 = self.y.min(height);
        let x1 = self.x.saturating_add(self.width).min(width);
        let y1 = self.y.saturating_add(self.height).min(height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Grow by `padding` on every side, clipped to the image.
    pub fn padded(&self, padding: u32, width: u32, height: u32) -> Self {
        let x0 = self.x.saturating_sub(padding);
        let y0 = self.y.saturating_sub(padding);
        let x1 = self
            .x
            .saturating_add(self.width)
            .saturating_add(padding)
            .min(width);
        let y1 = self
            .y
            .saturating_add(self.height)
            .saturating_add(padding)
            .min(height);
        Self::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }
}

/// Closed tooth boundary in pixel coordinates.
///
/// Always holds at least three points enclosing a non-zero area, ordered
/// counter-clockwise (positive shoelace area), so that the left-hand normal
/// of every edge points out of the silhouette.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contour {
    points: Vec<Point2<f64>>,
}

impl Contour {
    /// Builds a contour from an ordered loop of points.
    ///
    /// Consecutive duplicates and an explicit closing point are dropped.
    /// Returns `None` for fewer than three distinct points, non-finite
    /// coordinates, or a loop that encloses no area.
    pub fn new(mut points: Vec<Point2<f64>>) -> Option<Self> {
        points.dedup();
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 || points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return None;
        }

        let signed_area = polygon_from(&points).signed_area();
        if signed_area.abs() <= f64::EPSILON {
            return None;
        }
        if signed_area < 0.0 {
            points.reverse();
        }
        Some(Self { points })
    }

    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point2<f64>> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Convert to a geo-types Polygon for geometric operations
    pub fn to_geo_polygon(&self) -> Polygon<f64> {
        polygon_from(&self.points)
    }

    pub fn area(&self) -> f64 {
        self.to_geo_polygon().unsigned_area()
    }

    pub fn centroid(&self) -> Point2<f64> {
        match self.to_geo_polygon().centroid() {
            Some(c) => Point2::new(c.x(), c.y()),
            None => {
                let sum = self
                    .points
                    .iter()
                    .fold(Vector2::zeros(), |acc, p| acc + p.coords);
                Point2::from(sum / self.points.len() as f64)
            }
        }
    }

    /// Length of the closed loop, including the closing edge.
    pub fn perimeter(&self) -> f64 {
        self.edges().map(|(a, b)| (b - a).norm()).sum()
    }

    /// Iterate over the edges of the closed loop.
    pub fn edges(&self) -> impl Iterator<Item = (&Point2<f64>, &Point2<f64>)> + '_ {
        self.points
            .iter()
            .zip(self.points.iter().cycle().skip(1))
    }

    /// Smallest pixel rectangle covering every point, clamped to the
    /// non-negative image quadrant. A loop lying entirely at negative
    /// coordinates collapses to a 1x1 box at the origin.
    pub fn bounding_box(&self) -> BoundingBox {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &self.points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let x0 = min_x.floor().max(0.0);
        let y0 = min_y.floor().max(0.0);
        let x1 = max_x.ceil().max(x0);
        let y1 = max_y.ceil().max(y0);
        BoundingBox::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32 + 1,
            (y1 - y0) as u32 + 1,
        )
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        let offset = Vector2::new(dx, dy);
        Self {
            points: self.points.iter().map(|p| p + offset).collect(),
        }
    }

    /// Apply a similarity transform; a positive scale keeps the orientation.
    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        Self {
            points: self.points.iter().map(|p| transform.apply(p)).collect(),
        }
    }
}

fn polygon_from(points: &[Point2<f64>]) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = points.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
    Polygon::new(LineString::new(coords), vec![])
}

/// Rotation about the origin, uniform scale, then translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RigidTransform {
    /// Counter-clockwise rotation in radians, wrapped to (-π, π].
    pub rotation: f64,
    pub translation: [f64; 2],
    /// Uniform scale; exactly 1.0 unless scale estimation is enabled.
    pub scale: f64,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: 0.0,
            translation: [0.0, 0.0],
            scale: 1.0,
        }
    }

    pub fn from_translation(dx: f64, dy: f64) -> Self {
        Self {
            translation: [dx, dy],
            ..Self::identity()
        }
    }

    pub fn apply(&self, point: &Point2<f64>) -> Point2<f64> {
        let rotated = Rotation2::new(self.rotation) * point.coords * self.scale;
        Point2::from(rotated + Vector2::from(self.translation))
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &RigidTransform) -> Self {
        let carried = Rotation2::new(next.rotation) * Vector2::from(self.translation) * next.scale;
        let translation = carried + Vector2::from(next.translation);
        Self {
            rotation: wrap_angle(self.rotation + next.rotation),
            translation: [translation.x, translation.y],
            scale: self.scale * next.scale,
        }
    }

    pub fn translation_norm(&self) -> f64 {
        Vector2::from(self.translation).norm()
    }

    pub fn is_finite(&self) -> bool {
        self.rotation.is_finite()
            && self.translation.iter().all(|t| t.is_finite())
            && self.scale.is_finite()
            && self.scale > 0.0
    }

    pub fn is_identity_within(&self, tolerance: f64) -> bool {
        self.rotation.abs() <= tolerance
            && self.translation_norm() <= tolerance
            && (self.scale - 1.0).abs() <= tolerance
    }
}

fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

/// Worn and healthy contours in the worn image frame, resampled to the same
/// number of points so index `i` of one corresponds to index `i` of the other.
#[derive(Debug, Clone, Serialize)]
pub struct AlignedContourPair {
    pub worn: Contour,
    pub healthy: Contour,
    /// Maps the healthy capture onto the worn one.
    pub transform: RigidTransform,
    pub iterations: usize,
    /// RMS nearest-point distance over the inliers of the final iteration.
    pub rms_error_px: f64,
}

/// One calibrated measurement of one tooth in one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WearSample {
    pub tooth_index: u32,
    pub image_id: String,
    pub depth_um: f64,
    pub area_um2: Option<f64>,
}

/// Per-sample distance field behind a [`WearSample`], in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WearProfile {
    /// Arc-length position of each worn sample along the worn contour.
    pub arc_length_px: Vec<f64>,
    /// Positive where material was removed.
    pub signed_distance_px: Vec<f64>,
    /// Share of samples counted as wear direction.
    pub wear_fraction: f64,
}
