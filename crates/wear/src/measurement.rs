//! Turning an aligned contour pair into a calibrated wear depth.

use nalgebra::{Point2, Vector2};
use serde::Serialize;
use tracing::debug;

use crate::{
    alignment::arc_positions,
    calibration::CalibrationFactor,
    config::{MeasurementSettings, ReductionPolicy},
    error::MeasurementError,
    types::{AlignedContourPair, Contour, WearProfile, WearSample},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WearMeasurement {
    pub sample: WearSample,
    pub profile: WearProfile,
}

impl ReductionPolicy {
    /// Collapse the non-negative wear distances into one value.
    ///
    /// Percentiles interpolate linearly between order statistics. `None`
    /// for an empty input.
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match *self {
            ReductionPolicy::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            ReductionPolicy::Max => values.iter().copied().reduce(f64::max),
            ReductionPolicy::Percentile { percentile } => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let rank = (percentile / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
                let lo = rank.floor() as usize;
                let hi = rank.ceil() as usize;
                Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
            }
        }
    }
}

/// Signed distance of every worn sample from the healthy outline.
///
/// Positive where the worn point lies inside the healthy silhouette, i.e.
/// where material has been removed.
pub fn signed_distances(worn: &Contour, healthy: &Contour) -> Vec<f64> {
    worn.points()
        .iter()
        .map(|w| signed_distance_to(healthy, w))
        .collect()
}

fn signed_distance_to(outline: &Contour, point: &Point2<f64>) -> f64 {
    let pts = outline.points();
    let n = pts.len();

    let mut best_index = 0;
    let mut best_t = 0.0;
    let mut best_dist_sq = f64::INFINITY;
    for (i, (a, b)) in outline.edges().enumerate() {
        let edge = b - a;
        let len_sq = edge.norm_squared();
        let t = if len_sq > 0.0 {
            ((point - a).dot(&edge) / len_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let dist_sq = (a + edge * t - point).norm_squared();
        if dist_sq < best_dist_sq {
            best_dist_sq = dist_sq;
            best_index = i;
            best_t = t;
        }
    }

    let a = pts[best_index];
    let b = pts[(best_index + 1) % n];
    let closest = a + (b - a) * best_t;
    let normal = if best_t <= 0.0 {
        vertex_normal(pts, best_index)
    } else if best_t >= 1.0 {
        vertex_normal(pts, (best_index + 1) % n)
    } else {
        edge_normal(&a, &b)
    };

    let offset = closest - point;
    let distance = best_dist_sq.sqrt();
    if offset.dot(&normal) < 0.0 { -distance } else { distance }
}

/// Outward unit normal of a counter-clockwise edge.
fn edge_normal(a: &Point2<f64>, b: &Point2<f64>) -> Vector2<f64> {
    let tangent = b - a;
    Vector2::new(tangent.y, -tangent.x)
        .try_normalize(f64::EPSILON)
        .unwrap_or_else(Vector2::zeros)
}

fn vertex_normal(pts: &[Point2<f64>], index: usize) -> Vector2<f64> {
    let n = pts.len();
    let prev = pts[(index + n - 1) % n];
    let next = pts[(index + 1) % n];
    let sum = edge_normal(&prev, &pts[index]) + edge_normal(&pts[index], &next);
    sum.try_normalize(f64::EPSILON)
        .unwrap_or_else(|| edge_normal(&pts[index], &next))
}

/// Depth of wear of one tooth from its aligned pair.
///
/// Samples down to `-noise_floor_px` count as wear direction; too few of
/// them fails the measurement. Only samples deeper than the noise floor are
/// reduced to the depth, so a narrow worn patch is not averaged away by the
/// intact outline. Zero when nothing exceeds the floor. A non-finite depth or
/// one beyond the plausible limit fails rather than report a number.
pub fn measure(
    pair: &AlignedContourPair,
    calibration: &CalibrationFactor,
    settings: &MeasurementSettings,
    tooth_index: u32,
    image_id: &str,
) -> Result<WearMeasurement, MeasurementError> {
    let (worn, healthy) = (&pair.worn, &pair.healthy);
    if worn.len() != healthy.len() || worn.is_empty() {
        return Err(MeasurementError::MismatchedSamples {
            worn: worn.len(),
            healthy: healthy.len(),
        });
    }

    let distances = signed_distances(worn, healthy);
    let wear_direction = distances
        .iter()
        .filter(|&&d| d >= -settings.noise_floor_px)
        .count();
    let wear_fraction = wear_direction as f64 / distances.len() as f64;
    if wear_direction == 0 || wear_fraction < settings.min_wear_fraction {
        return Err(MeasurementError::TooFewWearSamples {
            wear_fraction,
            required: settings.min_wear_fraction,
        });
    }

    let worn_samples: Vec<f64> = distances
        .iter()
        .copied()
        .filter(|&d| d > settings.noise_floor_px)
        .collect();
    let depth_px = if worn_samples.is_empty() {
        0.0
    } else {
        settings
            .reduction
            .reduce(&worn_samples)
            .ok_or(MeasurementError::NonFinite)?
    };
    let depth_um = calibration.to_um(depth_px);
    if !depth_um.is_finite() {
        return Err(MeasurementError::NonFinite);
    }
    if let Some(limit_um) = settings.max_plausible_depth_um {
        if depth_um > limit_um {
            return Err(MeasurementError::Implausible { depth_um, limit_um });
        }
    }

    let area_um2 = settings
        .compute_area
        .then(|| calibration.to_um2(wear_area_px(worn, &distances)));
    debug!(
        "{} tooth {}: depth {:.3} px = {:.1} µm ({} policy, {:.0}% wear samples)",
        image_id,
        tooth_index,
        depth_px,
        depth_um,
        settings.reduction,
        wear_fraction * 100.0
    );

    Ok(WearMeasurement {
        sample: WearSample {
            tooth_index,
            image_id: image_id.to_string(),
            depth_um,
            area_um2,
        },
        profile: WearProfile {
            arc_length_px: arc_positions(worn.points()),
            signed_distance_px: distances,
            wear_fraction,
        },
    })
}

/// Trapezoid integral of the positive distances along the closed worn loop.
fn wear_area_px(worn: &Contour, distances: &[f64]) -> f64 {
    worn.edges()
        .zip(distances.iter().zip(distances.iter().cycle().skip(1)))
        .map(|((a, b), (&da, &db))| 0.5 * (da.max(0.0) + db.max(0.0)) * (b - a).norm())
        .sum()
}
