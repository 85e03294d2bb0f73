//! Registering the healthy reference contour onto a worn contour.

pub mod icp;
pub mod resample;

use tracing::debug;

use crate::{
    config::AlignmentConfig,
    error::AlignmentError,
    types::{AlignedContourPair, Contour, RigidTransform},
};

use icp::IcpOutcome;
pub use icp::fit_transform;
pub use resample::{arc_positions, resample_closed, start_nearest};

/// Target points per source point in the ICP nearest-neighbour index.
const TARGET_DENSITY: usize = 4;

/// Bring `healthy` into the frame of `worn` and resample both loops to
/// `config.sample_count` corresponding points.
///
/// Starts from the centroid offset, so the result depends only on the inputs.
/// Worn material pulls that offset off the true fit, so after the first
/// convergence up to `refine_passes` fits restart from the result with the
/// median cutoff scaled by `refine_outlier_factor` instead.
pub fn align(
    worn: &Contour,
    healthy: &Contour,
    config: &AlignmentConfig,
) -> Result<AlignedContourPair, AlignmentError> {
    let n = config.sample_count;
    let source = resample_closed(healthy.points(), n);
    let target = resample_closed(worn.points(), n * TARGET_DENSITY);

    let offset = worn.centroid() - healthy.centroid();
    let initial = RigidTransform::from_translation(offset.x, offset.y);
    let mut outcome = icp::icp(&source, &target, initial, config)?;

    let refine = AlignmentConfig {
        outlier_factor: config.refine_outlier_factor,
        ..config.clone()
    };
    for pass in 1..=config.refine_passes {
        let refined = icp::icp(&source, &target, outcome.transform, &refine)?;
        let change = transform_change(&outcome.transform, &refined.transform);
        debug!("refinement pass {}: change {:.2e}", pass, change);
        outcome = IcpOutcome {
            iterations: outcome.iterations + refined.iterations,
            ..refined
        };
        if change < config.tolerance {
            break;
        }
    }
    debug!(
        "aligned in {} iterations: rotation {:.5} rad, translation ({:.3}, {:.3}) px, scale {:.5}, rms {:.3} px",
        outcome.iterations,
        outcome.transform.rotation,
        outcome.transform.translation[0],
        outcome.transform.translation[1],
        outcome.transform.scale,
        outcome.rms_error_px
    );

    let healthy_samples = resample_closed(healthy.transformed(&outcome.transform).points(), n);
    let mut worn_samples = resample_closed(worn.points(), n);
    if let Some(anchor) = healthy_samples.first() {
        start_nearest(&mut worn_samples, anchor);
    }

    let healthy = Contour::new(healthy_samples).ok_or(AlignmentError::DegenerateContour)?;
    let worn = Contour::new(worn_samples).ok_or(AlignmentError::DegenerateContour)?;
    if worn.len() != n || healthy.len() != n {
        return Err(AlignmentError::DegenerateContour);
    }

    Ok(AlignedContourPair {
        worn,
        healthy,
        transform: outcome.transform,
        iterations: outcome.iterations,
        rms_error_px: outcome.rms_error_px,
    })
}

/// Largest parameter difference between two transforms.
fn transform_change(a: &RigidTransform, b: &RigidTransform) -> f64 {
    let dx = b.translation[0] - a.translation[0];
    let dy = b.translation[1] - a.translation[1];
    (b.rotation - a.rotation)
        .abs()
        .max(dx.hypot(dy))
        .max((b.scale - a.scale).abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point2;

    fn circle(cx: f64, cy: f64, r: f64, count: usize) -> Contour {
        Contour::new(
            (0..count)
                .map(|i| {
                    let t = i as f64 * std::f64::consts::TAU / count as f64;
                    Point2::new(cx + r * t.cos(), cy + r * t.sin())
                })
                .collect(),
        )
        .expect("valid circle")
    }

    fn blob() -> Contour {
        Contour::new(
            (0..720)
                .map(|i| {
                    let t = i as f64 * std::f64::consts::TAU / 720.0;
                    let r = 40.0 + 6.0 * (3.0 * t).cos();
                    Point2::new(100.0 + 1.3 * r * t.cos(), 80.0 + r * t.sin())
                })
                .collect(),
        )
        .expect("valid blob")
    }

    #[test]
    fn self_alignment_is_identity() {
        let contour = blob();
        let pair = align(&contour, &contour, &AlignmentConfig::default()).expect("aligned");
        assert!(pair.transform.is_identity_within(1e-6), "{:?}", pair.transform);
        assert_eq!(pair.worn.len(), 360);
        assert_eq!(pair.healthy.len(), 360);
        assert!(pair.rms_error_px < 1e-6);
    }

    #[test]
    fn realigning_aligned_pair_is_identity() {
        let worn = blob();
        let moved = blob().transformed(&RigidTransform {
            rotation: -0.05,
            translation: [12.0, 3.0],
            scale: 1.0,
        });
        let config = AlignmentConfig::default();
        let first = align(&worn, &moved, &config).expect("aligned");
        let second = align(&first.worn, &first.worn, &config).expect("aligned");
        assert!(second.transform.is_identity_within(1e-6));
    }

    #[test]
    fn concentric_offset_keeps_centre() {
        let worn = circle(60.0, 60.0, 35.0, 720);
        let healthy = circle(10.0, -5.0, 40.0, 720);
        let pair = align(&worn, &healthy, &AlignmentConfig::default()).expect("aligned");
        let c = pair.healthy.centroid();
        assert_relative_eq!(c.x, 60.0, epsilon = 0.05);
        assert_relative_eq!(c.y, 60.0, epsilon = 0.05);
        assert_relative_eq!(pair.transform.scale, 1.0);
    }

    #[test]
    fn alignment_is_deterministic() {
        let worn = blob();
        let healthy = blob().translated(4.0, -2.0);
        let config = AlignmentConfig::default();
        let a = align(&worn, &healthy, &config).expect("aligned");
        let b = align(&worn, &healthy, &config).expect("aligned");
        assert_eq!(a.transform, b.transform);
        assert_eq!(a.worn, b.worn);
    }

    /// 100 x 60 plate with an optional 5 px deep notch of the given width
    /// centred on the top edge.
    fn plate(notch_width: Option<f64>) -> Contour {
        let mut pts = vec![Point2::new(0.0, 0.0), Point2::new(100.0, 0.0), Point2::new(100.0, 60.0)];
        if let Some(width) = notch_width {
            let (left, right) = (50.0 - width / 2.0, 50.0 + width / 2.0);
            pts.extend([
                Point2::new(right, 60.0),
                Point2::new(right, 55.0),
                Point2::new(left, 55.0),
                Point2::new(left, 60.0),
            ]);
        }
        pts.push(Point2::new(0.0, 60.0));
        let coarse = Contour::new(pts).expect("valid plate");
        Contour::new(resample_closed(coarse.points(), 660)).expect("valid plate")
    }

    #[test]
    fn local_wear_does_not_pull_the_fit() {
        let config = AlignmentConfig::default();
        let pair = align(&plate(Some(60.0)), &plate(None), &config).expect("aligned");
        assert!(pair.transform.translation_norm() < 0.2, "{:?}", pair.transform);
        assert!(pair.transform.rotation.abs() < 1e-3, "{:?}", pair.transform);

        let unrefined = AlignmentConfig {
            refine_passes: 0,
            ..config
        };
        let biased = align(&plate(Some(60.0)), &plate(None), &unrefined).expect("aligned");
        assert!(pair.transform.translation_norm() < biased.transform.translation_norm());
    }

    #[test]
    fn aligned_local_wear_is_measured_at_its_depth() {
        use crate::{calibration::default_calibration, config::MeasurementSettings, measurement::measure};

        for width in [6.0, 20.0, 60.0] {
            let pair = align(&plate(Some(width)), &plate(None), &AlignmentConfig::default())
                .expect("aligned");
            let result = measure(&pair, &default_calibration(), &MeasurementSettings::default(), 1, "W6")
                .expect("measured");
            assert_relative_eq!(result.sample.depth_um, 30.0, epsilon = 1.5);
        }
    }

    #[test]
    fn worn_loop_starts_near_healthy_start() {
        let worn = circle(0.0, 0.0, 35.0, 720);
        let healthy = circle(0.0, 0.0, 40.0, 720);
        let pair = align(&worn, &healthy, &AlignmentConfig::default()).expect("aligned");
        let gap = (pair.worn.points()[0] - pair.healthy.points()[0]).norm();
        assert!(gap < 5.5, "start gap {gap}");
    }
}
