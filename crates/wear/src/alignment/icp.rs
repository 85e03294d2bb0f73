use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Matrix2, Point2, Vector2};
use tracing::debug;

use crate::{config::AlignmentConfig, error::AlignmentError, types::RigidTransform};

#[derive(Debug, Clone, Copy)]
pub struct IcpOutcome {
    pub transform: RigidTransform,
    pub iterations: usize,
    pub rms_error_px: f64,
}

/// Iterative closest point from `source` onto `target`, starting at
/// `initial`.
///
/// Each iteration pairs every moved source point with its nearest target
/// point, drops pairs further than `max(outlier_factor * median,
/// min_outlier_distance_px)`, and solves the closed-form best fit on the
/// rest. Stops when the update is below `tolerance` or the kept pairs repeat.
pub fn icp(
    source: &[Point2<f64>],
    target: &[Point2<f64>],
    initial: RigidTransform,
    config: &AlignmentConfig,
) -> Result<IcpOutcome, AlignmentError> {
    let coords = target.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
    let tree: KdTree<f64, 2> = (&coords).into();

    let mut current = initial;
    let mut previous_pairs: Option<Vec<(usize, usize)>> = None;
    let mut last_update = f64::INFINITY;

    for iteration in 1..=config.max_iterations {
        let moved: Vec<Point2<f64>> = source.iter().map(|p| current.apply(p)).collect();
        let matches: Vec<(usize, f64)> = moved
            .iter()
            .map(|p| {
                let nn = tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y]);
                (nn.item as usize, nn.distance.sqrt())
            })
            .collect();

        let pairs = inlier_pairs(&matches, config);
        let (from, to): (Vec<Point2<f64>>, Vec<Point2<f64>>) = pairs
            .iter()
            .map(|&(s, t)| (moved[s], target[t]))
            .unzip();
        let rms_error_px = (pairs
            .iter()
            .map(|&(s, _)| matches[s].1 * matches[s].1)
            .sum::<f64>()
            / pairs.len().max(1) as f64)
            .sqrt();

        let update = fit_transform(&from, &to, config.allow_scale).ok_or(AlignmentError::NonFinite)?;
        current = current.then(&update);
        if !current.is_finite() {
            return Err(AlignmentError::NonFinite);
        }

        last_update = update
            .rotation
            .abs()
            .max(update.translation_norm())
            .max((update.scale - 1.0).abs());
        let settled = previous_pairs.as_ref() == Some(&pairs);
        debug!(
            "icp iteration {}: {} inliers, rms {:.4} px, update {:.2e}",
            iteration,
            pairs.len(),
            rms_error_px,
            last_update
        );

        if last_update < config.tolerance || settled {
            return Ok(IcpOutcome {
                transform: current,
                iterations: iteration,
                rms_error_px,
            });
        }
        previous_pairs = Some(pairs);
    }

    Err(AlignmentError::Diverged {
        iterations: config.max_iterations,
        last_update,
    })
}

/// `(source, target)` index pairs that survive the median-distance cutoff.
///
/// When fewer than three would survive every pair is kept.
fn inlier_pairs(matches: &[(usize, f64)], config: &AlignmentConfig) -> Vec<(usize, usize)> {
    let mut distances: Vec<f64> = matches.iter().map(|&(_, d)| d).collect();
    distances.sort_by(f64::total_cmp);
    let median = median_of_sorted(&distances);
    let cutoff = (config.outlier_factor * median).max(config.min_outlier_distance_px);

    let kept: Vec<(usize, usize)> = matches
        .iter()
        .enumerate()
        .filter(|(_, (_, d))| *d <= cutoff)
        .map(|(s, &(t, _))| (s, t))
        .collect();
    if kept.len() >= 3 {
        kept
    } else {
        matches.iter().enumerate().map(|(s, &(t, _))| (s, t)).collect()
    }
}

fn median_of_sorted(values: &[f64]) -> f64 {
    let n = values.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => values[n / 2],
        _ => 0.5 * (values[n / 2 - 1] + values[n / 2]),
    }
}

/// Closed-form least-squares similarity (rotation, optional uniform scale,
/// translation) mapping `from` onto `to`, via the SVD of the 2x2
/// cross-covariance. Reflections are excluded.
pub fn fit_transform(
    from: &[Point2<f64>],
    to: &[Point2<f64>],
    allow_scale: bool,
) -> Option<RigidTransform> {
    if from.len() != to.len() || from.is_empty() {
        return None;
    }
    let n = from.len() as f64;
    let mean_from = from.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let mean_to = to.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;

    let mut covariance = Matrix2::zeros();
    let mut variance_from = 0.0;
    for (f, t) in from.iter().zip(to) {
        let df = f.coords - mean_from;
        let dt = t.coords - mean_to;
        covariance += dt * df.transpose();
        variance_from += df.norm_squared();
    }
    covariance /= n;
    variance_from /= n;
    if variance_from <= f64::EPSILON {
        return None;
    }

    let svd = covariance.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let d = if (u * v_t).determinant() < 0.0 { -1.0 } else { 1.0 };
    let correction = Matrix2::new(1.0, 0.0, 0.0, d);
    let rotation = u * correction * v_t;

    let scale = if allow_scale {
        (svd.singular_values[0] + d * svd.singular_values[1]) / variance_from
    } else {
        1.0
    };
    let translation = mean_to - rotation * mean_from * scale;
    let transform = RigidTransform {
        rotation: rotation[(1, 0)].atan2(rotation[(0, 0)]),
        translation: [translation.x, translation.y],
        scale,
    };
    transform.is_finite().then_some(transform)
}
