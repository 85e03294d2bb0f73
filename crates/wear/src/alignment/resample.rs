use nalgebra::Point2;

/// `count` points equally spaced by arc length along the closed loop,
/// starting at `points[0]`.
pub fn resample_closed(points: &[Point2<f64>], count: usize) -> Vec<Point2<f64>> {
    let n = points.len();
    if n == 0 || count == 0 {
        return Vec::new();
    }
    let edge_lengths: Vec<f64> = (0..n)
        .map(|i| (points[(i + 1) % n] - points[i]).norm())
        .collect();
    let perimeter: f64 = edge_lengths.iter().sum();
    if perimeter <= 0.0 {
        return vec![points[0]; count];
    }

    let step = perimeter / count as f64;
    let mut out = Vec::with_capacity(count);
    let mut edge = 0;
    let mut walked = 0.0;
    for k in 0..count {
        let target = k as f64 * step;
        while edge < n - 1 && walked + edge_lengths[edge] < target {
            walked += edge_lengths[edge];
            edge += 1;
        }
        let len = edge_lengths[edge];
        let t = if len > 0.0 {
            ((target - walked) / len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let a = points[edge];
        let b = points[(edge + 1) % n];
        out.push(a + (b - a) * t);
    }
    out
}

/// Rotate the loop so it starts at the point nearest `anchor`.
pub fn start_nearest(points: &mut [Point2<f64>], anchor: &Point2<f64>) {
    let start = points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (*a - anchor)
                .norm_squared()
                .total_cmp(&(*b - anchor).norm_squared())
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    points.rotate_left(start);
}

/// Arc-length position of every vertex along the loop, starting at zero.
pub fn arc_positions(points: &[Point2<f64>]) -> Vec<f64> {
    let mut positions = Vec::with_capacity(points.len());
    let mut walked = 0.0;
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            walked += (p - points[i - 1]).norm();
        }
        positions.push(walked);
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square() -> Vec<Point2<f64>> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ]
    }

    #[test]
    fn samples_are_evenly_spaced() {
        let samples = resample_closed(&square(), 8);
        assert_eq!(samples.len(), 8);
        assert_eq!(samples[0], Point2::new(0.0, 0.0));
        assert_relative_eq!(samples[1].x, 5.0);
        assert_relative_eq!(samples[3].y, 5.0);
        for i in 0..8 {
            let gap = (samples[(i + 1) % 8] - samples[i]).norm();
            assert_relative_eq!(gap, 5.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn rotation_starts_at_anchor() {
        let mut samples = resample_closed(&square(), 8);
        start_nearest(&mut samples, &Point2::new(10.2, 9.7));
        assert_eq!(samples[0], Point2::new(10.0, 10.0));
        assert_eq!(samples.len(), 8);
    }

    #[test]
    fn arc_positions_accumulate() {
        let positions = arc_positions(&square());
        assert_eq!(positions, vec![0.0, 10.0, 20.0, 30.0]);
    }
}
