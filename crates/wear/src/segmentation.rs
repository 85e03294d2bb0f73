//! Locating individual teeth in a whole-gear photograph.

use image::GrayImage;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::{ExtractionConfig, ThresholdMethod},
    error::ExtractionError,
    pipeline::builder::PipelineBuilder,
    types::BoundingBox,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ToothLocatorConfig {
    pub min_area_px: f64,
    pub max_area_px: f64,
    /// Allowed centroid distance from the image centre.
    pub min_radius_px: f64,
    pub max_radius_px: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    /// When more candidates survive, only the largest this many are kept.
    pub expected_teeth: usize,
    /// Margin added around each tooth's bounding box.
    pub padding_px: u32,
    /// Thresholds tried after the extraction one; the run that finds the
    /// most teeth wins, earlier methods on ties.
    pub threshold_methods: Vec<ThresholdMethod>,
    /// Largest polar angle difference at which a worn tooth can stand in
    /// for a healthy one.
    pub max_match_angle_deg: f64,
}

impl Default for ToothLocatorConfig {
    fn default() -> Self {
        Self {
            min_area_px: 20.0,
            max_area_px: 15000.0,
            min_radius_px: 10.0,
            max_radius_px: 500.0,
            min_aspect_ratio: 0.1,
            max_aspect_ratio: 10.0,
            expected_teeth: 35,
            padding_px: 15,
            threshold_methods: vec![ThresholdMethod::Adaptive { block_radius: 15 }],
            max_match_angle_deg: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LocatedTooth {
    /// 1-based, counted by polar angle around the gear centre.
    pub tooth_index: u32,
    pub centroid: [f64; 2],
    /// Polar angle in degrees, `[0, 360)`, measured in image coordinates.
    pub angle_deg: f64,
    pub area_px: f64,
    /// Padded bounding box, usable as an extraction region hint.
    pub region: BoundingBox,
}

/// Find tooth-sized blobs arranged around the centre of `image`.
///
/// The gear centre is taken to be the image centre. The extraction
/// threshold is tried first, then each of `locator.threshold_methods`; the
/// method yielding the most teeth is kept. Fails only when every method does.
pub fn locate_teeth(
    image: &GrayImage,
    extraction: &ExtractionConfig,
    locator: &ToothLocatorConfig,
) -> Result<Vec<LocatedTooth>, ExtractionError> {
    let mut methods = vec![extraction.threshold];
    for method in &locator.threshold_methods {
        if !methods.contains(method) {
            methods.push(*method);
        }
    }

    let mut best: Option<(ThresholdMethod, Vec<LocatedTooth>)> = None;
    let mut last_error = None;
    for method in methods {
        let config = ExtractionConfig {
            threshold: method,
            ..extraction.clone()
        };
        match locate_with(image, &config, locator) {
            Ok(teeth) => {
                debug!("{} thresholding finds {} teeth", method, teeth.len());
                if best.as_ref().is_none_or(|(_, kept)| teeth.len() > kept.len()) {
                    best = Some((method, teeth));
                }
            }
            Err(e) => {
                debug!("{} thresholding failed: {}", method, e);
                last_error = Some(e);
            }
        }
    }

    match (best, last_error) {
        (Some((method, teeth)), _) => {
            info!("Located {} teeth with {} thresholding", teeth.len(), method);
            Ok(teeth)
        }
        (None, Some(e)) => Err(e),
        (None, None) => Err(ExtractionError::ContourNotFound(
            "no threshold method to try".to_string(),
        )),
    }
}

fn locate_with(
    image: &GrayImage,
    extraction: &ExtractionConfig,
    locator: &ToothLocatorConfig,
) -> Result<Vec<LocatedTooth>, ExtractionError> {
    let pipeline = PipelineBuilder::from_config(extraction).build();
    let candidates = pipeline.candidates(image, None)?;
    let (width, height) = image.dimensions();
    let center = ((width / 2) as f64, (height / 2) as f64);

    let mut teeth: Vec<(f64, f64, [f64; 2], BoundingBox)> = candidates
        .iter()
        .filter_map(|contour| {
            let area = contour.area();
            if area < locator.min_area_px || area > locator.max_area_px {
                return None;
            }
            let c = contour.centroid();
            let radius = (c.x - center.0).hypot(c.y - center.1);
            if radius < locator.min_radius_px || radius > locator.max_radius_px {
                return None;
            }
            let bbox = contour.bounding_box();
            let aspect = bbox.aspect_ratio();
            if aspect < locator.min_aspect_ratio || aspect > locator.max_aspect_ratio {
                return None;
            }
            let angle = (c.y - center.1).atan2(c.x - center.0).to_degrees().rem_euclid(360.0);
            Some((angle, area, [c.x, c.y], bbox))
        })
        .collect();
    debug!(
        "{} of {} blobs pass the tooth filters",
        teeth.len(),
        candidates.len()
    );

    if teeth.len() > locator.expected_teeth {
        teeth.sort_by(|a, b| b.1.total_cmp(&a.1));
        teeth.truncate(locator.expected_teeth);
    }
    teeth.sort_by(|a, b| a.0.total_cmp(&b.0));

    let located: Vec<LocatedTooth> = teeth
        .into_iter()
        .enumerate()
        .map(|(i, (angle_deg, area_px, centroid, bbox))| LocatedTooth {
            tooth_index: i as u32 + 1,
            centroid,
            angle_deg,
            area_px,
            region: bbox.padded(locator.padding_px, width, height),
        })
        .collect();
    Ok(located)
}

/// Pair every healthy tooth with the worn tooth standing in its place.
///
/// Candidates lie within `max_angle_deg` of the healthy tooth's polar angle;
/// each is scored by its angle gap plus its area mismatch and pairs are
/// taken best first, one-to-one. The result follows `healthy`; `None` marks
/// a tooth with no counterpart in the worn image. Both captures are assumed
/// to share the gear's orientation.
pub fn match_teeth<'a>(
    healthy: &[LocatedTooth],
    worn: &'a [LocatedTooth],
    max_angle_deg: f64,
) -> Vec<Option<&'a LocatedTooth>> {
    let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
    for (h, reference) in healthy.iter().enumerate() {
        for (w, tooth) in worn.iter().enumerate() {
            let gap = angular_gap(reference.angle_deg, tooth.angle_deg);
            if gap > max_angle_deg {
                continue;
            }
            let area_mismatch = 1.0 - reference.area_px.min(tooth.area_px) / reference.area_px.max(tooth.area_px);
            let score = gap / max_angle_deg.max(f64::EPSILON) + area_mismatch;
            candidates.push((score, h, w));
        }
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut matched: Vec<Option<&'a LocatedTooth>> = vec![None; healthy.len()];
    let mut taken = vec![false; worn.len()];
    for (_, h, w) in candidates {
        if matched[h].is_none() && !taken[w] {
            matched[h] = Some(&worn[w]);
            taken[w] = true;
        }
    }
    matched
}

/// Absolute difference of two angles in degrees, in `[0, 180]`.
fn angular_gap(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_circle_mut;

    /// Dark teeth of growing radius on a ring around the image centre.
    fn gear_image(count: usize) -> GrayImage {
        gear_image_without(count, None)
    }

    fn gear_image_without(count: usize, missing: Option<usize>) -> GrayImage {
        let mut image = GrayImage::from_pixel(400, 400, Luma([230]));
        for k in (0..count).filter(|&k| Some(k) != missing) {
            let theta = 10f64.to_radians() + (k as f64) * std::f64::consts::TAU / count as f64;
            let cx = 200.0 + 120.0 * theta.cos();
            let cy = 200.0 + 120.0 * theta.sin();
            draw_filled_circle_mut(
                &mut image,
                (cx.round() as i32, cy.round() as i32),
                6 + k as i32,
                Luma([20]),
            );
        }
        image
    }

    #[test]
    fn teeth_are_numbered_by_angle() {
        let teeth = locate_teeth(
            &gear_image(8),
            &ExtractionConfig::default(),
            &ToothLocatorConfig::default(),
        )
        .expect("located");
        assert_eq!(teeth.len(), 8);
        assert_eq!(teeth[0].tooth_index, 1);
        assert!((teeth[0].angle_deg - 10.0).abs() < 3.0);
        assert!((teeth[2].angle_deg - 100.0).abs() < 3.0);
        assert!(teeth.windows(2).all(|w| w[0].angle_deg < w[1].angle_deg));
        let first = &teeth[0];
        assert!(first.region.x as f64 <= first.centroid[0] - 15.0);
    }

    #[test]
    fn surplus_candidates_keep_the_largest() {
        let locator = ToothLocatorConfig {
            expected_teeth: 6,
            ..ToothLocatorConfig::default()
        };
        let teeth = locate_teeth(&gear_image(8), &ExtractionConfig::default(), &locator)
            .expect("located");
        assert_eq!(teeth.len(), 6);
        // The two smallest blobs sit at 10° and 55°.
        assert!(teeth.iter().all(|t| t.angle_deg > 60.0));
        assert_eq!(teeth.last().map(|t| t.tooth_index), Some(6));
    }

    fn tooth(angle_deg: f64, area_px: f64) -> LocatedTooth {
        LocatedTooth {
            tooth_index: 0,
            centroid: [0.0, 0.0],
            angle_deg,
            area_px,
            region: BoundingBox::new(0, 0, 1, 1),
        }
    }

    #[test]
    fn unusable_threshold_falls_back_to_other_methods() {
        let washed_out = ExtractionConfig {
            threshold: ThresholdMethod::Fixed { level: 5 },
            ..ExtractionConfig::default()
        };
        let single = ToothLocatorConfig {
            threshold_methods: Vec::new(),
            ..ToothLocatorConfig::default()
        };
        let alone = locate_teeth(&gear_image(8), &washed_out, &single).map(|t| t.len()).unwrap_or(0);
        assert_eq!(alone, 0);

        let fallback = ToothLocatorConfig {
            threshold_methods: vec![ThresholdMethod::Otsu],
            ..ToothLocatorConfig::default()
        };
        let teeth = locate_teeth(&gear_image(8), &washed_out, &fallback).expect("located");
        assert_eq!(teeth.len(), 8);
    }

    #[test]
    fn default_locator_also_tries_adaptive() {
        let locator = ToothLocatorConfig::default();
        assert!(locator
            .threshold_methods
            .iter()
            .any(|m| matches!(m, ThresholdMethod::Adaptive { .. })));
        let adaptive_only = ExtractionConfig {
            threshold: ThresholdMethod::Adaptive { block_radius: 15 },
            ..ExtractionConfig::default()
        };
        let teeth = locate_teeth(&gear_image(8), &adaptive_only, &ToothLocatorConfig {
            threshold_methods: Vec::new(),
            ..locator
        })
        .expect("located");
        assert_eq!(teeth.len(), 8);
    }

    #[test]
    fn matching_survives_a_missing_tooth() {
        let healthy: Vec<_> = (0..8).map(|k| tooth(k as f64 * 45.0, 100.0)).collect();
        let worn: Vec<_> = (0..8)
            .filter(|&k| k != 2)
            .map(|k| tooth((k as f64 * 45.0 + 1.5).rem_euclid(360.0), 90.0))
            .collect();
        let matched = match_teeth(&healthy, &worn, 5.0);
        assert_eq!(matched.len(), 8);
        assert!(matched[2].is_none());
        assert!((matched[3].expect("paired").angle_deg - 136.5).abs() < 1e-9);
        assert!((matched[7].expect("paired").angle_deg - 316.5).abs() < 1e-9);
    }

    #[test]
    fn matching_prefers_similar_area_and_wraps_angles() {
        let healthy = vec![tooth(359.0, 100.0)];
        let worn = vec![tooth(2.0, 40.0), tooth(1.0, 95.0)];
        let matched = match_teeth(&healthy, &worn, 5.0);
        assert_eq!(matched[0].map(|t| t.angle_deg), Some(1.0));
        assert!(match_teeth(&healthy, &[tooth(10.0, 100.0)], 5.0)[0].is_none());
    }

    #[test]
    fn located_teeth_pair_by_position_not_rank() {
        let extraction = ExtractionConfig::default();
        let locator = ToothLocatorConfig::default();
        let healthy = locate_teeth(&gear_image(8), &extraction, &locator).expect("located");
        let worn = locate_teeth(&gear_image_without(8, Some(2)), &extraction, &locator).expect("located");
        assert_eq!(worn.len(), 7);

        let matched = match_teeth(&healthy, &worn, locator.max_match_angle_deg);
        assert!(matched[2].is_none());
        for (reference, partner) in healthy.iter().zip(&matched).filter(|(_, m)| m.is_some()) {
            let partner = partner.expect("paired");
            assert!(angular_gap(reference.angle_deg, partner.angle_deg) < 2.0);
        }
        assert_eq!(matched[3].map(|t| t.tooth_index), Some(3));
    }

    #[test]
    fn blank_gear_image_is_an_error() {
        let blank = GrayImage::from_pixel(50, 50, Luma([0]));
        assert!(locate_teeth(&blank, &ExtractionConfig::default(), &ToothLocatorConfig::default()).is_err());
    }
}
