//! Run configuration.
//!
//! Every tunable of the measurement core lives in [`MeasurementConfig`], which
//! is passed explicitly into each call so a run is reproducible from its
//! inputs alone.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr, VariantNames};

use crate::error::{Result, WearError};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MeasurementConfig {
    pub extraction: ExtractionConfig,
    pub alignment: AlignmentConfig,
    pub measurement: MeasurementSettings,
}

impl MeasurementConfig {
    /// Every invalid field, not just the first one.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = self.extraction.validate();
        issues.extend(self.alignment.validate());
        issues.extend(self.measurement.validate());
        issues
    }

    pub fn ensure_valid(&self) -> Result<()> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(WearError::InvalidConfig(issues))
        }
    }
}

/// How the silhouette is separated from the background.
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, VariantNames, IntoStaticStr,
    PartialEq, Default
)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ThresholdMethod {
    /// Otsu's level computed per image
    #[default]
    Otsu,
    /// Fixed intensity level; pixels brighter than `level` are light
    Fixed { level: u8 },
    /// Local mean over a `(2r+1)`-pixel square block; copes with uneven lighting
    Adaptive { block_radius: u32 },
}

#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, VariantNames, IntoStaticStr,
    PartialEq, Eq, Default
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Polarity {
    /// Dark tooth photographed against a light background
    #[default]
    DarkOnLight,
    /// Light tooth against a dark background
    LightOnDark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Histogram equalisation and a 3x3 sharpen before anything else.
    pub enhance: bool,
    /// Gaussian blur sigma applied before thresholding; 0 disables it.
    pub blur_sigma: f32,
    pub threshold: ThresholdMethod,
    pub polarity: Polarity,
    /// Radius of the close/open cleanup; 0 disables it.
    pub morphology_radius: u8,
    /// Minimum intensity range for an image to contain a silhouette.
    pub min_contrast: u8,
    /// Boundaries shorter than this are treated as noise.
    pub min_perimeter_px: f64,
    /// Chaikin smoothing passes over the selected contour.
    pub smoothing_iterations: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enhance: false,
            blur_sigma: 1.0,
            threshold: ThresholdMethod::Otsu,
            polarity: Polarity::DarkOnLight,
            morphology_radius: 1,
            min_contrast: 10,
            min_perimeter_px: 20.0,
            smoothing_iterations: 0,
        }
    }
}

impl ExtractionConfig {
    fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            issues.push(format!("extraction.blur_sigma must be >= 0, got {}", self.blur_sigma));
        }
        if let ThresholdMethod::Adaptive { block_radius: 0 } = self.threshold {
            issues.push("extraction.threshold block_radius must be at least 1".to_string());
        }
        if !self.min_perimeter_px.is_finite() || self.min_perimeter_px <= 0.0 {
            issues.push(format!(
                "extraction.min_perimeter_px must be > 0, got {}",
                self.min_perimeter_px
            ));
        }
        issues
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Hard cap on closest-point iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the per-iteration update (radians and pixels).
    pub tolerance: f64,
    /// Correspondences further than `outlier_factor` times the median
    /// distance are left out of the fit.
    pub outlier_factor: f64,
    /// Correspondences closer than this are always kept.
    pub min_outlier_distance_px: f64,
    /// Tighter median factor used once the first fit has converged.
    pub refine_outlier_factor: f64,
    /// Extra fits restarted from the converged transform; 0 disables them.
    pub refine_passes: usize,
    /// Also estimate a uniform scale between the captures.
    pub allow_scale: bool,
    /// Points per contour after arc-length resampling.
    pub sample_count: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-4,
            outlier_factor: 3.0,
            min_outlier_distance_px: 2.0,
            refine_outlier_factor: 1.5,
            refine_passes: 3,
            allow_scale: false,
            sample_count: 360,
        }
    }
}

impl AlignmentConfig {
    fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.max_iterations == 0 {
            issues.push("alignment.max_iterations must be at least 1".to_string());
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            issues.push(format!("alignment.tolerance must be > 0, got {}", self.tolerance));
        }
        if !self.outlier_factor.is_finite() || self.outlier_factor < 1.0 {
            issues.push(format!(
                "alignment.outlier_factor must be >= 1, got {}",
                self.outlier_factor
            ));
        }
        if !self.min_outlier_distance_px.is_finite() || self.min_outlier_distance_px < 0.0 {
            issues.push(format!(
                "alignment.min_outlier_distance_px must be >= 0, got {}",
                self.min_outlier_distance_px
            ));
        }
        if !self.refine_outlier_factor.is_finite()
            || self.refine_outlier_factor < 1.0
            || self.refine_outlier_factor > self.outlier_factor
        {
            issues.push(format!(
                "alignment.refine_outlier_factor must be within [1, outlier_factor], got {}",
                self.refine_outlier_factor
            ));
        }
        if self.sample_count < 8 {
            issues.push(format!(
                "alignment.sample_count must be at least 8, got {}",
                self.sample_count
            ));
        }
        issues
    }
}

/// Statistic that turns the per-sample distance field into one depth.
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, VariantNames, IntoStaticStr,
    PartialEq
)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReductionPolicy {
    /// Linear-interpolated percentile of the wear-direction distances
    Percentile { percentile: f64 },
    /// Mean of the wear-direction distances
    Mean,
    /// Largest wear-direction distance
    Max,
}

impl Default for ReductionPolicy {
    fn default() -> Self {
        Self::Percentile { percentile: 90.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MeasurementSettings {
    pub reduction: ReductionPolicy,
    /// Below this share of wear-direction samples the pair is rejected.
    pub min_wear_fraction: f64,
    /// Samples down to `-noise_floor_px` still count as wear direction.
    pub noise_floor_px: f64,
    pub compute_area: bool,
    /// Depths above this are rejected rather than reported.
    pub max_plausible_depth_um: Option<f64>,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            reduction: ReductionPolicy::default(),
            min_wear_fraction: 0.5,
            noise_floor_px: 0.5,
            compute_area: true,
            max_plausible_depth_um: Some(crate::gear::MAX_THEORETICAL_WEAR_UM),
        }
    }
}

impl MeasurementSettings {
    fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if let ReductionPolicy::Percentile { percentile } = self.reduction {
            if !(0.0..=100.0).contains(&percentile) {
                issues.push(format!(
                    "measurement.reduction percentile must be within 0..=100, got {percentile}"
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.min_wear_fraction) {
            issues.push(format!(
                "measurement.min_wear_fraction must be within 0..=1, got {}",
                self.min_wear_fraction
            ));
        }
        if !self.noise_floor_px.is_finite() || self.noise_floor_px < 0.0 {
            issues.push(format!(
                "measurement.noise_floor_px must be >= 0, got {}",
                self.noise_floor_px
            ));
        }
        if let Some(limit) = self.max_plausible_depth_um {
            if !limit.is_finite() || limit <= 0.0 {
                issues.push(format!(
                    "measurement.max_plausible_depth_um must be > 0, got {limit}"
                ));
            }
        }
        issues
    }
}
