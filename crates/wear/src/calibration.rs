//! Pixel-to-micrometer calibration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::debug;

use crate::{error::CalibrationError, gear::GearParameters};

/// Fallback ratio used when no reference measurement is available.
pub const DEFAULT_SCALE_UM_PER_PX: f64 = 6.0;

/// Empirical correction applied to the gear-geometry estimate.
const GEAR_ESTIMATE_CORRECTION: f64 = 0.8;
const GEAR_ESTIMATE_RANGE_UM_PER_PX: (f64, f64) = (4.0, 10.0);

#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, IntoStaticStr,
    PartialEq, Eq
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CalibrationSource {
    /// Derived from a reference dimension measured in the image
    Measured,
    /// Estimated from the nominal tooth size of the gear
    GearGeometry,
    /// Fixed fallback, not backed by any measurement
    UncalibratedDefault,
}

/// Immutable pixel-to-micrometer ratio shared by every call in a run.
///
/// Only constructible through the functions in this module, so
/// `scale_factor_um_per_px` is always positive and finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationFactor {
    pixels_per_unit: f64,
    reference_physical_size: f64,
    scale_factor_um_per_px: f64,
    source: CalibrationSource,
}

impl CalibrationFactor {
    /// Pixels per micrometer.
    pub fn pixels_per_unit(&self) -> f64 {
        self.pixels_per_unit
    }

    /// Physical size of the reference the ratio was derived from, in µm.
    pub fn reference_physical_size(&self) -> f64 {
        self.reference_physical_size
    }

    pub fn scale_factor_um_per_px(&self) -> f64 {
        self.scale_factor_um_per_px
    }

    pub fn source(&self) -> CalibrationSource {
        self.source
    }

    pub fn is_default(&self) -> bool {
        self.source == CalibrationSource::UncalibratedDefault
    }

    pub fn to_um(&self, pixels: f64) -> f64 {
        pixels * self.scale_factor_um_per_px
    }

    pub fn to_um2(&self, square_pixels: f64) -> f64 {
        square_pixels * self.scale_factor_um_per_px * self.scale_factor_um_per_px
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        check_scale(self.scale_factor_um_per_px).map(|_| ())
    }
}

/// Ratio from a reference dimension: `known_physical_size` µm spans
/// `reference_image_measurement` pixels.
pub fn derive_calibration(
    reference_image_measurement: f64,
    known_physical_size: f64,
) -> Result<CalibrationFactor, CalibrationError> {
    if !reference_image_measurement.is_finite() || reference_image_measurement <= 0.0 {
        return Err(CalibrationError::DegenerateReference(reference_image_measurement));
    }
    if !known_physical_size.is_finite() || known_physical_size <= 0.0 {
        return Err(CalibrationError::InvalidPhysicalSize(known_physical_size));
    }

    let scale = check_scale(known_physical_size / reference_image_measurement)?;
    debug!(
        "calibration: {:.3} µm over {:.3} px -> {:.4} µm/px",
        known_physical_size, reference_image_measurement, scale
    );
    Ok(CalibrationFactor {
        pixels_per_unit: reference_image_measurement / known_physical_size,
        reference_physical_size: known_physical_size,
        scale_factor_um_per_px: scale,
        source: CalibrationSource::Measured,
    })
}

/// Ratio supplied directly by configuration.
pub fn from_scale_factor(um_per_px: f64) -> Result<CalibrationFactor, CalibrationError> {
    let scale = check_scale(um_per_px)?;
    Ok(CalibrationFactor {
        pixels_per_unit: 1.0 / scale,
        reference_physical_size: scale,
        scale_factor_um_per_px: scale,
        source: CalibrationSource::Measured,
    })
}

/// The 6.0 µm/px fallback, tagged so it cannot pass for a measurement.
pub fn default_calibration() -> CalibrationFactor {
    CalibrationFactor {
        pixels_per_unit: 1.0 / DEFAULT_SCALE_UM_PER_PX,
        reference_physical_size: DEFAULT_SCALE_UM_PER_PX,
        scale_factor_um_per_px: DEFAULT_SCALE_UM_PER_PX,
        source: CalibrationSource::UncalibratedDefault,
    }
}

/// Estimate the ratio by assuming the healthy silhouette covers the nominal
/// tooth area of `gear`.
///
/// The raw estimate is corrected by an empirical 0.8 and clamped to
/// 4–10 µm/px.
pub fn estimate_from_gear(
    healthy_area_px: f64,
    gear: &GearParameters,
) -> Result<CalibrationFactor, CalibrationError> {
    if !healthy_area_px.is_finite() || healthy_area_px <= 0.0 {
        return Err(CalibrationError::InvalidToothArea(healthy_area_px));
    }
    let nominal_area_mm2 = gear.nominal_tooth_area_mm2();
    if !nominal_area_mm2.is_finite() || nominal_area_mm2 <= 0.0 {
        return Err(CalibrationError::InvalidPhysicalSize(nominal_area_mm2 * 1e6));
    }

    let raw = (nominal_area_mm2 / healthy_area_px).sqrt() * 1000.0 * GEAR_ESTIMATE_CORRECTION;
    let (low, high) = GEAR_ESTIMATE_RANGE_UM_PER_PX;
    let scale = check_scale(raw.clamp(low, high))?;
    debug!(
        "gear-geometry calibration: area {:.0} px², raw {:.3} µm/px, used {:.3} µm/px",
        healthy_area_px, raw, scale
    );
    Ok(CalibrationFactor {
        pixels_per_unit: 1.0 / scale,
        reference_physical_size: nominal_area_mm2.sqrt() * 1000.0,
        scale_factor_um_per_px: scale,
        source: CalibrationSource::GearGeometry,
    })
}

fn check_scale(scale: f64) -> Result<f64, CalibrationError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(scale)
    } else {
        Err(CalibrationError::InvalidScaleFactor(scale))
    }
}
