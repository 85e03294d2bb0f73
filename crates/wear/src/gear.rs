//! Spur gear geometry from the standard module formulas.

use std::f64::consts::PI;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Deepest wear a tooth of the reference gear can physically show.
pub const MAX_THEORETICAL_WEAR_UM: f64 = 1500.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GearParameters {
    /// Module in millimeters.
    pub module_mm: f64,
    pub tooth_count: u32,
    pub pressure_angle_deg: f64,
}

/// KHK SS3-35: module 3, 35 teeth, 20° pressure angle.
impl Default for GearParameters {
    fn default() -> Self {
        Self {
            module_mm: 3.0,
            tooth_count: 35,
            pressure_angle_deg: 20.0,
        }
    }
}

impl GearParameters {
    /// d = z·m
    pub fn reference_diameter_mm(&self) -> f64 {
        self.tooth_count as f64 * self.module_mm
    }

    /// da = d + 2m
    pub fn tip_diameter_mm(&self) -> f64 {
        self.reference_diameter_mm() + 2.0 * self.module_mm
    }

    /// df = d − 2.5m
    pub fn root_diameter_mm(&self) -> f64 {
        self.reference_diameter_mm() - 2.5 * self.module_mm
    }

    pub fn addendum_mm(&self) -> f64 {
        self.module_mm
    }

    pub fn dedendum_mm(&self) -> f64 {
        1.25 * self.module_mm
    }

    /// Tooth thickness on the pitch circle, πm/2.
    pub fn tooth_thickness_mm(&self) -> f64 {
        PI * self.module_mm / 2.0
    }

    pub fn tooth_height_mm(&self) -> f64 {
        self.addendum_mm() + self.dedendum_mm()
    }

    pub fn circular_pitch_mm(&self) -> f64 {
        PI * self.module_mm
    }

    pub fn base_diameter_mm(&self) -> f64 {
        self.reference_diameter_mm() * self.pressure_angle_deg.to_radians().cos()
    }

    /// Nominal silhouette area of one tooth, thickness × height.
    pub fn nominal_tooth_area_mm2(&self) -> f64 {
        self.tooth_thickness_mm() * self.tooth_height_mm()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.module_mm.is_finite() || self.module_mm <= 0.0 {
            issues.push("Gear module must be positive".to_string());
        }
        if self.tooth_count == 0 {
            issues.push("Tooth count must be positive".to_string());
        }
        if !(self.pressure_angle_deg > 0.0 && self.pressure_angle_deg < 90.0) {
            issues.push("Pressure angle must be between 0 and 90 degrees".to_string());
        }
        issues
    }
}
