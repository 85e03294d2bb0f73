//! # Gear Tooth Wear Measurement
//!
//! Measures how much material a gear tooth has lost by comparing a
//! photograph of the worn tooth against a photograph of a healthy one.
//!
//! ## Core Features
//!
//! - **Calibration**: pixel-to-micrometer ratios from a scale bar, a
//!   configured factor, or the nominal gear geometry
//! - **Extraction Pipeline**: trait-based stages that turn a grayscale image
//!   into a single closed tooth contour
//! - **Alignment**: iterative closest point with outlier rejection, so worn
//!   regions do not pull the fit
//! - **Measurement**: signed distances along the healthy outline reduced to
//!   one depth per tooth
//! - **Batch Tables**: parallel jobs folded into a per-image, per-tooth table
//!   where failures stay visible as empty cells
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wear::{align, derive_calibration, extract_tooth_contour, measure, MeasurementConfig};
//!
//! let config = MeasurementConfig::default();
//! let worn = image::open("W3.jpg")?.to_luma8();
//! let healthy = image::open("healthy.jpg")?.to_luma8();
//!
//! let worn = extract_tooth_contour(&worn, None, &config.extraction)?;
//! let healthy = extract_tooth_contour(&healthy, None, &config.extraction)?;
//! let pair = align(&worn, &healthy, &config.alignment)?;
//!
//! let calibration = derive_calibration(41.8, 250.8)?;
//! let result = measure(&pair, &calibration, &config.measurement, 1, "W3")?;
//! println!("{:.1} µm", result.sample.depth_um);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod gear;
pub mod calibration;
pub mod traits;
pub mod algorithms;
pub mod pipeline;
pub mod segmentation;
pub mod alignment;
pub mod measurement;
pub mod table;
pub mod batch;
pub mod io;

pub use error::{
    AlignmentError, BatchError, BatchIssue, CalibrationError, ExtractionError, JobError,
    JobFailure, MeasurementError, Result, WearError,
};
pub use types::{AlignedContourPair, BoundingBox, Contour, RigidTransform, WearProfile, WearSample};
pub use config::{
    AlignmentConfig, ExtractionConfig, MeasurementConfig, MeasurementSettings, Polarity,
    ReductionPolicy, ThresholdMethod,
};
pub use gear::GearParameters;
pub use calibration::{
    default_calibration, derive_calibration, estimate_from_gear, from_scale_factor,
    CalibrationFactor, CalibrationSource,
};
pub use traits::*;
pub use pipeline::{builder::PipelineBuilder, extract_tooth_contour, ExtractionPipeline};
pub use segmentation::{locate_teeth, match_teeth, LocatedTooth, ToothLocatorConfig};
pub use alignment::align;
pub use measurement::{measure, WearMeasurement};
pub use table::{Cell, ColumnStats, ReferenceComparison, ResultTable, RowKey, TableMode};
pub use batch::{
    measure_job, run_batch, BatchJob, BatchReport, BatchSummary, MeasuredJob, UnmeasuredCell,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use image::{GrayImage, Luma};
    use imageproc::drawing::draw_filled_circle_mut;
    use nalgebra::Point2;

    fn analytic_circle(r: f64) -> Contour {
        Contour::new(
            (0..720)
                .map(|i| {
                    let t = i as f64 * std::f64::consts::TAU / 720.0;
                    Point2::new(150.0 + r * t.cos(), 120.0 + r * t.sin())
                })
                .collect(),
        )
        .expect("valid circle")
    }

    fn tooth_photo(radius: i32) -> GrayImage {
        let mut image = GrayImage::from_pixel(200, 200, Luma([245]));
        draw_filled_circle_mut(&mut image, (100, 100), radius, Luma([15]));
        image
    }

    #[test]
    fn uniform_offset_on_analytic_contours() {
        let config = MeasurementConfig::default();
        let pair = align(&analytic_circle(35.0), &analytic_circle(40.0), &config.alignment)
            .expect("aligned");
        let result = measure(&pair, &default_calibration(), &config.measurement, 1, "W1")
            .expect("measured");
        assert_relative_eq!(result.sample.depth_um, 30.0, epsilon = 0.25 * 6.0);
    }

    #[test]
    fn uniform_offset_on_traced_images() {
        let config = MeasurementConfig::default();
        let calibration = derive_calibration(10.0, 60.0).expect("calibration");
        let worn = extract_tooth_contour(&tooth_photo(35), None, &config.extraction).expect("worn");
        let healthy =
            extract_tooth_contour(&tooth_photo(40), None, &config.extraction).expect("healthy");
        let pair = align(&worn, &healthy, &config.alignment).expect("aligned");
        let result = measure(&pair, &calibration, &config.measurement, 1, "W1").expect("measured");
        assert_relative_eq!(result.sample.depth_um, 30.0, epsilon = 6.0);
    }

    #[test]
    fn identical_images_measure_zero() {
        let config = MeasurementConfig::default();
        let contour = extract_tooth_contour(&tooth_photo(40), None, &config.extraction)
            .expect("contour");
        let pair = align(&contour, &contour, &config.alignment).expect("aligned");
        assert!(pair.transform.is_identity_within(1e-6));
        let result = measure(&pair, &default_calibration(), &config.measurement, 1, "W1")
            .expect("measured");
        assert!(result.sample.depth_um.abs() < 1e-6);
    }

    #[test]
    fn realigned_worn_contour_measures_zero() {
        let config = MeasurementConfig::default();
        let first = align(&analytic_circle(35.0), &analytic_circle(40.0), &config.alignment)
            .expect("aligned");
        let again = align(&first.worn, &first.worn, &config.alignment).expect("aligned");
        assert!(again.transform.is_identity_within(1e-6));
        let result = measure(&again, &default_calibration(), &config.measurement, 1, "W1")
            .expect("measured");
        assert!(result.sample.depth_um.abs() < 1e-6);
    }

    #[test]
    fn batch_keeps_job_order_and_flags_blank_image() {
        let healthy = Arc::new(tooth_photo(40));
        let jobs = vec![
            BatchJob::new("W1", 1, Arc::new(tooth_photo(38)), healthy.clone()),
            BatchJob::new("W2", 1, Arc::new(GrayImage::from_pixel(200, 200, Luma([245]))), healthy.clone()),
            BatchJob::new("W3", 1, Arc::new(tooth_photo(35)), healthy),
        ];
        let report = run_batch(
            &jobs,
            &default_calibration(),
            &MeasurementConfig::default(),
            TableMode::SingleTooth,
        )
        .expect("batch runs");

        assert_eq!(report.table.header(), vec!["W1", "W2", "W3"]);
        let record = &report.table.records()[0];
        assert!(!record[0].is_empty());
        assert_eq!(record[1], "");
        assert!(!record[2].is_empty());
        assert_eq!(report.summary.unmeasured.len(), 1);
        assert_eq!(report.samples.len(), 2);
        assert!(report.samples[0].depth_um < report.samples[1].depth_um);
    }
}
