//! Measuring many (image, tooth) jobs and folding them into one table.

use std::{collections::HashSet, sync::Arc};

use image::GrayImage;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    alignment::align,
    calibration::CalibrationFactor,
    config::MeasurementConfig,
    error::{BatchError, BatchIssue, JobError, JobFailure},
    measurement::{measure, WearMeasurement},
    pipeline::builder::PipelineBuilder,
    table::{Cell, ResultTable, RowKey, TableMode},
    types::{AlignedContourPair, BoundingBox, WearSample},
};

/// One tooth in one worn image, measured against the healthy reference.
///
/// Images are shared so that every tooth cut from the same photograph can
/// point at a single decoded buffer.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub image_id: String,
    pub tooth_index: u32,
    pub worn_image: Arc<GrayImage>,
    pub healthy_image: Arc<GrayImage>,
    pub worn_region: Option<BoundingBox>,
    pub healthy_region: Option<BoundingBox>,
}

impl BatchJob {
    pub fn new(
        image_id: impl Into<String>,
        tooth_index: u32,
        worn_image: Arc<GrayImage>,
        healthy_image: Arc<GrayImage>,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            tooth_index,
            worn_image,
            healthy_image,
            worn_region: None,
            healthy_region: None,
        }
    }

    pub fn with_regions(
        mut self,
        worn_region: Option<BoundingBox>,
        healthy_region: Option<BoundingBox>,
    ) -> Self {
        self.worn_region = worn_region;
        self.healthy_region = healthy_region;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasuredJob {
    pub pair: AlignedContourPair,
    pub measurement: WearMeasurement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmeasuredCell {
    pub image_id: String,
    pub tooth_index: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_jobs: usize,
    pub measured: usize,
    pub unmeasured: Vec<UnmeasuredCell>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub table: ResultTable,
    pub summary: BatchSummary,
    /// Successful samples in job order.
    pub samples: Vec<WearSample>,
}

/// Extract, align and measure a single job.
pub fn measure_job(
    job: &BatchJob,
    calibration: &CalibrationFactor,
    config: &MeasurementConfig,
) -> Result<MeasuredJob, JobError> {
    let attribute = |failure: JobFailure| JobError {
        image_id: job.image_id.clone(),
        tooth_index: job.tooth_index,
        failure,
    };

    let pipeline = PipelineBuilder::from_config(&config.extraction).build();
    let worn = pipeline
        .process(&job.worn_image, job.worn_region)
        .map_err(|e| attribute(JobFailure::WornExtraction(e)))?;
    let healthy = pipeline
        .process(&job.healthy_image, job.healthy_region)
        .map_err(|e| attribute(JobFailure::HealthyExtraction(e)))?;

    let pair = align(&worn, &healthy, &config.alignment).map_err(|e| attribute(e.into()))?;
    let measurement = measure(
        &pair,
        calibration,
        &config.measurement,
        job.tooth_index,
        &job.image_id,
    )
    .map_err(|e| attribute(e.into()))?;

    Ok(MeasuredJob { pair, measurement })
}

/// Every issue that makes the batch unrunnable, in one pass.
pub fn validate_batch(
    jobs: &[BatchJob],
    calibration: &CalibrationFactor,
    config: &MeasurementConfig,
    mode: TableMode,
) -> Vec<BatchIssue> {
    let mut issues = Vec::new();
    if jobs.is_empty() {
        issues.push(BatchIssue::NoJobs);
    }
    if let Err(e) = calibration.validate() {
        issues.push(BatchIssue::InvalidCalibration(e));
    }
    issues.extend(config.validate().into_iter().map(BatchIssue::InvalidConfig));

    let mut seen = HashSet::new();
    for (position, job) in jobs.iter().enumerate() {
        if job.image_id.trim().is_empty() {
            issues.push(BatchIssue::EmptyImageId { position });
        }
        if !seen.insert((job.image_id.as_str(), job.tooth_index)) {
            issues.push(BatchIssue::DuplicateCell {
                image_id: job.image_id.clone(),
                tooth_index: job.tooth_index,
            });
        }
    }

    if mode == TableMode::SingleTooth {
        let mut teeth: Vec<u32> = jobs.iter().map(|j| j.tooth_index).collect();
        teeth.sort_unstable();
        teeth.dedup();
        if teeth.len() > 1 {
            issues.push(BatchIssue::MixedTeeth {
                tooth_indices: teeth,
            });
        }
    }
    issues
}

/// Run every job in parallel and fold the outcomes into a table.
///
/// A failing job leaves its cell unmeasured; only systemic problems fail the
/// whole call.
pub fn run_batch(
    jobs: &[BatchJob],
    calibration: &CalibrationFactor,
    config: &MeasurementConfig,
    mode: TableMode,
) -> Result<BatchReport, BatchError> {
    let issues = validate_batch(jobs, calibration, config, mode);
    if !issues.is_empty() {
        return Err(BatchError::Systemic(issues));
    }
    if calibration.is_default() {
        warn!(
            "Using the uncalibrated default of {} µm/px",
            calibration.scale_factor_um_per_px()
        );
    }
    info!("Running batch of {} jobs ({} table)", jobs.len(), mode);

    let results: Vec<Result<MeasuredJob, JobError>> = jobs
        .par_iter()
        .map(|job| measure_job(job, calibration, config))
        .collect();

    let mut columns: Vec<String> = Vec::new();
    for job in jobs {
        if !columns.contains(&job.image_id) {
            columns.push(job.image_id.clone());
        }
    }
    let teeth: Vec<u32> = jobs.iter().map(|j| j.tooth_index).collect();
    let mut table = ResultTable::new(mode, columns, &teeth);

    let mut samples = Vec::new();
    let mut unmeasured = Vec::new();
    let mut submitted = HashSet::new();
    for (job, result) in jobs.iter().zip(results) {
        let key = table.row_key(job.tooth_index);
        submitted.insert((key, job.image_id.clone()));
        match result {
            Ok(measured) => {
                let sample = measured.measurement.sample;
                table.set(key, &job.image_id, Cell::Measured(sample.depth_um));
                samples.push(sample);
            }
            Err(err) => {
                warn!("Unmeasured: {}", err);
                unmeasured.push(UnmeasuredCell {
                    image_id: err.image_id,
                    tooth_index: err.tooth_index,
                    reason: err.failure.to_string(),
                });
            }
        }
    }

    for row in table.rows() {
        for column in table.columns() {
            if submitted.contains(&(row.key, column.clone())) {
                continue;
            }
            if let RowKey::Tooth(tooth_index) = row.key {
                unmeasured.push(UnmeasuredCell {
                    image_id: column.clone(),
                    tooth_index,
                    reason: "no job submitted".to_string(),
                });
            }
        }
    }

    let summary = BatchSummary {
        total_jobs: jobs.len(),
        measured: samples.len(),
        unmeasured,
    };
    info!(
        "Batch finished: {} measured, {} unmeasured",
        summary.measured,
        summary.unmeasured.len()
    );
    Ok(BatchReport {
        table,
        summary,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::default_calibration;
    use image::Luma;
    use imageproc::drawing::draw_filled_circle_mut;

    fn disk(radius: i32) -> Arc<GrayImage> {
        let mut image = GrayImage::from_pixel(120, 120, Luma([240]));
        draw_filled_circle_mut(&mut image, (60, 60), radius, Luma([20]));
        Arc::new(image)
    }

    fn blank() -> Arc<GrayImage> {
        Arc::new(GrayImage::from_pixel(120, 120, Luma([240])))
    }

    #[test]
    fn systemic_issues_are_all_reported() {
        let healthy = disk(40);
        let jobs = vec![
            BatchJob::new("W1", 1, disk(38), healthy.clone()),
            BatchJob::new("W1", 1, disk(36), healthy.clone()),
            BatchJob::new(" ", 2, disk(36), healthy),
        ];
        let err = run_batch(
            &jobs,
            &default_calibration(),
            &MeasurementConfig::default(),
            TableMode::SingleTooth,
        )
        .unwrap_err();
        let BatchError::Systemic(issues) = err;
        assert_eq!(issues.len(), 3, "{issues:?}");
        assert!(issues.contains(&BatchIssue::EmptyImageId { position: 2 }));
        assert!(issues.contains(&BatchIssue::MixedTeeth {
            tooth_indices: vec![1, 2]
        }));
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            run_batch(&[], &default_calibration(), &MeasurementConfig::default(), TableMode::MultiTooth),
            Err(BatchError::Systemic(issues)) if issues == vec![BatchIssue::NoJobs]
        ));
    }

    #[test]
    fn failing_job_leaves_one_empty_cell() {
        let healthy = disk(40);
        let jobs = vec![
            BatchJob::new("W1", 7, disk(37), healthy.clone()),
            BatchJob::new("W2", 7, blank(), healthy.clone()),
            BatchJob::new("W3", 7, disk(34), healthy),
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
        assert_eq!(report.summary.measured, 2);
        assert_eq!(report.summary.unmeasured.len(), 1);
        assert_eq!(report.summary.unmeasured[0].image_id, "W2");
        assert_eq!(report.summary.unmeasured[0].tooth_index, 7);

        let w1 = report.table.cell(RowKey::Single, "W1").and_then(|c| c.value()).expect("W1");
        let w3 = report.table.cell(RowKey::Single, "W3").and_then(|c| c.value()).expect("W3");
        assert!((w1 - 18.0).abs() <= 6.0, "W1 {w1}");
        assert!((w3 - 36.0).abs() <= 6.0, "W3 {w3}");
    }

    #[test]
    fn missing_cells_are_listed() {
        let healthy = disk(40);
        let jobs = vec![
            BatchJob::new("W1", 1, disk(38), healthy.clone()),
            BatchJob::new("W1", 2, disk(38), healthy.clone()),
            BatchJob::new("W2", 2, disk(36), healthy),
        ];
        let report = run_batch(
            &jobs,
            &default_calibration(),
            &MeasurementConfig::default(),
            TableMode::MultiTooth,
        )
        .expect("batch runs");
        assert_eq!(report.table.header(), vec!["Tooth", "W1", "W2"]);
        assert_eq!(report.table.rows().len(), 2);
        assert_eq!(
            report.summary.unmeasured,
            vec![UnmeasuredCell {
                image_id: "W2".to_string(),
                tooth_index: 1,
                reason: "no job submitted".to_string(),
            }]
        );
        assert_eq!(report.table.records()[0][2], "");
    }
}
