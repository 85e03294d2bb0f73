use thiserror::Error;

use crate::types::BoundingBox;

/// Invalid inputs when deriving a pixel-to-micrometer ratio.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Reference measurement must be positive and finite, got {0} px")]
    DegenerateReference(f64),

    #[error("Known physical size must be positive and finite, got {0} µm")]
    InvalidPhysicalSize(f64),

    #[error("Scale factor must be positive and finite, got {0} µm/px")]
    InvalidScaleFactor(f64),

    #[error("Healthy tooth area must be positive and finite, got {0} px²")]
    InvalidToothArea(f64),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Image is empty")]
    EmptyImage,

    #[error("Region hint {region:?} does not intersect the {width}x{height} image")]
    RegionOutOfBounds {
        region: BoundingBox,
        width: u32,
        height: u32,
    },

    #[error("No tooth contour found: {0}")]
    ContourNotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("Alignment did not converge within {iterations} iterations (last update {last_update:.3e})")]
    Diverged { iterations: usize, last_update: f64 },

    #[error("Alignment produced a non-finite transform")]
    NonFinite,

    #[error("Contour collapsed during resampling")]
    DegenerateContour,
}

/// All variants mean the pair could not be turned into a trustworthy depth.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasurementError {
    #[error("Degenerate measurement: only {wear_fraction:.2} of samples point in the wear direction (need {required:.2})")]
    TooFewWearSamples { wear_fraction: f64, required: f64 },

    #[error("Degenerate measurement: depth {depth_um:.1} µm exceeds plausible limit {limit_um:.1} µm")]
    Implausible { depth_um: f64, limit_um: f64 },

    #[error("Degenerate measurement: contours have {worn} and {healthy} samples")]
    MismatchedSamples { worn: usize, healthy: usize },

    #[error("Degenerate measurement: non-finite depth")]
    NonFinite,
}

/// What went wrong inside a single batch job.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobFailure {
    #[error("worn image: {0}")]
    WornExtraction(ExtractionError),

    #[error("healthy image: {0}")]
    HealthyExtraction(ExtractionError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Measurement(#[from] MeasurementError),
}

/// A per-job failure tagged with the cell it belongs to.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{image_id} / tooth {tooth_index}: {failure}")]
pub struct JobError {
    pub image_id: String,
    pub tooth_index: u32,
    pub failure: JobFailure,
}

/// Problems that make a whole batch unrunnable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchIssue {
    #[error("no jobs supplied")]
    NoJobs,

    #[error("job #{position} has an empty image id")]
    EmptyImageId { position: usize },

    #[error("more than one job targets {image_id} / tooth {tooth_index}")]
    DuplicateCell { image_id: String, tooth_index: u32 },

    #[error("single-tooth table requested but jobs cover teeth {tooth_indices:?}")]
    MixedTeeth { tooth_indices: Vec<u32> },

    #[error("invalid calibration: {0}")]
    InvalidCalibration(CalibrationError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("batch rejected: {}", join_issues(.0))]
    Systemic(Vec<BatchIssue>),
}

fn join_issues(issues: &[BatchIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum WearError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Measurement(#[from] MeasurementError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

pub type Result<T> = std::result::Result<T, WearError>;
