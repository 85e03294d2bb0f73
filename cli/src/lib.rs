use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::GrayImage;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use wear::{
    BatchJob, BatchSummary, BoundingBox, CalibrationError, CalibrationFactor, ExtractionError,
    GearParameters, LocatedTooth, MeasurementConfig, TableMode, ToothLocatorConfig,
    UnmeasuredCell, default_calibration, derive_calibration, estimate_from_gear,
    extract_tooth_contour, from_scale_factor, locate_teeth, match_teeth,
};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];

#[derive(Error, Debug)]
pub enum RunConfigError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
    #[error("Failed to load image {path:?}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("No wear case images found in {0:?}")]
    NoWearCases(PathBuf),
    #[error("Wear case {0} appears in more than one file")]
    DuplicateCase(String),
    #[error("Scale bar length in µm is neither configured nor present in the case file names")]
    MissingScaleBarLength,
    #[error("Case file names disagree on the scale bar length: {0:?} µm")]
    ConflictingScaleBars(Vec<f64>),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// Where the pixel-to-micrometer ratio of a run comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum CalibrationSpec {
    /// Uncalibrated 6.0 µm/px fallback
    #[default]
    Default,
    /// Ratio known in advance
    ScaleFactor { um_per_px: f64 },
    /// Scale bar of `length_px` pixels; its length in µm falls back to the
    /// value encoded in the case file names
    ScaleBar {
        length_px: f64,
        #[serde(default)]
        length_um: Option<f64>,
    },
    /// Estimated from the healthy tooth area and the nominal gear geometry
    GearGeometry {
        #[serde(default)]
        gear: GearParameters,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobSpec {
    pub image_id: String,
    pub image: PathBuf,
    #[serde(default = "first_tooth")]
    pub tooth_index: u32,
    #[serde(default)]
    pub region: Option<BoundingBox>,
    #[serde(default)]
    pub healthy_region: Option<BoundingBox>,
}

fn first_tooth() -> u32 {
    1
}

/// How the jobs of a run are enumerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum JobSource {
    /// Explicit jobs, in column order
    List { jobs: Vec<JobSpec> },
    /// One job per wear case image found in `dir`, all for the same tooth
    CasesDir {
        dir: PathBuf,
        #[serde(default = "first_tooth")]
        tooth_index: u32,
    },
    /// Whole-gear images in `dir`; every located tooth becomes a job
    Gear {
        dir: PathBuf,
        #[serde(default)]
        locator: ToothLocatorConfig,
    },
}

/// A batch run as described by a TOML or JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunConfig {
    pub healthy_image: PathBuf,
    #[serde(default)]
    pub calibration: CalibrationSpec,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub mode: TableMode,
    pub jobs: JobSource,
    /// Manually measured depths per column, compared against the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_um: Option<BTreeMap<String, f64>>,
}

/// A wear case image recognised by its file name.
#[derive(Debug, Clone, PartialEq)]
pub struct WearCase {
    pub number: u32,
    pub image_id: String,
    pub scale_bar_um: Option<f64>,
    pub path: PathBuf,
}

/// Jobs with their images loaded, plus the run's calibration.
#[derive(Debug)]
pub struct PreparedRun {
    pub jobs: Vec<BatchJob>,
    pub calibration: CalibrationFactor,
    /// Healthy teeth with no counterpart in a worn gear image.
    pub unmatched: Vec<UnmeasuredCell>,
}

impl PreparedRun {
    /// Report the teeth that never became jobs under their own reason.
    pub fn record_unmatched(&self, summary: &mut BatchSummary) {
        for cell in &self.unmatched {
            summary
                .unmeasured
                .retain(|c| !(c.image_id == cell.image_id && c.tooth_index == cell.tooth_index));
            summary.unmeasured.push(cell.clone());
        }
    }
}

impl RunConfig {
    /// Load RunConfig configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, RunConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load RunConfig configuration from JSON string
    pub fn from_json(content: &str) -> Result<Self, RunConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Auto-detect file format and load configuration.
    ///
    /// Relative paths inside the file are taken relative to the file itself.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RunConfigError> {
        let path_ref = path.as_ref();
        let mut config = match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&fs::read_to_string(path_ref)?)?,
            Some("json") => Self::from_json(&fs::read_to_string(path_ref)?)?,
            _ => return Err(RunConfigError::UnsupportedFileFormat),
        };
        if let Some(base) = path_ref.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Convert RunConfig to TOML string
    pub fn to_toml(&self) -> Result<String, RunConfigError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    /// Convert RunConfig to JSON string
    pub fn to_json(&self) -> Result<String, RunConfigError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        resolve(base, &mut self.healthy_image);
        match &mut self.jobs {
            JobSource::List { jobs } => jobs.iter_mut().for_each(|j| resolve(base, &mut j.image)),
            JobSource::CasesDir { dir, .. } | JobSource::Gear { dir, .. } => resolve(base, dir),
        }
    }

    /// Load every image and turn the job source into batch jobs.
    pub fn prepare(&self) -> Result<PreparedRun, RunConfigError> {
        let healthy = Arc::new(load_gray(&self.healthy_image)?);
        let extraction = &self.measurement.extraction;
        let mut cases = Vec::new();
        let mut unmatched = Vec::new();

        let jobs = match &self.jobs {
            JobSource::List { jobs } => {
                let mut images: HashMap<&Path, Arc<GrayImage>> = HashMap::new();
                let mut prepared = Vec::with_capacity(jobs.len());
                for spec in jobs {
                    let worn = match images.get(spec.image.as_path()) {
                        Some(image) => image.clone(),
                        None => {
                            let image = Arc::new(load_gray(&spec.image)?);
                            images.insert(spec.image.as_path(), image.clone());
                            image
                        }
                    };
                    prepared.push(
                        BatchJob::new(spec.image_id.clone(), spec.tooth_index, worn, healthy.clone())
                            .with_regions(spec.region, spec.healthy_region),
                    );
                }
                prepared
            }
            JobSource::CasesDir { dir, tooth_index } => {
                cases = discover_wear_cases(dir)?;
                cases
                    .iter()
                    .map(|case| {
                        let worn = Arc::new(load_gray(&case.path)?);
                        Ok(BatchJob::new(case.image_id.clone(), *tooth_index, worn, healthy.clone()))
                    })
                    .collect::<Result<Vec<_>, RunConfigError>>()?
            }
            JobSource::Gear { dir, locator } => {
                cases = discover_wear_cases(dir)?;
                let healthy_teeth = locate_teeth(&healthy, extraction, locator)?;
                let mut prepared = Vec::new();
                for case in &cases {
                    let worn = Arc::new(load_gray(&case.path)?);
                    let job = |tooth: &LocatedTooth, worn_region: BoundingBox| {
                        BatchJob::new(case.image_id.clone(), tooth.tooth_index, worn.clone(), healthy.clone())
                            .with_regions(Some(worn_region), Some(tooth.region))
                    };
                    let worn_teeth = match locate_teeth(&worn, extraction, locator) {
                        Ok(teeth) => teeth,
                        Err(e) => {
                            warn!("{}: tooth location failed ({}), reusing healthy regions", case.image_id, e);
                            prepared.extend(healthy_teeth.iter().map(|tooth| job(tooth, tooth.region)));
                            continue;
                        }
                    };
                    let matched = match_teeth(&healthy_teeth, &worn_teeth, locator.max_match_angle_deg);
                    for (tooth, partner) in healthy_teeth.iter().zip(matched) {
                        match partner {
                            Some(partner) => prepared.push(job(tooth, partner.region)),
                            None => {
                                warn!(
                                    "{} tooth {}: no worn tooth within {:.1}° of {:.1}°",
                                    case.image_id, tooth.tooth_index, locator.max_match_angle_deg, tooth.angle_deg
                                );
                                unmatched.push(UnmeasuredCell {
                                    image_id: case.image_id.clone(),
                                    tooth_index: tooth.tooth_index,
                                    reason: "no matching tooth in the worn image".to_string(),
                                });
                            }
                        }
                    }
                }
                prepared
            }
        };

        let healthy_region = jobs.first().and_then(|j| j.healthy_region);
        let calibration = resolve_calibration(
            &self.calibration,
            &healthy,
            healthy_region,
            &self.measurement,
            &cases,
        )?;
        info!(
            "Prepared {} jobs, calibration {:.4} µm/px ({})",
            jobs.len(),
            calibration.scale_factor_um_per_px(),
            calibration.source()
        );
        Ok(PreparedRun {
            jobs,
            calibration,
            unmatched,
        })
    }
}

fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

/// Turn a calibration spec into the run's single calibration factor.
pub fn resolve_calibration(
    spec: &CalibrationSpec,
    healthy: &GrayImage,
    healthy_region: Option<BoundingBox>,
    config: &MeasurementConfig,
    cases: &[WearCase],
) -> Result<CalibrationFactor, RunConfigError> {
    let calibration = match spec {
        CalibrationSpec::Default => default_calibration(),
        CalibrationSpec::ScaleFactor { um_per_px } => from_scale_factor(*um_per_px)?,
        CalibrationSpec::ScaleBar {
            length_px,
            length_um: Some(length_um),
        } => derive_calibration(*length_px, *length_um)?,
        CalibrationSpec::ScaleBar {
            length_px,
            length_um: None,
        } => derive_calibration(*length_px, scale_bar_from_cases(cases)?)?,
        CalibrationSpec::GearGeometry { gear } => {
            let contour = extract_tooth_contour(healthy, healthy_region, &config.extraction)?;
            estimate_from_gear(contour.area(), gear)?
        }
    };
    Ok(calibration)
}

fn scale_bar_from_cases(cases: &[WearCase]) -> Result<f64, RunConfigError> {
    let mut lengths: Vec<f64> = cases.iter().filter_map(|c| c.scale_bar_um).collect();
    lengths.sort_by(f64::total_cmp);
    lengths.dedup();
    match lengths.as_slice() {
        [] => Err(RunConfigError::MissingScaleBarLength),
        [single] => Ok(*single),
        _ => Err(RunConfigError::ConflictingScaleBars(lengths)),
    }
}

/// Wear case number and scale bar length from a name such as
/// `W12 scale 250.7 micro meter.jpg`.
///
/// Healthy reference images are not wear cases and yield `None`.
pub fn parse_wear_case_name(file_name: &str) -> Option<(u32, Option<f64>)> {
    let stem = Path::new(file_name).file_stem()?.to_str()?.to_lowercase();
    if stem.contains("healthy") {
        return None;
    }
    let tokens: Vec<&str> = stem
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|t| !t.is_empty())
        .collect();

    let prefixed = tokens.first().and_then(|first| {
        first
            .strip_prefix("wear")
            .or_else(|| first.strip_prefix('w'))
            .and_then(|digits| digits.parse::<u32>().ok())
    });
    let number = prefixed.or_else(|| {
        stem.split(|c: char| !c.is_ascii_digit())
            .find(|run| !run.is_empty())
            .and_then(|run| run.parse::<u32>().ok())
    })?;

    let scale_bar_um = tokens
        .iter()
        .position(|t| *t == "scale")
        .and_then(|i| tokens.get(i + 1))
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0);
    Some((number, scale_bar_um))
}

/// Wear case images in `dir`, ordered by case number.
pub fn discover_wear_cases(dir: &Path) -> Result<Vec<WearCase>, RunConfigError> {
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_image_file(&path) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some((number, scale_bar_um)) = parse_wear_case_name(name) {
            cases.push(WearCase {
                number,
                image_id: format!("W{number}"),
                scale_bar_um,
                path,
            });
        }
    }
    if cases.is_empty() {
        return Err(RunConfigError::NoWearCases(dir.to_path_buf()));
    }
    cases.sort_by_key(|c| c.number);
    if let Some(pair) = cases.windows(2).find(|w| w[0].number == w[1].number) {
        return Err(RunConfigError::DuplicateCase(pair[0].image_id.clone()));
    }
    debug!("Discovered {} wear cases in {:?}", cases.len(), dir);
    Ok(cases)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

pub fn load_gray(path: &Path) -> Result<GrayImage, RunConfigError> {
    let image = image::open(path).map_err(|source| RunConfigError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_luma8())
}

/// Measurement settings from a standalone TOML or JSON file.
pub fn load_measurement_config(path: &Path) -> Result<MeasurementConfig, RunConfigError> {
    let content = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(toml::from_str(&content)?),
        Some("json") => Ok(serde_json::from_str(&content)?),
        _ => Err(RunConfigError::UnsupportedFileFormat),
    }
}

/// JSON schema of the run file.
pub fn run_config_schema() -> Result<String, RunConfigError> {
    let schema = schemars::schema_for!(RunConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use wear::{CalibrationSource, ReductionPolicy, run_batch};

    const RUN_TOML: &str = r#"
healthy_image = "healthy.png"
mode = "single_tooth"

[calibration]
type = "scale_bar"
params = { length_px = 41.8 }

[measurement.measurement]
reduction = { type = "max" }

[jobs]
type = "cases_dir"
params = { dir = "cases" }
"#;

    fn disk_image(radius: u32) -> GrayImage {
        let c = 60.0;
        GrayImage::from_fn(120, 120, |x, y| {
            let d = ((x as f64 - c).powi(2) + (y as f64 - c).powi(2)).sqrt();
            if d <= radius as f64 { Luma([20]) } else { Luma([240]) }
        })
    }

    #[test]
    fn wear_case_names() {
        assert_eq!(
            parse_wear_case_name("W12 scale 250.7 micro meter.jpg"),
            Some((12, Some(250.7)))
        );
        assert_eq!(parse_wear_case_name("wear3.png"), Some((3, None)));
        assert_eq!(parse_wear_case_name("case_07_left.tif"), Some((7, None)));
        assert_eq!(parse_wear_case_name("healthy scale 250.7 micro meter.jpg"), None);
        assert_eq!(parse_wear_case_name("notes.jpg"), None);
    }

    #[test]
    fn run_file_parses_with_defaults() {
        let config = RunConfig::from_toml(RUN_TOML).expect("valid run file");
        assert_eq!(config.mode, TableMode::SingleTooth);
        assert_eq!(
            config.calibration,
            CalibrationSpec::ScaleBar {
                length_px: 41.8,
                length_um: None
            }
        );
        assert_eq!(config.measurement.measurement.reduction, ReductionPolicy::Max);
        assert_eq!(config.measurement.alignment, wear::AlignmentConfig::default());
        assert_eq!(
            config.jobs,
            JobSource::CasesDir {
                dir: PathBuf::from("cases"),
                tooth_index: 1
            }
        );
        let round_trip = RunConfig::from_json(&config.to_json().expect("json")).expect("parse");
        assert_eq!(round_trip, config);
    }

    #[test]
    fn discovery_orders_cases_and_skips_healthy() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in [
            "W10 scale 250.7 micro meter.jpg",
            "W2 scale 250.7 micro meter.jpg",
            "healthy scale 250.7 micro meter.jpg",
            "readme.txt",
        ] {
            fs::write(dir.path().join(name), b"").expect("write");
        }
        let cases = discover_wear_cases(dir.path()).expect("cases");
        let ids: Vec<&str> = cases.iter().map(|c| c.image_id.as_str()).collect();
        assert_eq!(ids, vec!["W2", "W10"]);
        assert_eq!(scale_bar_from_cases(&cases).expect("length"), 250.7);
    }

    #[test]
    fn conflicting_scale_bars_are_rejected() {
        let case = |n: u32, um: f64| WearCase {
            number: n,
            image_id: format!("W{n}"),
            scale_bar_um: Some(um),
            path: PathBuf::new(),
        };
        assert!(matches!(
            scale_bar_from_cases(&[case(1, 250.7), case(2, 300.0)]),
            Err(RunConfigError::ConflictingScaleBars(_))
        ));
        assert!(matches!(
            scale_bar_from_cases(&[]),
            Err(RunConfigError::MissingScaleBarLength)
        ));
    }

    #[test]
    fn prepared_run_measures_discovered_cases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cases = dir.path().join("cases");
        fs::create_dir(&cases).expect("mkdir");
        disk_image(40).save(dir.path().join("healthy.png")).expect("save");
        disk_image(37).save(cases.join("W1 scale 250.8 micro meter.png")).expect("save");
        GrayImage::from_pixel(120, 120, Luma([240]))
            .save(cases.join("W2 scale 250.8 micro meter.png"))
            .expect("save");
        disk_image(34).save(cases.join("W3 scale 250.8 micro meter.png")).expect("save");
        let run_file = dir.path().join("run.toml");
        fs::write(&run_file, RUN_TOML.replace("{ type = \"max\" }", "{ type = \"mean\" }"))
            .expect("write");

        let config = RunConfig::from_file(&run_file).expect("run file");
        let prepared = config.prepare().expect("prepared");
        assert_eq!(prepared.jobs.len(), 3);
        assert_eq!(prepared.calibration.source(), CalibrationSource::Measured);
        assert!((prepared.calibration.scale_factor_um_per_px() - 6.0).abs() < 1e-9);

        let report = run_batch(&prepared.jobs, &prepared.calibration, &config.measurement, config.mode)
            .expect("batch");
        assert_eq!(report.table.to_csv_string().lines().next(), Some("W1,W2,W3"));
        assert_eq!(report.summary.unmeasured.len(), 1);
    }

    /// Six dark teeth on a ring, optionally with one of them missing.
    fn gear_image(missing: Option<usize>) -> GrayImage {
        let mut image = GrayImage::from_pixel(400, 400, Luma([230]));
        for k in (0..6).filter(|&k| Some(k) != missing) {
            let theta = (10.0 + 60.0 * k as f64).to_radians();
            let (cx, cy) = (200.0 + 120.0 * theta.cos(), 200.0 + 120.0 * theta.sin());
            for (x, y, pixel) in image.enumerate_pixels_mut() {
                if (x as f64 - cx).hypot(y as f64 - cy) <= 10.0 {
                    *pixel = Luma([20]);
                }
            }
        }
        image
    }

    #[test]
    fn gear_run_pairs_teeth_by_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cases = dir.path().join("cases");
        fs::create_dir(&cases).expect("mkdir");
        gear_image(None).save(dir.path().join("healthy.png")).expect("save");
        gear_image(Some(2)).save(cases.join("W1.png")).expect("save");
        let run_file = dir.path().join("run.toml");
        fs::write(
            &run_file,
            "healthy_image = \"healthy.png\"\n\n[jobs]\ntype = \"gear\"\nparams = { dir = \"cases\" }\n",
        )
        .expect("write");

        let prepared = RunConfig::from_file(&run_file)
            .expect("run file")
            .prepare()
            .expect("prepared");
        let teeth: Vec<u32> = prepared.jobs.iter().map(|j| j.tooth_index).collect();
        assert_eq!(teeth, vec![1, 2, 4, 5, 6]);
        for job in &prepared.jobs {
            let (worn, healthy) = (
                job.worn_region.expect("worn region"),
                job.healthy_region.expect("healthy region"),
            );
            assert!(worn.x.abs_diff(healthy.x) <= 2 && worn.y.abs_diff(healthy.y) <= 2, "{job:?}");
        }
        assert_eq!(
            prepared.unmatched,
            vec![UnmeasuredCell {
                image_id: "W1".to_string(),
                tooth_index: 3,
                reason: "no matching tooth in the worn image".to_string(),
            }]
        );

        let mut summary = BatchSummary {
            total_jobs: 5,
            measured: 5,
            unmeasured: vec![UnmeasuredCell {
                image_id: "W1".to_string(),
                tooth_index: 3,
                reason: "no job submitted".to_string(),
            }],
        };
        prepared.record_unmatched(&mut summary);
        assert_eq!(summary.unmeasured, prepared.unmatched);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        assert!(matches!(
            RunConfig::from_file("run.yaml"),
            Err(RunConfigError::UnsupportedFileFormat)
        ));
    }

    #[test]
    fn schema_names_job_sources() {
        let schema = run_config_schema().expect("schema");
        assert!(schema.contains("cases_dir"));
        assert!(schema.contains("healthy_image"));
    }
}
