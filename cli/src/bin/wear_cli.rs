use clap::{Parser, Subcommand};
use wear_cli::{RunConfig, load_gray, load_measurement_config, run_config_schema};
use color_eyre::eyre::{Result, bail};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{self, EnvFilter};

use wear::{
    CalibrationFactor, MeasurementConfig, align, default_calibration, derive_calibration,
    extract_tooth_contour, from_scale_factor, io::save_json, locate_teeth, measure, run_batch,
    ToothLocatorConfig,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure one worn tooth image against a healthy one
    Measure {
        /// Path to the worn tooth image
        #[arg(short, long)]
        worn: PathBuf,
        /// Path to the healthy reference image
        #[arg(long)]
        healthy: PathBuf,
        /// Known pixel-to-micrometer ratio
        #[arg(long, conflicts_with = "scale_bar_px")]
        scale_um_per_px: Option<f64>,
        /// Scale bar length in pixels
        #[arg(long, requires = "scale_bar_um")]
        scale_bar_px: Option<f64>,
        /// Scale bar length in micrometers
        #[arg(long, requires = "scale_bar_px")]
        scale_bar_um: Option<f64>,
        /// Measurement settings (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Tooth index recorded with the sample
        #[arg(long, default_value = "1")]
        tooth: u32,
        /// Write the aligned contours as GeoJSON
        #[arg(long)]
        geojson: Option<PathBuf>,
        /// Write the per-sample distance profile as JSON
        #[arg(long)]
        profile: Option<PathBuf>,
    },
    /// Run a batch described by a run file and write the depth table
    Batch {
        /// Path to the run file (TOML or JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Path of the CSV table
        #[arg(short, long, default_value = "wear_depths.csv")]
        output: PathBuf,
        /// Write the batch summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Locate the teeth of a whole-gear image
    Locate {
        /// Path to the gear image
        #[arg(short, long)]
        image: PathBuf,
        /// Measurement settings (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the located teeth as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the JSON schema of the run file
    Schema,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Measure {
            worn,
            healthy,
            scale_um_per_px,
            scale_bar_px,
            scale_bar_um,
            config,
            tooth,
            geojson,
            profile,
        } => {
            let calibration = match (scale_um_per_px, scale_bar_px, scale_bar_um) {
                (Some(um_per_px), _, _) => from_scale_factor(*um_per_px)?,
                (None, Some(px), Some(um)) => derive_calibration(*px, *um)?,
                _ => default_calibration(),
            };
            measure_single(
                worn,
                healthy,
                &calibration,
                config.as_deref(),
                *tooth,
                geojson.as_deref(),
                profile.as_deref(),
            )?;
        }
        Commands::Batch { config, output, summary } => {
            run_file(config, output, summary.as_deref())?;
        }
        Commands::Locate { image, config, output } => {
            locate(image, config.as_deref(), output.as_deref())?;
        }
        Commands::Schema => {
            println!("{}", run_config_schema()?);
        }
    }

    Ok(())
}

fn settings(path: Option<&Path>) -> Result<MeasurementConfig> {
    let config = match path {
        Some(path) => load_measurement_config(path)?,
        None => MeasurementConfig::default(),
    };
    config.ensure_valid()?;
    Ok(config)
}

fn measure_single(
    worn_path: &Path,
    healthy_path: &Path,
    calibration: &CalibrationFactor,
    config_path: Option<&Path>,
    tooth_index: u32,
    geojson: Option<&Path>,
    profile: Option<&Path>,
) -> Result<()> {
    let config = settings(config_path)?;
    if calibration.is_default() {
        warn!(
            "No scale given, using the uncalibrated default of {} µm/px",
            calibration.scale_factor_um_per_px()
        );
    }

    let worn = extract_tooth_contour(&load_gray(worn_path)?, None, &config.extraction)?;
    let healthy = extract_tooth_contour(&load_gray(healthy_path)?, None, &config.extraction)?;
    info!(
        "Contours: worn {} points, healthy {} points",
        worn.len(),
        healthy.len()
    );

    let pair = align(&worn, &healthy, &config.alignment)?;
    info!(
        "Aligned in {} iterations, rms {:.3} px",
        pair.iterations, pair.rms_error_px
    );

    let image_id = worn_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("worn")
        .to_string();
    let result = measure(&pair, calibration, &config.measurement, tooth_index, &image_id)?;

    if let Some(path) = geojson {
        pair.save_geojson(path)?;
        info!("Aligned contours written to {:?}", path);
    }
    if let Some(path) = profile {
        save_json(&result.profile, path)?;
        info!("Profile written to {:?}", path);
    }

    match result.sample.area_um2 {
        Some(area) => info!(
            "{} tooth {}: {:.1} µm deep, {:.0} µm² removed",
            image_id, tooth_index, result.sample.depth_um, area
        ),
        None => info!("{} tooth {}: {:.1} µm deep", image_id, tooth_index, result.sample.depth_um),
    }
    println!("{:.1}", result.sample.depth_um);
    Ok(())
}

fn run_file(config_path: &Path, output: &Path, summary: Option<&Path>) -> Result<()> {
    let run = RunConfig::from_file(config_path)?;
    run.measurement.ensure_valid()?;
    info!("Run file: {:?}", config_path);

    let prepared = run.prepare()?;
    if prepared.jobs.is_empty() {
        bail!("Run file {:?} produced no jobs", config_path);
    }
    let mut report = run_batch(&prepared.jobs, &prepared.calibration, &run.measurement, run.mode)?;
    prepared.record_unmatched(&mut report.summary);

    report.table.save_csv(output)?;
    info!(
        "Measured {}/{} cells, table written to {:?}",
        report.summary.measured, report.summary.total_jobs, output
    );
    for cell in &report.summary.unmeasured {
        warn!("{} tooth {}: {}", cell.image_id, cell.tooth_index, cell.reason);
    }
    for stats in report.table.column_stats() {
        info!(
            "{}: n={} mean {:.1} µm, sd {:.1}, range {:.1}",
            stats.column, stats.count, stats.mean, stats.std_dev, stats.range
        );
    }

    if let Some(reference) = &run.reference_um {
        let key = report
            .table
            .rows()
            .first()
            .map(|row| row.key)
            .unwrap_or_else(|| report.table.row_key(1));
        let comparison = report.table.compare_to_reference(reference, key);
        for column in &comparison.columns {
            match (column.measured, column.error_um) {
                (Some(measured), Some(error)) => info!(
                    "{}: {:.1} µm vs reference {:.1} µm ({:+.1} µm){}",
                    column.column,
                    measured,
                    column.reference,
                    error,
                    if column.within_tolerance { "" } else { ", outside tolerance" }
                ),
                _ => warn!("{}: no measurement to compare with {:.1} µm", column.column, column.reference),
            }
        }
        if let Some(mae) = comparison.mean_abs_error_um {
            info!("Mean absolute error against reference: {:.2} µm", mae);
        }
    }

    if let Some(path) = summary {
        save_json(&report.summary, path)?;
        info!("Summary written to {:?}", path);
    }
    Ok(())
}

fn locate(image_path: &Path, config_path: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let config = settings(config_path)?;
    let image = load_gray(image_path)?;
    let teeth = locate_teeth(&image, &config.extraction, &ToothLocatorConfig::default())?;
    for tooth in &teeth {
        info!(
            "Tooth {}: {:.1}° area {:.0} px, region {}x{} at ({}, {})",
            tooth.tooth_index,
            tooth.angle_deg,
            tooth.area_px,
            tooth.region.width,
            tooth.region.height,
            tooth.region.x,
            tooth.region.y
        );
    }
    if let Some(path) = output {
        save_json(&teeth, path)?;
        info!("Located teeth written to {:?}", path);
    }
    Ok(())
}
