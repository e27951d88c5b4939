//! Batch grid matching over a CSV of points.
//!
//! Copies every input column and appends the six grid match columns.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gridmatch::{GridMatcher, MatchResult, MatcherConfig};

#[derive(Parser, Debug)]
#[command(name = "gridmatch")]
#[command(about = "Match CSV point coordinates against grid polygons")]
struct Args {
    /// TOML matcher configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Grid polygon file (.gpkg or .geojson), overrides the config
    #[arg(long)]
    grid: Option<PathBuf>,

    /// Grid label table (.csv or .xlsx), overrides the config
    #[arg(long)]
    labels: Option<PathBuf>,

    /// CSV file with one point per row
    #[arg(short, long)]
    input: PathBuf,

    /// Output CSV file
    #[arg(short, long)]
    output: PathBuf,

    /// Longitude column name
    #[arg(long, default_value = "lon")]
    lon_column: String,

    /// Latitude column name
    #[arg(long, default_value = "lat")]
    lat_column: String,

    /// Match on all cores
    #[arg(long)]
    parallel: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config = MatcherConfig::from_args(args.config.as_deref(), args.grid, args.labels)?;
    info!("Grid file: {}", config.grid.path.display());
    info!("Label file: {}", config.labels.path.display());

    let matcher = GridMatcher::new(&config);
    if !matcher.is_loaded() {
        warn!("Grid dataset is not loaded; every row will be unmatched");
    }

    // Read input points
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(&args.input)
        .context("Failed to open input CSV")?;
    let headers = reader.headers()?.clone();

    let lon_idx = headers
        .iter()
        .position(|h| h == args.lon_column)
        .with_context(|| format!("Column '{}' not found", args.lon_column))?;
    let lat_idx = headers
        .iter()
        .position(|h| h == args.lat_column)
        .with_context(|| format!("Column '{}' not found", args.lat_column))?;

    let records: Vec<csv::StringRecord> = reader
        .records()
        .collect::<std::result::Result<_, _>>()
        .context("Failed to read input CSV")?;
    info!("Matching {} points", records.len());

    let points: Vec<(String, String)> = records
        .iter()
        .map(|r| {
            (
                r.get(lon_idx).unwrap_or("").to_string(),
                r.get(lat_idx).unwrap_or("").to_string(),
            )
        })
        .collect();

    let results = if args.parallel {
        matcher.par_match_batch(&points)
    } else {
        let pb = ProgressBar::new(points.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
                )?
                .progress_chars("#>-"),
        );
        let results = points
            .iter()
            .map(|(lon, lat)| {
                pb.inc(1);
                matcher.match_point(lon, lat)
            })
            .collect::<Vec<_>>();
        pb.finish_and_clear();
        results
    };

    // Write output
    let mut writer = csv::Writer::from_path(&args.output).context("Failed to create output CSV")?;
    let mut out_headers: Vec<&str> = headers.iter().collect();
    out_headers.extend(MatchResult::FIELDS);
    writer.write_record(&out_headers)?;

    for (record, result) in records.iter().zip(&results) {
        let mut row: Vec<&str> = record.iter().collect();
        row.resize(headers.len(), "");
        row.extend(result.values());
        writer.write_record(&row)?;
    }
    writer.flush()?;

    let exact = results.iter().filter(|r| r.grid_id_no_buffer.is_some()).count();
    let buffer_only = results
        .iter()
        .filter(|r| r.grid_id_no_buffer.is_none() && r.grid_id_buffer_500m.is_some())
        .count();
    info!(
        "Done: {} in a grid, {} only within the buffer, {} unmatched",
        exact,
        buffer_only,
        results.len() - exact - buffer_only
    );
    info!("Wrote {}", args.output.display());

    Ok(())
}
