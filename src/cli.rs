// Command-line interface definitions and conversion into a RunConfig

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};

use crate::boundary::BoundarySource;
use crate::pipeline::RunConfig;
use crate::pool::{PoolConfig, DEFAULT_CHUNK_SIZE, DEFAULT_RESERVED_CORES};

#[derive(Parser, Debug)]
#[command(name = "regionstat")]
#[command(about = "Filter measurement files to a boundary polygon and summarise the values inside it")]
#[command(version)]
pub struct Cli {
    /// Directory containing the data files
    pub data_dir: PathBuf,

    /// Extension of the files to process (npy, npz, parquet, csv)
    #[arg(short, long, default_value = "npy")]
    pub extension: String,

    /// GeoJSON file with the boundary polygon(s)
    #[arg(
        short,
        long,
        conflicts_with = "bbox",
        required_unless_present = "bbox",
        help_heading = "Boundary"
    )]
    pub boundary: Option<PathBuf>,

    /// Rectangular boundary instead of a GeoJSON file
    #[arg(
        long,
        value_name = "MIN_LON,MIN_LAT,MAX_LON,MAX_LAT",
        allow_hyphen_values = true,
        help_heading = "Boundary"
    )]
    pub bbox: Option<String>,

    /// Records read per chunk; bounds each worker's memory
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, help_heading = "Performance")]
    pub chunk_size: usize,

    /// Number of worker threads (default: CPU count minus --reserved)
    #[arg(short = 'j', long, help_heading = "Performance")]
    pub workers: Option<usize>,

    /// CPU cores left free when deriving the worker count
    #[arg(long, default_value_t = DEFAULT_RESERVED_CORES, help_heading = "Performance")]
    pub reserved: usize,

    /// Write the full JSON report to this file
    #[arg(long, help_heading = "Output")]
    pub report: Option<PathBuf>,

    /// Print the JSON report to stdout instead of the text summary
    #[arg(long, help_heading = "Output")]
    pub json: bool,

    /// Write histogram intervals (lower,upper,count) as CSV
    #[arg(long, value_name = "FILE", help_heading = "Output")]
    pub histogram_csv: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.quiet {
            return log::LevelFilter::Warn;
        }
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Validate arguments and build the run configuration.
    pub fn run_config(&self) -> Result<RunConfig> {
        if self.chunk_size == 0 {
            bail!("--chunk-size must be greater than 0");
        }
        if self.workers == Some(0) {
            bail!("--workers must be greater than 0");
        }
        let extension = self.extension.trim_start_matches('.').to_ascii_lowercase();
        if extension.is_empty() {
            bail!("--extension must not be empty");
        }

        let boundary = match (&self.boundary, &self.bbox) {
            (Some(path), None) => BoundarySource::GeoJson(path.clone()),
            (None, Some(bbox)) => BoundarySource::parse_bbox(bbox).context("parsing --bbox")?,
            _ => bail!("exactly one of --boundary or --bbox is required"),
        };

        Ok(RunConfig {
            data_dir: self.data_dir.clone(),
            extension,
            boundary,
            pool: PoolConfig {
                workers: self.workers,
                reserved: self.reserved,
                chunk_size: self.chunk_size,
            },
        })
    }
}
