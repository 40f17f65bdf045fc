//! Argosy CLI Library
//!
//! Command-line interface for the float-archive acquisition pipeline.
//!
//! # Overview
//!
//! The `argosy` binary drives the pipeline for one ocean basin and year
//! at a time:
//!
//! - **Pipeline runs**: fetch the remote catalog, audit local archives,
//!   download what is missing, convert to parquet shards, merge
//!   (`argosy run`)
//! - **Catalog status**: per-status record counts, read-only
//!   (`argosy status`)
//!
//! Region and year are validated at the argument boundary; everything
//! downstream works with an already-checked `Selector`.

pub mod commands;
pub mod db;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use error::{CliError, Result};

use argosy_pipeline::config::{
    DEFAULT_ARCHIVE_ROOT, DEFAULT_CATALOG_BASE_URL, DEFAULT_CONVERT_WORKERS,
    DEFAULT_DATA_BASE_URL, DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_OUTPUT_ROOT, DEFAULT_SHARD_MAX_ROWS,
};
use argosy_pipeline::types::{MAX_YEAR, MIN_YEAR};
use argosy_pipeline::{Region, Selector};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Argosy - resumable float-archive acquisition pipeline
#[derive(Parser, Debug)]
#[command(name = "argosy")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Print help as markdown (used by documentation tooling)
    #[arg(long, hide = true)]
    pub markdown_help: bool,

    /// Verbose output (debug logs on the console)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full acquisition pipeline for one region and year
    Run {
        #[command(flatten)]
        selector: SelectorArgs,

        /// PostgreSQL connection string for the catalog index
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,

        /// Base URL serving the per-region inventory listings
        #[arg(long, env = "ARGOSY_CATALOG_BASE_URL", default_value = DEFAULT_CATALOG_BASE_URL)]
        catalog_base_url: String,

        /// Base URL serving the archive files themselves
        #[arg(long, env = "ARGOSY_DATA_BASE_URL", default_value = DEFAULT_DATA_BASE_URL)]
        data_base_url: String,

        /// Local root the downloaded archives are materialized under
        #[arg(long, env = "ARGOSY_ARCHIVE_ROOT", default_value = DEFAULT_ARCHIVE_ROOT)]
        archive_root: PathBuf,

        /// Local root for batch shards and the merged dataset
        #[arg(long, env = "ARGOSY_OUTPUT_ROOT", default_value = DEFAULT_OUTPUT_ROOT)]
        output_root: PathBuf,

        /// Simultaneous download transfers
        #[arg(long, env = "ARGOSY_CONCURRENCY", default_value_t = DEFAULT_DOWNLOAD_CONCURRENCY)]
        concurrency: usize,

        /// Simultaneous archive decodes
        #[arg(long, env = "ARGOSY_CONVERT_WORKERS", default_value_t = DEFAULT_CONVERT_WORKERS)]
        convert_workers: usize,

        /// Rows accumulated before a batch shard is flushed
        #[arg(long, env = "ARGOSY_SHARD_MAX_ROWS", default_value_t = DEFAULT_SHARD_MAX_ROWS)]
        shard_max_rows: usize,

        /// Download attempts per archive before it is reported failed
        #[arg(long, env = "ARGOSY_MAX_RETRIES", default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_retries: u32,

        /// Use an in-memory catalog store instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,

        /// Console log level (trace, debug, info, warn, error)
        #[arg(long, env = "LOG_LEVEL")]
        log_level: Option<String>,

        /// Also write logs to a rolling file under the log directory
        #[arg(long)]
        log_file: bool,
    },

    /// Show per-status catalog counts for one region and year
    Status {
        #[command(flatten)]
        selector: SelectorArgs,

        /// PostgreSQL connection string for the catalog index
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
}

/// The (region, year) pair every subcommand is scoped to
#[derive(Args, Debug, Clone, Copy)]
pub struct SelectorArgs {
    /// Ocean basin (atlantic, pacific, indian, arctic, southern)
    #[arg(long, value_parser = parse_region)]
    pub region: Region,

    /// Catalog year
    #[arg(long, value_parser = clap::value_parser!(u16).range(MIN_YEAR as i64..=MAX_YEAR as i64))]
    pub year: u16,
}

impl SelectorArgs {
    /// Validated selector (clap has already bounded both fields)
    pub fn selector(&self) -> Result<Selector> {
        Ok(Selector::new(self.region, self.year)?)
    }
}

fn parse_region(s: &str) -> std::result::Result<Region, String> {
    s.parse::<Region>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_parses_selector_and_flags() {
        let cli = Cli::try_parse_from([
            "argosy",
            "run",
            "--region",
            "pacific",
            "--year",
            "2015",
            "--dry-run",
            "--concurrency",
            "8",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Run {
                selector,
                dry_run,
                concurrency,
                ..
            }) => {
                assert_eq!(selector.region, Region::Pacific);
                assert_eq!(selector.year, 2015);
                assert!(dry_run);
                assert_eq!(concurrency, 8);
                assert!(selector.selector().is_ok());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_region_is_rejected() {
        let result =
            Cli::try_parse_from(["argosy", "run", "--region", "baltic", "--year", "2015"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_year_is_rejected() {
        let early =
            Cli::try_parse_from(["argosy", "run", "--region", "indian", "--year", "1999"]);
        assert!(early.is_err());

        let late =
            Cli::try_parse_from(["argosy", "status", "--region", "indian", "--year", "2025"]);
        assert!(late.is_err());
    }

    #[test]
    fn test_status_requires_no_pipeline_flags() {
        let cli = Cli::try_parse_from([
            "argosy", "status", "--region", "arctic", "--year", "2020",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Status { .. })));
    }
}
