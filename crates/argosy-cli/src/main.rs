//! Argosy CLI - Main entry point

use argosy_cli::{Cli, Commands};
use argosy_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use argosy_pipeline::PipelineConfig;
use clap::Parser;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // Load .env before clap resolves env-backed flags
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Handle markdown help generation
    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    // Ensure a command is provided
    if cli.command.is_none() {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    }

    // Environment first, then command-line flags override
    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if let Some(Commands::Run {
        log_level,
        log_file,
        ..
    }) = &cli.command
    {
        if let Some(level) = log_level {
            match level.parse::<LogLevel>() {
                Ok(level) => log_config.level = level,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(2);
                }
            }
        }
        if *log_file {
            log_config.output = LogOutput::Both;
        }
    }
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }

    // Initialize logging (ignore errors as the CLI should work without logging)
    let _ = init_logging(&log_config);

    if let Err(e) = execute_command(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: Cli) -> argosy_cli::Result<()> {
    // Command is guaranteed to exist at this point (checked in main)
    let Some(command) = cli.command else {
        unreachable!("Command should have been validated in main");
    };

    match command {
        Commands::Run {
            selector,
            database_url,
            catalog_base_url,
            data_base_url,
            archive_root,
            output_root,
            concurrency,
            convert_workers,
            shard_max_rows,
            max_retries,
            dry_run,
            log_level: _,
            log_file: _,
        } => {
            let config = PipelineConfig {
                catalog_base_url,
                data_base_url,
                archive_root,
                output_root,
                download_concurrency: concurrency,
                convert_workers,
                shard_max_rows,
                max_attempts: max_retries,
                ..PipelineConfig::default()
            };
            argosy_cli::commands::run::run(selector.selector()?, config, database_url, dry_run)
                .await
        }

        Commands::Status {
            selector,
            database_url,
        } => argosy_cli::commands::status::run(selector.selector()?, database_url).await,
    }
}
