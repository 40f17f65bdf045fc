//! Build automation tasks for Argosy
//!
//! This tool provides various automation tasks for the Argosy project, including:
//! - Generating CLI documentation from source code
//! - Future build-related tasks

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for Argosy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate CLI documentation in MDX format
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    // Generate markdown from clap definitions
    let markdown = clap_markdown::help_markdown::<argosy_cli::Cli>();

    // Create MDX content with frontmatter and enhanced formatting
    let mdx_content = format!(
        r#"---
title: CLI Reference
description: Complete command reference for the Argosy CLI
---

# Argosy CLI Reference

This documentation is auto-generated from the CLI source code. Last updated: {}.

## Overview

Argosy acquires ocean float observation archives one (region, year) at a
time: it indexes the remote catalog in PostgreSQL, downloads what is
missing with resumable transfers, converts archives into parquet batch
shards, and merges them into one deduplicated dataset per selector.
Interrupted runs checkpoint their progress; re-running the same selector
resumes instead of starting over.

## Installation

### From Source

```bash
git clone https://github.com/argosy-data/argosy.git
cd argosy
cargo install --path crates/argosy-cli
```

## Quick Start

```bash
# Point at the catalog database
export DATABASE_URL=postgres://localhost/argosy

# Run the full pipeline for one basin and year
argosy run --region atlantic --year 2020

# Inspect the catalog index between runs
argosy status --region atlantic --year 2020

# Trial run without PostgreSQL (in-memory index, no checkpointing)
argosy run --region atlantic --year 2020 --dry-run
```

## Commands

{}

## Environment Variables

- `DATABASE_URL` - PostgreSQL connection string for the catalog index
- `ARGOSY_CATALOG_BASE_URL` - Base URL serving the per-region inventory listings
- `ARGOSY_DATA_BASE_URL` - Base URL serving the archive files
- `ARGOSY_ARCHIVE_ROOT` - Local root for downloaded archives (default: `data`)
- `ARGOSY_OUTPUT_ROOT` - Local root for shards and merged datasets (default: `processed_data`)
- `ARGOSY_CONCURRENCY` - Simultaneous download transfers (default: 5)
- `ARGOSY_CONVERT_WORKERS` - Simultaneous archive decodes (default: 4)
- `ARGOSY_SHARD_MAX_ROWS` - Rows per batch shard before a flush (default: 100000)
- `ARGOSY_MAX_RETRIES` - Download attempts per archive (default: 3)
- `LOG_LEVEL` - Logging level (e.g., `debug`, `info`, `warn`, `error`)
- `LOG_OUTPUT` - Log destination: `console`, `file`, or `both`
- `LOG_DIR` - Directory for rolling log files (default: `./logs`)

## Exit Codes

- `0` - The run completed and every archive reached the merged dataset
- `1` - The run finished with unresolved failures, or a stage failed outright
- `2` - Invalid invocation (missing subcommand, bad flag value)

A cancelled run (Ctrl+C) exits non-zero after checkpointing; re-run the
same selector to resume from where it stopped.

---

*This documentation is automatically generated from the CLI source code. To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    // Create output directory if it doesn't exist
    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    // Write the MDX file
    let file_path = output_path.join("cli-reference.mdx");
    fs::write(&file_path, mdx_content)?;

    println!("✅ Generated CLI documentation at: {}", file_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Review the generated documentation");
    println!("  2. Commit it to version control");
    println!("  3. Add a CI check to ensure docs stay in sync");

    Ok(())
}
