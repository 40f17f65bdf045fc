//! Argosy Pipeline Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resumable acquisition and consistency subsystem for ocean float
//! observation archives. For a (region, year) selector the pipeline turns a
//! remote archive index into a verified, deduplicated, locally materialized
//! columnar dataset, and converges to the same state across repeated runs.
//!
//! Stage chain (strict barriers between stages):
//!
//! - `catalog::CatalogClient` fetches and parses the remote inventory
//! - `catalog::CatalogStore` is the durable index with idempotent upserts
//! - `audit::ExistenceAuditor` diffs the catalog against the local filesystem
//! - `download::Downloader` runs bounded-concurrency resumable transfers
//! - `convert::ConversionWorker` decodes archives into parquet batch shards
//! - `merge::MergeAssembler` assembles the deduplicated dataset per selector
//!
//! `runner::Pipeline` wires the stages together and aggregates a `RunSummary`.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod convert;
pub mod download;
pub mod error;
pub mod layout;
pub mod merge;
pub mod progress;
pub mod runner;
pub mod types;

// Re-export main types
pub use audit::{AuditOutcome, ExistenceAuditor};
pub use catalog::{CatalogClient, CatalogStore, MemoryCatalogStore, PgCatalogStore, StatusCounts};
pub use config::PipelineConfig;
pub use convert::{
    ArchiveDecoder, BatchShard, ConversionOutcome, ConversionWorker, DecodedArchive,
    NetcdfDecoder, ObservationRow,
};
pub use download::{DownloadReport, Downloader, RetryPolicy};
pub use error::{PipelineError, Result};
pub use layout::DataLayout;
pub use merge::{MergeAssembler, MergedDataset};
pub use progress::{NullObserver, ProgressObserver, Stage};
pub use runner::{Pipeline, RunSummary};
pub use types::{
    CatalogRecord, DownloadStatus, DownloadTask, EntryKey, IndexEntry, LocalFileDescriptor,
    Region, Selector, VerifyToken,
};
