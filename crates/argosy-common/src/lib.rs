//! Argosy Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared foundation for the Argosy workspace members:
//!
//! - **Error Handling**: common error and result types
//! - **Logging**: tracing subscriber configuration and initialization
//! - **Checksums**: file integrity verification utilities

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{ArgosyError, Result};
