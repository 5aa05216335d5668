//! # Unlocker - batch recovery of password-protected files
//!
//! Walks an input directory, tries a configured list of candidate passwords
//! against every Excel workbook, ZIP archive and RAR archive it finds, and
//! writes the unlocked copies to an output directory along with a report.
//!
//! ## Features
//!
//! - **Excel**: OOXML Agile and Standard encryption, decrypted in-process
//! - **ZIP**: ZipCrypto and AES entries, extracted into a directory per archive
//! - **RAR**: delegated to the external `unrar` tool
//! - **Reports**: YAML, JSON or CSV with per-file outcomes and statistics
//!
//! ## Quick Start
//!
//! ```bash
//! # List candidate passwords in unlocker.toml, then
//! unlocker run --input locked --output unlocked
//!
//! # Check that unrar is available
//! unlocker check
//! ```

pub mod cli;
pub mod config;
pub mod processor;
pub mod reports;
pub mod scanner;
pub mod unlock;
pub mod utils;

pub use cli::{Cli, Output};
pub use config::UnlockerConfig;
pub use processor::{BatchProcessor, BatchSummary, ProcessingResult, ProcessingStatus};

/// Result type alias for unlocker operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
