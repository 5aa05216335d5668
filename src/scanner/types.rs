use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use super::classify::extension_of;

/// Format family a file belongs to, decided by extension only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileCategory {
    Spreadsheet,
    ZipArchive,
    RarArchive,
    Unrecognized,
}

/// Which formats a run picks up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Every supported format; unknown files are reported as skipped
    #[default]
    Auto,
    /// Archives only (ZIP and RAR)
    Extract,
    /// Spreadsheets only
    Excel,
}

impl ScanMode {
    pub fn categories(self) -> &'static [FileCategory] {
        match self {
            ScanMode::Auto => &[
                FileCategory::Spreadsheet,
                FileCategory::ZipArchive,
                FileCategory::RarArchive,
            ],
            ScanMode::Extract => &[FileCategory::ZipArchive, FileCategory::RarArchive],
            ScanMode::Excel => &[FileCategory::Spreadsheet],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanMode::Auto => "auto",
            ScanMode::Extract => "extract",
            ScanMode::Excel => "excel",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which file extensions the walk keeps
#[derive(Debug, Clone)]
pub enum ExtensionFilter {
    /// Keep every regular file
    Any,
    /// Keep files whose normalised extension is in the set
    Only(HashSet<String>),
}

impl ExtensionFilter {
    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            ExtensionFilter::Any => true,
            ExtensionFilter::Only(allowed) => {
                extension_of(path).is_some_and(|ext| allowed.contains(&ext))
            }
        }
    }
}

/// Statistics from a scanning operation
#[derive(Debug, Default)]
pub struct ScanStats {
    pub files_found: usize,
    pub files_filtered: usize,
    pub files_oversized: usize,
    pub files_unreadable: usize,
    pub scan_duration_ms: u64,
}

/// Result of a scanning operation
#[derive(Debug)]
pub struct ScanResult {
    /// Candidate files in sorted order
    pub files: Vec<PathBuf>,
    pub stats: ScanStats,
}

/// Configuration for the scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub max_file_size: u64,
    pub follow_symlinks: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 500 * 1024 * 1024,
            follow_symlinks: false,
        }
    }
}
