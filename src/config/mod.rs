//! Configuration management for unlocker
//!
//! Typed settings for a batch run: the candidate password list, which files
//! are picked up, how reports are written and where external tools live.
//! Values are layered by [`core`] from the embedded defaults, an optional
//! config file and `UNLOCKER_*` environment variables.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::reports::ReportFormat;
use crate::scanner::classify::normalize_extension;

pub mod core;


pub use self::core::ConfigLoader;

/// Main configuration structure for unlocker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlockerConfig {
    /// Candidate passwords, tried in order
    pub passwords: Vec<String>,

    /// Which files are scanned and how large they may be
    pub file_settings: FileSettings,

    /// Report output settings
    pub report_settings: ReportSettings,

    /// Locations of helper programs
    pub external_tools: ExternalTools,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
    /// Files above this size are dropped from the scan
    pub max_file_size_mb: u64,

    /// In auto mode, report files with unknown extensions as skipped
    pub report_unsupported: bool,

    pub supported_extensions: SupportedExtensions,
}

/// Extension lists per format, with or without the leading dot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportedExtensions {
    pub excel: Vec<String>,
    pub zip: Vec<String>,
    pub rar: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub format: ReportFormat,
    pub include_statistics: bool,
    pub directory: PathBuf,
    /// Age in days after which old reports are removed; 0 disables cleanup
    pub keep_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalTools {
    /// Explicit path to `unrar`; looked up on PATH when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrar_path: Option<PathBuf>,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            max_file_size_mb: 500,
            report_unsupported: true,
            supported_extensions: SupportedExtensions::default(),
        }
    }
}

impl Default for SupportedExtensions {
    fn default() -> Self {
        Self {
            excel: vec![".xlsx".to_string(), ".xlsm".to_string(), ".xls".to_string()],
            zip: vec![".zip".to_string()],
            rar: vec![".rar".to_string()],
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            format: ReportFormat::Yaml,
            include_statistics: true,
            directory: PathBuf::from("report"),
            keep_days: 30,
        }
    }
}

impl SupportedExtensions {
    /// Every configured extension across all formats
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.excel.iter().chain(&self.zip).chain(&self.rar)
    }

    pub fn is_empty(&self) -> bool {
        self.excel.is_empty() && self.zip.is_empty() && self.rar.is_empty()
    }
}

impl FileSettings {
    /// Size limit in bytes
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

impl UnlockerConfig {
    /// Check the settings a run cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.passwords.is_empty() {
            bail!("no passwords configured: add at least one entry to `passwords` or pass --password");
        }
        if self.file_settings.max_file_size_mb == 0 {
            bail!("file_settings.max_file_size_mb must be greater than 0");
        }

        let extensions = &self.file_settings.supported_extensions;
        if extensions.is_empty() {
            bail!("file_settings.supported_extensions does not list any extension");
        }
        if let Some(bad) = extensions.all().find(|ext| normalize_extension(ext).is_empty()) {
            bail!("invalid extension in file_settings.supported_extensions: {bad:?}");
        }

        Ok(())
    }

    /// Copy of the configuration that is safe to print.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        masked.passwords = self.passwords.iter().map(|_| "********".to_string()).collect();
        masked
    }
}
