//! Run reports
//!
//! A [`Report`] is computed once from a [`BatchSummary`] and the run's start
//! and end times; YAML, JSON and CSV are interchangeable encodings of it.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ReportSettings;
use crate::processor::{BatchSummary, ProcessingResult};
use crate::utils::ensure_dir_exists;

pub mod formats;
pub mod stats;

pub use stats::{ErrorCategory, Statistics, format_duration, success_rate};

const REPORT_PREFIX: &str = "report_";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Yaml,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Yaml => "yaml",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportInfo {
    pub generated_at: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
    pub duration_formatted: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub report_info: ReportInfo,
    pub summary: ReportSummary,
    pub details: Vec<ProcessingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
}

pub struct ReportBuilder {
    settings: ReportSettings,
}

impl ReportBuilder {
    pub fn new(settings: ReportSettings) -> Self {
        Self { settings }
    }

    pub fn build(&self, summary: &BatchSummary, start: DateTime<Local>, end: DateTime<Local>) -> Report {
        let duration_seconds = (end - start).num_milliseconds().max(0) as f64 / 1000.0;

        Report {
            report_info: ReportInfo {
                generated_at: Local::now().to_rfc3339(),
                start_time: start.to_rfc3339(),
                end_time: end.to_rfc3339(),
                duration_seconds,
                duration_formatted: format_duration(duration_seconds),
            },
            summary: ReportSummary {
                total_files: summary.total(),
                successful: summary.success(),
                failed: summary.failed(),
                skipped: summary.skipped(),
                success_rate: success_rate(summary.success(), summary.total()),
            },
            details: summary.details().to_vec(),
            statistics: self
                .settings
                .include_statistics
                .then(|| Statistics::from_details(summary.details())),
        }
    }

    pub fn render(&self, report: &Report, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Yaml => formats::to_yaml(report),
            ReportFormat::Json => formats::to_json(report),
            ReportFormat::Csv => formats::to_csv(report),
        }
    }

    /// Write `report` in the configured format and return its path
    pub fn write(&self, report: &Report) -> Result<PathBuf> {
        let dir = &self.settings.directory;
        ensure_dir_exists(dir)?;

        let format = self.settings.format;
        let content = self.render(report, format)?;
        let path = dir.join(format!(
            "{REPORT_PREFIX}{}.{}",
            Local::now().format(TIMESTAMP_FORMAT),
            format.extension()
        ));
        fs::write(&path, content)
            .with_context(|| format!("failed to write report {}", path.display()))?;

        info!("Report written to {}", path.display());
        Ok(path)
    }

    /// Remove reports whose timestamp is more than `keep_days` old.
    ///
    /// Files without a parsable `report_<timestamp>` name are left alone.
    pub fn cleanup_old_reports(&self, keep_days: u32) -> Result<usize> {
        let dir = &self.settings.directory;
        if !dir.is_dir() {
            return Ok(0);
        }

        let cutoff = Local::now().naive_local() - Duration::days(i64::from(keep_days));
        let mut removed = 0;
        for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
            let path = entry?.path();
            let Some(stamp) = report_timestamp(&path) else {
                continue;
            };
            if stamp < cutoff {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                debug!("Removed old report {}", path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn report_timestamp(path: &Path) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_str()?;
    let (stamp, _extension) = name.strip_prefix(REPORT_PREFIX)?.split_once('.')?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}
