use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Final state of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Failed,
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one input file.
///
/// Only the constructors can build one, so an output path is present exactly
/// when the status is `Success`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    #[serde(rename = "file")]
    source: String,
    status: ProcessingStatus,
    message: String,
    output_path: Option<String>,
}

impl ProcessingResult {
    pub fn success(source: &Path, output: &Path, message: impl Into<String>) -> Self {
        Self {
            source: source.display().to_string(),
            status: ProcessingStatus::Success,
            message: message.into(),
            output_path: Some(output.display().to_string()),
        }
    }

    pub fn failed(source: &Path, message: impl Into<String>) -> Self {
        Self {
            source: source.display().to_string(),
            status: ProcessingStatus::Failed,
            message: message.into(),
            output_path: None,
        }
    }

    pub fn skipped(source: &Path, message: impl Into<String>) -> Self {
        Self {
            source: source.display().to_string(),
            status: ProcessingStatus::Skipped,
            message: message.into(),
            output_path: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn output_path(&self) -> Option<&str> {
        self.output_path.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessingStatus::Success
    }
}

/// Aggregate of a batch run. Counters only change through [`BatchSummary::record`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    total: usize,
    success: usize,
    failed: usize,
    skipped: usize,
    details: Vec<ProcessingResult>,
}

impl BatchSummary {
    pub fn record(&mut self, result: ProcessingResult) {
        self.total += 1;
        match result.status {
            ProcessingStatus::Success => self.success += 1,
            ProcessingStatus::Failed => self.failed += 1,
            ProcessingStatus::Skipped => self.skipped += 1,
        }
        self.details.push(result);
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn success(&self) -> usize {
        self.success
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn details(&self) -> &[ProcessingResult] {
        &self.details
    }

    /// Results with the given status, in processing order
    pub fn with_status(&self, status: ProcessingStatus) -> impl Iterator<Item = &ProcessingResult> {
        self.details.iter().filter(move |r| r.status == status)
    }
}

impl FromIterator<ProcessingResult> for BatchSummary {
    fn from_iter<I: IntoIterator<Item = ProcessingResult>>(iter: I) -> Self {
        let mut summary = BatchSummary::default();
        for result in iter {
            summary.record(result);
        }
        summary
    }
}

/// Processed/total counts readable from another thread while a batch runs
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    processed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl ProgressCounter {
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub(crate) fn reset(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
    }

    /// Count one more file and return the new processed count
    pub(crate) fn advance(&self) -> usize {
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }
}
