use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::processor::{ProcessingResult, ProcessingStatus};
use crate::scanner::extension_label;

/// Coarse failure cause, guessed from the message text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Password,
    File,
    Permission,
    Other,
}

/// Checked in order; the first category with a matching keyword wins
const ERROR_KEYWORDS: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::Password, &["password"]),
    (ErrorCategory::File, &["file"]),
    (ErrorCategory::Permission, &["permission", "access is denied"]),
];

impl ErrorCategory {
    /// Best-effort: depends on the wording of handler messages
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        ERROR_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| message.contains(k)))
            .map_or(ErrorCategory::Other, |(category, _)| *category)
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::Password => "password_error",
            ErrorCategory::File => "file_error",
            ErrorCategory::Permission => "permission_error",
            ErrorCategory::Other => "other_error",
        }
    }
}

/// Breakdowns over the detail records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub by_status: BTreeMap<String, usize>,
    pub by_file_type: BTreeMap<String, usize>,
    pub by_error_type: BTreeMap<String, usize>,
}

impl Statistics {
    pub fn from_details(details: &[ProcessingResult]) -> Self {
        let mut stats = Statistics::default();
        for result in details {
            *stats.by_status.entry(result.status().to_string()).or_default() += 1;
            *stats
                .by_file_type
                .entry(extension_label(Path::new(result.source())))
                .or_default() += 1;

            if result.status() == ProcessingStatus::Failed {
                let category = ErrorCategory::classify(result.message());
                *stats.by_error_type.entry(category.label().to_string()).or_default() += 1;
            }
        }
        stats
    }
}

/// `success / total * 100`, 0 for an empty batch
pub fn success_rate(success: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        success as f64 * 100.0 / total as f64
    }
}

/// Seconds as "x.x seconds", "x.x minutes" or "x.x hours"
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{seconds:.1} seconds")
    } else if seconds < 3600.0 {
        format!("{:.1} minutes", seconds / 60.0)
    } else {
        format!("{:.1} hours", seconds / 3600.0)
    }
}
