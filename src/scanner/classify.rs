//! Extension based file classification

use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::types::FileCategory;
use crate::config::SupportedExtensions;

/// Lowercase an extension and strip surrounding whitespace and the leading dot
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Normalised extension of `path`, if it has one
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| normalize_extension(&ext.to_string_lossy()))
        .filter(|ext| !ext.is_empty())
}

/// Extension as shown to users: `.txt`, or `(none)`
pub fn extension_label(path: &Path) -> String {
    match extension_of(path) {
        Some(ext) => format!(".{ext}"),
        None => "(none)".to_string(),
    }
}

/// Maps extensions to format families.
///
/// An extension listed under several formats belongs to the first one in
/// excel, zip, rar order.
#[derive(Debug, Clone)]
pub struct FileClassifier {
    table: HashMap<String, FileCategory>,
}

impl FileClassifier {
    pub fn new(extensions: &SupportedExtensions) -> Self {
        let mut table = HashMap::new();
        let groups = [
            (FileCategory::Spreadsheet, &extensions.excel),
            (FileCategory::ZipArchive, &extensions.zip),
            (FileCategory::RarArchive, &extensions.rar),
        ];

        for (category, list) in groups {
            for ext in list {
                let ext = normalize_extension(ext);
                if !ext.is_empty() {
                    table.entry(ext).or_insert(category);
                }
            }
        }

        Self { table }
    }

    pub fn classify(&self, path: &Path) -> FileCategory {
        extension_of(path)
            .and_then(|ext| self.table.get(&ext).copied())
            .unwrap_or(FileCategory::Unrecognized)
    }

    /// Extensions that map to any of `categories`
    pub fn extensions(&self, categories: &[FileCategory]) -> HashSet<String> {
        self.table
            .iter()
            .filter(|(_, category)| categories.contains(category))
            .map(|(ext, _)| ext.clone())
            .collect()
    }
}
