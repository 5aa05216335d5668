use anyhow::{Context, Result, bail};
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

use super::types::{ExtensionFilter, ScanResult, ScanStats, ScannerConfig};
use crate::config::UnlockerConfig;
use crate::utils::format_file_size;

/// Walks an input tree and collects candidate files
#[derive(Debug, Clone)]
pub struct Scanner {
    pub(crate) config: ScannerConfig,
}

impl Scanner {
    pub fn new(config: &UnlockerConfig) -> Self {
        Self::with_config(ScannerConfig {
            max_file_size: config.file_settings.max_file_size(),
            ..ScannerConfig::default()
        })
    }

    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Recursively collect regular files under `root`.
    ///
    /// Hidden and ignored files are included, since the input tree is not a
    /// source checkout. Anything below `exclude` is pruned from the walk.
    /// Files over the size limit are left out with a warning and entries that
    /// cannot be read are dropped silently. The result is sorted.
    pub fn scan_directory(
        &self,
        root: &Path,
        filter: &ExtensionFilter,
        exclude: Option<&Path>,
    ) -> Result<ScanResult> {
        let start_time = Instant::now();
        let mut stats = ScanStats::default();
        let mut files = Vec::new();

        if !root.is_dir() {
            bail!("input directory does not exist: {}", root.display());
        }
        // surface permission problems on the root itself as a run failure
        fs::read_dir(root)
            .with_context(|| format!("failed to read input directory {}", root.display()))?;

        let pruned: Option<PathBuf> = exclude.map(Path::to_path_buf);
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(self.config.follow_symlinks)
            .filter_entry(move |entry| {
                pruned.as_ref().is_none_or(|dir| !entry.path().starts_with(dir))
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    stats.files_unreadable += 1;
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let path = entry.path();
            if !filter.accepts(path) {
                stats.files_filtered += 1;
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    stats.files_unreadable += 1;
                    continue;
                }
            };

            if size > self.config.max_file_size {
                warn!(
                    "Skipping {}: {} exceeds the {} limit",
                    path.display(),
                    format_file_size(size),
                    format_file_size(self.config.max_file_size)
                );
                stats.files_oversized += 1;
                continue;
            }

            files.push(path.to_path_buf());
        }

        files.sort();
        stats.files_found = files.len();
        stats.scan_duration_ms = start_time.elapsed().as_millis() as u64;

        debug!(
            "Scan of {} found {} files ({} filtered, {} oversized, {} unreadable) in {}ms",
            root.display(),
            stats.files_found,
            stats.files_filtered,
            stats.files_oversized,
            stats.files_unreadable,
            stats.scan_duration_ms
        );

        Ok(ScanResult { files, stats })
    }
}
