use anyhow::{Context, Result, bail};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use super::types::{BatchSummary, ProcessingResult, ProcessingStatus, ProgressCounter};
use crate::config::UnlockerConfig;
use crate::scanner::{ExtensionFilter, FileCategory, FileClassifier, ScanMode, Scanner, extension_label};
use crate::unlock::{ExcelHandler, PasswordTrial, RarHandler, ZipHandler, unlock_file};
use crate::utils::{ensure_dir_exists, panic_message};

/// Called after each file with (processed, total, result)
pub type ProgressObserver = Box<dyn Fn(usize, usize, &ProcessingResult) + Send + Sync>;

/// Runs the scan and unlocks every candidate file, one at a time
pub struct BatchProcessor {
    passwords: Vec<String>,
    classifier: FileClassifier,
    scanner: Scanner,
    report_unsupported: bool,
    unrar_path: Option<PathBuf>,
    progress: ProgressCounter,
    stop: Arc<AtomicBool>,
    observer: Option<ProgressObserver>,
}

impl BatchProcessor {
    pub fn new(config: &UnlockerConfig) -> Self {
        Self {
            passwords: config.passwords.clone(),
            classifier: FileClassifier::new(&config.file_settings.supported_extensions),
            scanner: Scanner::new(config),
            report_unsupported: config.file_settings.report_unsupported,
            unrar_path: config.external_tools.unrar_path.clone(),
            progress: ProgressCounter::default(),
            stop: Arc::new(AtomicBool::new(false)),
            observer: None,
        }
    }

    /// Share a flag that, once set, ends the batch before the next file
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, usize, &ProcessingResult) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Handle on the live processed/total counts
    pub fn progress(&self) -> ProgressCounter {
        self.progress.clone()
    }

    /// Process every supported file under `input` into `output`
    pub fn run(&self, input: &Path, output: &Path) -> Result<BatchSummary> {
        self.run_mode(input, output, ScanMode::Auto)
    }

    /// Like [`Self::run`], limited to the formats of `mode`.
    ///
    /// Errors only for batch-level problems (missing input, unusable output);
    /// per-file problems become `Failed` results.
    pub fn run_mode(&self, input: &Path, output: &Path, mode: ScanMode) -> Result<BatchSummary> {
        if !input.is_dir() {
            bail!("input directory does not exist: {}", input.display());
        }
        ensure_dir_exists(output)?;

        let input_root = input
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", input.display()))?;
        let output_root = output
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", output.display()))?;

        info!(
            "Starting {} batch: {} -> {} ({} passwords)",
            mode,
            input_root.display(),
            output_root.display(),
            self.passwords.len()
        );

        // never feed our own output back in
        let exclude = (output_root != input_root && output_root.starts_with(&input_root))
            .then_some(output_root.as_path());
        let scan = self
            .scanner
            .scan_directory(&input_root, &self.extension_filter(mode), exclude)?;

        let total = scan.files.len();
        if total == 0 {
            warn!("No files to process in {}", input_root.display());
        }
        self.progress.reset(total);

        let mut summary = BatchSummary::default();
        for path in &scan.files {
            if self.stop.load(Ordering::SeqCst) {
                warn!("Stop requested after {} of {} files", summary.total(), total);
                break;
            }

            let result = self.process_guarded(path, &output_root);
            match result.status() {
                ProcessingStatus::Success => debug!("{}: {}", path.display(), result.message()),
                ProcessingStatus::Failed => warn!("{}: {}", path.display(), result.message()),
                ProcessingStatus::Skipped => info!("{}: {}", path.display(), result.message()),
            }

            let processed = self.progress.advance();
            if let Some(observer) = &self.observer {
                observer(processed, total, &result);
            }
            summary.record(result);
        }

        info!(
            "Batch finished: {} files, {} succeeded, {} failed, {} skipped",
            summary.total(),
            summary.success(),
            summary.failed(),
            summary.skipped()
        );
        Ok(summary)
    }

    /// Dispatch one file to its handler by extension
    pub fn process_file(&self, path: &Path, output_root: &Path) -> ProcessingResult {
        let trial = PasswordTrial::new(&self.passwords);
        match self.classifier.classify(path) {
            FileCategory::Spreadsheet => unlock_file(&ExcelHandler, path, output_root, &trial),
            FileCategory::ZipArchive => unlock_file(&ZipHandler, path, output_root, &trial),
            FileCategory::RarArchive => {
                let handler = RarHandler::new(self.unrar_path.clone());
                unlock_file(&handler, path, output_root, &trial)
            }
            FileCategory::Unrecognized => ProcessingResult::skipped(
                path,
                format!("unsupported file type: {}", extension_label(path)),
            ),
        }
    }

    fn process_guarded(&self, path: &Path, output_root: &Path) -> ProcessingResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process_file(path, output_root))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("Panic while processing {}: {}", path.display(), reason);
                ProcessingResult::failed(path, format!("unexpected error while processing: {reason}"))
            }
        }
    }

    fn extension_filter(&self, mode: ScanMode) -> ExtensionFilter {
        match mode {
            ScanMode::Auto if self.report_unsupported => ExtensionFilter::Any,
            _ => ExtensionFilter::Only(self.classifier.extensions(mode.categories())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unlock::excel::testing::{encrypted_workbook, plain_workbook};
    use crate::unlock::zip::testing::write_zip;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn config(passwords: &[&str]) -> UnlockerConfig {
        UnlockerConfig {
            passwords: passwords.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    fn dirs() -> (TempDir, PathBuf, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        fs::create_dir_all(&input).unwrap();
        (temp_dir, input, output)
    }

    fn output_entries(output: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(output)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_unencrypted_workbook_is_copied() {
        let (_temp, input, output) = dirs();
        let original = plain_workbook();
        fs::write(input.join("report.xlsx"), &original).unwrap();

        let summary = BatchProcessor::new(&config(&["pw"])).run(&input, &output).unwrap();

        assert_eq!((summary.total(), summary.success(), summary.failed(), summary.skipped()), (1, 1, 0, 0));
        assert_eq!(fs::read(output.join("unlocked_report.xlsx")).unwrap(), original);
        let result = &summary.details()[0];
        assert!(result.output_path().is_some_and(|p| p.ends_with("unlocked_report.xlsx")));
    }

    #[test]
    fn test_protected_archive_with_second_password() {
        let (_temp, input, output) = dirs();
        write_zip(&input.join("data.zip"), &[("inner.txt", b"inside")], Some("wrong2"));

        let summary = BatchProcessor::new(&config(&["wrong1", "wrong2"])).run(&input, &output).unwrap();

        assert_eq!(summary.success(), 1);
        assert_eq!(summary.details()[0].message(), "extracted with password #2 of 2");
        assert_eq!(fs::read(output.join("unlocked_data/inner.txt")).unwrap(), b"inside");
    }

    #[test]
    fn test_unrecognized_file_is_skipped() {
        let (_temp, input, output) = dirs();
        fs::write(input.join("notes.txt"), b"hello").unwrap();

        let summary = BatchProcessor::new(&config(&["pw"])).run(&input, &output).unwrap();

        assert_eq!((summary.total(), summary.skipped()), (1, 1));
        let result = &summary.details()[0];
        assert_eq!(result.status(), ProcessingStatus::Skipped);
        assert_eq!(result.message(), "unsupported file type: .txt");
        assert!(output_entries(&output).is_empty());
    }

    #[test]
    fn test_unknown_spreadsheet_password_fails() {
        let (_temp, input, output) = dirs();
        fs::write(input.join("locked.xlsx"), encrypted_workbook(&plain_workbook(), "real")).unwrap();

        let summary = BatchProcessor::new(&config(&["a", "b"])).run(&input, &output).unwrap();

        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.details()[0].message(), crate::unlock::EXHAUSTED_MESSAGE);
        assert!(output_entries(&output).is_empty());
    }

    #[test]
    fn test_mixed_batch_keeps_going_and_counts_add_up() {
        let (_temp, input, output) = dirs();
        fs::write(input.join("a.xlsx"), plain_workbook()).unwrap();
        fs::write(input.join("b.zip"), b"corrupt").unwrap();
        fs::write(input.join("c.txt"), b"text").unwrap();
        fs::write(input.join("d.xlsx"), encrypted_workbook(&plain_workbook(), "pw")).unwrap();

        let summary = BatchProcessor::new(&config(&["pw"])).run(&input, &output).unwrap();

        assert_eq!(summary.total(), 4);
        assert_eq!(summary.total(), summary.success() + summary.failed() + summary.skipped());
        assert_eq!(summary.details().len(), summary.total());
        assert_eq!((summary.success(), summary.failed(), summary.skipped()), (2, 1, 1));
        for result in summary.details() {
            assert_eq!(result.output_path().is_some(), result.is_success());
        }
        let sources: Vec<_> = summary.details().iter().map(|r| r.source().to_string()).collect();
        let mut sorted = sources.clone();
        sorted.sort();
        assert_eq!(sources, sorted);
    }

    #[test]
    fn test_modes_limit_formats() {
        let (_temp, input, output) = dirs();
        fs::write(input.join("a.xlsx"), plain_workbook()).unwrap();
        write_zip(&input.join("b.zip"), &[("x.txt", b"x")], None);
        fs::write(input.join("c.txt"), b"text").unwrap();

        let processor = BatchProcessor::new(&config(&["pw"]));
        let excel = processor.run_mode(&input, &output, ScanMode::Excel).unwrap();
        assert_eq!(excel.total(), 1);
        assert!(excel.details()[0].source().ends_with("a.xlsx"));

        let extract = processor.run_mode(&input, &output, ScanMode::Extract).unwrap();
        assert_eq!(extract.total(), 1);
        assert!(extract.details()[0].source().ends_with("b.zip"));
    }

    #[test]
    fn test_report_unsupported_off_ignores_unknown_files() {
        let (_temp, input, output) = dirs();
        fs::write(input.join("c.txt"), b"text").unwrap();
        let mut config = config(&["pw"]);
        config.file_settings.report_unsupported = false;

        let summary = BatchProcessor::new(&config).run(&input, &output).unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let (_temp, input, output) = dirs();
        fs::write(input.join("a.xlsx"), encrypted_workbook(&plain_workbook(), "pw")).unwrap();
        write_zip(&input.join("b.zip"), &[("x.txt", b"payload")], Some("pw"));

        let processor = BatchProcessor::new(&config(&["pw"]));
        processor.run(&input, &output).unwrap();
        let first_xlsx = fs::read(output.join("unlocked_a.xlsx")).unwrap();
        let first_zip = fs::read(output.join("unlocked_b/x.txt")).unwrap();

        let summary = processor.run(&input, &output).unwrap();
        assert_eq!(summary.success(), 2);
        assert_eq!(fs::read(output.join("unlocked_a.xlsx")).unwrap(), first_xlsx);
        assert_eq!(fs::read(output.join("unlocked_b/x.txt")).unwrap(), first_zip);
    }

    #[test]
    fn test_output_inside_input_is_not_rescanned() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().to_path_buf();
        let output = input.join("output");
        fs::write(input.join("a.xlsx"), plain_workbook()).unwrap();

        let processor = BatchProcessor::new(&config(&["pw"]));
        processor.run(&input, &output).unwrap();
        let second = processor.run(&input, &output).unwrap();

        assert_eq!(second.total(), 1);
        assert_eq!(output_entries(&output), vec!["unlocked_a.xlsx"]);
    }

    #[test]
    fn test_oversized_files_vanish_from_summary() {
        let (_temp, input, output) = dirs();
        fs::write(input.join("big.xlsx"), vec![0u8; 2 * 1024 * 1024]).unwrap();
        fs::write(input.join("small.xlsx"), plain_workbook()).unwrap();
        let mut config = config(&["pw"]);
        config.file_settings.max_file_size_mb = 1;

        let summary = BatchProcessor::new(&config).run(&input, &output).unwrap();
        assert_eq!(summary.total(), 1);
        assert!(summary.details()[0].source().ends_with("small.xlsx"));
    }

    #[test]
    fn test_stop_flag_returns_partial_summary() {
        let (_temp, input, output) = dirs();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(input.join(name), b"x").unwrap();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let processor = BatchProcessor::new(&config(&["pw"]))
            .with_stop_flag(stop)
            .with_observer(move |processed, _, _| {
                if processed == 1 {
                    flag.store(true, Ordering::SeqCst);
                }
            });

        let summary = processor.run(&input, &output).unwrap();
        assert_eq!(summary.total(), 1);
        assert_eq!(processor.progress().processed(), 1);
        assert_eq!(processor.progress().total(), 3);
    }

    #[test]
    fn test_observer_sees_every_file() {
        let (_temp, input, output) = dirs();
        fs::write(input.join("a.txt"), b"x").unwrap();
        fs::write(input.join("b.txt"), b"x").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let processor = BatchProcessor::new(&config(&["pw"])).with_observer(move |processed, total, result| {
            sink.lock().unwrap().push((processed, total, result.status()));
        });
        processor.run(&input, &output).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, 2, ProcessingStatus::Skipped), (2, 2, ProcessingStatus::Skipped)]
        );
    }

    #[test]
    fn test_missing_input_aborts_batch() {
        let temp_dir = TempDir::new().unwrap();
        let err = BatchProcessor::new(&config(&["pw"]))
            .run(&temp_dir.path().join("nope"), &temp_dir.path().join("out"))
            .unwrap_err();
        assert!(err.to_string().contains("input directory does not exist"));
        assert!(!temp_dir.path().join("out").exists());
    }

    #[test]
    fn test_empty_input_gives_empty_summary() {
        let (_temp, input, output) = dirs();
        let summary = BatchProcessor::new(&config(&["pw"])).run(&input, &output).unwrap();
        assert_eq!(summary.total(), 0);
        assert!(output.is_dir());
    }
}
