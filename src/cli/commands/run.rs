use anyhow::Result;
use chrono::Local;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::cli::Output;
use crate::config::UnlockerConfig;
use crate::processor::{BatchProcessor, ProcessingStatus};
use crate::reports::{Report, ReportBuilder, ReportFormat};
use crate::scanner::ScanMode;
use crate::utils::truncate_string;

#[derive(Args)]
pub struct RunArgs {
    /// Directory to scan for locked files
    #[arg(short, long, default_value = "input")]
    pub input: PathBuf,

    /// Directory that receives the unlocked files
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Which formats to process
    #[arg(short, long, value_enum, default_value_t = ScanMode::Auto)]
    pub mode: ScanMode,

    /// Report format (overrides report_settings.format)
    #[arg(long, value_enum)]
    pub report_format: Option<ReportFormat>,

    /// Report directory (overrides report_settings.directory)
    #[arg(long, value_name = "DIR")]
    pub report_dir: Option<PathBuf>,

    /// Extra candidate password, tried after the configured ones (repeatable)
    #[arg(short, long = "password", value_name = "PASSWORD")]
    pub passwords: Vec<String>,
}

pub fn execute(args: RunArgs, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let mut config = UnlockerConfig::load(config_path)?;
    config.passwords.extend(args.passwords);
    if let Some(format) = args.report_format {
        config.report_settings.format = format;
    }
    if let Some(dir) = args.report_dir {
        config.report_settings.directory = dir;
    }
    config.validate()?;

    output.header("🔓 Unlocking files");
    output.key_value("Input:", &args.input.display().to_string(), false);
    output.key_value("Output:", &args.output.display().to_string(), false);
    output.key_value("Mode:", args.mode.as_str(), false);
    output.key_value("Passwords:", &config.passwords.len().to_string(), false);
    output.blank_line();

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let progress = output.progress_bar(0);
    let bar = progress.clone();
    let processor = BatchProcessor::new(&config)
        .with_stop_flag(Arc::clone(&stop))
        .with_observer(move |processed, total, result| {
            bar.set_length(total as u64);
            bar.set_position(processed as u64);
            bar.set_message(truncate_string(result.source(), 48));
        });

    let start = Local::now();
    let summary = processor.run_mode(&args.input, &args.output, args.mode);
    let end = Local::now();
    progress.finish_and_clear();
    let summary = summary?;

    let builder = ReportBuilder::new(config.report_settings.clone());
    let keep_days = config.report_settings.keep_days;
    if keep_days > 0 {
        match builder.cleanup_old_reports(keep_days) {
            Ok(0) => {}
            Ok(removed) => output.verbose(&format!("Removed {removed} report(s) older than {keep_days} days")),
            Err(e) => warn!("Report cleanup failed: {:#}", e),
        }
    }

    let report = builder.build(&summary, start, end);
    let report_path = builder.write(&report)?;

    print_summary(output, &report);
    output.key_value("Report:", &report_path.display().to_string(), false);

    if stop.load(Ordering::SeqCst) {
        output.warning("Run interrupted; the report covers only the files processed before the stop");
    }

    Ok(())
}

fn print_summary(output: &Output, report: &Report) {
    let summary = &report.summary;

    output.category("Summary");
    output.summary_stats("Total files:", summary.total_files);
    output.summary_stats("Unlocked:", summary.successful);
    output.summary_stats("Failed:", summary.failed);
    output.summary_stats("Skipped:", summary.skipped);
    output.key_value("Success rate:", &format!("{:.1}%", summary.success_rate), summary.failed == 0);
    output.key_value("Duration:", &report.report_info.duration_formatted, false);

    let failures: Vec<_> = report
        .details
        .iter()
        .filter(|r| r.status() == ProcessingStatus::Failed)
        .collect();
    if !failures.is_empty() {
        output.category("Failed files");
        for result in failures {
            output.action_result(result.source(), result.message(), false);
        }
    }

    output.blank_line();
    if summary.failed == 0 {
        output.success("All processable files were handled");
    } else {
        output.warning(&format!("{} file(s) could not be unlocked", summary.failed));
    }
}
