//! Report serialization

use anyhow::{Result, anyhow};

use super::Report;

pub fn to_yaml(report: &Report) -> Result<String> {
    Ok(serde_yml::to_string(report)?)
}

pub fn to_json(report: &Report) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// One row per record: every detail, the summary fields and each breakdown
/// entry, so CSV carries the same data as the structured formats.
pub fn to_csv(report: &Report) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["record", "file", "status", "message", "output_path", "key", "value"])?;

    for detail in &report.details {
        writer.write_record([
            "detail",
            detail.source(),
            detail.status().as_str(),
            detail.message(),
            detail.output_path().unwrap_or(""),
            "",
            "",
        ])?;
    }

    let info = &report.report_info;
    let summary = &report.summary;
    let summary_fields = [
        ("generated_at", info.generated_at.clone()),
        ("start_time", info.start_time.clone()),
        ("end_time", info.end_time.clone()),
        ("duration_seconds", info.duration_seconds.to_string()),
        ("duration_formatted", info.duration_formatted.clone()),
        ("total_files", summary.total_files.to_string()),
        ("successful", summary.successful.to_string()),
        ("failed", summary.failed.to_string()),
        ("skipped", summary.skipped.to_string()),
        ("success_rate", summary.success_rate.to_string()),
    ];
    for (key, value) in &summary_fields {
        writer.write_record(["summary", "", "", "", "", *key, value.as_str()])?;
    }

    if let Some(stats) = &report.statistics {
        let breakdowns = [
            ("by_status", &stats.by_status),
            ("by_file_type", &stats.by_file_type),
            ("by_error_type", &stats.by_error_type),
        ];
        for (record, counts) in breakdowns {
            for (key, count) in counts {
                writer.write_record([record, "", "", "", "", key.as_str(), count.to_string().as_str()])?;
            }
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("failed to flush CSV report: {}", e.error()))?;
    Ok(String::from_utf8(bytes)?)
}
