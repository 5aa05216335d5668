//! Configuration command implementations
//!
//! Commands for inspecting and validating unlocker configuration.

use crate::cli::{ConfigCommands, Output};
use crate::config::UnlockerConfig;
use anyhow::{Context, Result};
use std::path::Path;

/// Serialization used by `config show`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

/// Execute config commands
pub fn execute(cmd: ConfigCommands, config_path: Option<&Path>, output: &Output) -> Result<()> {
    match cmd {
        ConfigCommands::Validate => validate(config_path, output),
        ConfigCommands::Show { format } => show(config_path, format),
    }
}

fn validate(config_path: Option<&Path>, output: &Output) -> Result<()> {
    output.header("✅ Validating Configuration");

    let config = UnlockerConfig::load(config_path)?;
    if let Err(e) = config.validate() {
        output.error(&format!("Configuration is invalid: {e}"));
        return Err(e);
    }

    output.success("Configuration is valid");
    output.blank_line();

    output.category("Configuration Summary");
    output.summary_stats("Passwords:", config.passwords.len());
    output.summary_stats("Excel extensions:", config.file_settings.supported_extensions.excel.len());
    output.summary_stats("ZIP extensions:", config.file_settings.supported_extensions.zip.len());
    output.summary_stats("RAR extensions:", config.file_settings.supported_extensions.rar.len());
    output.key_value(
        "Max file size:",
        &format!("{} MB", config.file_settings.max_file_size_mb),
        false,
    );
    output.key_value(
        "Report:",
        &format!(
            "{} in {}",
            config.report_settings.format.extension(),
            config.report_settings.directory.display()
        ),
        false,
    );

    Ok(())
}

fn show(config_path: Option<&Path>, format: ConfigFormat) -> Result<()> {
    let config = UnlockerConfig::load(config_path)?.masked();

    // Printed even with --quiet; the whole point is the document on stdout
    let rendered = match format {
        ConfigFormat::Toml => toml::to_string_pretty(&config).context("failed to render TOML")?,
        ConfigFormat::Json => {
            serde_json::to_string_pretty(&config).context("failed to render JSON")?
        }
        ConfigFormat::Yaml => serde_yml::to_string(&config).context("failed to render YAML")?,
    };
    println!("{}", rendered.trim_end());

    Ok(())
}
