//! Environment check
//!
//! Confirms the configuration loads and validates, and that the external
//! RAR tool can be found.

use crate::cli::Output;
use crate::config::UnlockerConfig;
use crate::unlock::rar::resolve_unrar;
use anyhow::Result;
use std::path::Path;

pub fn execute(config_path: Option<&Path>, output: &Output) -> Result<()> {
    output.header("🔍 Checking environment");

    let config = UnlockerConfig::load(config_path)?;
    match config.validate() {
        Ok(()) => output.status_indicator("CONFIG", "configuration is valid", true),
        Err(e) => {
            output.status_indicator("CONFIG", &e.to_string(), false);
            return Err(e);
        }
    }

    match resolve_unrar(config.external_tools.unrar_path.as_deref()) {
        Ok(path) => output.status_indicator("UNRAR", &path.display().to_string(), true),
        Err(e) => {
            // Only RAR files depend on it
            output.status_indicator("UNRAR", &format!("{e:#}"), false);
            output.indent("RAR archives will fail until unrar is installed or external_tools.unrar_path is set");
        }
    }

    output.blank_line();
    output.success("Ready to unlock files");
    Ok(())
}
