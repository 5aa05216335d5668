//! Version command implementation

use crate::cli::Output;
use crate::{PKG_DESCRIPTION, PKG_NAME, VERSION};
use anyhow::Result;

/// Execute the version command
pub fn execute(output: &Output) -> Result<()> {
    let authors = env!("CARGO_PKG_AUTHORS");

    output.header("🔓 Unlocker Version Information");

    output.status_indicator("VERSION", &format!("{} v{}", PKG_NAME, VERSION), true);
    output.blank_line();

    output.category("About");
    output.key_value("Description:", PKG_DESCRIPTION, false);
    output.key_value("Authors:", authors, false);
    output.blank_line();

    output.category("Supported formats");
    output.key_value("Excel:", "OOXML Agile/Standard, XLS RC4/CryptoAPI", false);
    output.key_value("ZIP:", "ZipCrypto and AES entries", false);
    output.key_value("RAR:", "via the external unrar tool", false);
    output.blank_line();

    output.category("Build Information");
    output.key_value("Rust edition:", "2024", false);
    output.key_value("Target:", std::env::consts::ARCH, false);
    output.key_value("Profile:", if cfg!(debug_assertions) { "debug" } else { "release" }, false);

    output.blank_line();
    output.success("💡 Run 'unlocker --help' for usage information");

    Ok(())
}
