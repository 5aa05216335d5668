//! Format handlers and the per-file unlock state machine
//!
//! Every supported format implements [`FormatHandler`]. [`unlock_file`] drives
//! a handler through detection, the password trial and output writing, and
//! turns the outcome into a [`ProcessingResult`]. Handlers never see the batch;
//! the batch never sees a format.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::processor::ProcessingResult;

pub mod biff;
pub mod excel;
pub mod offcrypto;
pub mod rar;
pub mod strategy;
pub mod zip;

pub use self::excel::ExcelHandler;
pub use self::rar::RarHandler;
pub use self::strategy::{Attempt, PasswordTrial, TrialOutcome};
pub use self::zip::ZipHandler;

/// Prefix of every file or directory written to the output root
pub const OUTPUT_PREFIX: &str = "unlocked_";

pub const EXHAUSTED_MESSAGE: &str = "no configured password could decrypt this file";

/// Shape of a handler's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// `unlocked_<file name>`
    File,
    /// `unlocked_<file stem>/` holding the extracted tree
    Directory,
}

impl OutputLayout {
    pub fn destination(self, source: &Path, output_root: &Path) -> Result<PathBuf> {
        let name = match self {
            OutputLayout::File => source.file_name(),
            OutputLayout::Directory => source.file_stem(),
        }
        .with_context(|| format!("{} has no file name", source.display()))?;

        let mut unlocked = OsString::from(OUTPUT_PREFIX);
        unlocked.push(name);
        Ok(output_root.join(unlocked))
    }

    fn plain_message(self) -> &'static str {
        match self {
            OutputLayout::File => "unencrypted, copied directly",
            OutputLayout::Directory => "unencrypted, extracted directly",
        }
    }

    fn unlocked_message(self, attempt: usize, total: usize) -> String {
        let verb = match self {
            OutputLayout::File => "decrypted",
            OutputLayout::Directory => "extracted",
        };
        format!("{verb} with password #{attempt} of {total}")
    }
}

/// One file format: detect protection, test a password, write output.
///
/// `Handle` is the opened file; it is dropped when [`unlock_file`] returns,
/// on every path.
pub trait FormatHandler {
    type Handle;
    /// What a successful attempt hands to `write_unlocked`
    type Key;

    /// Format name used in failure messages
    const KIND: &'static str;
    const LAYOUT: OutputLayout;

    fn open(&self, source: &Path) -> Result<Self::Handle>;

    fn is_encrypted(&self, handle: &mut Self::Handle) -> Result<bool>;

    /// Test one password. A wrong password is `Ok(Attempt::Rejected)`; `Err`
    /// is reserved for failures that no other password could fix.
    fn try_password(&self, handle: &mut Self::Handle, password: &str) -> Result<Attempt<Self::Key>>;

    fn write_plain(&self, handle: &mut Self::Handle, source: &Path, dest: &Path) -> Result<()>;

    fn write_unlocked(&self, handle: &mut Self::Handle, key: Self::Key, dest: &Path) -> Result<()>;
}

/// Process one file with `handler`, never returning an error.
pub fn unlock_file<H: FormatHandler>(
    handler: &H,
    source: &Path,
    output_root: &Path,
    trial: &PasswordTrial<'_>,
) -> ProcessingResult {
    match try_unlock(handler, source, output_root, trial) {
        Ok(result) => result,
        Err(e) => ProcessingResult::failed(source, format!("failed to process {} file: {e:#}", H::KIND)),
    }
}

fn try_unlock<H: FormatHandler>(
    handler: &H,
    source: &Path,
    output_root: &Path,
    trial: &PasswordTrial<'_>,
) -> Result<ProcessingResult> {
    let dest = H::LAYOUT.destination(source, output_root)?;
    let mut handle = handler.open(source)?;

    if !handler.is_encrypted(&mut handle)? {
        debug!("{} is not encrypted", source.display());
        write_guarded(&dest, || handler.write_plain(&mut handle, source, &dest))?;
        return Ok(ProcessingResult::success(source, &dest, H::LAYOUT.plain_message()));
    }

    match trial.run(|password| handler.try_password(&mut handle, password))? {
        TrialOutcome::Unlocked { value, attempt } => {
            debug!("{} unlocked on attempt {}", source.display(), attempt);
            write_guarded(&dest, || handler.write_unlocked(&mut handle, value, &dest))?;
            Ok(ProcessingResult::success(
                source,
                &dest,
                H::LAYOUT.unlocked_message(attempt, trial.len()),
            ))
        }
        TrialOutcome::Exhausted { attempts } => {
            debug!("{}: all {} passwords rejected", source.display(), attempts);
            Ok(ProcessingResult::failed(source, EXHAUSTED_MESSAGE))
        }
    }
}

/// Run `write` and remove whatever it left at `dest` if it fails.
fn write_guarded(dest: &Path, write: impl FnOnce() -> Result<()>) -> Result<()> {
    let result = write();
    if result.is_err() {
        remove_partial_output(dest);
    }
    result
}

fn remove_partial_output(dest: &Path) {
    let removed = if dest.is_dir() {
        fs::remove_dir_all(dest)
    } else if dest.exists() {
        fs::remove_file(dest)
    } else {
        return;
    };

    match removed {
        Ok(()) => warn!("Removed partial output {}", dest.display()),
        Err(e) => warn!("Failed to remove partial output {}: {}", dest.display(), e),
    }
}
