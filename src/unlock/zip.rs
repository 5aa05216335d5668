//! ZIP archives: ZipCrypto and WinZip AES protected entries

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use super::{Attempt, FormatHandler, OutputLayout};

#[derive(Debug, Default, Clone, Copy)]
pub struct ZipHandler;

impl FormatHandler for ZipHandler {
    type Handle = ZipArchive<File>;
    /// The validated password, reused for extraction
    type Key = String;

    const KIND: &'static str = "ZIP";
    const LAYOUT: OutputLayout = OutputLayout::Directory;

    fn open(&self, source: &Path) -> Result<ZipArchive<File>> {
        let file = File::open(source)
            .with_context(|| format!("failed to open {}", source.display()))?;
        ZipArchive::new(file).context("failed to read ZIP archive")
    }

    /// Protected when any file entry is encrypted
    fn is_encrypted(&self, archive: &mut ZipArchive<File>) -> Result<bool> {
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            if !entry.is_dir() && entry.encrypted() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Accept a password only if every entry decrypts and passes its CRC check.
    ///
    /// ZipCrypto's header check lets roughly one wrong password in 256
    /// through, so opening an entry alone proves nothing.
    fn try_password(&self, archive: &mut ZipArchive<File>, password: &str) -> Result<Attempt<String>> {
        for index in 0..archive.len() {
            let mut entry = match archive.by_index_decrypt(index, password.as_bytes()) {
                Ok(entry) => entry,
                Err(ZipError::InvalidPassword) => return Ok(Attempt::Rejected),
                Err(e) => return Err(e).with_context(|| format!("failed to read entry #{index}")),
            };
            if entry.is_dir() {
                continue;
            }
            if let Err(e) = io::copy(&mut entry, &mut io::sink()) {
                debug!("Entry {} failed validation: {}", entry.name(), e);
                return Ok(Attempt::Rejected);
            }
        }
        Ok(Attempt::Unlocked(password.to_string()))
    }

    fn write_plain(&self, archive: &mut ZipArchive<File>, _source: &Path, dest: &Path) -> Result<()> {
        extract(archive, dest, None)
    }

    fn write_unlocked(&self, archive: &mut ZipArchive<File>, password: String, dest: &Path) -> Result<()> {
        extract(archive, dest, Some(password.as_bytes()))
    }
}

fn extract(archive: &mut ZipArchive<File>, dest: &Path, password: Option<&[u8]>) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;

    for index in 0..archive.len() {
        let mut entry = match password {
            Some(password) => archive.by_index_decrypt(index, password)?,
            None => archive.by_index(index)?,
        };

        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping entry with unsafe path {:?}", entry.name());
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", entry.name()))?;
    }

    Ok(())
}
