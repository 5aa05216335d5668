//! Excel workbooks (.xlsx, .xlsm, .xls)
//!
//! The container is sniffed from its first bytes, not its extension:
//! a ZIP signature is a plain OOXML workbook, an OLE compound file is either
//! an encrypted OOXML package or a legacy BIFF workbook, which may carry RC4
//! encryption.

use anyhow::{Context, Result, bail};
use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::biff::{LegacyWorkbook, find_filepass};
use super::offcrypto::EncryptionInfo;
use super::{Attempt, FormatHandler, OutputLayout};
use crate::utils::panic_message;

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";
const CFB_SIGNATURE: &[u8] = &[0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];

const ENCRYPTION_INFO_STREAM: &str = "/EncryptionInfo";
const ENCRYPTED_PACKAGE_STREAM: &str = "/EncryptedPackage";
const BIFF_STREAMS: &[&str] = &["/Workbook", "/Book"];

/// An opened workbook, read fully into memory
#[derive(Debug)]
pub enum Workbook {
    /// OOXML package or legacy workbook without protection
    Plain,
    /// OOXML package inside an OLE container
    Encrypted { info: EncryptionInfo, package: Vec<u8> },
    /// BIFF workbook carrying an RC4 FILEPASS record
    LegacyEncrypted(LegacyWorkbook),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExcelHandler;

impl FormatHandler for ExcelHandler {
    type Handle = Workbook;
    /// The decrypted file, ready to write
    type Key = Vec<u8>;

    const KIND: &'static str = "Excel";
    const LAYOUT: OutputLayout = OutputLayout::File;

    fn open(&self, source: &Path) -> Result<Workbook> {
        let bytes = fs::read(source)
            .with_context(|| format!("failed to read {}", source.display()))?;
        Workbook::parse(bytes)
    }

    fn is_encrypted(&self, workbook: &mut Workbook) -> Result<bool> {
        match workbook {
            Workbook::Plain => Ok(false),
            Workbook::Encrypted { .. } | Workbook::LegacyEncrypted(_) => Ok(true),
        }
    }

    fn try_password(&self, workbook: &mut Workbook, password: &str) -> Result<Attempt<Vec<u8>>> {
        match workbook {
            Workbook::Plain => bail!("workbook is not encrypted"),
            Workbook::Encrypted { info, package } => {
                let Some(key) = info.unlock_key(password)? else {
                    return Ok(Attempt::Rejected);
                };
                let Some(decrypted) = guarded(|| info.decrypt_package(&key, package))? else {
                    return Ok(Attempt::Rejected);
                };
                if !decrypted.starts_with(ZIP_SIGNATURE) {
                    debug!("Decrypted package is not a ZIP container");
                    return Ok(Attempt::Rejected);
                }
                Ok(Attempt::Unlocked(decrypted))
            }
            Workbook::LegacyEncrypted(legacy) => {
                Ok(match guarded(|| legacy.unlock(password))?.flatten() {
                    Some(decrypted) => Attempt::Unlocked(decrypted),
                    None => Attempt::Rejected,
                })
            }
        }
    }

    fn write_plain(&self, _workbook: &mut Workbook, source: &Path, dest: &Path) -> Result<()> {
        fs::copy(source, dest)
            .with_context(|| format!("failed to copy {} to {}", source.display(), dest.display()))?;
        Ok(())
    }

    fn write_unlocked(&self, _workbook: &mut Workbook, package: Vec<u8>, dest: &Path) -> Result<()> {
        let dir = dest.parent().unwrap_or(Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;
        temp.write_all(&package)
            .context("failed to write decrypted workbook")?;
        temp.persist(dest)
            .with_context(|| format!("failed to write {}", dest.display()))?;
        Ok(())
    }
}

impl Workbook {
    fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.starts_with(ZIP_SIGNATURE) {
            return Ok(Workbook::Plain);
        }
        if !bytes.starts_with(CFB_SIGNATURE) {
            bail!("not an Excel workbook (unrecognised file signature)");
        }

        let mut compound = cfb::CompoundFile::open(Cursor::new(bytes))
            .context("failed to read OLE compound file")?;

        if compound.is_stream(ENCRYPTION_INFO_STREAM) {
            let info = read_stream(&mut compound, ENCRYPTION_INFO_STREAM)?;
            let package = read_stream(&mut compound, ENCRYPTED_PACKAGE_STREAM)?;
            let info = EncryptionInfo::parse(&info)?;
            return Ok(Workbook::Encrypted { info, package });
        }

        if let Some(name) = BIFF_STREAMS.iter().find(|name| compound.is_stream(name)) {
            let stream = read_stream(&mut compound, name)?;
            if find_filepass(&stream).is_some() {
                let container = compound.into_inner().into_inner();
                return LegacyWorkbook::new(container, name, stream).map(Workbook::LegacyEncrypted);
            }
        }

        Ok(Workbook::Plain)
    }
}

/// Run a decryption step, turning a panic on malformed input into `None`
fn guarded<T>(decrypt: impl FnOnce() -> Result<T>) -> Result<Option<T>> {
    match panic::catch_unwind(AssertUnwindSafe(decrypt)) {
        Ok(result) => result.map(Some),
        Err(payload) => {
            warn!("Decryption panicked: {}", panic_message(payload.as_ref()));
            Ok(None)
        }
    }
}

fn read_stream<F: Read + Seek>(compound: &mut cfb::CompoundFile<F>, name: &str) -> Result<Vec<u8>> {
    let mut stream = compound
        .open_stream(name)
        .with_context(|| format!("missing {} stream", name.trim_start_matches('/')))?;
    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .with_context(|| format!("failed to read {} stream", name.trim_start_matches('/')))?;
    Ok(buf)
}


#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::unlock::biff::testing::{record, workbook_stream};
    use crate::unlock::offcrypto::testing::{agile_encrypt, standard_encrypt};
    use zip::write::SimpleFileOptions;

    /// A small but valid .xlsx-shaped ZIP package
    pub(crate) fn plain_workbook() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(br#"<?xml version="1.0"?><Types/>"#).unwrap();
        writer.start_file("xl/workbook.xml", options).unwrap();
        writer.write_all(br#"<?xml version="1.0"?><workbook/>"#).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn compound_file(streams: &[(&str, &[u8])]) -> Vec<u8> {
        let mut compound = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        for (name, data) in streams {
            let mut stream = compound.create_stream(name).unwrap();
            stream.write_all(data).unwrap();
            stream.flush().unwrap();
        }
        compound.flush().unwrap();
        compound.into_inner().into_inner()
    }

    /// `plain` wrapped in Agile encryption under `password`
    pub(crate) fn encrypted_workbook(plain: &[u8], password: &str) -> Vec<u8> {
        let (info, package) = agile_encrypt(plain, password);
        compound_file(&[
            (ENCRYPTION_INFO_STREAM, info.as_slice()),
            (ENCRYPTED_PACKAGE_STREAM, package.as_slice()),
        ])
    }

    /// `plain` wrapped in Standard AES-128 encryption under `password`
    pub(crate) fn standard_workbook(plain: &[u8], password: &str) -> Vec<u8> {
        let (info, package) = standard_encrypt(plain, password);
        compound_file(&[
            (ENCRYPTION_INFO_STREAM, info.as_slice()),
            (ENCRYPTED_PACKAGE_STREAM, package.as_slice()),
        ])
    }

    /// A BIFF8 globals stream with BOF and EOF only
    pub(crate) fn legacy_workbook() -> Vec<u8> {
        let mut biff = record(0x0809, &[0x00, 0x06, 0x05, 0x00]);
        biff.extend(record(0x000a, &[]));
        compound_file(&[("/Workbook", biff.as_slice()), ("/SummaryInformation", b"summary".as_slice())])
    }

    /// An RC4-encrypted .xls and the Workbook stream it decrypts to
    pub(crate) fn encrypted_legacy_workbook(password: &str, cryptoapi: bool) -> (Vec<u8>, Vec<u8>) {
        let (stream, expected) = workbook_stream(password, cryptoapi);
        let container = compound_file(&[
            ("/Workbook", stream.as_slice()),
            ("/SummaryInformation", b"summary".as_slice()),
        ]);
        (container, expected)
    }

    /// A BIFF8 stream whose FILEPASS uses XOR obfuscation
    pub(crate) fn obfuscated_legacy_workbook() -> Vec<u8> {
        let mut biff = record(0x0809, &[0x00, 0x06, 0x05, 0x00]);
        biff.extend(record(0x002f, &[0x00, 0x00, 0x34, 0x12, 0x78, 0x56]));
        biff.extend(record(0x000a, &[]));
        compound_file(&[("/Workbook", biff.as_slice())])
    }

    /// Read a named stream back out of a compound file
    pub(crate) fn stream_of(container: &[u8], name: &str) -> Vec<u8> {
        let mut compound = cfb::CompoundFile::open(Cursor::new(container)).unwrap();
        read_stream(&mut compound, name).unwrap()
    }
}
