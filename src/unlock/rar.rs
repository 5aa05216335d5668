//! RAR archives through the external `unrar` tool

use anyhow::{Context, Result, bail};
use std::ffi::OsString;
use std::fs;
use std::path::{MAIN_SEPARATOR_STR, Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;

use super::{Attempt, FormatHandler, OutputLayout};

const EXIT_CRC_ERROR: i32 = 3;
const EXIT_BAD_PASSWORD: i32 = 11;

/// Locate `unrar`: the configured path if given, otherwise a PATH lookup
pub fn resolve_unrar(configured: Option<&Path>) -> Result<PathBuf> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => which::which(path)
            .with_context(|| format!("configured unrar tool not found: {}", path.display())),
        None => which::which("unrar")
            .context("unrar tool not found on PATH (set external_tools.unrar_path)"),
    }
}

#[derive(Debug, Default, Clone)]
pub struct RarHandler {
    unrar_path: Option<PathBuf>,
}

impl RarHandler {
    pub fn new(unrar_path: Option<PathBuf>) -> Self {
        Self { unrar_path }
    }
}

/// An archive paired with the tool that reads it
#[derive(Debug)]
pub struct RarArchive {
    tool: PathBuf,
    path: PathBuf,
}

enum Verdict {
    Accepted,
    PasswordRejected,
    /// Exit 3: a wrong password on RAR4, or plain damage
    ChecksumFailed(String),
}

impl RarArchive {
    fn run(&self, args: &[OsString]) -> Result<Output> {
        Command::new(&self.tool)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.tool.display()))
    }

    /// `unrar t`: test the archive with a password, or with none
    fn test(&self, password: Option<&str>) -> Result<Verdict> {
        let output = self.run(&[
            "t".into(),
            password_arg(password),
            "-idq".into(),
            "--".into(),
            self.path.clone().into_os_string(),
        ])?;
        verdict(&output)
    }

    fn extract(&self, password: Option<&str>, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;

        let mut target = dest.as_os_str().to_owned();
        target.push(MAIN_SEPARATOR_STR);
        let output = self.run(&[
            "x".into(),
            "-o+".into(),
            "-y".into(),
            password_arg(password),
            "-idq".into(),
            "--".into(),
            self.path.clone().into_os_string(),
            target,
        ])?;

        match verdict(&output)? {
            Verdict::Accepted => Ok(()),
            Verdict::PasswordRejected => bail!("unrar rejected the password during extraction"),
            Verdict::ChecksumFailed(stderr) => bail!("unrar reported a checksum error during extraction: {stderr}"),
        }
    }
}

impl FormatHandler for RarHandler {
    type Handle = RarArchive;
    type Key = String;

    const KIND: &'static str = "RAR";
    const LAYOUT: OutputLayout = OutputLayout::Directory;

    fn open(&self, source: &Path) -> Result<RarArchive> {
        if !source.is_file() {
            bail!("{} is not a readable file", source.display());
        }
        let tool = resolve_unrar(self.unrar_path.as_deref())?;
        debug!("Using {} for {}", tool.display(), source.display());
        Ok(RarArchive {
            tool,
            path: source.to_path_buf(),
        })
    }

    /// Without a password a checksum error cannot be a wrong password
    fn is_encrypted(&self, archive: &mut RarArchive) -> Result<bool> {
        match archive.test(None)? {
            Verdict::Accepted => Ok(false),
            Verdict::PasswordRejected => Ok(true),
            Verdict::ChecksumFailed(stderr) => bail!("archive is damaged (unrar checksum error): {stderr}"),
        }
    }

    fn try_password(&self, archive: &mut RarArchive, password: &str) -> Result<Attempt<String>> {
        Ok(match archive.test(Some(password))? {
            Verdict::Accepted => Attempt::Unlocked(password.to_string()),
            Verdict::PasswordRejected | Verdict::ChecksumFailed(_) => Attempt::Rejected,
        })
    }

    fn write_plain(&self, archive: &mut RarArchive, _source: &Path, dest: &Path) -> Result<()> {
        archive.extract(None, dest)
    }

    fn write_unlocked(&self, archive: &mut RarArchive, password: String, dest: &Path) -> Result<()> {
        archive.extract(Some(&password), dest)
    }
}

/// `-p<password>`, or `-p-` to never prompt
fn password_arg(password: Option<&str>) -> OsString {
    match password {
        Some(password) => format!("-p{password}").into(),
        None => "-p-".into(),
    }
}

fn verdict(output: &Output) -> Result<Verdict> {
    match output.status.code() {
        Some(0) => Ok(Verdict::Accepted),
        Some(EXIT_BAD_PASSWORD) => Ok(Verdict::PasswordRejected),
        Some(EXIT_CRC_ERROR) => Ok(Verdict::ChecksumFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
        code => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
            bail!("unrar exited with {}: {}", code, stderr.trim())
        }
    }
}
