//! Integration tests for the unlocker CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::unstable::write::FileOptionsExt;

fn unlocker() -> Command {
    let mut cmd = Command::cargo_bin("unlocker").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])], password: Option<&str>) {
    let mut writer = zip::ZipWriter::new(fs::File::create(path).unwrap());
    let mut options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    if let Some(password) = password {
        options = options.with_deprecated_encryption(password.as_bytes());
    }
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Workspace with `input/`, and an unlocker.toml listing `passwords`
fn workspace(passwords: &[&str]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("input")).unwrap();
    let list = passwords
        .iter()
        .map(|p| format!("\"{p}\""))
        .collect::<Vec<_>>()
        .join(", ");
    fs::write(
        temp_dir.path().join("unlocker.toml"),
        format!("passwords = [{list}]\n\n[report_settings]\nformat = \"json\"\n"),
    )
    .unwrap();
    temp_dir
}

fn only_report(dir: &Path) -> serde_json::Value {
    let reports: Vec<_> = fs::read_dir(dir.join("report"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(reports.len(), 1);
    serde_json::from_str(&fs::read_to_string(&reports[0]).unwrap()).unwrap()
}

#[test]
fn test_cli_help() {
    unlocker()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("password-protected Excel workbooks"));
}

#[test]
fn test_cli_version() {
    unlocker()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("unlocker"));
}

#[test]
fn test_version_command_lists_formats() {
    unlocker()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("unlocker v{}", env!("CARGO_PKG_VERSION"))))
        .stdout(predicate::str::contains("XLS RC4/CryptoAPI"));
}

#[test]
fn test_invalid_subcommand() {
    unlocker()
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_run_without_passwords_fails() {
    let temp_dir = workspace(&[]);

    unlocker()
        .current_dir(temp_dir.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no passwords configured"));
    assert!(!temp_dir.path().join("output").exists());
}

#[test]
fn test_run_with_missing_input_fails() {
    let temp_dir = workspace(&["secret"]);

    unlocker()
        .current_dir(temp_dir.path())
        .args(["run", "--input", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_run_copies_unencrypted_workbook() {
    let temp_dir = workspace(&["secret"]);
    let source = temp_dir.path().join("input/plain.xlsx");
    write_zip(&source, &[("[Content_Types].xml", b"<Types/>")], None);

    unlocker()
        .current_dir(temp_dir.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Unlocked:"));

    let copied = temp_dir.path().join("output/unlocked_plain.xlsx");
    assert_eq!(fs::read(copied).unwrap(), fs::read(&source).unwrap());

    let report = only_report(temp_dir.path());
    assert_eq!(report["summary"]["successful"], 1);
    assert_eq!(report["details"][0]["message"], "unencrypted, copied directly");
}

#[test]
fn test_run_extracts_encrypted_zip_with_cli_password() {
    let temp_dir = workspace(&["wrong"]);
    write_zip(
        &temp_dir.path().join("input/bundle.zip"),
        &[("a.txt", b"alpha"), ("nested/b.txt", b"beta")],
        Some("hunter2"),
    );

    unlocker()
        .current_dir(temp_dir.path())
        .args(["run", "--password", "hunter2"])
        .assert()
        .success();

    let out = temp_dir.path().join("output/unlocked_bundle");
    assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(out.join("nested/b.txt")).unwrap(), b"beta");

    let report = only_report(temp_dir.path());
    assert_eq!(report["details"][0]["message"], "extracted with password #2 of 2");
}

#[test]
fn test_run_reports_failed_and_skipped_files() {
    let temp_dir = workspace(&["wrong"]);
    write_zip(
        &temp_dir.path().join("input/locked.zip"),
        &[("a.txt", b"alpha")],
        Some("hunter2"),
    );
    fs::write(temp_dir.path().join("input/notes.txt"), "hello").unwrap();

    unlocker()
        .current_dir(temp_dir.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("could not be unlocked"));

    let report = only_report(temp_dir.path());
    assert_eq!(report["summary"]["total_files"], 2);
    assert_eq!(report["summary"]["failed"], 1);
    assert_eq!(report["summary"]["skipped"], 1);
    assert_eq!(report["statistics"]["by_error_type"]["password_error"], 1);
    assert!(!temp_dir.path().join("output/unlocked_locked").exists());
}

#[test]
fn test_report_format_flag_overrides_config() {
    let temp_dir = workspace(&["secret"]);

    unlocker()
        .current_dir(temp_dir.path())
        .args(["run", "--report-format", "csv", "--report-dir", "csv-reports"])
        .assert()
        .success();

    let reports: Vec<_> = fs::read_dir(temp_dir.path().join("csv-reports"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].extension().unwrap(), "csv");
}

#[test]
fn test_config_validate() {
    let valid = workspace(&["secret"]);
    unlocker()
        .current_dir(valid.path())
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));

    let empty = workspace(&[]);
    unlocker()
        .current_dir(empty.path())
        .args(["config", "validate"])
        .assert()
        .failure();
}

#[test]
fn test_config_show_masks_passwords() {
    let temp_dir = workspace(&["topsecret"]);

    unlocker()
        .current_dir(temp_dir.path())
        .args(["config", "show", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("********"))
        .stdout(predicate::str::contains("topsecret").not());
}

#[test]
fn test_explicit_config_file_must_exist() {
    let temp_dir = TempDir::new().unwrap();

    unlocker()
        .current_dir(temp_dir.path())
        .args(["--config", "missing.toml", "config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
