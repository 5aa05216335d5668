use anyhow::{Context, Result, bail};
use figment::{Figment, providers::{Env, Format, Json, Toml, Yaml}};
use std::path::Path;
use tracing::debug;

use super::UnlockerConfig;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

/// Config files looked up in the working directory, first match wins
const CONFIG_CANDIDATES: &[&str] = &[
    "unlocker.toml",
    "unlocker.yaml",
    "unlocker.yml",
    "unlocker.json",
    "config/config.yaml",
];

const ENV_PREFIX: &str = "UNLOCKER_";

pub struct ConfigLoader {
    figment: Figment,
}

impl ConfigLoader {
    /// Layer defaults, one config file and the environment.
    ///
    /// An explicit `custom_config` must exist; without one the first
    /// candidate file found in the working directory is used, if any.
    pub fn load_with_custom_config(custom_config: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG));  // Embedded defaults

        if let Some(custom_path) = custom_config {
            if !custom_path.is_file() {
                bail!("configuration file not found: {}", custom_path.display());
            }
            debug!("Using config file {}", custom_path.display());
            figment = merge_file(figment, custom_path);
        } else if let Some(found) = CONFIG_CANDIDATES.iter().map(Path::new).find(|p| p.is_file()) {
            debug!("Using config file {}", found.display());
            figment = merge_file(figment, found);
        }

        // Environment variables always have highest priority
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Ok(ConfigLoader { figment })
    }

    /// Deserialize the merged layers into the typed configuration
    pub fn config(&self) -> Result<UnlockerConfig> {
        self.figment
            .extract()
            .context("invalid configuration")
    }

    /// Get a nested object/section as JSON
    pub fn get_section(&self, path: &str) -> Result<serde_json::Value> {
        Ok(self.figment.extract_inner(path)?)
    }
}

impl UnlockerConfig {
    /// Load the layered configuration without validating it
    pub fn load(custom_config: Option<&Path>) -> Result<Self> {
        ConfigLoader::load_with_custom_config(custom_config)?.config()
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("json") => figment.merge(Json::file(path)),
        Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_config_loading() {
        let loader = ConfigLoader::load_with_custom_config(None);
        assert!(loader.is_ok(), "Should load default config successfully");
    }

    #[test]
    fn test_get_section() {
        let loader = ConfigLoader::load_with_custom_config(None).unwrap();
        let section = loader.get_section("file_settings.supported_extensions").unwrap();
        assert_eq!(section["zip"][0], ".zip");
    }

    #[test]
    fn test_missing_custom_config_is_an_error() {
        let result = ConfigLoader::load_with_custom_config(Some(Path::new("non_existent.toml")));
        let err = result.err().expect("missing custom config should fail");
        assert!(err.to_string().contains("configuration file not found"));
    }

    #[test]
    fn test_custom_toml_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.toml");
        fs::write(
            &path,
            r#"
passwords = ["alpha", "beta"]

[report_settings]
format = "csv"
"#,
        )
        .unwrap();

        let config = UnlockerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.passwords, vec!["alpha", "beta"]);
        assert_eq!(config.report_settings.format, crate::reports::ReportFormat::Csv);
        // untouched keys keep their defaults
        assert_eq!(config.file_settings.max_file_size_mb, 500);
        assert!(config.report_settings.include_statistics);
    }

    #[test]
    fn test_custom_yaml_and_json() {
        let temp_dir = TempDir::new().unwrap();

        let yaml = temp_dir.path().join("custom.yaml");
        fs::write(&yaml, "passwords:\n  - fromyaml\nfile_settings:\n  max_file_size_mb: 7\n").unwrap();
        let config = UnlockerConfig::load(Some(&yaml)).unwrap();
        assert_eq!(config.passwords, vec!["fromyaml"]);
        assert_eq!(config.file_settings.max_file_size_mb, 7);

        let json = temp_dir.path().join("custom.json");
        fs::write(&json, r#"{"passwords": ["fromjson"], "report_settings": {"keep_days": 3}}"#).unwrap();
        let config = UnlockerConfig::load(Some(&json)).unwrap();
        assert_eq!(config.passwords, vec!["fromjson"]);
        assert_eq!(config.report_settings.keep_days, 3);
    }
}
