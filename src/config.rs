//! Configuration management for the schema spec builder
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (schema-spec.toml)
//! - Environment variables (SCHEMA_SPEC__*, plus BASE_URL)
//!
//! ## Example config file (schema-spec.toml):
//! ```toml
//! base_url = "https://schemas.example.com/v1"
//!
//! [paths]
//! input_root = "docs"
//! output_root = "output"
//!
//! [files]
//! registry = "registry.json"
//!
//! [output]
//! format = "pretty"
//! checksums = true
//!
//! [validation]
//! check_metaschema = true
//! warn_missing_recommended = true
//!
//! [build]
//! parallel = false
//! max_ref_depth = 64
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SpecError};
use crate::identity::{validate_base_url, BASE_URL_VARIABLE};
use crate::resolver::DEFAULT_MAX_REF_DEPTH;

/// Main configuration for a build run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Base URL every `$id` is derived from
    #[serde(default)]
    pub base_url: Option<String>,

    /// Input and output locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Well-known input files
    #[serde(default)]
    pub files: FilesConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Validation settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Build execution settings
    #[serde(default)]
    pub build: BuildSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the modular schema sources
    #[serde(default = "default_input_root")]
    pub input_root: PathBuf,

    /// Where assembled documents are written
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Registry document, relative to the input root
    #[serde(default = "default_registry")]
    pub registry: String,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format (pretty or compact)
    #[serde(default)]
    pub format: OutputFormat,

    /// Write checksums.sha256 next to the outputs
    #[serde(default = "default_true")]
    pub checksums: bool,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

impl OutputFormat {
    /// Serialize `value`, always newline-terminated
    pub fn render(&self, value: &impl Serialize) -> serde_json::Result<String> {
        let mut text = match self {
            Self::Pretty => serde_json::to_string_pretty(value)?,
            Self::Compact => serde_json::to_string(value)?,
        };
        text.push('\n');
        Ok(text)
    }
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Check every output against the JSON Schema metaschema
    #[serde(default = "default_true")]
    pub check_metaschema: bool,

    /// Warn when an output has no `$schema` or `title`
    #[serde(default = "default_true")]
    pub warn_missing_recommended: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Build engine/version sets on separate threads
    #[serde(default)]
    pub parallel: bool,

    /// Longest `$ref` chain followed before giving up
    #[serde(default = "default_max_ref_depth")]
    pub max_ref_depth: usize,
}

// Default value functions
fn default_input_root() -> PathBuf {
    PathBuf::from("docs")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("output")
}

fn default_registry() -> String {
    "registry.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_ref_depth() -> usize {
    DEFAULT_MAX_REF_DEPTH
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_root: default_input_root(),
            output_root: default_output_root(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pretty,
            checksums: true,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_metaschema: true,
            warn_missing_recommended: true,
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            parallel: false,
            max_ref_depth: DEFAULT_MAX_REF_DEPTH,
        }
    }
}

impl BuildConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, with an optional explicit file on top of the defaults
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = [
            "schema-spec.toml",
            ".schema-spec.toml",
            "config/schema-spec.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "schema-spec", "schema-spec") {
            let xdg_config = config_dir.config_dir().join("schema-spec.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (SCHEMA_SPEC__*)
        builder = builder.add_source(
            Environment::with_prefix("SCHEMA_SPEC")
                .separator("__")
                .try_parsing(true),
        );

        builder = builder.set_override_option("base_url", std::env::var(BASE_URL_VARIABLE).ok())?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// The validated base URL, without a trailing `/`
    pub fn base_url(&self) -> Result<String> {
        match self.base_url.as_deref() {
            Some(raw) => validate_base_url(raw),
            None => Err(SpecError::Config {
                variable: BASE_URL_VARIABLE.to_string(),
                message: "no base URL configured (set BASE_URL or base_url in schema-spec.toml)"
                    .to_string(),
            }),
        }
    }

    pub fn input_root(&self) -> &Path {
        &self.paths.input_root
    }

    pub fn output_root(&self) -> &Path {
        &self.paths.output_root
    }

    pub fn registry_locator(&self) -> &str {
        &self.files.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = BuildConfig::default();
        assert_eq!(config.paths.input_root, PathBuf::from("docs"));
        assert_eq!(config.files.registry, "registry.json");
        assert_eq!(config.output.format, OutputFormat::Pretty);
        assert!(config.output.checksums);
        assert_eq!(config.build.max_ref_depth, 64);
        assert!(!config.build.parallel);
    }

    #[test]
    fn test_serialize_config() {
        let config = BuildConfig {
            base_url: Some("https://x.test/schemas".to_string()),
            ..BuildConfig::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("base_url = \"https://x.test/schemas\""));
        assert!(toml_str.contains("[paths]"));
        assert!(toml_str.contains("[build]"));
    }

    #[test]
    fn test_save_and_load_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut config = BuildConfig::default();
        config.output.format = OutputFormat::Compact;
        config.build.max_ref_depth = 8;
        config.save(&path).unwrap();

        let loaded = BuildConfig::load_from(path.to_str()).unwrap();
        assert_eq!(loaded.output.format, OutputFormat::Compact);
        assert_eq!(loaded.build.max_ref_depth, 8);
    }

    #[test]
    fn test_missing_base_url_is_config_error() {
        let config = BuildConfig::default();
        let err = config.base_url().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        match err {
            SpecError::Config { variable, .. } => assert_eq!(variable, "BASE_URL"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_output_format_render() {
        let value = serde_json::json!({ "a": 1 });
        assert_eq!(OutputFormat::Compact.render(&value).unwrap(), "{\"a\":1}\n");
        assert_eq!(OutputFormat::Pretty.render(&value).unwrap(), "{\n  \"a\": 1\n}\n");
    }
}
