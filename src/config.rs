//! Configuration management for the module registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (REGISTRY__*)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! [paths]
//! modules_dir = "modules"
//! output_dir = "."
//!
//! [validation]
//! mode = "strict"
//! skip_content = false
//! save_report = true
//!
//! [github]
//! api_base = "https://api.github.com"
//! timeout_secs = 30
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::registry::OutputFiles;
use crate::report::BuildMode;

/// Environment variable consulted when no token is configured
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Main configuration for the module registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Input and output locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Validation settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// GitHub access
    #[serde(default)]
    pub github: GithubConfig,
}

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the `{author}/{module}` tree
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,

    /// Directory the artifacts are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_index_file")]
    pub index_file: String,

    #[serde(default = "default_dist_file")]
    pub dist_file: String,

    #[serde(default = "default_search_file")]
    pub search_file: String,

    #[serde(default = "default_report_file")]
    pub report_file: String,
}

/// Validation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Whether any error fails the build
    #[serde(default)]
    pub mode: BuildMode,

    /// Skip fetching and verifying module content
    #[serde(default)]
    pub skip_content: bool,

    /// Write a validation report next to the index
    #[serde(default)]
    pub save_report: bool,
}

/// GitHub access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Personal access token; falls back to `GITHUB_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Transport timeout per request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_index_file() -> String {
    "modules.json".to_string()
}

fn default_dist_file() -> String {
    "modules.min.json".to_string()
}

fn default_search_file() -> String {
    "search.json".to_string()
}

fn default_report_file() -> String {
    "validation-report.json".to_string()
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    "mlld-registry".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            modules_dir: default_modules_dir(),
            output_dir: default_output_dir(),
            index_file: default_index_file(),
            dist_file: default_dist_file(),
            search_file: default_search_file(),
            report_file: default_report_file(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl PathsConfig {
    /// Artifact locations for a build
    pub fn output_files(&self) -> OutputFiles {
        OutputFiles {
            dir: self.output_dir.clone(),
            index_file: self.index_file.clone(),
            dist_file: self.dist_file.clone(),
            search_file: self.search_file.clone(),
            report_file: self.report_file.clone(),
        }
    }
}

impl GithubConfig {
    /// Configured token, else `GITHUB_TOKEN`
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
            .filter(|t| !t.is_empty())
    }
}

impl RegistryConfig {
    /// Load configuration from the default locations, plus `config_path` if given
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["registry.toml", ".registry.toml", "config/registry.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "mlld", "registry") {
            let xdg_config = config_dir.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // REGISTRY__VALIDATION__MODE=best-effort
        builder = builder.add_source(
            Environment::with_prefix("REGISTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Problems that would make a build misbehave
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.paths.modules_dir.is_dir() {
            problems.push(format!(
                "modules_dir {} is not a directory",
                self.paths.modules_dir.display()
            ));
        }
        for (field, name) in [
            ("index_file", &self.paths.index_file),
            ("dist_file", &self.paths.dist_file),
            ("search_file", &self.paths.search_file),
            ("report_file", &self.paths.report_file),
        ] {
            if name.trim().is_empty() {
                problems.push(format!("{} must not be empty", field));
            }
        }
        if !(self.github.api_base.starts_with("https://") || self.github.api_base.starts_with("http://")) {
            problems.push(format!("github.api_base must be an http(s) URL: {}", self.github.api_base));
        }
        if self.github.timeout_secs == 0 {
            problems.push("github.timeout_secs must be greater than zero".to_string());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.paths.modules_dir, PathBuf::from("modules"));
        assert_eq!(config.validation.mode, BuildMode::Strict);
        assert!(!config.validation.skip_content);
        assert_eq!(config.github.timeout_secs, 30);
        assert_eq!(config.github.user_agent, "mlld-registry");
    }

    #[test]
    fn test_serialize_config() {
        let config = RegistryConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[paths]"));
        assert!(toml_str.contains("[validation]"));
        assert!(toml_str.contains("mode = \"strict\""));
        assert!(!toml_str.contains("token"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(
            &path,
            "[validation]\nmode = \"best-effort\"\nsave_report = true\n\n[github]\ntimeout_secs = 5\n",
        )
        .unwrap();

        let config = RegistryConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.validation.mode, BuildMode::BestEffort);
        assert!(config.validation.save_report);
        assert_eq!(config.github.timeout_secs, 5);
        assert_eq!(config.paths.index_file, "modules.json");
    }

    #[test]
    fn test_validate_flags_problems() {
        let mut config = RegistryConfig::default();
        config.paths.modules_dir = PathBuf::from("/nonexistent/modules");
        config.paths.search_file = String::new();
        config.github.timeout_secs = 0;

        let problems = config.validate();
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_output_files() {
        let mut config = RegistryConfig::default();
        config.paths.output_dir = PathBuf::from("dist");
        let files = config.paths.output_files();
        assert_eq!(files.index_path(), PathBuf::from("dist/modules.json"));
        assert_eq!(files.report_path(), PathBuf::from("dist/validation-report.json"));
    }
}
