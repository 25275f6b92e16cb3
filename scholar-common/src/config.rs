//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "SCHOLAR_ROOT";

/// TOML configuration file contents
///
/// Every field is optional; absent values fall through to environment
/// variables or compiled defaults during resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding the database and debug artifacts
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub orchestrator: OrchestratorSection,
    pub fetch: FetchSection,
    pub research: ResearchSection,
    pub render: RenderSection,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by RUST_LOG)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// `[orchestrator]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorSection {
    pub batch_width: Option<usize>,
    pub enrichment_batch_size: Option<usize>,
    pub test_sample_size: Option<usize>,
    pub stale_job_minutes: Option<i64>,
    pub max_enrichment_attempts: Option<u32>,
    pub retry_base_minutes: Option<i64>,
}

/// `[fetch]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchSection {
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
    pub requests_per_second: Option<u32>,
}

/// `[research]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchSection {
    /// Base URL of the deep-research service
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub sources: Option<Vec<String>>,
    pub concurrency: Option<usize>,
}

/// `[render]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderSection {
    /// Base URL of the dynamic-content render service
    pub endpoint: Option<String>,
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config `root_folder`
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_config: Option<&TomlConfig>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(root) = toml_config.and_then(|c| c.root_folder.clone()) {
        return root;
    }

    default_root_folder()
}

/// Default configuration file path for the platform
///
/// `~/.config/scholar/<module>.toml` on Linux, the platform config dir elsewhere.
pub fn default_config_path(module_name: &str) -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("scholar").join(format!("{}.toml", module_name)))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("scholar"))
        .unwrap_or_else(|| PathBuf::from("./scholar_data"))
}

/// Load TOML configuration, returning defaults when the file does not exist
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No TOML config file, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_cli_argument_wins() {
        std::env::set_var("SCHOLAR_TEST_ROOT_A", "/from/env");
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let root = resolve_root_folder(Some("/from/cli"), "SCHOLAR_TEST_ROOT_A", Some(&toml));
        assert_eq!(root, PathBuf::from("/from/cli"));
        std::env::remove_var("SCHOLAR_TEST_ROOT_A");
    }

    #[test]
    #[serial]
    fn test_env_beats_toml() {
        std::env::set_var("SCHOLAR_TEST_ROOT_B", "/from/env");
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let root = resolve_root_folder(None, "SCHOLAR_TEST_ROOT_B", Some(&toml));
        assert_eq!(root, PathBuf::from("/from/env"));
        std::env::remove_var("SCHOLAR_TEST_ROOT_B");
    }

    #[test]
    #[serial]
    fn test_toml_used_without_env() {
        std::env::remove_var("SCHOLAR_TEST_ROOT_C");
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let root = resolve_root_folder(None, "SCHOLAR_TEST_ROOT_C", Some(&toml));
        assert_eq!(root, PathBuf::from("/from/toml"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("scholar-ingest.toml");

        let mut config = TomlConfig::default();
        config.orchestrator.batch_width = Some(4);
        config.research.sources = Some(vec!["openalex".to_string()]);

        write_toml_config(&config, &path).unwrap();
        let loaded = load_toml_config(&path).unwrap();

        assert_eq!(loaded.orchestrator.batch_width, Some(4));
        assert_eq!(loaded.research.sources, Some(vec!["openalex".to_string()]));
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[fetch]\ntimeout_secs = 5\n").unwrap();

        let config = load_toml_config(&path).unwrap();
        assert_eq!(config.fetch.timeout_secs, Some(5));
        assert_eq!(config.fetch.user_agent, None);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[orchestrator\nbatch_width = ").unwrap();

        assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
    }
}
