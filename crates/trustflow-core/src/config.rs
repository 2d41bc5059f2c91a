//! Configuration loading and parsing for Trustflow
//!
//! Provides functionality to load and parse `trustflow.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::dataflow::{
    AnalysisOptions, CrossPackageOptions, DEFAULT_ALWAYS_EXCLUDE, DEFAULT_EXCLUDED, DiffPolicy,
};

pub const CONFIG_FILENAME: &str = "trustflow.toml";

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["analysis", "diff", "cross_package"];
const KNOWN_ANALYSIS_KEYS: &[&str] = &["builtins_dir", "consolidate", "aggregate_locals"];
const KNOWN_DIFF_KEYS: &[&str] = &["policy"];
const KNOWN_CROSS_PACKAGE_KEYS: &[&str] = &["excluded", "always_exclude"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid TOML in '{path}': {message}")]
    ParseError { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ConfigResult {
    pub config: Config,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub diff: DiffConfig,
    pub cross_package: CrossPackageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Directory of the interpreter's JavaScript-modeled builtin packages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builtins_dir: Option<PathBuf>,
    pub consolidate: bool,
    pub aggregate_locals: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiffConfig {
    pub policy: DiffPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrossPackageConfig {
    pub excluded: Vec<String>,
    pub always_exclude: Vec<String>,
}

impl Default for CrossPackageConfig {
    fn default() -> Self {
        Self {
            excluded: DEFAULT_EXCLUDED.iter().map(|s| s.to_string()).collect(),
            always_exclude: DEFAULT_ALWAYS_EXCLUDE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl From<&AnalysisConfig> for AnalysisOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            builtins_dir: config.builtins_dir.clone(),
            consolidate: config.consolidate,
            aggregate_locals: config.aggregate_locals,
        }
    }
}

impl From<&CrossPackageConfig> for CrossPackageOptions {
    fn from(config: &CrossPackageConfig) -> Self {
        Self {
            excluded: config.excluded.clone(),
            always_exclude: config.always_exclude.clone(),
        }
    }
}

impl Config {
    /// Renders the configuration as a `trustflow.toml` document.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }
        if !current.pop() {
            return None;
        }
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_config(path: &Path, content: &str) -> Result<Config, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = read_config(path)?;
    parse_config(path, &content)
}

pub fn load_config_with_warnings(path: &Path) -> Result<ConfigResult, ConfigError> {
    let content = read_config(path)?;
    let config = parse_config(path, &content)?;
    let warnings = detect_unknown_keys(&content);

    Ok(ConfigResult { config, warnings })
}

fn detect_unknown_keys(content: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    let table: toml::Table = match content.parse() {
        Ok(t) => t,
        Err(_) => return warnings,
    };

    let known_top: HashSet<&str> = KNOWN_TOP_LEVEL_KEYS.iter().copied().collect();
    for key in table.keys() {
        if !known_top.contains(key.as_str()) {
            warnings.push(format!("Unknown config option: '{}'", key));
        }
    }

    let sections = [
        ("analysis", KNOWN_ANALYSIS_KEYS),
        ("diff", KNOWN_DIFF_KEYS),
        ("cross_package", KNOWN_CROSS_PACKAGE_KEYS),
    ];
    for (section, known) in sections {
        if let Some(toml::Value::Table(values)) = table.get(section) {
            for key in values.keys() {
                if !known.contains(&key.as_str()) {
                    warnings.push(format!(
                        "Unknown config option in [{}]: '{}'",
                        section, key
                    ));
                }
            }
        }
    }

    warnings
}

/// Defaults apply only when no config file is found; a file that cannot be
/// read or parsed is an error.
pub fn load_config_or_default(start_dir: &Path) -> Result<Config, ConfigError> {
    load_config_or_default_with_warnings(start_dir).map(|result| result.config)
}

pub fn load_config_or_default_with_warnings(
    start_dir: &Path,
) -> Result<ConfigResult, ConfigError> {
    match find_config_file(start_dir) {
        Some(path) => {
            debug!(path = %path.display(), "Loading config");
            load_config_with_warnings(&path)
        }
        None => Ok(ConfigResult::default()),
    }
}
