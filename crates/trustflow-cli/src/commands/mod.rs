//! CLI command implementations

pub mod cross;
pub mod diff;
pub mod init;
pub mod relations;

pub use cross::CrossArgs;
pub use diff::DiffArgs;
pub use init::InitArgs;
pub use relations::RelationsArgs;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tracing::debug;
use trustflow_core::config::{Config, load_config_or_default_with_warnings};
use trustflow_core::{EntryMetadata, ObjectGraph};

/// What a successful command found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    /// Flagged relations or newly reachable flows.
    Flagged,
}

impl Outcome {
    pub fn from_flagged(flagged: bool) -> Self {
        if flagged {
            Outcome::Flagged
        } else {
            Outcome::Clean
        }
    }
}

pub const EXIT_FLAGGED: u8 = 1;

/// Exit status when a command failed or its analysis is incomplete.
pub const EXIT_ERROR: u8 = 2;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the trust-domain relation map of one package version
    Relations(RelationsArgs),

    /// Flag relations that a package update newly introduces
    Diff(DiffArgs),

    /// Report flows newly reachable across a package's dependencies
    Cross(CrossArgs),

    /// Initialize Trustflow configuration in current directory
    Init(InitArgs),
}

pub fn load_graph(path: &Path) -> Result<ObjectGraph> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read object graph '{}'", path.display()))?;
    let graph = ObjectGraph::from_json(&content)
        .with_context(|| format!("Invalid object graph '{}'", path.display()))?;
    debug!(
        path = %path.display(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "Loaded object graph"
    );
    Ok(graph)
}

pub fn load_metadata(path: Option<&Path>) -> Result<EntryMetadata> {
    let Some(path) = path else {
        return Ok(EntryMetadata::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read entry metadata '{}'", path.display()))?;
    EntryMetadata::from_json(&content)
        .with_context(|| format!("Invalid entry metadata '{}'", path.display()))
}

/// Loads `trustflow.toml` from the directory holding `input` or one of its
/// ancestors, printing any warnings. A malformed file is an error.
pub fn load_config_near(input: &Path) -> Result<Config> {
    let start = config_dir(input);
    let result = load_config_or_default_with_warnings(&start)?;
    for warning in &result.warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
    Ok(result.config)
}

fn config_dir(input: &Path) -> PathBuf {
    if input.is_dir() {
        return input.to_path_buf();
    }
    match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_of_bare_file_is_current_directory() {
        assert_eq!(config_dir(Path::new("graph.json")), PathBuf::from("."));
        assert_eq!(
            config_dir(Path::new("before/graph.json")),
            PathBuf::from("before")
        );
    }

    #[test]
    fn missing_metadata_defaults_to_empty() {
        let metadata = load_metadata(None).unwrap();
        assert!(metadata.exported_objects.is_empty());
        assert!(metadata.lifecycle_scripts.is_none());
    }

    #[test]
    fn malformed_config_near_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("trustflow.toml"), "[analysis\nconsolidate = true").unwrap();

        let err = load_config_near(&dir.path().join("graph.json")).unwrap_err();

        assert!(format!("{:#}", err).contains("trustflow.toml"));
    }

    #[test]
    fn load_graph_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        fs::write(&path, "{\"nodes\": [").unwrap();

        let err = load_graph(&path).unwrap_err();

        assert!(format!("{:#}", err).contains("graph.json"));
    }
}
