//! Cross command - reports flows newly reachable through a package's
//! dependencies

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use rayon::prelude::*;
use tracing::{info, warn};
use trustflow_core::config::Config;
use trustflow_core::{CrossPackageDiff, CrossPackageOptions, VersionPair, analyze_version_pair};
use walkdir::{DirEntry, WalkDir};

use super::{Outcome, load_config_near};
use crate::output::OutputFormat;
use crate::output::json::JsonFormatter;
use crate::output::pretty::PrettyFormatter;

#[derive(Args, Debug)]
pub struct CrossArgs {
    /// Version-pair JSON file, or a directory of them
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    pub format: OutputFormat,
}

/// Results of one `cross` run, including the pairs that produced none.
#[derive(Debug, Default)]
struct CrossReport {
    results: Vec<(String, Option<CrossPackageDiff>)>,
    unreadable: Vec<PathBuf>,
}

impl CrossReport {
    /// Pairs that could not be read or whose root package is missing.
    fn incomplete(&self) -> usize {
        self.unreadable.len() + self.results.iter().filter(|(_, d)| d.is_none()).count()
    }

    fn newly_reachable(&self) -> bool {
        self.results
            .iter()
            .any(|(_, diff)| diff.as_ref().is_some_and(|d| !d.is_empty()))
    }

    fn total(&self) -> usize {
        self.unreadable.len() + self.results.len()
    }
}

impl CrossArgs {
    pub fn run(&self) -> Result<Outcome> {
        let config = load_config_near(&self.path)?;
        let report = self.analyze(&config)?;

        if report.total() == 0 {
            println!("No version-pair files found.");
            return Ok(Outcome::Clean);
        }

        match self.format {
            OutputFormat::Json => println!(
                "{}",
                JsonFormatter::new().format_cross(&report.results, &self.path.to_string_lossy())
            ),
            OutputFormat::Pretty => {
                let formatter = PrettyFormatter::new();
                for (package, diff) in &report.results {
                    println!("{}", formatter.format_cross(package, diff.as_ref()));
                }
            }
        }

        check_complete(&report)?;
        Ok(Outcome::from_flagged(report.newly_reachable()))
    }

    fn analyze(&self, config: &Config) -> Result<CrossReport> {
        let files = discover_pairs(&self.path)?;
        let options = CrossPackageOptions::from(&config.cross_package);

        let loaded: Vec<(PathBuf, Result<VersionPair>)> = files
            .into_par_iter()
            .map(|file| {
                let pair = load_pair(&file);
                (file, pair)
            })
            .collect();

        let mut report = CrossReport::default();
        let mut pairs = Vec::new();
        for (file, pair) in loaded {
            match pair {
                Ok(pair) => pairs.push(pair),
                Err(err) => {
                    warn!(file = %file.display(), "Unreadable version pair: {:#}", err);
                    report.unreadable.push(file);
                }
            }
        }

        report.results = pairs
            .par_iter()
            .map(|pair| {
                (
                    pair.package_name.clone(),
                    analyze_version_pair(pair, &options),
                )
            })
            .collect();
        report.results.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            pairs = report.total(),
            incomplete = report.incomplete(),
            "Analyzed version pairs"
        );
        Ok(report)
    }
}

/// An incomplete run must not read as "nothing newly reachable".
fn check_complete(report: &CrossReport) -> Result<()> {
    let incomplete = report.incomplete();
    if incomplete > 0 {
        anyhow::bail!(
            "{} of {} version pairs could not be analyzed",
            incomplete,
            report.total()
        );
    }
    Ok(())
}

fn load_pair(path: &Path) -> Result<VersionPair> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read version pair '{}'", path.display()))?;
    VersionPair::from_json(&content)
        .with_context(|| format!("Invalid version pair '{}'", path.display()))
}

fn discover_pairs(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        anyhow::bail!("Path does not exist: {}", path.display());
    }

    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_json_file(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();

    Ok(files)
}

fn is_json_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAIR: &str = r#"{
        "package_name": "app",
        "before": {
            "data": {
                "app": {"schema_version": 1, "entries": []}
            }
        },
        "after": {
            "data": {
                "app": {"schema_version": 1, "entries": [
                    {"source": ":caller", "target": "dep", "witnesses": []}
                ]},
                "dep": {"schema_version": 1, "entries": [
                    {"source": ":caller", "target": "http", "witnesses": []}
                ]}
            }
        }
    }"#;

    #[test]
    fn discovers_json_files_recursively() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::create_dir(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("nested/b.json"), "{}").unwrap();
        fs::write(dir.path().join(".cache/c.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = discover_pairs(dir.path()).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.json"));
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(discover_pairs(Path::new("/nonexistent/pairs")).is_err());
    }

    fn args(path: &Path) -> CrossArgs {
        CrossArgs {
            path: path.to_path_buf(),
            format: OutputFormat::Json,
        }
    }

    #[test]
    fn analyzes_pairs_in_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.json"), PAIR).unwrap();

        let report = args(dir.path()).analyze(&Config::default()).unwrap();

        assert_eq!(report.results.len(), 1);
        let (package, diff) = &report.results[0];
        assert_eq!(package, "app");
        let diff = diff.as_ref().unwrap();
        assert!(diff.caller_input.contains("dep"));
        assert!(diff.caller_input.contains("http"));
        assert!(report.newly_reachable());
        assert!(check_complete(&report).is_ok());
    }

    #[test]
    fn unreadable_pairs_make_the_run_incomplete() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.json"), PAIR).unwrap();
        fs::write(dir.path().join("broken.json"), "not json").unwrap();

        let report = args(dir.path()).analyze(&Config::default()).unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.unreadable.len(), 1);
        assert_eq!(report.incomplete(), 1);
        let err = check_complete(&report).unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
    }

    #[test]
    fn missing_root_package_makes_the_run_incomplete() {
        let dir = tempdir().unwrap();
        let pair = r#"{"package_name": "app", "before": {}, "after": {}}"#;
        fs::write(dir.path().join("app.json"), pair).unwrap();

        let args = args(dir.path());
        let report = args.analyze(&Config::default()).unwrap();

        assert!(!report.newly_reachable());
        assert_eq!(report.incomplete(), 1);
        assert!(args.run().is_err());
    }
}
