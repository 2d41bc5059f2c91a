//! Relations command - computes the relation map of one package version

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use trustflow_core::config::Config;
use trustflow_core::{AnalysisOptions, TrustDomainAnalyzer, VersionAnalysis};

use super::{Outcome, load_config_near, load_graph, load_metadata};
use crate::output::OutputFormat;
use crate::output::json::JsonFormatter;
use crate::output::pretty::PrettyFormatter;

#[derive(Args, Debug)]
pub struct RelationsArgs {
    /// Object graph JSON produced by the interpreter
    #[arg(value_name = "GRAPH")]
    pub graph: PathBuf,

    /// Entry metadata JSON (exported objects, lifecycle scripts)
    #[arg(long, value_name = "FILE")]
    pub metadata: Option<PathBuf>,

    /// Directory of the interpreter's modeled builtin packages
    #[arg(long, value_name = "DIR")]
    pub builtins_dir: Option<PathBuf>,

    /// Truncate domains at the first '.' and collapse local sub-domains
    #[arg(long)]
    pub consolidate: bool,

    /// Collapse local sub-domains into a single local domain
    #[arg(long)]
    pub aggregate_locals: bool,

    /// Show source locations of witness paths
    #[arg(long)]
    pub locations: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    pub format: OutputFormat,
}

impl RelationsArgs {
    pub fn run(&self) -> Result<Outcome> {
        let config = load_config_near(&self.graph)?;
        let analysis = self.analyze(&config)?;
        println!("{}", self.render(&analysis));
        Ok(Outcome::Clean)
    }

    /// Command-line flags only ever switch options on; the config supplies
    /// the rest.
    pub fn options(&self, config: &Config) -> AnalysisOptions {
        let mut options = AnalysisOptions::from(&config.analysis);
        if self.builtins_dir.is_some() {
            options.builtins_dir = self.builtins_dir.clone();
        }
        options.consolidate |= self.consolidate;
        options.aggregate_locals |= self.aggregate_locals;
        options
    }

    fn analyze(&self, config: &Config) -> Result<VersionAnalysis> {
        let graph = load_graph(&self.graph)?;
        let metadata = load_metadata(self.metadata.as_deref())?;
        let analysis = TrustDomainAnalyzer::with_options(self.options(config))
            .analyze(&graph, &metadata)
            .with_context(|| format!("Failed to analyze '{}'", self.graph.display()))?;
        info!(
            graph = %self.graph.display(),
            relations = analysis.relations().len(),
            "Computed relation map"
        );
        Ok(analysis)
    }

    fn render(&self, analysis: &VersionAnalysis) -> String {
        let locations = self.locations.then(|| analysis.code_locations());
        let analyzed_path = self.graph.to_string_lossy();
        match (self.format, locations.as_ref()) {
            (OutputFormat::Json, Some(locations)) => JsonFormatter::with_locations(locations)
                .format_relations(analysis.relations(), &analyzed_path),
            (OutputFormat::Json, None) => {
                JsonFormatter::new().format_relations(analysis.relations(), &analyzed_path)
            }
            (OutputFormat::Pretty, Some(locations)) => {
                PrettyFormatter::with_locations(locations).format_relations(analysis.relations())
            }
            (OutputFormat::Pretty, None) => {
                PrettyFormatter::new().format_relations(analysis.relations())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use trustflow_core::config::AnalysisConfig;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../tests/fixtures/export_leak")
            .join(name)
    }

    fn args() -> RelationsArgs {
        RelationsArgs {
            graph: fixture("graph.json"),
            metadata: Some(fixture("metadata.json")),
            builtins_dir: None,
            consolidate: false,
            aggregate_locals: false,
            locations: false,
            format: OutputFormat::Json,
        }
    }

    #[test]
    fn flags_extend_config_options() {
        let config = Config {
            analysis: AnalysisConfig {
                builtins_dir: Some(PathBuf::from("/opt/builtins")),
                consolidate: false,
                aggregate_locals: true,
            },
            ..Config::default()
        };
        let mut args = args();
        args.consolidate = true;

        let options = args.options(&config);

        assert!(options.consolidate);
        assert!(options.aggregate_locals);
        assert_eq!(options.builtins_dir, Some(PathBuf::from("/opt/builtins")));
    }

    #[test]
    fn renders_fixture_relations_as_json() {
        let args = args();
        let analysis = args.analyze(&Config::default()).unwrap();

        let output = args.render(&analysis);

        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        let relations = parsed["relations"].as_array().unwrap();
        assert!(
            relations
                .iter()
                .any(|r| r["source"] == ":caller" && r["target"] == "lib.readdir")
        );
    }

    #[test]
    fn missing_graph_is_an_error() {
        let mut args = args();
        args.graph = fixture("absent.json");

        assert!(args.analyze(&Config::default()).is_err());
    }
}
