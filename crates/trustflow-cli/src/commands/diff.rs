//! Diff command - flags relations a package update newly introduces

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use trustflow_core::config::Config;
use trustflow_core::{DiffPolicy, RelationMap, RelationSet, TrustDomainAnalyzer, diff};

use super::{Outcome, load_config_near, load_graph, load_metadata};
use crate::output::OutputFormat;
use crate::output::json::JsonFormatter;
use crate::output::pretty::PrettyFormatter;

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Object graph of the version before the update
    #[arg(value_name = "BEFORE")]
    pub before: PathBuf,

    /// Object graph of the version after the update
    #[arg(value_name = "AFTER")]
    pub after: PathBuf,

    /// Entry metadata of the version before the update
    #[arg(long, value_name = "FILE")]
    pub before_metadata: Option<PathBuf>,

    /// Entry metadata of the version after the update
    #[arg(long, value_name = "FILE")]
    pub after_metadata: Option<PathBuf>,

    /// Diff policy (broad, new-local, single-local); defaults to the config
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<DiffPolicy>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    pub format: OutputFormat,
}

impl DiffArgs {
    pub fn run(&self) -> Result<Outcome> {
        let config = load_config_near(&self.after)?;
        let policy = self.policy.unwrap_or(config.diff.policy);
        let flagged = self.flagged(&config, policy)?;

        let analyzed_path = format!("{} -> {}", self.before.display(), self.after.display());
        match self.format {
            OutputFormat::Json => println!(
                "{}",
                JsonFormatter::new().format_flagged(&flagged, policy, &analyzed_path)
            ),
            OutputFormat::Pretty => {
                println!("{}", PrettyFormatter::new().format_flagged(&flagged, policy))
            }
        }

        Ok(Outcome::from_flagged(!flagged.is_empty()))
    }

    fn flagged(&self, config: &Config, policy: DiffPolicy) -> Result<RelationSet> {
        let analyzer = TrustDomainAnalyzer::with_config(config);
        let (before, after) = rayon::join(
            || relation_map(&analyzer, &self.before, self.before_metadata.as_deref()),
            || relation_map(&analyzer, &self.after, self.after_metadata.as_deref()),
        );
        let flagged = diff(&before?, &after?, policy).context("Cannot compare relation maps")?;
        info!(policy = %policy, flagged = flagged.len(), "Diffed versions");
        Ok(flagged)
    }
}

fn relation_map(
    analyzer: &TrustDomainAnalyzer,
    graph: &Path,
    metadata: Option<&Path>,
) -> Result<RelationMap> {
    let object_graph = load_graph(graph)?;
    let metadata = load_metadata(metadata)?;
    let analysis = analyzer
        .analyze(&object_graph, &metadata)
        .with_context(|| format!("Failed to analyze '{}'", graph.display()))?;
    Ok(analysis.into_relations())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustflow_core::Relation;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../tests/fixtures/export_leak")
            .join(name)
    }

    fn args(policy: Option<DiffPolicy>) -> DiffArgs {
        DiffArgs {
            before: fixture("graph.json"),
            after: fixture("graph.json"),
            before_metadata: Some(fixture("metadata.json")),
            after_metadata: Some(fixture("metadata.json")),
            policy,
            format: OutputFormat::Json,
        }
    }

    #[test]
    fn identical_versions_flag_nothing() {
        for policy in DiffPolicy::ALL {
            let flagged = args(Some(policy))
                .flagged(&Config::default(), policy)
                .unwrap();
            assert!(flagged.is_empty(), "policy {} flagged {:?}", policy, flagged);
        }
    }

    #[test]
    fn newly_exported_leak_is_flagged() {
        let mut args = args(Some(DiffPolicy::Broad));
        args.before = fixture("graph_before.json");
        args.before_metadata = None;

        let flagged = args.flagged(&Config::default(), DiffPolicy::Broad).unwrap();

        assert!(flagged.contains(&Relation::new(":caller", "lib.readdir")));
    }

    #[test]
    fn unexported_version_has_no_caller_flow() {
        let analyzer = TrustDomainAnalyzer::new();
        let before = relation_map(&analyzer, &fixture("graph_before.json"), None).unwrap();

        assert!(before.relations().all(|r| r.source != ":caller"));
    }
}
