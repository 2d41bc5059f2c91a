//! Pretty formatter for human-readable terminal output
//!
//! Displays relations with colors, optional witness locations, and a summary.

use std::collections::BTreeMap;

use colored::Colorize;
use trustflow_core::dataflow::Witness;
use trustflow_core::graph::NodeRef;
use trustflow_core::{CrossPackageDiff, DiffPolicy, Relation, RelationMap, RelationSet};

/// Witnesses shown per relation when locations are enabled.
const MAX_WITNESSES: usize = 3;

pub struct PrettyFormatter<'a> {
    locations: Option<&'a BTreeMap<NodeRef, String>>,
}

impl<'a> PrettyFormatter<'a> {
    pub fn new() -> Self {
        Self { locations: None }
    }

    pub fn with_locations(locations: &'a BTreeMap<NodeRef, String>) -> Self {
        Self {
            locations: Some(locations),
        }
    }

    pub fn format_relations(&self, map: &RelationMap) -> String {
        let mut lines = Vec::new();

        for (rel, witnesses) in map.iter() {
            lines.push(format!(
                "  {} {}",
                self.format_relation(rel),
                format!("({} witnesses)", witnesses.len()).dimmed()
            ));
            if self.locations.is_some() {
                for witness in witnesses.iter().take(MAX_WITNESSES) {
                    if let Some(trace) = self.format_witness(witness) {
                        lines.push(format!("      {} {}", "-->".blue(), trace));
                    }
                }
            }
        }

        let summary = match map.len() {
            0 => "No relations found".green().to_string(),
            1 => "1 relation".bold().to_string(),
            n => format!("{} relations", n).bold().to_string(),
        };
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(summary);
        lines.join("\n")
    }

    pub fn format_flagged(&self, flagged: &RelationSet, policy: DiffPolicy) -> String {
        if flagged.is_empty() {
            return format!(
                "{} No new relations ({} policy)",
                "✓".green().bold(),
                policy.to_string().cyan()
            );
        }

        let mut lines = vec![format!(
            "{} {} new relation{} flagged by the {} policy",
            "✗".red().bold(),
            flagged.len().to_string().red().bold(),
            if flagged.len() == 1 { "" } else { "s" },
            policy.to_string().cyan()
        )];
        for rel in flagged {
            lines.push(format!("  {} {}", "+".red().bold(), self.format_relation(rel)));
        }
        lines.join("\n")
    }

    pub fn format_cross(&self, package: &str, diff: Option<&CrossPackageDiff>) -> String {
        let Some(diff) = diff else {
            return format!(
                "{} {}: package missing from analysis result",
                "warning:".yellow().bold(),
                package
            );
        };
        if diff.is_empty() {
            return format!("{} {}: no new reachable nodes", "✓".green().bold(), package);
        }

        let mut lines = vec![format!("{} {}", "✗".red().bold(), package.bold())];
        for (source, nodes) in [
            ("static data", &diff.static_data),
            ("caller input", &diff.caller_input),
        ] {
            for node in nodes {
                lines.push(format!(
                    "  {} {} {}",
                    source.dimmed(),
                    "->".blue(),
                    node.red()
                ));
            }
        }
        lines.join("\n")
    }

    fn format_relation(&self, rel: &Relation) -> String {
        format!(
            "{} {} {}",
            rel.source.yellow(),
            "->".blue(),
            rel.target.yellow()
        )
    }

    fn format_witness(&self, witness: &Witness) -> Option<String> {
        let locations = self.locations?;
        let (first, last) = (witness.path.first()?, witness.path.last()?);
        let from = locations.get(first)?;
        match locations.get(last) {
            Some(to) if last != first => Some(format!("{} => {}", from, to)),
            _ => Some(from.clone()),
        }
    }
}

impl Default for PrettyFormatter<'_> {
    fn default() -> Self {
        Self::new()
    }
}
