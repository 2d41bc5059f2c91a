//! JSON output formatter
//!
//! Provides structured output for relation maps, diffs and cross-package
//! results so that orchestration layers can consume them.

use std::collections::BTreeMap;

use serde::Serialize;
use trustflow_core::dataflow::Witness;
use trustflow_core::graph::NodeRef;
use trustflow_core::{CrossPackageDiff, DiffPolicy, Relation, RelationMap, RelationSet};

const OUTPUT_VERSION: &str = "1.0";

#[derive(Serialize)]
pub struct JsonMetadata {
    pub trustflow_version: &'static str,
    pub working_directory: String,
    pub analyzed_path: String,
}

#[derive(Serialize)]
pub struct RelationsOutput {
    pub version: &'static str,
    pub metadata: JsonMetadata,
    pub schema_version: u32,
    pub total_relations: usize,
    pub relations: Vec<JsonRelation>,
}

#[derive(Serialize)]
pub struct DiffOutput {
    pub version: &'static str,
    pub metadata: JsonMetadata,
    pub policy: String,
    pub total_flagged: usize,
    pub flagged: Vec<JsonRelation>,
}

#[derive(Serialize)]
pub struct CrossOutput {
    pub version: &'static str,
    pub metadata: JsonMetadata,
    pub results: Vec<JsonCrossResult>,
}

#[derive(Serialize)]
pub struct JsonRelation {
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub witnesses: Vec<JsonWitness>,
}

#[derive(Serialize)]
pub struct JsonWitness {
    pub path: Vec<JsonNode>,
    pub prop_path: Vec<JsonNode>,
}

#[derive(Serialize)]
pub struct JsonNode {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Serialize)]
pub struct JsonCrossResult {
    pub package: String,
    pub analyzed: bool,
    pub static_data: Vec<String>,
    pub caller_input: Vec<String>,
}

pub struct JsonFormatter<'a> {
    locations: Option<&'a BTreeMap<NodeRef, String>>,
}

impl<'a> JsonFormatter<'a> {
    pub fn new() -> Self {
        Self { locations: None }
    }

    pub fn with_locations(locations: &'a BTreeMap<NodeRef, String>) -> Self {
        Self {
            locations: Some(locations),
        }
    }

    pub fn format_relations(&self, map: &RelationMap, analyzed_path: &str) -> String {
        let output = RelationsOutput {
            version: OUTPUT_VERSION,
            metadata: build_metadata(analyzed_path),
            schema_version: map.schema_version(),
            total_relations: map.len(),
            relations: map
                .iter()
                .map(|(rel, witnesses)| JsonRelation {
                    source: rel.source.clone(),
                    target: rel.target.clone(),
                    witnesses: witnesses.iter().map(|w| self.convert_witness(w)).collect(),
                })
                .collect(),
        };
        to_pretty_json(&output)
    }

    pub fn format_flagged(
        &self,
        flagged: &RelationSet,
        policy: DiffPolicy,
        analyzed_path: &str,
    ) -> String {
        let output = DiffOutput {
            version: OUTPUT_VERSION,
            metadata: build_metadata(analyzed_path),
            policy: policy.to_string(),
            total_flagged: flagged.len(),
            flagged: flagged.iter().map(convert_relation).collect(),
        };
        to_pretty_json(&output)
    }

    pub fn format_cross(
        &self,
        results: &[(String, Option<CrossPackageDiff>)],
        analyzed_path: &str,
    ) -> String {
        let output = CrossOutput {
            version: OUTPUT_VERSION,
            metadata: build_metadata(analyzed_path),
            results: results
                .iter()
                .map(|(package, diff)| JsonCrossResult {
                    package: package.clone(),
                    analyzed: diff.is_some(),
                    static_data: diff
                        .as_ref()
                        .map(|d| d.static_data.iter().cloned().collect())
                        .unwrap_or_default(),
                    caller_input: diff
                        .as_ref()
                        .map(|d| d.caller_input.iter().cloned().collect())
                        .unwrap_or_default(),
                })
                .collect(),
        };
        to_pretty_json(&output)
    }

    fn convert_witness(&self, witness: &Witness) -> JsonWitness {
        JsonWitness {
            path: witness.path.iter().map(|n| self.convert_node(*n)).collect(),
            prop_path: witness
                .prop_path
                .iter()
                .map(|n| self.convert_node(*n))
                .collect(),
        }
    }

    fn convert_node(&self, node: NodeRef) -> JsonNode {
        JsonNode {
            id: node.0,
            location: self.locations.and_then(|l| l.get(&node).cloned()),
        }
    }
}

impl Default for JsonFormatter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_relation(rel: &Relation) -> JsonRelation {
    JsonRelation {
        source: rel.source.clone(),
        target: rel.target.clone(),
        witnesses: Vec::new(),
    }
}

fn build_metadata(analyzed_path: &str) -> JsonMetadata {
    JsonMetadata {
        trustflow_version: env!("CARGO_PKG_VERSION"),
        working_directory: std::env::current_dir()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default(),
        analyzed_path: analyzed_path.to_string(),
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
