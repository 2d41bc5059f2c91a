//! Trust-domain dataflow analysis
//!
//! Runs one package version through extraction, domain assignment,
//! property propagation and relation building, and compares the resulting
//! relation maps across versions and packages.

pub mod classify;
pub mod cross_package;
pub mod diff;
pub mod idg;
pub mod relations;
pub mod spread;
pub mod trust_domain;

pub use classify::{ObjectClassifier, ObjectType};
pub use cross_package::{
    CrossPackageDiff, CrossPackageOptions, DEFAULT_ALWAYS_EXCLUDE, DEFAULT_EXCLUDED,
    DependencyFlowGraph, VersionData, VersionPair, analyze_version_pair,
};
pub use diff::{DiffPolicy, ParsePolicyError, diff};
pub use idg::{Idg, IdgEdgeKind, IdgExtractor, IdgNode, IdgNodeId};
pub use relations::{
    LifecycleScripts, Relation, RelationMap, RelationMapBuilder, RelationSet, SCHEMA_VERSION,
    Witness,
};
pub use spread::{PropagationSpreader, PropagationTable};
pub use trust_domain::{TdId, TrustDomainAssigner, TrustDomains};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::AnalysisError;
use crate::graph::{NodeRef, ObjectGraph};

/// Per-version facts gathered outside the object graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryMetadata {
    /// Objects reachable from `module.exports`.
    pub exported_objects: Vec<NodeRef>,
    pub lifecycle_scripts: Option<LifecycleScripts>,
}

impl EntryMetadata {
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub builtins_dir: Option<PathBuf>,
    /// Truncate domains at the first `.` and collapse local sub-domains.
    pub consolidate: bool,
    /// Collapse local sub-domains only.
    pub aggregate_locals: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TrustDomainAnalyzer {
    options: AnalysisOptions,
}

impl TrustDomainAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: AnalysisOptions) -> Self {
        Self { options }
    }

    pub fn with_config(config: &Config) -> Self {
        Self::with_options(AnalysisOptions::from(&config.analysis))
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Computes the relation map of one package version.
    ///
    /// Fails before any traversal if the metadata names objects the graph does
    /// not contain, so no partial map is ever produced.
    #[instrument(skip_all, fields(nodes = graph.node_count(), edges = graph.edge_count()))]
    pub fn analyze(
        &self,
        graph: &ObjectGraph,
        metadata: &EntryMetadata,
    ) -> Result<VersionAnalysis, AnalysisError> {
        let idg = IdgExtractor::new(graph, &metadata.exported_objects)?.extract();
        let domains =
            TrustDomainAssigner::new(&idg, self.options.builtins_dir.as_deref()).assign();
        debug!(roots = domains.len(), "Assigned trust domains");
        let props = PropagationSpreader::new(&idg, &domains).spread();

        let mut relations =
            RelationMapBuilder::new(&idg, &domains, &props).build(metadata.lifecycle_scripts.as_ref());
        if self.options.consolidate {
            relations = relations.consolidate();
        }
        if self.options.aggregate_locals {
            relations = relations.aggregate_locals();
        }

        Ok(VersionAnalysis {
            idg,
            relations,
            builtins_dir: self.options.builtins_dir.clone(),
        })
    }
}

/// The IDG and relation map of one analyzed version.
#[derive(Debug)]
pub struct VersionAnalysis {
    idg: Idg,
    relations: RelationMap,
    builtins_dir: Option<PathBuf>,
}

impl VersionAnalysis {
    pub fn idg(&self) -> &Idg {
        &self.idg
    }

    pub fn relations(&self) -> &RelationMap {
        &self.relations
    }

    pub fn into_relations(self) -> RelationMap {
        self.relations
    }

    /// Source position of every node that appears in a witness.
    pub fn code_locations(&self) -> BTreeMap<NodeRef, String> {
        self.relations
            .witness_nodes()
            .into_iter()
            .filter_map(|node| self.code_location(node).map(|loc| (node, loc)))
            .collect()
    }

    /// `file:code_loc` for a node, or the builtin it models.
    pub fn code_location(&self, node: NodeRef) -> Option<String> {
        let id = self.idg.lookup(node)?;
        let idg_node = self.idg.get(id);
        if let Some(name) = idg_node.as_object().and_then(|o| o.builtin_name.as_deref()) {
            return Some(format!("Builtin object: {}", name));
        }

        let ast = match idg_node.as_ast() {
            Some(ast) => ast,
            None => self.idg.ast_definition(id)?,
        };
        let file = ast.filename.as_deref()?;
        let loc = ast.code_loc.as_deref().unwrap_or_default();
        match self.builtin_file(file) {
            Some(rel) => Some(format!("JS-Modeled Builtin Package: {}:{}", rel, loc)),
            None => Some(format!("{}:{}", file, loc)),
        }
    }

    fn builtin_file(&self, file: &str) -> Option<String> {
        let dir = self.builtins_dir.as_deref()?;
        Path::new(file)
            .strip_prefix(dir)
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    }
}

/// Relation map of one version with default options.
pub fn compute_relation_map(
    graph: &ObjectGraph,
    metadata: &EntryMetadata,
) -> Result<RelationMap, AnalysisError> {
    TrustDomainAnalyzer::new()
        .analyze(graph, metadata)
        .map(VersionAnalysis::into_relations)
}
