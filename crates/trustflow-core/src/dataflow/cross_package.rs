//! Cross-package reachability
//!
//! Relation maps of a root package and its dependencies are stitched into a
//! single directed flow graph between packages. Comparing what the root's
//! static data and caller input can reach before and after an update shows
//! flows that only exist through a changed dependency.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::relations::{Relation, RelationMap};
use super::trust_domain::{CALLER, LOCAL};

pub const STATIC_DATA_SUFFIX: &str = ":static_data";
pub const CALLER_INPUT_SUFFIX: &str = ":caller_input";

pub const DEFAULT_EXCLUDED: &[&str] = &["util"];
pub const DEFAULT_ALWAYS_EXCLUDE: &[&str] = &["jquery", "underscore", "lodash"];

/// Relation maps of one package version and its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionData {
    pub data: BTreeMap<String, RelationMap>,
    /// Dependencies whose analysis failed or was skipped.
    pub not_included_dependencies: Vec<String>,
}

/// Before and after data for one update of `package_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionPair {
    pub package_name: String,
    pub before: VersionData,
    pub after: VersionData,
}

impl VersionPair {
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossPackageOptions {
    pub excluded: Vec<String>,
    pub always_exclude: Vec<String>,
}

impl Default for CrossPackageOptions {
    fn default() -> Self {
        Self {
            excluded: DEFAULT_EXCLUDED.iter().map(|s| s.to_string()).collect(),
            always_exclude: DEFAULT_ALWAYS_EXCLUDE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Directed graph of flows between packages and domains.
#[derive(Debug, Default)]
pub struct DependencyFlowGraph {
    graph: DiGraph<String, Relation>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Adds `from -> to`, keeping the relation that produced it.
    fn add_edge(&mut self, from: &str, to: &str, origin: Relation) {
        let a = self.node(from);
        let b = self.node(to);
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, origin);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    /// Every node reachable from `start`, including `start` itself.
    pub fn reachable_from(&self, start: &str) -> BTreeSet<String> {
        let Some(&start) = self.index.get(start) else {
            return BTreeSet::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut reached = BTreeSet::new();
        while let Some(idx) = bfs.next(&self.graph) {
            reached.insert(self.graph[idx].clone());
        }
        reached
    }

    /// Builds the flow graph from per-package relation maps.
    ///
    /// For the root package `:local` stands for its static data and `:caller`
    /// for its caller's input. For a dependency, a relation touching either
    /// becomes an edge between the dependency and the other domain.
    ///
    /// Relation maps of `skipped` packages are ignored, but those packages
    /// stay reachable as targets. Only `excluded` names are removed as edge
    /// endpoints.
    pub fn from_relation_maps(
        data: &BTreeMap<String, RelationMap>,
        root: &str,
        skipped: &HashSet<String>,
        excluded: &HashSet<String>,
    ) -> Self {
        let mut flow = Self::new();
        let static_data = format!("{}{}", root, STATIC_DATA_SUFFIX);
        let caller_input = format!("{}{}", root, CALLER_INPUT_SUFFIX);
        flow.node(&static_data);
        flow.node(&caller_input);
        if !data.contains_key(root) {
            warn!(package = root, "Root package missing from cross-package data");
        }

        let is_boundary = |td: &str| td == LOCAL || td == CALLER;
        for (package, map) in data {
            if skipped.contains(package) || excluded.contains(package) {
                continue;
            }
            let relations: BTreeSet<Relation> = map
                .relations()
                .map(Relation::generalize_locals)
                .collect();
            for rel in relations {
                let (a, b) = (rel.source.as_str(), rel.target.as_str());
                if excluded.contains(a) || excluded.contains(b) {
                    continue;
                }
                if is_boundary(a) && is_boundary(b) {
                    continue;
                }
                if package == root {
                    let rename = |td: &str| match td {
                        LOCAL => static_data.clone(),
                        CALLER => caller_input.clone(),
                        other => other.to_string(),
                    };
                    flow.add_edge(&rename(a), &rename(b), rel.clone());
                } else if is_boundary(a) {
                    flow.add_edge(package, b, rel.clone());
                } else if is_boundary(b) {
                    flow.add_edge(a, package, rel.clone());
                } else {
                    flow.add_edge(a, b, rel.clone());
                }
            }
        }
        flow
    }
}

/// Nodes newly reachable from the root's static data and caller input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossPackageDiff {
    pub static_data: BTreeSet<String>,
    pub caller_input: BTreeSet<String>,
}

impl CrossPackageDiff {
    pub fn is_empty(&self) -> bool {
        self.static_data.is_empty() && self.caller_input.is_empty()
    }
}

pub fn reachable_difference(
    before: &DependencyFlowGraph,
    after: &DependencyFlowGraph,
    start: &str,
) -> BTreeSet<String> {
    let known = before.reachable_from(start);
    after
        .reachable_from(start)
        .into_iter()
        .filter(|n| !known.contains(n))
        .collect()
}

/// Packages whose relation maps are left out of both flow graphs.
pub fn skipped_packages(pair: &VersionPair, options: &CrossPackageOptions) -> HashSet<String> {
    pair.before
        .not_included_dependencies
        .iter()
        .chain(&pair.after.not_included_dependencies)
        .chain(&options.excluded)
        .chain(&options.always_exclude)
        .cloned()
        .collect()
}

/// Builds both flow graphs for `pair` and reports newly reachable nodes, or
/// `None` if the root package is absent from either version.
pub fn analyze_version_pair(
    pair: &VersionPair,
    options: &CrossPackageOptions,
) -> Option<CrossPackageDiff> {
    let skipped = skipped_packages(pair, options);
    let excluded: HashSet<String> = options.excluded.iter().cloned().collect();
    let root = pair.package_name.as_str();
    if !pair.before.data.contains_key(root) || !pair.after.data.contains_key(root) {
        warn!(package = root, "Package not present in cross-package analysis result");
        return None;
    }
    let before =
        DependencyFlowGraph::from_relation_maps(&pair.before.data, root, &skipped, &excluded);
    let after =
        DependencyFlowGraph::from_relation_maps(&pair.after.data, root, &skipped, &excluded);

    let static_data = format!("{}{}", root, STATIC_DATA_SUFFIX);
    let caller_input = format!("{}{}", root, CALLER_INPUT_SUFFIX);
    Some(CrossPackageDiff {
        static_data: reachable_difference(&before, &after, &static_data),
        caller_input: reachable_difference(&before, &after, &caller_input),
    })
}
