//! Trust domain relation maps
//!
//! A relation `(a, b)` states that data from domain `a` reaches domain `b`.
//! Each relation carries the witnesses that demonstrate it: the data-flow path
//! from the originating root and the property path that labeled the target.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::classify::ObjectType;
use super::idg::{Idg, IdgEdgeKind, IdgNodeId};
use super::spread::{PropPath, PropagationTable};
use super::trust_domain::{
    CALLER, DYN_REQUIRE, HANDLE_REQUIRE, INSTALL_SCRIPTS, LOCAL, TdId, TrustDomains,
    consolidate, generalize_local, is_local,
};
use crate::graph::NodeRef;

/// Bumped whenever relation labels or witness encoding change meaning.
pub const SCHEMA_VERSION: u32 = 1;

/// Property names that never carry a domain onward.
const PROTOTYPE_PROPERTIES: &[&str] =
    &["__proto__", "prototype", "hasOwnProperty", "constructor"];

static SCRIPT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:node\s+)?(?:\./)?([\w\-/]+\.js)$").expect("Invalid regex pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
}

impl Relation {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Whether the relation is noise that is always true or redundant.
    pub fn is_filtered(&self) -> bool {
        let (a, b) = (self.source.as_str(), self.target.as_str());
        a == b
            || (is_local(a) && is_local(b))
            || (a.starts_with(CALLER) && is_local(b))
            || a.starts_with(b)
            || b.starts_with(a)
    }

    pub fn generalize_locals(&self) -> Self {
        Self::new(generalize_local(&self.source), generalize_local(&self.target))
    }

    pub fn consolidated(&self) -> Self {
        Self::new(
            generalize_local(consolidate(&self.source)),
            generalize_local(consolidate(&self.target)),
        )
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Nodes by which a relation was shown to hold, as interpreter node ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Witness {
    pub path: Vec<NodeRef>,
    pub prop_path: Vec<NodeRef>,
}

impl Witness {
    pub fn new(path: Vec<NodeRef>, prop_path: Vec<NodeRef>) -> Self {
        Self { path, prop_path }
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.path.iter().chain(self.prop_path.iter()).copied()
    }
}

pub type RelationSet = BTreeSet<Relation>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RelationMapRepr", into = "RelationMapRepr")]
pub struct RelationMap {
    schema_version: u32,
    relations: BTreeMap<Relation, BTreeSet<Witness>>,
}

#[derive(Serialize, Deserialize)]
struct RelationMapRepr {
    schema_version: u32,
    #[serde(default)]
    entries: Vec<RelationEntry>,
}

#[derive(Serialize, Deserialize)]
struct RelationEntry {
    source: String,
    target: String,
    #[serde(default)]
    witnesses: Vec<Witness>,
}

impl From<RelationMapRepr> for RelationMap {
    fn from(repr: RelationMapRepr) -> Self {
        let mut map = RelationMap {
            schema_version: repr.schema_version,
            relations: BTreeMap::new(),
        };
        for entry in repr.entries {
            map.relations
                .entry(Relation::new(entry.source, entry.target))
                .or_default()
                .extend(entry.witnesses);
        }
        map
    }
}

impl From<RelationMap> for RelationMapRepr {
    fn from(map: RelationMap) -> Self {
        RelationMapRepr {
            schema_version: map.schema_version,
            entries: map
                .relations
                .into_iter()
                .map(|(rel, witnesses)| RelationEntry {
                    source: rel.source,
                    target: rel.target,
                    witnesses: witnesses.into_iter().collect(),
                })
                .collect(),
        }
    }
}

impl Default for RelationMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationMap {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            relations: BTreeMap::new(),
        }
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn insert(&mut self, relation: Relation, witness: Witness) {
        self.relations.entry(relation).or_default().insert(witness);
    }

    fn add(&mut self, source: &str, target: &str, witness: Witness) {
        self.insert(Relation::new(source, target), witness);
    }

    pub fn get(&self, relation: &Relation) -> Option<&BTreeSet<Witness>> {
        self.relations.get(relation)
    }

    pub fn contains(&self, source: &str, target: &str) -> bool {
        self.relations.contains_key(&Relation::new(source, target))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Relation, &BTreeSet<Witness>)> {
        self.relations.iter()
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.keys()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// The raw `(source, target)` pairs, without witnesses.
    pub fn relation_set(&self) -> RelationSet {
        self.relations.keys().cloned().collect()
    }

    /// Every node id referenced by a witness.
    pub fn witness_nodes(&self) -> BTreeSet<NodeRef> {
        self.relations
            .values()
            .flat_map(|witnesses| witnesses.iter().flat_map(Witness::nodes))
            .collect()
    }

    /// Drops self, local-to-local, caller-to-local and prefix-nested relations,
    /// then any relation left without witnesses.
    pub fn apply_filters(&mut self) {
        self.relations
            .retain(|rel, witnesses| !rel.is_filtered() && !witnesses.is_empty());
    }

    /// Truncates domains at the first `.`, collapses local sub-domains and
    /// merges the result. Applying it twice changes nothing.
    pub fn consolidate(&self) -> RelationMap {
        let mut result = self.remap(Relation::consolidated);
        result.apply_filters();
        result
    }

    /// Collapses local sub-domains to `:local`, dropping pairs that become
    /// identical.
    pub fn aggregate_locals(&self) -> RelationMap {
        let mut result = self.remap(Relation::generalize_locals);
        result.relations.retain(|rel, _| rel.source != rel.target);
        result
    }

    fn remap(&self, f: impl Fn(&Relation) -> Relation) -> RelationMap {
        let mut result = RelationMap {
            schema_version: self.schema_version,
            relations: BTreeMap::new(),
        };
        for (rel, witnesses) in &self.relations {
            let mapped = f(rel);
            result
                .relations
                .entry(mapped)
                .or_default()
                .extend(witnesses.iter().cloned());
        }
        result
    }
}

/// Install lifecycle scripts declared in the package manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleScripts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preinstall: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postinstall: Option<String>,
}

impl LifecycleScripts {
    pub fn is_empty(&self) -> bool {
        self.preinstall.is_none() && self.install.is_none() && self.postinstall.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("preinstall", &self.preinstall),
            ("install", &self.install),
            ("postinstall", &self.postinstall),
        ]
        .into_iter()
        .filter_map(|(name, script)| script.as_deref().map(|s| (name, s)))
    }
}

/// The JavaScript file a lifecycle script runs, if it is a plain `node <file>.js`.
pub fn script_entry_file(script: &str) -> Option<&str> {
    SCRIPT_FILE
        .captures(script.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub struct RelationMapBuilder<'a> {
    idg: &'a Idg,
    domains: &'a TrustDomains,
    props: &'a PropagationTable,
}

impl<'a> RelationMapBuilder<'a> {
    pub fn new(idg: &'a Idg, domains: &'a TrustDomains, props: &'a PropagationTable) -> Self {
        Self {
            idg,
            domains,
            props,
        }
    }

    pub fn build(&self, scripts: Option<&LifecycleScripts>) -> RelationMap {
        let mut map = RelationMap::new();

        if let Some(scripts) = scripts {
            self.add_install_scripts(&mut map, scripts);
        }

        let dyn_require = self.domains.lookup(DYN_REQUIRE);
        let mut visited: HashMap<TdId, HashSet<IdgNodeId>> = HashMap::new();

        for (node, obj) in self.idg.objects() {
            let n = node.id;
            if obj.exported {
                self.add_exported(&mut map, n);
            }

            let Some(cur_td) = self.domains.of(n) else {
                continue;
            };
            if Some(cur_td) == dyn_require || obj.is_native(HANDLE_REQUIRE) {
                continue;
            }
            let revisit_root = obj.object_type == ObjectType::ApiRetVal;
            let seen = visited.entry(cur_td).or_default();
            self.walk_from(&mut map, n, cur_td, revisit_root, seen);
        }

        map.apply_filters();
        debug!(relations = map.len(), "Built relation map");
        map
    }

    fn add_install_scripts(&self, map: &mut RelationMap, scripts: &LifecycleScripts) {
        for (name, script) in scripts.iter() {
            if self.script_is_required(script) {
                debug!(script = name, "Lifecycle script is covered by a require edge");
                continue;
            }
            map.add(LOCAL, INSTALL_SCRIPTS, Witness::default());
        }
    }

    fn script_is_required(&self, script: &str) -> bool {
        let Some(file) = script_entry_file(script) else {
            return false;
        };
        self.idg.edges().any(|e| {
            e.kind == IdgEdgeKind::AstRequireToObj
                && e.label
                    .as_deref()
                    .is_some_and(|m| m.trim_start_matches("./") == file)
        })
    }

    /// Anything reachable at an exported object is reachable by the caller.
    fn add_exported(&self, map: &mut RelationMap, n: IdgNodeId) {
        let n_ref = self.idg.get(n).node_ref;
        for (td, roots) in self.props.at(n) {
            for &root in roots.keys() {
                map.add(
                    CALLER,
                    self.domains.name(td),
                    Witness::new(vec![root, n_ref], vec![root, n_ref]),
                );
            }
        }
        if let Some(td) = self.domains.of(n) {
            map.add(
                CALLER,
                self.domains.name(td),
                Witness::new(vec![n_ref, n_ref], vec![n_ref, n_ref]),
            );
        }
    }

    fn walk_from(
        &self,
        map: &mut RelationMap,
        n: IdgNodeId,
        cur_td: TdId,
        revisit_root: bool,
        seen: &mut HashSet<IdgNodeId>,
    ) {
        let cur = self.domains.name(cur_td);
        let mut queue = VecDeque::from([(n, vec![self.idg.get(n).node_ref])]);

        while let Some((m, path)) = queue.pop_front() {
            if seen.contains(&m) && !(m == n && revisit_root) {
                continue;
            }
            let node = self.idg.get(m);
            let Some(obj) = node.as_object() else {
                continue;
            };
            if obj.is_native(HANDLE_REQUIRE) {
                continue;
            }
            seen.insert(m);

            if !obj.is_builtin() {
                if let Some(td) = self.domains.of(m) {
                    let witness = Witness::new(path.clone(), vec![node.node_ref]);
                    map.add(cur, self.domains.name(td), witness);
                }
                for (prop_td, roots) in self.props.at(m) {
                    for prop_path in roots.values() {
                        let label = self.composite_label(self.domains.name(prop_td), prop_path);
                        let witness = Witness::new(path.clone(), self.refs(prop_path));
                        map.add(cur, &label, witness);
                    }
                }
            }

            for (_, edge) in self.idg.out_edges(m) {
                let follow = match edge.kind {
                    IdgEdgeKind::ContributesTo | IdgEdgeKind::FuncObjToRetVal => true,
                    IdgEdgeKind::ParentToChild => !edge
                        .label
                        .as_deref()
                        .is_some_and(|l| PROTOTYPE_PROPERTIES.contains(&l)),
                    _ => false,
                };
                if follow && !seen.contains(&edge.to) {
                    let mut next = path.clone();
                    next.push(self.idg.get(edge.to).node_ref);
                    queue.push_back((edge.to, next));
                }
            }
        }
    }

    /// `lib` plus the property names along the path, e.g. `lib.readFile`.
    fn composite_label(&self, prop_td: &str, path: &PropPath) -> String {
        let mut parts = vec![prop_td.to_string()];
        for &index in &path.edges {
            let edge = self.idg.edge(index);
            if edge.kind != IdgEdgeKind::ParentToChild {
                continue;
            }
            match &edge.label {
                Some(label) => parts.push(label.clone()),
                None => warn!(
                    from = %self.idg.get(edge.from).node_ref,
                    to = %self.idg.get(edge.to).node_ref,
                    "PARENT_TO_CHILD edge without a property name"
                ),
            }
        }
        parts.join(".")
    }

    fn refs(&self, path: &PropPath) -> Vec<NodeRef> {
        path.nodes.iter().map(|&id| self.idg.get(id).node_ref).collect()
    }
}
