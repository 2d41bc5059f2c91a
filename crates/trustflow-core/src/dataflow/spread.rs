//! Property propagation of trust domains
//!
//! Each directly labeled node spreads its domain along `PARENT_TO_CHILD` and
//! `FUNC_OBJ_TO_RET_VAL` edges so that, for example, the `readFile` property
//! of a required `fs` object is known to belong to `fs`. For every reached
//! node the shortest witness path from each root is kept.
//!
//! Propagation never crosses a `PARENT_TO_CHILD` edge into a builtin object.
//! Otherwise a domain reaching `document.forms` would leak through
//! `__proto__` into `Array.prototype.join` and every array join in the
//! program.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::idg::{Idg, IdgEdgeKind, IdgNodeId};
use super::trust_domain::{DYN_EVAL, DYN_REQUIRE, TdId, TrustDomains};
use crate::graph::NodeRef;

/// A witness path from a root to the node it was recorded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropPath {
    pub nodes: Vec<IdgNodeId>,
    /// `edges[i]` is the IDG edge index from `nodes[i]` to `nodes[i + 1]`.
    pub edges: Vec<usize>,
}

impl PropPath {
    fn root(node: IdgNodeId) -> Self {
        Self {
            nodes: vec![node],
            edges: Vec::new(),
        }
    }

    fn extended(&self, edge: usize, node: IdgNodeId) -> Self {
        let mut next = self.clone();
        next.edges.push(edge);
        next.nodes.push(node);
        next
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

type RootPaths = BTreeMap<NodeRef, PropPath>;

/// `node -> domain -> root -> shortest path`.
#[derive(Debug, Default)]
pub struct PropagationTable {
    entries: HashMap<IdgNodeId, BTreeMap<TdId, RootPaths>>,
}

impl PropagationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Domains that reached `node`, with one witness per originating root.
    pub fn at(&self, node: IdgNodeId) -> impl Iterator<Item = (TdId, &RootPaths)> {
        self.entries
            .get(&node)
            .into_iter()
            .flat_map(|domains| domains.iter().map(|(td, roots)| (*td, roots)))
    }

    pub fn path(&self, node: IdgNodeId, td: TdId, root: NodeRef) -> Option<&PropPath> {
        self.entries.get(&node)?.get(&td)?.get(&root)
    }

    pub fn reaches(&self, node: IdgNodeId, td: TdId) -> bool {
        self.entries
            .get(&node)
            .is_some_and(|domains| domains.contains_key(&td))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `path` unless a path of equal or shorter length is already known.
    fn record(&mut self, node: IdgNodeId, td: TdId, root: NodeRef, path: &PropPath) -> bool {
        let roots = self.entries.entry(node).or_default().entry(td).or_default();
        match roots.get(&root) {
            Some(existing) if existing.len() <= path.len() => false,
            _ => {
                roots.insert(root, path.clone());
                true
            }
        }
    }
}

pub struct PropagationSpreader<'a> {
    idg: &'a Idg,
    domains: &'a TrustDomains,
}

impl<'a> PropagationSpreader<'a> {
    pub fn new(idg: &'a Idg, domains: &'a TrustDomains) -> Self {
        Self { idg, domains }
    }

    pub fn spread(&self) -> PropagationTable {
        let mut table = PropagationTable::new();
        let excluded: Vec<TdId> = [DYN_REQUIRE, DYN_EVAL]
            .iter()
            .filter_map(|td| self.domains.lookup(td))
            .collect();

        let mut roots = 0usize;
        for (root, td) in self.domains.roots() {
            if excluded.contains(&td) {
                continue;
            }
            roots += 1;
            self.spread_from(root, td, &mut table);
        }
        debug!(roots, reached = table.len(), "Spread trust domains");
        table
    }

    /// Depth-first walk from `root` that re-expands a node only when it is
    /// reached by a strictly shorter path, so each recorded path is minimal.
    fn spread_from(&self, root: IdgNodeId, td: TdId, table: &mut PropagationTable) {
        let root_ref = self.idg.get(root).node_ref;
        let mut stack = vec![(root, PropPath::root(root))];

        while let Some((m, path)) = stack.pop() {
            if !table.record(m, td, root_ref, &path) {
                continue;
            }
            for (index, edge) in self.idg.out_edges(m) {
                match edge.kind {
                    IdgEdgeKind::ParentToChild => {
                        if self.idg.get(edge.to).is_builtin() {
                            continue;
                        }
                    }
                    IdgEdgeKind::FuncObjToRetVal => {}
                    _ => continue,
                }
                let shorter = table
                    .path(edge.to, td, root_ref)
                    .is_none_or(|known| known.len() > path.len() + 1);
                if shorter {
                    stack.push((edge.to, path.extended(index, edge.to)));
                }
            }
        }
    }
}
