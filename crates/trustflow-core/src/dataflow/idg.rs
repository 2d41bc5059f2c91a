//! Inter-procedural Dataflow Graph
//!
//! The IDG is the condensed view of an object graph that keeps only objects
//! on a data-flow or property path to a seed (external call results, exported
//! objects, and require results). It is built once per version and then read
//! by the assigner, spreader and relation builder.

use std::collections::{HashMap, HashSet};
use std::fmt;

use id_arena::{Arena, Id};
use tracing::debug;

use super::classify::{ObjectClassifier, ObjectType, callsite_return_objects};
use crate::error::AnalysisError;
use crate::graph::{EdgeKind, GraphNodeId, Literal, NodeRef, ObjectGraph};

pub type IdgNodeId = Id<IdgNode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdgEdgeKind {
    ContributesTo,
    FuncObjToRetVal,
    ParentToChild,
    AstRequireToObj,
    ObjToAst,
    ParentOf,
    AstToModuleExport,
}

impl IdgEdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdgEdgeKind::ContributesTo => "CONTRIBUTES_TO",
            IdgEdgeKind::FuncObjToRetVal => "FUNC_OBJ_TO_RET_VAL",
            IdgEdgeKind::ParentToChild => "PARENT_TO_CHILD",
            IdgEdgeKind::AstRequireToObj => "AST_REQUIRE_TO_OBJ",
            IdgEdgeKind::ObjToAst => "OBJ_TO_AST",
            IdgEdgeKind::ParentOf => "PARENT_OF",
            IdgEdgeKind::AstToModuleExport => "AST_TO_MODULE_EXPORT",
        }
    }
}

impl fmt::Display for IdgEdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdgAst {
    pub ast_type: String,
    pub code: Option<Literal>,
    pub childnum: Option<i64>,
    pub nearest_func_def: Option<u64>,
    pub code_loc: Option<String>,
    pub doccomment: Option<String>,
    pub artificial: bool,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdgObject {
    pub value_type: Option<String>,
    pub code: Option<Literal>,
    pub name: Option<String>,
    pub defined_in: Option<NodeRef>,
    pub exported: bool,
    pub tainted: bool,
    /// Domain pre-assigned by the interpreter.
    pub trust_domain: Option<String>,
    pub native_func: Option<String>,
    pub object_type: ObjectType,
    pub builtin_name: Option<String>,
}

impl IdgObject {
    pub fn is_builtin(&self) -> bool {
        self.builtin_name.is_some() || self.object_type == ObjectType::Builtin
    }

    pub fn is_native(&self, name: &str) -> bool {
        self.native_func.as_deref() == Some(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdgNodeKind {
    Ast(IdgAst),
    Object(IdgObject),
}

#[derive(Debug)]
pub struct IdgNode {
    pub id: IdgNodeId,
    pub node_ref: NodeRef,
    pub kind: IdgNodeKind,
    out_edges: Vec<usize>,
    in_edges: Vec<usize>,
}

impl IdgNode {
    pub fn as_ast(&self) -> Option<&IdgAst> {
        match &self.kind {
            IdgNodeKind::Ast(ast) => Some(ast),
            IdgNodeKind::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&IdgObject> {
        match &self.kind {
            IdgNodeKind::Object(obj) => Some(obj),
            IdgNodeKind::Ast(_) => None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.as_object().is_some_and(IdgObject::is_builtin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdgEdge {
    pub from: IdgNodeId,
    pub to: IdgNodeId,
    pub kind: IdgEdgeKind,
    /// Property name on `PARENT_TO_CHILD`, module name on `AST_REQUIRE_TO_OBJ`.
    pub label: Option<String>,
}

#[derive(Debug)]
pub struct Idg {
    arena: Arena<IdgNode>,
    edges: Vec<IdgEdge>,
    edge_set: HashSet<IdgEdge>,
    by_ref: HashMap<NodeRef, IdgNodeId>,
}

impl Default for Idg {
    fn default() -> Self {
        Self::new()
    }
}

impl Idg {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            edges: Vec::new(),
            edge_set: HashSet::new(),
            by_ref: HashMap::new(),
        }
    }

    fn create_node(&mut self, node_ref: NodeRef, kind: IdgNodeKind) -> IdgNodeId {
        let id = self.arena.alloc_with_id(|id| IdgNode {
            id,
            node_ref,
            kind,
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        });
        self.by_ref.insert(node_ref, id);
        id
    }

    /// Adds an edge unless an identical one (same endpoints, kind and label)
    /// already exists. Parallel edges that differ are kept.
    fn add_edge(&mut self, edge: IdgEdge) {
        if self.edge_set.contains(&edge) {
            return;
        }
        let index = self.edges.len();
        self.arena[edge.from].out_edges.push(index);
        self.arena[edge.to].in_edges.push(index);
        self.edge_set.insert(edge.clone());
        self.edges.push(edge);
    }

    pub fn get(&self, id: IdgNodeId) -> &IdgNode {
        &self.arena[id]
    }

    pub fn lookup(&self, node_ref: NodeRef) -> Option<IdgNodeId> {
        self.by_ref.get(&node_ref).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &IdgNode> {
        self.arena.iter().map(|(_, node)| node)
    }

    pub fn objects(&self) -> impl Iterator<Item = (&IdgNode, &IdgObject)> {
        self.nodes()
            .filter_map(|node| node.as_object().map(|obj| (node, obj)))
    }

    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edge(&self, index: usize) -> &IdgEdge {
        &self.edges[index]
    }

    pub fn edges(&self) -> impl Iterator<Item = &IdgEdge> {
        self.edges.iter()
    }

    /// Outgoing edges as `(edge index, edge)` pairs.
    pub fn out_edges(&self, id: IdgNodeId) -> impl Iterator<Item = (usize, &IdgEdge)> {
        self.arena[id]
            .out_edges
            .iter()
            .map(|&e| (e, &self.edges[e]))
    }

    pub fn in_edges(&self, id: IdgNodeId) -> impl Iterator<Item = (usize, &IdgEdge)> {
        self.arena[id]
            .in_edges
            .iter()
            .map(|&e| (e, &self.edges[e]))
    }

    /// The AST node an object was defined at.
    pub fn ast_definition(&self, id: IdgNodeId) -> Option<&IdgAst> {
        self.out_edges(id)
            .find(|(_, e)| e.kind == IdgEdgeKind::ObjToAst)
            .and_then(|(_, e)| self.arena[e.to].as_ast())
    }
}

/// Condenses an [`ObjectGraph`] into an [`Idg`].
pub struct IdgExtractor<'g> {
    graph: &'g ObjectGraph,
    callsite_seeds: Vec<GraphNodeId>,
    callsite_returns: HashSet<GraphNodeId>,
    require_results: HashSet<GraphNodeId>,
    exported: HashSet<GraphNodeId>,
    idg: Idg,
    mapping: HashMap<GraphNodeId, IdgNodeId>,
}

impl<'g> IdgExtractor<'g> {
    /// Resolves `exported_objects` against the graph; each must name an object node.
    pub fn new(
        graph: &'g ObjectGraph,
        exported_objects: &[NodeRef],
    ) -> Result<Self, AnalysisError> {
        let mut exported = HashSet::new();
        for &node in exported_objects {
            let id = graph
                .lookup(node)
                .ok_or(AnalysisError::UnknownExportedObject { node })?;
            if graph.get(id).as_object().is_none() {
                return Err(AnalysisError::ExportedNonObject { node });
            }
            exported.insert(id);
        }
        for node in graph.nodes() {
            if node.as_object().is_some_and(|o| o.exported) {
                exported.insert(node.id);
            }
        }

        let require_results = graph
            .edges()
            .filter(|e| e.kind == EdgeKind::AstRequireToObj)
            .map(|e| e.to)
            .collect();

        let callsite_seeds = callsite_return_objects(graph);
        Ok(Self {
            graph,
            callsite_returns: callsite_seeds.iter().copied().collect(),
            callsite_seeds,
            require_results,
            exported,
            idg: Idg::new(),
            mapping: HashMap::new(),
        })
    }

    pub fn extract(mut self) -> Idg {
        let deferred = self.copy_ast();

        let mut worklist: Vec<GraphNodeId> = self.callsite_seeds.clone();
        worklist.extend(
            self.graph
                .nodes()
                .filter(|n| self.exported.contains(&n.id))
                .map(|n| n.id),
        );
        worklist.extend(
            self.graph
                .edges()
                .filter(|e| e.kind == EdgeKind::AstRequireToObj)
                .map(|e| e.to),
        );
        debug!(seeds = worklist.len(), "Seeded IDG extraction");

        for &seed in &worklist {
            self.add_object(seed);
        }

        let mut visited = HashSet::new();
        while let Some(n) = worklist.pop() {
            if !visited.insert(n) {
                continue;
            }
            self.follow_incoming(n, &mut worklist);
            self.follow_outgoing(n, &mut worklist);
            self.follow_parents(n, &mut worklist);
        }

        for (ast, export) in deferred {
            let from = self.add_node(ast);
            let to = self.add_node(export);
            self.idg.add_edge(IdgEdge {
                from,
                to,
                kind: IdgEdgeKind::AstToModuleExport,
                label: None,
            });
        }

        debug!(
            nodes = self.idg.node_count(),
            edges = self.idg.edge_count(),
            "Extracted IDG"
        );
        self.idg
    }

    /// Copies every AST node and `PARENT_OF` edge, returning the module
    /// export edges to add once objects are in place.
    fn copy_ast(&mut self) -> Vec<(GraphNodeId, GraphNodeId)> {
        let mut deferred = Vec::new();
        for node in self.graph.nodes() {
            let Some(ast) = node.as_ast() else {
                continue;
            };
            let ast_type = if ast.ast_type.contains("AST") {
                ast.ast_type.clone()
            } else {
                format!("AST_{}", ast.ast_type)
            };
            let filename = self
                .graph
                .file_path(node.id)
                .map(|f| self.graph.context().relativize(&f));
            let idg_id = self.idg.create_node(
                node.node_ref,
                IdgNodeKind::Ast(IdgAst {
                    ast_type,
                    code: ast.code.clone(),
                    childnum: ast.childnum,
                    nearest_func_def: ast.funcid,
                    code_loc: ast.namespace.clone(),
                    doccomment: ast.doccomment.clone(),
                    artificial: ast.is_artificial(),
                    filename,
                }),
            );
            self.mapping.insert(node.id, idg_id);
            for &export in &ast.module_exports {
                if let Some(target) = self.graph.lookup(export) {
                    deferred.push((node.id, target));
                }
            }
        }

        let parent_edges: Vec<_> = self
            .graph
            .edges()
            .filter(|e| e.kind == EdgeKind::ParentOf)
            .map(|e| (e.from, e.to))
            .collect();
        for (from, to) in parent_edges {
            if let (Some(&from), Some(&to)) = (self.mapping.get(&from), self.mapping.get(&to)) {
                self.idg.add_edge(IdgEdge {
                    from,
                    to,
                    kind: IdgEdgeKind::ParentOf,
                    label: None,
                });
            }
        }
        deferred
    }

    fn add_node(&mut self, id: GraphNodeId) -> IdgNodeId {
        match self.mapping.get(&id) {
            Some(&existing) => existing,
            None => self.add_object(id),
        }
    }

    fn add_object(&mut self, id: GraphNodeId) -> IdgNodeId {
        if let Some(&existing) = self.mapping.get(&id) {
            return existing;
        }
        let node = self.graph.get(id);
        let object = match node.as_object() {
            Some(obj) => {
                let object_type = if self.require_results.contains(&id) {
                    ObjectType::Require
                } else {
                    ObjectClassifier::new(self.graph, &self.callsite_returns).classify(id)
                };
                IdgObject {
                    value_type: obj.value_type.clone(),
                    code: obj.code.clone(),
                    name: obj.name.clone(),
                    defined_in: obj.defined_in,
                    exported: self.exported.contains(&id),
                    tainted: obj.tainted,
                    trust_domain: obj.trust_domain.clone(),
                    native_func: obj.native_func.clone(),
                    object_type,
                    builtin_name: self
                        .graph
                        .context()
                        .builtin_name(node.node_ref)
                        .map(str::to_string),
                }
            }
            // Name and scope nodes only enter through module export lists.
            None => IdgObject {
                value_type: Some(node.data.kind().to_string()),
                code: None,
                name: None,
                defined_in: None,
                exported: false,
                tainted: false,
                trust_domain: None,
                native_func: None,
                object_type: ObjectType::Other,
                builtin_name: None,
            },
        };
        let idg_id = self
            .idg
            .create_node(node.node_ref, IdgNodeKind::Object(object));
        self.mapping.insert(id, idg_id);
        idg_id
    }

    fn follow_incoming(&mut self, n: GraphNodeId, worklist: &mut Vec<GraphNodeId>) {
        let incoming: Vec<_> = self
            .graph
            .in_edges(n)
            .map(|e| (e.from, e.kind, e.module_name.clone()))
            .collect();
        for (source, kind, module_name) in incoming {
            let retyped = match kind {
                EdgeKind::ContributesTo | EdgeKind::FuncObjToSymParam => {
                    IdgEdgeKind::ContributesTo
                }
                EdgeKind::FuncObjToRetVal => IdgEdgeKind::FuncObjToRetVal,
                EdgeKind::AstRequireToObj => {
                    let from = self.add_node(source);
                    let to = self.add_node(n);
                    self.idg.add_edge(IdgEdge {
                        from,
                        to,
                        kind: IdgEdgeKind::AstRequireToObj,
                        label: module_name,
                    });
                    continue;
                }
                _ => continue,
            };
            let from = self.add_object(source);
            let to = self.add_object(n);
            worklist.push(source);
            self.idg.add_edge(IdgEdge {
                from,
                to,
                kind: retyped,
                label: None,
            });
        }
    }

    fn follow_outgoing(&mut self, n: GraphNodeId, worklist: &mut Vec<GraphNodeId>) {
        let from = self.add_object(n);
        let definitions: Vec<_> = self.graph.out_neighbors(n, EdgeKind::ObjToAst).collect();
        for ast in definitions {
            let to = self.add_node(ast);
            self.idg.add_edge(IdgEdge {
                from,
                to,
                kind: IdgEdgeKind::ObjToAst,
                label: None,
            });
        }

        for (name, child) in self.graph.properties(n) {
            let label = self.graph.property_name(name);
            let to = self.add_object(child);
            worklist.push(child);
            self.idg.add_edge(IdgEdge {
                from,
                to,
                kind: IdgEdgeKind::ParentToChild,
                label,
            });
        }
    }

    fn follow_parents(&mut self, n: GraphNodeId, worklist: &mut Vec<GraphNodeId>) {
        let to = self.add_object(n);
        for (parent, name) in self.graph.parent_objects(n) {
            let label = self.graph.property_name(name);
            let from = self.add_object(parent);
            worklist.push(parent);
            self.idg.add_edge(IdgEdge {
                from,
                to,
                kind: IdgEdgeKind::ParentToChild,
                label,
            });
        }
    }
}
