//! Object graph model consumed by the dataflow pipeline
//!
//! The interpreter that simulates a package produces a directed multigraph of
//! AST positions, runtime objects, property names and scopes. This module
//! validates that input and exposes the handful of typed queries the
//! extractor needs.

mod document;

pub use document::{
    AstRecord, EdgeRecord, FakeArg, GraphDocument, GraphDocumentBuilder, Literal, NameRecord,
    NodeRecord, ObjectRecord, ScopeRecord,
};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use id_arena::{Arena, Id};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Identifier of a node as assigned by the interpreter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeRef(pub u64);

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Ast,
    Object,
    Name,
    Scope,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Ast => "AST",
            NodeKind::Object => "Object",
            NodeKind::Name => "Name",
            NodeKind::Scope => "Scope",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    ObjToAst,
    ContributesTo,
    FuncObjToRetVal,
    FuncObjToSymParam,
    AstRequireToObj,
    ObjToProp,
    NameToObj,
    AstCallToFuncObj,
    ParentOf,
    #[serde(other)]
    Other,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::ObjToAst => "OBJ_TO_AST",
            EdgeKind::ContributesTo => "CONTRIBUTES_TO",
            EdgeKind::FuncObjToRetVal => "FUNC_OBJ_TO_RET_VAL",
            EdgeKind::FuncObjToSymParam => "FUNC_OBJ_TO_SYM_PARAM",
            EdgeKind::AstRequireToObj => "AST_REQUIRE_TO_OBJ",
            EdgeKind::ObjToProp => "OBJ_TO_PROP",
            EdgeKind::NameToObj => "NAME_TO_OBJ",
            EdgeKind::AstCallToFuncObj => "AST_CALL_TO_FUNC_OBJ",
            EdgeKind::ParentOf => "PARENT_OF",
            EdgeKind::Other => "OTHER",
        }
    }

    fn endpoints(&self) -> Option<(NodeKind, NodeKind)> {
        match self {
            EdgeKind::ObjToAst => Some((NodeKind::Object, NodeKind::Ast)),
            EdgeKind::ContributesTo
            | EdgeKind::FuncObjToRetVal
            | EdgeKind::FuncObjToSymParam => Some((NodeKind::Object, NodeKind::Object)),
            EdgeKind::AstRequireToObj | EdgeKind::AstCallToFuncObj => {
                Some((NodeKind::Ast, NodeKind::Object))
            }
            EdgeKind::ObjToProp => Some((NodeKind::Object, NodeKind::Name)),
            EdgeKind::NameToObj => Some((NodeKind::Name, NodeKind::Object)),
            EdgeKind::ParentOf => Some((NodeKind::Ast, NodeKind::Ast)),
            EdgeKind::Other => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type GraphNodeId = Id<GraphNode>;

#[derive(Debug)]
pub enum NodeData {
    Ast(AstRecord),
    Object(ObjectRecord),
    Name(NameRecord),
    Scope(ScopeRecord),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Ast(_) => NodeKind::Ast,
            NodeData::Object(_) => NodeKind::Object,
            NodeData::Name(_) => NodeKind::Name,
            NodeData::Scope(_) => NodeKind::Scope,
        }
    }
}

#[derive(Debug)]
pub struct GraphNode {
    pub id: GraphNodeId,
    pub node_ref: NodeRef,
    pub data: NodeData,
    out_edges: Vec<usize>,
    in_edges: Vec<usize>,
}

impl GraphNode {
    pub fn as_ast(&self) -> Option<&AstRecord> {
        match &self.data {
            NodeData::Ast(ast) => Some(ast),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRecord> {
        match &self.data {
            NodeData::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&NameRecord> {
        match &self.data {
            NodeData::Name(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub from: GraphNodeId,
    pub to: GraphNodeId,
    pub kind: EdgeKind,
    pub module_name: Option<String>,
}

/// Per-graph facts about the interpreter's builtin objects.
///
/// Each version's graph carries its own context so that several graphs can
/// be analyzed side by side.
#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    named_builtins: HashMap<NodeRef, String>,
    last_builtin_id: Option<u64>,
    package_root: Option<PathBuf>,
}

impl GraphContext {
    pub fn new(
        named_builtins: HashMap<NodeRef, String>,
        last_builtin_id: Option<u64>,
        package_root: Option<PathBuf>,
    ) -> Self {
        Self {
            named_builtins,
            last_builtin_id,
            package_root,
        }
    }

    pub fn builtin_name(&self, node: NodeRef) -> Option<&str> {
        self.named_builtins.get(&node).map(String::as_str)
    }

    pub fn is_named_builtin(&self, node: NodeRef) -> bool {
        self.named_builtins.contains_key(&node)
    }

    /// Whether the interpreter allocated `node` while setting up builtins.
    pub fn is_within_builtin_range(&self, node: NodeRef) -> bool {
        self.last_builtin_id.is_some_and(|last| node.0 <= last)
    }

    pub fn package_root(&self) -> Option<&Path> {
        self.package_root.as_deref()
    }

    pub fn is_inside_package(&self, file: &str) -> bool {
        match &self.package_root {
            Some(root) => {
                let path = Path::new(file);
                path.is_relative() || path.starts_with(root)
            }
            None => true,
        }
    }

    pub fn relativize(&self, file: &str) -> String {
        match &self.package_root {
            Some(root) => Path::new(file)
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| file.to_string()),
            None => file.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ObjectGraph {
    arena: Arena<GraphNode>,
    edges: Vec<GraphEdge>,
    by_ref: HashMap<NodeRef, GraphNodeId>,
    context: GraphContext,
}

impl ObjectGraph {
    /// Validates and indexes an interpreter document.
    pub fn from_document(doc: GraphDocument) -> Result<Self, GraphError> {
        let mut arena = Arena::new();
        let mut by_ref = HashMap::with_capacity(doc.nodes.len());

        for record in doc.nodes {
            let node_ref = record.id();
            if by_ref.contains_key(&node_ref) {
                return Err(GraphError::DuplicateNode { node: node_ref });
            }
            let data = match record {
                NodeRecord::Ast(r) => NodeData::Ast(r),
                NodeRecord::Object(r) => NodeData::Object(r),
                NodeRecord::Name(r) => NodeData::Name(r),
                NodeRecord::Scope(r) => NodeData::Scope(r),
            };
            let id = arena.alloc_with_id(|id| GraphNode {
                id,
                node_ref,
                data,
                out_edges: Vec::new(),
                in_edges: Vec::new(),
            });
            by_ref.insert(node_ref, id);
        }

        let mut graph = Self {
            arena,
            edges: Vec::with_capacity(doc.edges.len()),
            by_ref,
            context: GraphContext::new(
                doc.named_builtins
                    .into_iter()
                    .map(|(id, name)| (NodeRef(id), name))
                    .collect(),
                doc.last_builtin_id,
                doc.package_root,
            ),
        };

        for (index, record) in doc.edges.into_iter().enumerate() {
            if record.kind == EdgeKind::Other {
                continue;
            }
            let from = graph.resolve_endpoint(index, record.kind, record.from)?;
            let to = graph.resolve_endpoint(index, record.kind, record.to)?;
            graph.check_endpoints(index, record.kind, from, to)?;
            graph.add_edge(GraphEdge {
                from,
                to,
                kind: record.kind,
                module_name: record.module_name,
            });
        }

        graph.validate()?;
        Ok(graph)
    }

    pub fn from_json(content: &str) -> Result<Self, GraphLoadError> {
        let doc = GraphDocument::from_json(content)?;
        Ok(Self::from_document(doc)?)
    }

    fn resolve_endpoint(
        &self,
        edge: usize,
        kind: EdgeKind,
        node: NodeRef,
    ) -> Result<GraphNodeId, GraphError> {
        self.by_ref
            .get(&node)
            .copied()
            .ok_or(GraphError::UnknownNode { edge, kind, node })
    }

    fn check_endpoints(
        &self,
        edge: usize,
        kind: EdgeKind,
        from: GraphNodeId,
        to: GraphNodeId,
    ) -> Result<(), GraphError> {
        let Some((expected_from, expected_to)) = kind.endpoints() else {
            return Ok(());
        };
        let found_from = self.arena[from].data.kind();
        let found_to = self.arena[to].data.kind();
        if found_from == expected_from && found_to == expected_to {
            return Ok(());
        }
        Err(GraphError::EdgeEndpoint {
            edge,
            kind,
            from: self.arena[from].node_ref,
            to: self.arena[to].node_ref,
            expected_from,
            expected_to,
            found_from,
            found_to,
        })
    }

    fn add_edge(&mut self, edge: GraphEdge) {
        let index = self.edges.len();
        self.arena[edge.from].out_edges.push(index);
        self.arena[edge.to].in_edges.push(index);
        self.edges.push(edge);
    }

    fn validate(&self) -> Result<(), GraphError> {
        for (id, node) in self.arena.iter() {
            match &node.data {
                NodeData::Object(_) => {
                    let count = self.out_neighbors(id, EdgeKind::ObjToAst).count();
                    if count > 1 {
                        return Err(GraphError::MultipleDefinitions {
                            node: node.node_ref,
                            count,
                        });
                    }
                }
                NodeData::Ast(ast) => {
                    for &export in &ast.module_exports {
                        if !self.by_ref.contains_key(&export) {
                            return Err(GraphError::UnknownExport {
                                ast: node.node_ref,
                                node: export,
                            });
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn context(&self) -> &GraphContext {
        &self.context
    }

    pub fn get(&self, id: GraphNodeId) -> &GraphNode {
        &self.arena[id]
    }

    pub fn lookup(&self, node: NodeRef) -> Option<GraphNodeId> {
        self.by_ref.get(&node).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.arena.iter().map(|(_, node)| node)
    }

    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter()
    }

    pub fn out_edges(&self, id: GraphNodeId) -> impl Iterator<Item = &GraphEdge> {
        self.arena[id].out_edges.iter().map(|&e| &self.edges[e])
    }

    pub fn in_edges(&self, id: GraphNodeId) -> impl Iterator<Item = &GraphEdge> {
        self.arena[id].in_edges.iter().map(|&e| &self.edges[e])
    }

    pub fn out_neighbors(
        &self,
        id: GraphNodeId,
        kind: EdgeKind,
    ) -> impl Iterator<Item = GraphNodeId> + '_ {
        self.out_edges(id)
            .filter(move |e| e.kind == kind)
            .map(|e| e.to)
    }

    pub fn in_neighbors(
        &self,
        id: GraphNodeId,
        kind: EdgeKind,
    ) -> impl Iterator<Item = GraphNodeId> + '_ {
        self.in_edges(id)
            .filter(move |e| e.kind == kind)
            .map(|e| e.from)
    }

    /// The AST site an object was created at, if any.
    pub fn ast_definition(&self, id: GraphNodeId) -> Option<GraphNodeId> {
        self.out_neighbors(id, EdgeKind::ObjToAst).next()
    }

    /// `(name node, property object)` pairs reachable through `OBJ_TO_PROP -> NAME_TO_OBJ`.
    pub fn properties(&self, id: GraphNodeId) -> Vec<(GraphNodeId, GraphNodeId)> {
        self.out_neighbors(id, EdgeKind::ObjToProp)
            .flat_map(|name| {
                self.out_neighbors(name, EdgeKind::NameToObj)
                    .map(move |child| (name, child))
            })
            .collect()
    }

    /// `(parent object, name node)` pairs holding `id` as a named property.
    pub fn parent_objects(&self, id: GraphNodeId) -> Vec<(GraphNodeId, GraphNodeId)> {
        self.in_neighbors(id, EdgeKind::NameToObj)
            .flat_map(|name| {
                self.in_neighbors(name, EdgeKind::ObjToProp)
                    .map(move |parent| (parent, name))
            })
            .collect()
    }

    pub fn property_name(&self, name: GraphNodeId) -> Option<String> {
        self.arena[name]
            .as_name()
            .and_then(|n| n.name.as_ref())
            .map(Literal::to_string)
    }

    /// Source file of an AST node, found on the node itself or on the
    /// enclosing `TOPLEVEL_FILE` node.
    pub fn file_path(&self, id: GraphNodeId) -> Option<String> {
        if let Some(filename) = self.arena[id].as_ast().and_then(|a| a.filename.clone()) {
            return Some(filename);
        }

        let mut visited = HashSet::new();
        let mut current = id;
        while visited.insert(current) {
            let ast = self.arena[current].as_ast()?;
            if ast.has_flag("TOPLEVEL_FILE") {
                return ast.name.clone();
            }
            current = self.in_neighbors(current, EdgeKind::ParentOf).next()?;
        }
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphLoadError {
    #[error("Invalid object graph JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
}
