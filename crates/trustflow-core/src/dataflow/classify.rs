//! Object classification and call-site discovery
//!
//! Every object copied into the IDG is tagged once with an [`ObjectType`]. The
//! rules run in a fixed order and the first match wins, so later arms may rely
//! on earlier ones having failed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::graph::{EdgeKind, FakeArg, GraphNodeId, ObjectGraph};

const FUNCTION_DEFINITIONS: &[&str] = &[
    "AST_FUNC_DECL",
    "AST_CLOSURE",
    "AST_METHOD",
    "AST_ARROW_FUNC",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Static,
    ExportParam,
    CallbackParam,
    #[serde(rename = "APIRetVal")]
    ApiRetVal,
    Require,
    Container,
    /// Reserved: objects reached only as a property of another object.
    Child,
    Builtin,
    Other,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Static => "Static",
            ObjectType::ExportParam => "ExportParam",
            ObjectType::CallbackParam => "CallbackParam",
            ObjectType::ApiRetVal => "APIRetVal",
            ObjectType::Require => "Require",
            ObjectType::Container => "Container",
            ObjectType::Child => "Child",
            ObjectType::Builtin => "Builtin",
            ObjectType::Other => "Other",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call and method-call sites whose callee is not defined inside the package.
pub fn callsite_nodes(graph: &ObjectGraph) -> Vec<GraphNodeId> {
    graph
        .nodes()
        .filter(|node| {
            node.as_ast().is_some_and(|ast| {
                (ast.ast_type == "AST_CALL" || ast.ast_type == "AST_METHOD_CALL")
                    && !ast.has_flag("REQUIRE")
            })
        })
        .map(|node| node.id)
        .filter(|&id| !is_local_call(graph, id))
        .collect()
}

/// A call is local when one of its resolved callees is a function written in
/// the package itself.
pub fn is_local_call(graph: &ObjectGraph, call_site: GraphNodeId) -> bool {
    graph
        .out_neighbors(call_site, EdgeKind::AstCallToFuncObj)
        .any(|callee| {
            let Some(def) = graph.ast_definition(callee) else {
                return false;
            };
            let Some(ast) = graph.get(def).as_ast() else {
                return false;
            };
            if ast.is_artificial() || !FUNCTION_DEFINITIONS.contains(&ast.ast_type.as_str()) {
                return false;
            }
            match graph.file_path(def) {
                Some(file) => graph.context().is_inside_package(&file),
                None => graph.context().package_root().is_none(),
            }
        })
}

/// Objects returned by the callees of `call_site` that were also created at it.
pub fn return_objects_for_callsite(
    graph: &ObjectGraph,
    call_site: GraphNodeId,
) -> Vec<GraphNodeId> {
    let created_here: HashSet<GraphNodeId> = graph
        .in_neighbors(call_site, EdgeKind::ObjToAst)
        .collect();

    let mut callees: Vec<GraphNodeId> = Vec::new();
    for callee in graph.out_neighbors(call_site, EdgeKind::AstCallToFuncObj) {
        if !callees.contains(&callee) {
            callees.push(callee);
        }
    }

    let mut result = Vec::new();
    for callee in callees {
        for ret in graph.out_neighbors(callee, EdgeKind::FuncObjToRetVal) {
            if created_here.contains(&ret) && !result.contains(&ret) {
                result.push(ret);
            }
        }
    }
    result
}

pub fn callsite_return_objects(graph: &ObjectGraph) -> Vec<GraphNodeId> {
    let mut seen = HashSet::new();
    callsite_nodes(graph)
        .into_iter()
        .flat_map(|cs| return_objects_for_callsite(graph, cs))
        .filter(|id| seen.insert(*id))
        .collect()
}

pub struct ObjectClassifier<'g> {
    graph: &'g ObjectGraph,
    callsite_returns: &'g HashSet<GraphNodeId>,
}

impl<'g> ObjectClassifier<'g> {
    pub fn new(graph: &'g ObjectGraph, callsite_returns: &'g HashSet<GraphNodeId>) -> Self {
        Self {
            graph,
            callsite_returns,
        }
    }

    pub fn classify(&self, id: GraphNodeId) -> ObjectType {
        let node = self.graph.get(id);
        let Some(obj) = node.as_object() else {
            return ObjectType::Other;
        };

        if let Some(obj_type) = obj.obj_type {
            return obj_type;
        }
        match obj.fake_arg {
            Some(FakeArg::Export) => return ObjectType::ExportParam,
            Some(FakeArg::Callback) => return ObjectType::CallbackParam,
            None => {}
        }

        let context = self.graph.context();
        if let Some(def) = self.usable_definition(id) {
            return self.classify_by_definition(id, def);
        }
        if context.is_named_builtin(node.node_ref) {
            ObjectType::Builtin
        } else if self.callsite_returns.contains(&id) {
            ObjectType::ApiRetVal
        } else if context.is_within_builtin_range(node.node_ref) {
            ObjectType::Builtin
        } else {
            ObjectType::Other
        }
    }

    /// The defining AST, unless it was synthesized, read from stdin, or is a
    /// whole file.
    fn usable_definition(&self, id: GraphNodeId) -> Option<GraphNodeId> {
        let def = self.graph.ast_definition(id)?;
        let ast = self.graph.get(def).as_ast()?;
        if ast.is_artificial() || ast.ast_type == "AST_TOPLEVEL" {
            return None;
        }
        if self.graph.file_path(def).as_deref() == Some("stdin") {
            return None;
        }
        Some(def)
    }

    fn classify_by_definition(&self, id: GraphNodeId, def: GraphNodeId) -> ObjectType {
        let Some(obj) = self.graph.get(id).as_object() else {
            return ObjectType::Other;
        };
        let Some(ast) = self.graph.get(def).as_ast() else {
            return ObjectType::Other;
        };
        let value_type = obj.value_type.as_deref();
        let has_literal = obj
            .code
            .as_ref()
            .is_some_and(|c| c.is_truthy() && !c.is_wildcard());
        let wildcard = obj.code.as_ref().is_some_and(|c| c.is_wildcard());

        match ast.ast_type.as_str() {
            "AST_ARRAY" => ObjectType::Container,
            "AST_NEW" => ObjectType::ApiRetVal,
            _ if has_literal => ObjectType::Static,
            _ if obj.name.as_deref() == Some("{anon}") && value_type == Some("function") => {
                ObjectType::Static
            }
            "AST_METHOD_CALL"
                if value_type == Some("object")
                    && wildcard
                    && return_objects_for_callsite(self.graph, def).contains(&id) =>
            {
                ObjectType::ApiRetVal
            }
            _ => ObjectType::Other,
        }
    }
}
