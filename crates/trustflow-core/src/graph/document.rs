//! Interchange format for object graphs produced by the interpreter
//!
//! A [`GraphDocument`] is the serde-facing shape of one package version's
//! object graph. It is validated and indexed by [`super::ObjectGraph::from_document`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{EdgeKind, NodeRef};
use crate::dataflow::ObjectType;

/// A literal value attached to an AST or object node.
///
/// `Special` is the interpreter's opaque marker (usually `*`) for a value it
/// could not determine statically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Str(String),
    Num(serde_json::Number),
    Bool(bool),
    Special { special: String },
}

impl Literal {
    pub fn wildcard() -> Self {
        Literal::Special {
            special: "*".to_string(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Literal::Special { special } if special == "*")
    }

    /// Whether the literal counts as a present, known value.
    pub fn is_truthy(&self) -> bool {
        match self {
            Literal::Str(s) => !s.is_empty(),
            Literal::Num(n) => n.as_f64().is_some_and(|v| v != 0.0 && !v.is_nan()),
            Literal::Bool(b) => *b,
            Literal::Special { .. } => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) => write!(f, "{}", s),
            Literal::Num(n) => write!(f, "{}", n),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Special { special } => write!(f, "{}", special),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Str(value.to_string())
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Num(value.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FakeArg {
    Export,
    Callback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AstRecord {
    pub id: NodeRef,
    #[serde(rename = "type")]
    pub ast_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Literal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub childnum: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funcid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doccomment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub module_exports: Vec<NodeRef>,
}

impl AstRecord {
    pub fn new(id: u64, ast_type: &str) -> Self {
        Self {
            id: NodeRef(id),
            ast_type: ast_type.to_string(),
            ..Default::default()
        }
    }

    pub fn toplevel_file(id: u64, path: &str) -> Self {
        Self {
            name: Some(path.to_string()),
            flags: vec!["TOPLEVEL_FILE".to_string()],
            ..Self::new(id, "AST_TOPLEVEL")
        }
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.push(flag.to_string());
        self
    }

    pub fn with_code(mut self, code: impl Into<Literal>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn artificial(mut self) -> Self {
        self.labels.push("Artificial_AST".to_string());
        self
    }

    pub fn exporting(mut self, objects: &[u64]) -> Self {
        self.module_exports.extend(objects.iter().copied().map(NodeRef));
        self
    }

    pub fn is_artificial(&self) -> bool {
        self.labels.iter().any(|l| l.starts_with("Artificial"))
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectRecord {
    pub id: NodeRef,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Literal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defined_in: Option<NodeRef>,
    pub exported: bool,
    pub tainted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fake_arg: Option<FakeArg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obj_type: Option<ObjectType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_func: Option<String>,
}

impl ObjectRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id: NodeRef(id),
            ..Default::default()
        }
    }

    pub fn of_type(id: u64, value_type: &str) -> Self {
        Self {
            value_type: Some(value_type.to_string()),
            ..Self::new(id)
        }
    }

    pub fn with_code(mut self, code: impl Into<Literal>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_wildcard_code(mut self) -> Self {
        self.code = Some(Literal::wildcard());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_trust_domain(mut self, td: &str) -> Self {
        self.trust_domain = Some(td.to_string());
        self
    }

    pub fn with_fake_arg(mut self, fake_arg: FakeArg) -> Self {
        self.fake_arg = Some(fake_arg);
        self
    }

    pub fn with_native_func(mut self, name: &str) -> Self {
        self.native_func = Some(name.to_string());
        self
    }

    pub fn with_obj_type(mut self, obj_type: ObjectType) -> Self {
        self.obj_type = Some(obj_type);
        self
    }

    pub fn exported(mut self) -> Self {
        self.exported = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameRecord {
    pub id: NodeRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<Literal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeRecord {
    pub id: NodeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeRecord {
    Ast(AstRecord),
    Object(ObjectRecord),
    Name(NameRecord),
    Scope(ScopeRecord),
}

impl NodeRecord {
    pub fn id(&self) -> NodeRef {
        match self {
            NodeRecord::Ast(r) => r.id,
            NodeRecord::Object(r) => r.id,
            NodeRecord::Name(r) => r.id,
            NodeRecord::Scope(r) => r.id,
        }
    }
}

impl From<AstRecord> for NodeRecord {
    fn from(value: AstRecord) -> Self {
        NodeRecord::Ast(value)
    }
}

impl From<ObjectRecord> for NodeRecord {
    fn from(value: ObjectRecord) -> Self {
        NodeRecord::Object(value)
    }
}

impl From<NameRecord> for NodeRecord {
    fn from(value: NameRecord) -> Self {
        NodeRecord::Name(value)
    }
}

impl From<ScopeRecord> for NodeRecord {
    fn from(value: ScopeRecord) -> Self {
        NodeRecord::Scope(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: NodeRef,
    pub to: NodeRef,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_builtin_id: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub named_builtins: BTreeMap<u64, String>,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl GraphDocument {
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

/// Incremental construction of a [`GraphDocument`].
#[derive(Debug, Default)]
pub struct GraphDocumentBuilder {
    doc: GraphDocument,
}

impl GraphDocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package_root(mut self, root: &str) -> Self {
        self.doc.package_root = Some(PathBuf::from(root));
        self
    }

    pub fn last_builtin_id(mut self, id: u64) -> Self {
        self.doc.last_builtin_id = Some(id);
        self
    }

    pub fn named_builtin(&mut self, id: u64, name: &str) -> &mut Self {
        self.doc.named_builtins.insert(id, name.to_string());
        self
    }

    pub fn node(&mut self, record: impl Into<NodeRecord>) -> &mut Self {
        self.doc.nodes.push(record.into());
        self
    }

    pub fn edge(&mut self, from: u64, to: u64, kind: EdgeKind) -> &mut Self {
        self.doc.edges.push(EdgeRecord {
            from: NodeRef(from),
            to: NodeRef(to),
            kind,
            module_name: None,
        });
        self
    }

    /// Adds an AST child under `parent` in the syntax tree.
    pub fn ast_child(&mut self, parent: u64, record: AstRecord) -> &mut Self {
        let child = record.id.0;
        self.node(record);
        self.edge(parent, child, EdgeKind::ParentOf)
    }

    /// Adds an object defined at `ast` (an `OBJ_TO_AST` edge).
    pub fn object_at(&mut self, record: ObjectRecord, ast: u64) -> &mut Self {
        let id = record.id.0;
        self.node(record);
        self.edge(id, ast, EdgeKind::ObjToAst)
    }

    pub fn require(&mut self, ast: u64, object: u64, module_name: &str) -> &mut Self {
        self.doc.edges.push(EdgeRecord {
            from: NodeRef(ast),
            to: NodeRef(object),
            kind: EdgeKind::AstRequireToObj,
            module_name: Some(module_name.to_string()),
        });
        self
    }

    /// Attaches `child` to `parent` as property `name` through the name node `name_id`.
    pub fn property(&mut self, parent: u64, name_id: u64, name: &str, child: u64) -> &mut Self {
        self.node(NameRecord {
            id: NodeRef(name_id),
            name: Some(Literal::from(name)),
        });
        self.edge(parent, name_id, EdgeKind::ObjToProp);
        self.edge(name_id, child, EdgeKind::NameToObj)
    }

    pub fn contributes(&mut self, from: u64, to: u64) -> &mut Self {
        self.edge(from, to, EdgeKind::ContributesTo)
    }

    pub fn returns(&mut self, func: u64, ret: u64) -> &mut Self {
        self.edge(func, ret, EdgeKind::FuncObjToRetVal)
    }

    pub fn calls(&mut self, call_site: u64, callee: u64) -> &mut Self {
        self.edge(call_site, callee, EdgeKind::AstCallToFuncObj)
    }

    pub fn build(&mut self) -> GraphDocument {
        std::mem::take(&mut self.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_nodes_and_typed_edges() {
        let json = r#"{
            "package_root": "/pkg",
            "last_builtin_id": 10,
            "named_builtins": {"3": "Array.prototype"},
            "nodes": [
                {"kind": "ast", "id": 20, "type": "AST_CALL", "flags": ["REQUIRE"]},
                {"kind": "object", "id": 21, "type": "string", "code": "hello"},
                {"kind": "object", "id": 22, "type": "object", "code": {"special": "*"}},
                {"kind": "name", "id": 23, "name": 0},
                {"kind": "scope", "id": 24}
            ],
            "edges": [
                {"from": 21, "to": 20, "type": "OBJ_TO_AST"},
                {"from": 20, "to": 22, "type": "AST_REQUIRE_TO_OBJ", "module_name": "lib"}
            ]
        }"#;

        let doc = GraphDocument::from_json(json).unwrap();

        assert_eq!(doc.package_root, Some(PathBuf::from("/pkg")));
        assert_eq!(doc.named_builtins.get(&3).map(String::as_str), Some("Array.prototype"));
        assert_eq!(doc.nodes.len(), 5);
        match &doc.nodes[1] {
            NodeRecord::Object(obj) => {
                assert_eq!(obj.code, Some(Literal::from("hello")));
                assert_eq!(obj.value_type.as_deref(), Some("string"));
            }
            other => panic!("Expected object record, got {:?}", other),
        }
        match &doc.nodes[2] {
            NodeRecord::Object(obj) => assert!(obj.code.as_ref().unwrap().is_wildcard()),
            other => panic!("Expected object record, got {:?}", other),
        }
        assert_eq!(doc.edges[1].kind, EdgeKind::AstRequireToObj);
        assert_eq!(doc.edges[1].module_name.as_deref(), Some("lib"));
    }

    #[test]
    fn unknown_edge_types_are_tolerated() {
        let json = r#"{"nodes": [], "edges": [{"from": 1, "to": 2, "type": "SCOPE_TO_VAR"}]}"#;

        let doc = GraphDocument::from_json(json).unwrap();

        assert_eq!(doc.edges[0].kind, EdgeKind::Other);
    }

    #[test]
    fn literal_truthiness_matches_js_semantics() {
        assert!(Literal::from("x").is_truthy());
        assert!(!Literal::from("").is_truthy());
        assert!(Literal::from(3).is_truthy());
        assert!(!Literal::from(0).is_truthy());
        assert!(!Literal::Bool(false).is_truthy());
        assert!(!Literal::wildcard().is_truthy());
    }

    #[test]
    fn literal_display_is_plain_text() {
        assert_eq!(Literal::from("source1").to_string(), "source1");
        assert_eq!(Literal::from(42).to_string(), "42");
        assert_eq!(Literal::wildcard().to_string(), "*");
    }

    #[test]
    fn builder_wires_property_through_name_node() {
        let mut builder = GraphDocumentBuilder::new();
        builder
            .node(ObjectRecord::of_type(1, "object"))
            .node(ObjectRecord::of_type(2, "function"))
            .property(1, 3, "readFile", 2);

        let doc = builder.build();

        assert_eq!(doc.nodes.len(), 3);
        assert_eq!(doc.edges.len(), 2);
        assert_eq!(doc.edges[0].kind, EdgeKind::ObjToProp);
        assert_eq!(doc.edges[1].kind, EdgeKind::NameToObj);
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut builder = GraphDocumentBuilder::new().package_root("/pkg");
        builder
            .node(AstRecord::toplevel_file(1, "/pkg/index.js"))
            .object_at(ObjectRecord::of_type(2, "string").with_code("x"), 1);
        let doc = builder.build();

        let json = serde_json::to_string(&doc).unwrap();
        let parsed = GraphDocument::from_json(&json).unwrap();

        assert_eq!(parsed, doc);
    }
}
