//! Error types for graph loading, analysis and diffing

use crate::graph::{EdgeKind, NodeKind, NodeRef};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate node id {node}")]
    DuplicateNode { node: NodeRef },
    #[error("Edge #{edge} ({kind}) references unknown node {node}")]
    UnknownNode {
        edge: usize,
        kind: EdgeKind,
        node: NodeRef,
    },
    #[error(
        "Edge #{edge} ({kind}) from {from} to {to} must connect {expected_from} -> {expected_to}, found {found_from} -> {found_to}"
    )]
    EdgeEndpoint {
        edge: usize,
        kind: EdgeKind,
        from: NodeRef,
        to: NodeRef,
        expected_from: NodeKind,
        expected_to: NodeKind,
        found_from: NodeKind,
        found_to: NodeKind,
    },
    #[error("Object {node} has {count} OBJ_TO_AST edges, expected at most one")]
    MultipleDefinitions { node: NodeRef, count: usize },
    #[error("AST node {ast} exports unknown object {node}")]
    UnknownExport { ast: NodeRef, node: NodeRef },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Malformed object graph: {0}")]
    Graph(#[from] GraphError),
    #[error("Exported object {node} is not present in the object graph")]
    UnknownExportedObject { node: NodeRef },
    #[error("Exported object {node} is not an object node")]
    ExportedNonObject { node: NodeRef },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DiffError {
    #[error(
        "Cannot diff relation maps with different schema versions (before: {before}, after: {after})"
    )]
    SchemaMismatch { before: u32, after: u32 },
}
