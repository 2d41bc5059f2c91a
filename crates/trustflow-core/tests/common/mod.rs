//! Object graph fixtures shared by the integration tests
//!
//! Each helper adds a small, self-contained fragment of a package to a
//! builder. Node ids are allocated from the `base` the caller passes in so
//! fragments can be combined without collisions.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use trustflow_core::graph::{AstRecord, FakeArg, GraphDocumentBuilder, ObjectRecord};
use trustflow_core::{EntryMetadata, ObjectGraph, RelationMap, compute_relation_map};

pub const FIXTURES_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../tests/fixtures");

pub const TOPLEVEL: u64 = 1;

pub fn read_fixture(relative_path: &str) -> String {
    let path = Path::new(FIXTURES_DIR).join(relative_path);
    fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", path.display(), e))
}

/// An empty package with one source file, `/pkg/index.js`.
pub fn package() -> GraphDocumentBuilder {
    let mut builder = GraphDocumentBuilder::new().package_root("/pkg");
    builder.node(AstRecord::toplevel_file(TOPLEVEL, "/pkg/index.js"));
    builder
}

/// `require(module).method(...)`. Returns the id of the call's result object.
///
/// Uses ids `base..=base + 5`.
pub fn library_call(builder: &mut GraphDocumentBuilder, base: u64, module: &str, method: &str) -> u64 {
    let (require_site, module_obj, name, func, call_site, result) =
        (base, base + 1, base + 2, base + 3, base + 4, base + 5);
    builder
        .ast_child(
            TOPLEVEL,
            AstRecord::new(require_site, "AST_CALL")
                .with_flag("REQUIRE")
                .with_namespace(&format!("{}:0:{}:30", base, base)),
        )
        .node(ObjectRecord::of_type(module_obj, "object"))
        .require(require_site, module_obj, module)
        .node(ObjectRecord::of_type(func, "function"))
        .property(module_obj, name, method, func)
        .ast_child(
            TOPLEVEL,
            AstRecord::new(call_site, "AST_METHOD_CALL")
                .with_namespace(&format!("{}:2:{}:40", base + 1, base + 1)),
        )
        .object_at(
            ObjectRecord::of_type(result, "object").with_wildcard_code(),
            call_site,
        )
        .calls(call_site, func)
        .returns(func, result);
    result
}

/// A string literal assigned in package code. Returns the literal's object id.
///
/// Uses ids `base..=base + 1`.
pub fn literal(builder: &mut GraphDocumentBuilder, base: u64, text: &str) -> u64 {
    builder
        .ast_child(
            TOPLEVEL,
            AstRecord::new(base, "AST_ASSIGN").with_namespace(&format!("{}:0:{}:20", base, base)),
        )
        .object_at(ObjectRecord::of_type(base + 1, "string").with_code(text), base);
    base + 1
}

/// An exported function and the placeholder for its caller-supplied argument.
/// Returns the placeholder's id.
///
/// Uses ids `base..=base + 1`.
pub fn exported_function(builder: &mut GraphDocumentBuilder, base: u64) -> u64 {
    builder
        .node(ObjectRecord::of_type(base, "function").exported())
        .node(ObjectRecord::new(base + 1).with_fake_arg(FakeArg::Export));
    base + 1
}

/// `lib.send("<text>")`
pub fn literal_leak(text: &str) -> ObjectGraph {
    let mut builder = package();
    let result = library_call(&mut builder, 10, "lib", "send");
    let value = literal(&mut builder, 30, text);
    builder.contributes(value, result);
    graph(builder)
}

/// `module.exports = (dir) => lib.readdir(dir)`
pub fn export_leak() -> GraphDocumentBuilder {
    let mut builder = package();
    let result = library_call(&mut builder, 10, "lib", "readdir");
    let arg = exported_function(&mut builder, 40);
    builder.contributes(arg, result);
    builder
}

pub fn graph(mut builder: GraphDocumentBuilder) -> ObjectGraph {
    ObjectGraph::from_document(builder.build()).expect("fixture graph should be valid")
}

pub fn relations(graph: &ObjectGraph) -> RelationMap {
    compute_relation_map(graph, &EntryMetadata::default()).expect("analysis should succeed")
}
