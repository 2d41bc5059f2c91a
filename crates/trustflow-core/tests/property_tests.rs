//! Integration tests for invariants that hold for every relation map
//!
//! Covers determinism, filtering, consolidation, the builtin boundary in
//! property propagation, and rejection of malformed graphs.

mod common;

use common::{graph, literal_leak, package, relations};
use trustflow_core::dataflow::trust_domain::{CALLER, is_local};
use trustflow_core::dataflow::{IdgExtractor, PropagationSpreader, TrustDomainAssigner};
use trustflow_core::graph::{
    EdgeKind, GraphDocumentBuilder, GraphLoadError, NodeRef, ObjectRecord,
};
use trustflow_core::{
    DiffPolicy, EntryMetadata, GraphError, ObjectGraph, RelationMap, compute_relation_map, diff,
};

fn sample_maps() -> Vec<RelationMap> {
    vec![
        relations(&literal_leak("source1")),
        relations(&graph(common::export_leak())),
        relations(&escape_hatch_graph()),
    ]
}

/// `document.forms.__proto__.join`, where `__proto__` is `Array.prototype`.
fn escape_hatch_graph() -> ObjectGraph {
    let mut builder = GraphDocumentBuilder::new();
    builder
        .named_builtin(3, "Array.prototype")
        .node(
            ObjectRecord::of_type(1, "object")
                .with_trust_domain(":sys:frontend:document")
                .exported(),
        )
        .node(ObjectRecord::of_type(2, "object"))
        .node(ObjectRecord::of_type(3, "object"))
        .node(ObjectRecord::of_type(4, "function"))
        .property(1, 11, "forms", 2)
        .property(2, 12, "__proto__", 3)
        .property(3, 13, "join", 4);
    graph(builder)
}

#[test]
fn relation_maps_are_deterministic() {
    let graph = literal_leak("source1");

    let first = relations(&graph);
    let second = relations(&graph);

    assert_eq!(first.relation_set(), second.relation_set());
    assert_eq!(first, second);
}

#[test]
fn relation_maps_serialize_deterministically() {
    let map = relations(&graph(common::export_leak()));

    let json = serde_json::to_string(&map).unwrap();
    let parsed = RelationMap::from_json(&json).unwrap();

    assert_eq!(parsed, map);
    assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
}

#[test]
fn filtered_maps_hold_no_noise_relations() {
    for map in sample_maps() {
        for rel in map.relations() {
            let (a, b) = (rel.source.as_str(), rel.target.as_str());
            assert_ne!(a, b, "self relation {}", rel);
            assert!(!(is_local(a) && is_local(b)), "local relation {}", rel);
            assert!(!(a == CALLER && is_local(b)), "caller to local {}", rel);
            assert!(!a.starts_with(b) && !b.starts_with(a), "nested {}", rel);
            assert!(!map.get(rel).unwrap().is_empty());
        }
    }
}

#[test]
fn consolidation_is_idempotent() {
    for map in sample_maps() {
        let once = map.consolidate();

        assert_eq!(once.consolidate(), once);
        assert!(once.relations().all(|r| !r.target.contains('.')));
    }
}

#[test]
fn unchanged_maps_have_empty_single_local_diff() {
    for map in sample_maps() {
        assert!(diff(&map, &map, DiffPolicy::Broad).unwrap().is_empty());
        assert!(diff(&map, &map, DiffPolicy::SingleLocal).unwrap().is_empty());
    }
}

#[test]
fn propagation_stops_at_builtin_prototypes() {
    let graph = escape_hatch_graph();
    let idg = IdgExtractor::new(&graph, &[]).unwrap().extract();
    let domains = TrustDomainAssigner::new(&idg, None).assign();
    let props = PropagationSpreader::new(&idg, &domains).spread();

    let td = domains.lookup(":sys:frontend:document").unwrap();
    let forms = idg.lookup(NodeRef(2)).unwrap();
    let proto = idg.lookup(NodeRef(3)).unwrap();
    let join = idg.lookup(NodeRef(4)).unwrap();

    assert!(props.reaches(forms, td));
    assert!(!props.reaches(proto, td));
    assert!(props.path(join, td, NodeRef(1)).is_none());

    let map = relations(&graph);
    assert!(map.contains(":caller", ":sys:frontend:document"));
    assert!(map.relations().all(|r| !r.target.contains("join")));
}

#[test]
fn empty_graph_yields_empty_map() {
    let graph = graph(package());

    let map = compute_relation_map(&graph, &EntryMetadata::default()).unwrap();

    assert!(map.is_empty());
}

#[test]
fn malformed_graphs_are_rejected() {
    let mut unknown = GraphDocumentBuilder::new();
    unknown
        .node(ObjectRecord::new(1))
        .edge(1, 99, EdgeKind::ContributesTo);
    assert!(matches!(
        ObjectGraph::from_document(unknown.build()),
        Err(GraphError::UnknownNode { node: NodeRef(99), .. })
    ));

    let mut duplicate = GraphDocumentBuilder::new();
    duplicate.node(ObjectRecord::new(1)).node(ObjectRecord::new(1));
    assert_eq!(
        ObjectGraph::from_document(duplicate.build()).unwrap_err(),
        GraphError::DuplicateNode { node: NodeRef(1) }
    );

    let mut wrong_kind = GraphDocumentBuilder::new();
    wrong_kind
        .node(ObjectRecord::new(1))
        .node(ObjectRecord::new(2))
        .edge(1, 2, EdgeKind::NameToObj);
    assert!(matches!(
        ObjectGraph::from_document(wrong_kind.build()),
        Err(GraphError::EdgeEndpoint { .. })
    ));

    assert!(matches!(
        ObjectGraph::from_json("{\"nodes\": [{\"kind\": \"object\"}"),
        Err(GraphLoadError::Json(_))
    ));
}

#[test]
fn diff_rejects_incompatible_schemas() {
    let before = relations(&literal_leak("source1"));
    let after = RelationMap::from_json(r#"{"schema_version": 2, "entries": []}"#).unwrap();

    assert!(diff(&before, &after, DiffPolicy::SingleLocal).is_err());
}
