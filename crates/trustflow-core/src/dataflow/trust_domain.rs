//! Trust domain labels and direct assignment
//!
//! A trust domain names where a value provably came from: the package's
//! caller, a literal in the package's own code, a required dependency, or a
//! modeled runtime capability. Domain strings are interned to [`TdId`]s so the
//! traversals can key their side tables cheaply.

use std::collections::HashMap;
use std::path::Path;

use super::classify::ObjectType;
use super::idg::{Idg, IdgEdgeKind, IdgNodeId};

pub const LOCAL: &str = ":local";
pub const CALLER: &str = ":caller";
pub const SYS: &str = ":sys";
pub const DYN_REQUIRE: &str = ":dyn:require";
pub const DYN_EVAL: &str = ":dyn:eval";
pub const INSTALL_SCRIPTS: &str = "install_scripts";
pub const LOCAL_NEW: &str = ":local:new";

/// Interpreter-native function that performs `require` itself.
pub const HANDLE_REQUIRE: &str = "handle_require";

pub fn is_local(td: &str) -> bool {
    td.starts_with(LOCAL)
}

/// `:local:<anything>` collapses to `:local`.
pub fn generalize_local(td: &str) -> &str {
    if is_local(td) { LOCAL } else { td }
}

/// `:local:<anything>` becomes `:local:new`.
pub fn generalize_new(td: &str) -> &str {
    if is_local(td) { LOCAL_NEW } else { td }
}

/// Drops property suffixes (`lib.readFile` to `lib`).
pub fn consolidate(td: &str) -> &str {
    td.split('.').next().unwrap_or(td)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TdId(u32);

#[derive(Debug, Default)]
pub struct TrustDomainInterner {
    ids: HashMap<String, TdId>,
    names: Vec<String>,
}

impl TrustDomainInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, td: &str) -> TdId {
        if let Some(&id) = self.ids.get(td) {
            return id;
        }
        let id = TdId(self.names.len() as u32);
        self.names.push(td.to_string());
        self.ids.insert(td.to_string(), id);
        id
    }

    pub fn get(&self, td: &str) -> Option<TdId> {
        self.ids.get(td).copied()
    }

    pub fn resolve(&self, id: TdId) -> &str {
        &self.names[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Directly assigned domains for the nodes of one IDG.
#[derive(Debug, Default)]
pub struct TrustDomains {
    interner: TrustDomainInterner,
    direct: HashMap<IdgNodeId, TdId>,
    roots: Vec<IdgNodeId>,
}

impl TrustDomains {
    pub fn of(&self, node: IdgNodeId) -> Option<TdId> {
        self.direct.get(&node).copied()
    }

    pub fn name(&self, td: TdId) -> &str {
        self.interner.resolve(td)
    }

    pub fn lookup(&self, td: &str) -> Option<TdId> {
        self.interner.get(td)
    }

    /// Nodes carrying a direct domain, in IDG order.
    pub fn roots(&self) -> impl Iterator<Item = (IdgNodeId, TdId)> + '_ {
        self.roots.iter().map(|&id| (id, self.direct[&id]))
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn set(&mut self, node: IdgNodeId, td: &str) {
        let id = self.interner.intern(td);
        self.direct.insert(node, id);
        self.roots.push(node);
    }
}

pub struct TrustDomainAssigner<'a> {
    idg: &'a Idg,
    builtins_dir: Option<&'a Path>,
}

impl<'a> TrustDomainAssigner<'a> {
    pub fn new(idg: &'a Idg, builtins_dir: Option<&'a Path>) -> Self {
        Self { idg, builtins_dir }
    }

    pub fn assign(&self) -> TrustDomains {
        let mut domains = TrustDomains::default();
        for node in self.idg.nodes() {
            if let Some(td) = self.domain_for(node.id) {
                domains.set(node.id, &td);
            }
        }
        domains
    }

    /// The domain a node is labeled with before any propagation.
    pub fn domain_for(&self, id: IdgNodeId) -> Option<String> {
        let obj = self.idg.get(id).as_object()?;
        if let Some(td) = &obj.trust_domain {
            return Some(td.clone());
        }

        let def = self.idg.ast_definition(id);
        if let Some(module) = def.and_then(|ast| self.builtin_module(ast.filename.as_deref())) {
            return Some(module);
        }

        match obj.object_type {
            ObjectType::Static | ObjectType::Container => {
                let native_function =
                    obj.value_type.as_deref() == Some("function") && obj.native_func.is_some();
                let unusable_def = def.is_some_and(|ast| {
                    ast.artificial
                        || ast.filename.as_deref() == Some("stdin")
                        || ast.ast_type == "AST_TOPLEVEL"
                });
                if native_function || unusable_def {
                    return None;
                }
                let code = obj.code.as_ref().map(ToString::to_string).unwrap_or_default();
                if obj.object_type == ObjectType::Container {
                    Some(format!("{}:obj:{}", LOCAL, code))
                } else {
                    Some(format!("{}:{}", LOCAL, code))
                }
            }
            ObjectType::ExportParam => Some(CALLER.to_string()),
            ObjectType::Require => self
                .idg
                .in_edges(id)
                .filter(|(_, e)| e.kind == IdgEdgeKind::AstRequireToObj)
                .filter_map(|(_, e)| e.label.as_deref())
                .find(|module| !module.is_empty() && !module.contains('/'))
                .map(str::to_string),
            _ => None,
        }
    }

    fn builtin_module(&self, filename: Option<&str>) -> Option<String> {
        let dir = self.builtins_dir?;
        let path = Path::new(filename?);
        if !path.starts_with(dir) {
            return None;
        }
        path.file_stem().map(|s| s.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::idg::IdgExtractor;
    use crate::graph::{AstRecord, FakeArg, GraphDocumentBuilder, ObjectGraph, ObjectRecord};

    fn domains_of(
        builder: &mut GraphDocumentBuilder,
        builtins_dir: Option<&Path>,
    ) -> Vec<(u64, String)> {
        let graph = ObjectGraph::from_document(builder.build()).unwrap();
        let idg = IdgExtractor::new(&graph, &[]).unwrap().extract();
        let domains = TrustDomainAssigner::new(&idg, builtins_dir).assign();
        let mut result: Vec<_> = domains
            .roots()
            .map(|(id, td)| (idg.get(id).node_ref.0, domains.name(td).to_string()))
            .collect();
        result.sort();
        result
    }

    #[test]
    fn local_literals_get_distinct_subdomains() {
        let mut builder = GraphDocumentBuilder::new().package_root("/pkg");
        builder
            .node(AstRecord::toplevel_file(1, "/pkg/index.js"))
            .ast_child(1, AstRecord::new(2, "AST_ASSIGN"))
            .ast_child(1, AstRecord::new(3, "AST_ARRAY"))
            .node(ObjectRecord::of_type(9, "object").exported())
            .object_at(ObjectRecord::of_type(10, "string").with_code("a"), 2)
            .object_at(ObjectRecord::of_type(11, "string").with_code("b"), 2)
            .object_at(ObjectRecord::of_type(12, "array"), 3)
            .contributes(10, 9)
            .contributes(11, 9)
            .contributes(12, 9);

        let domains = domains_of(&mut builder, None);

        assert_eq!(
            domains,
            vec![
                (10, ":local:a".to_string()),
                (11, ":local:b".to_string()),
                (12, ":local:obj:".to_string()),
            ]
        );
    }

    #[test]
    fn export_params_belong_to_the_caller() {
        let mut builder = GraphDocumentBuilder::new();
        builder
            .node(ObjectRecord::of_type(1, "function").exported())
            .node(ObjectRecord::new(2).with_fake_arg(FakeArg::Export))
            .contributes(2, 1);

        assert_eq!(domains_of(&mut builder, None), vec![(2, CALLER.to_string())]);
    }

    #[test]
    fn require_results_take_the_module_name() {
        let mut builder = GraphDocumentBuilder::new();
        builder
            .node(AstRecord::new(1, "AST_CALL").with_flag("REQUIRE"))
            .node(ObjectRecord::of_type(10, "object"))
            .node(ObjectRecord::of_type(11, "object"))
            .require(1, 10, "lib")
            .require(1, 11, "./helpers/util");

        assert_eq!(domains_of(&mut builder, None), vec![(10, "lib".to_string())]);
    }

    #[test]
    fn preset_and_builtin_directory_domains() {
        let mut builder = GraphDocumentBuilder::new().package_root("/pkg");
        builder
            .node(AstRecord::toplevel_file(1, "/opt/analyzer/builtins/fs.js"))
            .ast_child(1, AstRecord::new(2, "AST_ASSIGN"))
            .object_at(
                ObjectRecord::of_type(10, "function").with_code("f").exported(),
                2,
            )
            .node(
                ObjectRecord::of_type(11, "object")
                    .with_trust_domain("process")
                    .exported(),
            );

        let domains = domains_of(&mut builder, Some(Path::new("/opt/analyzer/builtins")));

        assert_eq!(
            domains,
            vec![(10, "fs".to_string()), (11, "process".to_string())]
        );
    }

    #[test]
    fn native_functions_and_artificial_sites_stay_unlabeled() {
        let mut builder = GraphDocumentBuilder::new();
        builder
            .node(AstRecord::toplevel_file(1, "index.js"))
            .ast_child(1, AstRecord::new(2, "AST_ASSIGN"))
            .object_at(
                ObjectRecord::of_type(10, "function")
                    .with_obj_type(ObjectType::Static)
                    .with_native_func("eval")
                    .exported(),
                2,
            )
            .object_at(
                ObjectRecord::of_type(11, "string")
                    .with_obj_type(ObjectType::Static)
                    .with_code("x")
                    .exported(),
                1,
            );

        assert!(domains_of(&mut builder, None).is_empty());
    }

    #[test]
    fn interner_reuses_ids() {
        let mut interner = TrustDomainInterner::new();
        let a = interner.intern(":caller");
        let b = interner.intern("lib");

        assert_eq!(interner.intern(":caller"), a);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(b), "lib");
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn label_helpers() {
        assert_eq!(generalize_local(":local:obj:1"), LOCAL);
        assert_eq!(generalize_local("lib"), "lib");
        assert_eq!(generalize_new(":local:x"), LOCAL_NEW);
        assert_eq!(consolidate("lib.readFile.x"), "lib");
        assert_eq!(consolidate(":caller"), ":caller");
        assert!(!is_local(":caller"));
    }
}
