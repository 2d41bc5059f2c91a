//! Trustflow core: trust-domain propagation and relation diffing
//!
//! Consumes the object graph an abstract interpreter builds for one package
//! version, condenses it into an inter-procedural dataflow graph, labels it
//! with trust domains and derives which domains reach which. Two versions'
//! relation maps are then diffed to surface newly introduced flows.

pub mod config;
pub mod dataflow;
pub mod error;
pub mod graph;

pub use config::{CONFIG_FILENAME, Config, ConfigError, ConfigResult};
pub use dataflow::{
    AnalysisOptions, CrossPackageDiff, CrossPackageOptions, DiffPolicy, EntryMetadata,
    LifecycleScripts, Relation, RelationMap, RelationSet, TrustDomainAnalyzer, VersionAnalysis,
    VersionPair, analyze_version_pair, compute_relation_map, diff,
};
pub use error::{AnalysisError, DiffError, GraphError};
pub use graph::{GraphDocument, ObjectGraph};
