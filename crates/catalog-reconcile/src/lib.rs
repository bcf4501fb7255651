//! # catalog-reconcile
//!
//! Catalog reconciliation library: compares two relational catalog snapshots
//! and produces an ordered, resumable remediation plan.
//!
//! The pipeline:
//!
//! - **Dependency graph** built from snapshot edges, with cycle-safe
//!   transitive closure down to base tables
//! - **Remap resolution** from explicit rules, parent inheritance, and
//!   closure inference, with conflicts surfaced instead of masked
//! - **Support classification** into Supported / Unsupported / Blocked with
//!   blame on the nearest blocking dependency
//! - **Fixup planning** into topologically ordered task batches
//! - **Bounded concurrent execution** with retry rounds, cooperative
//!   cancellation, and exact per-reason failure accounting
//! - **Resume capability** via JSON state files
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catalog_reconcile::{
//!     Classifier, Config, DependencyGraph, FixupExecutor, Orchestrator, Planner,
//!     RemapEngine, SanitizerRegistry, TransitiveClosureCache,
//! };
//! # use catalog_reconcile::CatalogSnapshot;
//! # async fn run(source: CatalogSnapshot, target: CatalogSnapshot,
//! #              executor: Arc<dyn FixupExecutor>) -> catalog_reconcile::Result<()> {
//! let config = Config::load("config.yaml")?.with_auto_tuning();
//!
//! let graph = DependencyGraph::build(&source);
//! let closures = TransitiveClosureCache::compute(&source, &graph);
//! let mapping = RemapEngine::new(&source, &graph, &closures)
//!     .with_no_inference_types(config.resolution.no_schema_inference_types.clone())
//!     .resolve(&config.remap_rules());
//! let classification = Classifier::new(&source, &graph).classify(&config.compatibility_table());
//!
//! let sanitizer = SanitizerRegistry::with_builtins();
//! let plan = Planner::new(&source, &graph, &mapping, &classification, &sanitizer).plan(&target);
//!
//! let summary = Orchestrator::new(executor, config.execution_options())
//!     .run(plan, None)
//!     .await?;
//! println!("{} objects fixed", summary.objects_fixed);
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod remap;
pub mod sanitize;
pub mod state;

// Re-exports for convenient access
pub use classify::{Classification, Classifier, CompatibilityTable, DialectRule, SupportState};
pub use config::{CompatibilityConfig, Config, ResolutionConfig, RunConfig};
pub use error::{ReconcileError, Result};
pub use graph::{closure::TransitiveClosureCache, DependencyGraph};
pub use model::{
    CatalogObject, CatalogSnapshot, DependencyEdge, EdgeKind, ObjectKey, ObjectStatus, ObjectType,
    StorageKind,
};
pub use orchestrator::{
    ExecutionFailure, ExecutionOptions, FailureKind, FixupExecutor, FixupOutcome, Orchestrator,
    RunSummary,
};
pub use planner::{ActionKind, FixupPlan, FixupTask, Planner};
pub use remap::{
    Provenance, RemapConflict, RemapEngine, RemapRule, RemapRuleSet, Resolution, ResolvedMapping,
    TargetIdentity,
};
pub use sanitize::{SanitizeContext, SanitizerRegistry};
pub use state::ReconcileState;
