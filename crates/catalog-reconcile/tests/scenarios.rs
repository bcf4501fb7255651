//! End-to-end reconciliation scenarios over the public API: snapshot in,
//! ordered remediation out.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use catalog_reconcile::{
    ActionKind, CatalogObject, CatalogSnapshot, Classification, Classifier, CompatibilityTable,
    Config, DependencyEdge, DependencyGraph, ExecutionFailure, ExecutionOptions, FailureKind,
    FixupExecutor, FixupPlan, FixupTask, ObjectKey, ObjectType, Orchestrator, Planner, Provenance,
    RemapConflict, RemapEngine, RemapRule, RemapRuleSet, Resolution, ResolvedMapping,
    SanitizerRegistry, StorageKind, SupportState, TargetIdentity, TransitiveClosureCache,
};

/// Records execution order; fails objects according to a per-object script.
struct RecordingExecutor {
    script: Mutex<HashMap<ObjectKey, Vec<ExecutionFailure>>>,
    calls: Mutex<Vec<ObjectKey>>,
}

impl RecordingExecutor {
    fn new() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn fail_once(self, object: &ObjectKey, failure: ExecutionFailure) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(object.clone())
            .or_default()
            .push(failure);
        self
    }

    fn calls(&self) -> Vec<ObjectKey> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FixupExecutor for RecordingExecutor {
    async fn execute(&self, task: &FixupTask) -> Result<(), ExecutionFailure> {
        self.calls.lock().unwrap().push(task.object.clone());
        let mut script = self.script.lock().unwrap();
        match script.get_mut(&task.object) {
            Some(failures) if !failures.is_empty() => Err(failures.remove(0)),
            _ => Ok(()),
        }
    }
}

fn key(schema: &str, name: &str, ty: ObjectType) -> ObjectKey {
    ObjectKey::new(schema, name, ty)
}

struct Pipeline {
    source: CatalogSnapshot,
    graph: DependencyGraph,
    mapping: ResolvedMapping,
    classification: BTreeMap<ObjectKey, Classification>,
    sanitizer: SanitizerRegistry,
}

impl Pipeline {
    fn build(
        objects: Vec<CatalogObject>,
        edges: Vec<DependencyEdge>,
        rules: RemapRuleSet,
        table: CompatibilityTable,
    ) -> Self {
        let source = CatalogSnapshot::new(objects, edges).unwrap();
        let graph = DependencyGraph::build(&source);
        let closures = TransitiveClosureCache::compute(&source, &graph);
        let mapping = RemapEngine::new(&source, &graph, &closures).resolve(&rules);
        let classification = Classifier::new(&source, &graph).classify(&table);
        Self {
            source,
            graph,
            mapping,
            classification,
            sanitizer: SanitizerRegistry::with_builtins(),
        }
    }

    fn plan(&self, target: &CatalogSnapshot) -> FixupPlan {
        Planner::new(
            &self.source,
            &self.graph,
            &self.mapping,
            &self.classification,
            &self.sanitizer,
        )
        .plan(target)
    }
}

fn options() -> ExecutionOptions {
    ExecutionOptions {
        workers: 4,
        max_rounds: 3,
        error_threshold: None,
        task_timeout: Duration::from_secs(5),
    }
}

/// A remapped table, a view over it, and an attached sequence: the sequence
/// inherits the table's target schema, the plan orders the table first, and
/// the run fixes everything with rewritten statements.
#[tokio::test]
async fn remapped_chain_reconciles_in_order() {
    let t1 = key("hr", "t1", ObjectType::Table);
    let v1 = key("hr", "v1", ObjectType::View);
    let seq = key("hr", "seq1", ObjectType::Sequence);

    let pipeline = Pipeline::build(
        vec![
            CatalogObject::new(t1.clone()).with_definition("create table hr.t1 (id int)"),
            CatalogObject::new(v1.clone())
                .with_definition("create view hr.v1 as select id from hr.t1"),
            CatalogObject::new(seq.clone())
                .with_owner(t1.clone())
                .with_definition("create sequence hr.seq1"),
        ],
        vec![DependencyEdge::reference(v1.clone(), t1.clone())],
        RemapRuleSet::from_rules(vec![RemapRule::new(
            t1.clone(),
            TargetIdentity::new("core", "t1"),
        )]),
        CompatibilityTable::new("test"),
    );

    // The attached sequence inherited the owning table's resolved schema.
    assert_eq!(
        pipeline.mapping.target_of(&seq),
        Some(&TargetIdentity::new("core", "seq1"))
    );
    assert!(matches!(
        pipeline.mapping.resolution(&seq),
        Some(Resolution::Resolved {
            provenance: Provenance::ParentInherited,
            ..
        })
    ));

    let plan = pipeline.plan(&CatalogSnapshot::empty());
    assert_eq!(plan.len(), 3);
    assert_eq!(plan.tasks[0].object, t1);
    assert!(plan.tasks[0].statements[0].contains("core.t1"));

    let executor = Arc::new(RecordingExecutor::new());
    let summary = Orchestrator::new(executor.clone(), options())
        .run(plan, None)
        .await
        .unwrap();

    assert_eq!(summary.status, "completed");
    assert_eq!(summary.objects_fixed, 3);
    let calls = executor.calls();
    let pos = |k: &ObjectKey| calls.iter().position(|c| c == k).unwrap();
    assert!(pos(&t1) < pos(&v1));
}

/// An unsupported storage kind blocks its whole dependent chain; only the
/// untouched branch is planned and fixed.
#[tokio::test]
async fn blocked_chain_excluded_from_remediation() {
    let bad = key("hr", "mem_t", ObjectType::Table);
    let v1 = key("hr", "v1", ObjectType::View);
    let v2 = key("hr", "v2", ObjectType::View);
    let ok = key("hr", "t_ok", ObjectType::Table);

    let pipeline = Pipeline::build(
        vec![
            CatalogObject::new(bad.clone()).with_storage(StorageKind::MemoryOptimized),
            CatalogObject::new(v1.clone()),
            CatalogObject::new(v2.clone()),
            CatalogObject::new(ok.clone()),
        ],
        vec![
            DependencyEdge::reference(v1.clone(), bad.clone()),
            DependencyEdge::reference(v2.clone(), v1.clone()),
        ],
        RemapRuleSet::new(),
        CompatibilityTable::new("test").disallow_storage(StorageKind::MemoryOptimized),
    );

    assert_eq!(pipeline.classification[&bad].state, SupportState::Unsupported);
    assert_eq!(pipeline.classification[&v1].state, SupportState::Blocked);
    assert_eq!(pipeline.classification[&v2].state, SupportState::Blocked);
    // Blame names the direct dependency the block arrives through.
    assert_eq!(pipeline.classification[&v2].blocker.as_ref(), Some(&v1));

    let plan = pipeline.plan(&CatalogSnapshot::empty());
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.tasks[0].object, ok);

    let summary = Orchestrator::new(Arc::new(RecordingExecutor::new()), options())
        .run(plan, None)
        .await
        .unwrap();
    assert_eq!(summary.status, "completed");
    assert_eq!(summary.objects_fixed, 1);
}

/// Two rules mapping different sources onto one target identity: the second
/// is excluded and surfaced as a conflict, and its source falls back to a
/// tagged conflict resolution rather than silently passing through.
#[tokio::test]
async fn duplicate_target_rule_surfaces_conflict() {
    let a = key("a", "t1", ObjectType::Table);
    let c = key("c", "t1", ObjectType::Table);

    let pipeline = Pipeline::build(
        vec![CatalogObject::new(a.clone()), CatalogObject::new(c.clone())],
        vec![],
        RemapRuleSet::from_rules(vec![
            RemapRule::new(a.clone(), TargetIdentity::new("b", "t1")),
            RemapRule::new(c.clone(), TargetIdentity::new("b", "t1")),
        ]),
        CompatibilityTable::new("test"),
    );

    let duplicates: Vec<_> = pipeline
        .mapping
        .conflicts()
        .iter()
        .filter(|c| matches!(c, RemapConflict::DuplicateTarget { .. }))
        .collect();
    assert_eq!(duplicates.len(), 1);

    assert!(matches!(
        pipeline.mapping.resolution(&c),
        Some(Resolution::Conflict { .. })
    ));
    // The fallback still lets planning proceed under the source schema.
    assert_eq!(
        pipeline.mapping.target_of(&c),
        Some(&TargetIdentity::new("c", "t1"))
    );

    let plan = pipeline.plan(&CatalogSnapshot::empty());
    assert_eq!(plan.len(), 2);
}

/// A view cycle resolves with a cycle-detected fallback, plans as a final
/// best-effort batch, and still executes to completion.
#[tokio::test]
async fn view_cycle_planned_best_effort() {
    let v1 = key("hr", "v1", ObjectType::View);
    let v2 = key("hr", "v2", ObjectType::View);

    let pipeline = Pipeline::build(
        vec![CatalogObject::new(v1.clone()), CatalogObject::new(v2.clone())],
        vec![
            DependencyEdge::reference(v1.clone(), v2.clone()),
            DependencyEdge::reference(v2.clone(), v1.clone()),
        ],
        RemapRuleSet::new(),
        CompatibilityTable::new("test"),
    );

    assert!(matches!(
        pipeline.mapping.resolution(&v1),
        Some(Resolution::CycleDetected { .. })
    ));
    let cycles: Vec<_> = pipeline
        .mapping
        .conflicts()
        .iter()
        .filter(|c| matches!(c, RemapConflict::GraphCycle { .. }))
        .collect();
    assert_eq!(cycles.len(), 1);

    let plan = pipeline.plan(&CatalogSnapshot::empty());
    assert_eq!(plan.cyclic_members.len(), 2);
    assert_eq!(plan.len(), 2);

    let summary = Orchestrator::new(Arc::new(RecordingExecutor::new()), options())
        .run(plan, None)
        .await
        .unwrap();
    assert_eq!(summary.status, "completed");
    assert_eq!(summary.objects_fixed, 2);
}

/// A transient failure is retried into a second round and the cumulative
/// tallies keep both rounds' counts.
#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let t = key("hr", "t1", ObjectType::Table);
    let v = key("hr", "v1", ObjectType::View);

    let pipeline = Pipeline::build(
        vec![CatalogObject::new(t.clone()), CatalogObject::new(v.clone())],
        vec![DependencyEdge::reference(v.clone(), t.clone())],
        RemapRuleSet::new(),
        CompatibilityTable::new("test"),
    );
    let plan = pipeline.plan(&CatalogSnapshot::empty());

    let executor = Arc::new(RecordingExecutor::new().fail_once(
        &t,
        ExecutionFailure::new(FailureKind::LockContention, "target table locked"),
    ));
    let summary = Orchestrator::new(executor.clone(), options())
        .run(plan, None)
        .await
        .unwrap();

    assert_eq!(summary.status, "completed");
    assert_eq!(summary.rounds, 2);
    assert_eq!(summary.objects_fixed, 2);
    assert_eq!(summary.failure_counts.get("lock_contention"), Some(&1));
    assert_eq!(summary.skip_counts.get("dependency_failed"), Some(&1));
    // t executed twice, v once (after its dependency finally succeeded).
    assert_eq!(
        executor.calls().iter().filter(|c| **c == t).count(),
        2
    );
    assert_eq!(
        executor.calls().iter().filter(|c| **c == v).count(),
        1
    );
}

/// A second run against an updated target snapshot plans nothing.
#[tokio::test]
async fn replanning_fixed_target_is_idempotent() {
    let t = key("hr", "t1", ObjectType::Table);
    let pipeline = Pipeline::build(
        vec![CatalogObject::new(t.clone())],
        vec![],
        RemapRuleSet::new(),
        CompatibilityTable::new("test"),
    );

    let target = CatalogSnapshot::new(vec![CatalogObject::new(t)], vec![]).unwrap();
    let plan = pipeline.plan(&target);
    assert!(plan.is_empty());

    let summary = Orchestrator::new(Arc::new(RecordingExecutor::new()), options())
        .run(plan, None)
        .await
        .unwrap();
    assert_eq!(summary.status, "completed");
    assert_eq!(summary.tasks_planned, 0);
}

/// Config drives the whole pipeline: rules, no-inference types, compatibility
/// table, and execution options all come from one YAML document.
#[tokio::test]
async fn config_driven_run_end_to_end() {
    let yaml = r#"
run:
  workers: 2
  max_rounds: 2
compatibility:
  target_version: "15"
  disallowed_types: [synonym]
resolution:
  rules:
    - source_schema: hr
      source_name: t1
      object_type: table
      target_schema: core
"#;
    let config = Config::from_yaml(yaml).unwrap();

    let t1 = key("hr", "t1", ObjectType::Table);
    let syn = key("hr", "s1", ObjectType::Synonym);

    let source = CatalogSnapshot::new(
        vec![
            CatalogObject::new(t1.clone()).with_definition("create table hr.t1 (id int)"),
            CatalogObject::new(syn.clone()),
        ],
        vec![],
    )
    .unwrap();
    let graph = DependencyGraph::build(&source);
    let closures = TransitiveClosureCache::compute(&source, &graph);
    let mapping = RemapEngine::new(&source, &graph, &closures)
        .with_no_inference_types(config.resolution.no_schema_inference_types.clone())
        .resolve(&config.remap_rules());
    let classification = Classifier::new(&source, &graph).classify(&config.compatibility_table());
    let sanitizer = SanitizerRegistry::with_builtins();

    assert_eq!(
        mapping.target_of(&t1),
        Some(&TargetIdentity::new("core", "t1"))
    );
    assert_eq!(classification[&syn].state, SupportState::Unsupported);

    let plan = Planner::new(&source, &graph, &mapping, &classification, &sanitizer)
        .plan(&CatalogSnapshot::empty());
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.tasks[0].action, ActionKind::Create);

    let summary = Orchestrator::new(
        Arc::new(RecordingExecutor::new()),
        config.execution_options(),
    )
    .run(plan, None)
    .await
    .unwrap();
    assert_eq!(summary.status, "completed");
    assert_eq!(summary.objects_fixed, 1);
}

/// Resumable run: a failed first run records state, a second run with the
/// same config hash skips the already-completed object and finishes the rest.
#[tokio::test]
async fn failed_run_resumes_from_state_file() {
    let t = key("hr", "t1", ObjectType::Table);
    let u = key("hr", "t2", ObjectType::Table);

    let pipeline = Pipeline::build(
        vec![CatalogObject::new(t.clone()), CatalogObject::new(u.clone())],
        vec![],
        RemapRuleSet::new(),
        CompatibilityTable::new("test"),
    );

    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");

    // First run: t2 fails structurally and stays failed.
    let mut opts = options();
    opts.max_rounds = 1;
    let executor = Arc::new(RecordingExecutor::new().fail_once(
        &u,
        ExecutionFailure::new(FailureKind::UnsupportedSyntax, "cannot parse"),
    ));
    let summary = Orchestrator::new(executor, opts.clone())
        .with_state_file(state_path.clone(), "cfg-hash")
        .run(pipeline.plan(&CatalogSnapshot::empty()), None)
        .await
        .unwrap();
    assert_eq!(summary.status, "failed");
    assert_eq!(summary.objects_fixed, 1);

    // Second run: only the failed object is attempted again.
    let executor = Arc::new(RecordingExecutor::new());
    let summary = Orchestrator::new(executor.clone(), opts)
        .with_state_file(state_path, "cfg-hash")
        .run(pipeline.plan(&CatalogSnapshot::empty()), None)
        .await
        .unwrap();
    assert_eq!(summary.status, "completed");
    assert_eq!(executor.calls(), vec![u]);
}

/// The run summary serializes for external reporting.
#[tokio::test]
async fn run_summary_serializes_to_json() {
    let t = key("hr", "t1", ObjectType::Table);
    let pipeline = Pipeline::build(
        vec![CatalogObject::new(t)],
        vec![],
        RemapRuleSet::new(),
        CompatibilityTable::new("test"),
    );

    let summary = Orchestrator::new(Arc::new(RecordingExecutor::new()), options())
        .run(pipeline.plan(&CatalogSnapshot::empty()), None)
        .await
        .unwrap();

    let json = summary.to_json().unwrap();
    assert!(json.contains("\"status\""));
    assert!(json.contains("\"per_round\""));
}
