//! Fixup planning.
//!
//! Restricts the dependency graph to the objects that actually need
//! remediation on the target, orders them dependency-first (Kahn), and emits
//! immutable [`FixupTask`]s whose dependency sets name same-round task ids.
//! Cyclic members cannot be ordered; they are scheduled as a best-effort
//! final batch with a warning instead of aborting the whole plan.
//! Re-planning against an already-fixed target yields an empty task list.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::Classification;
use crate::graph::DependencyGraph;
use crate::model::{CatalogSnapshot, ObjectKey, ObjectStatus};
use crate::remap::{ResolvedMapping, TargetIdentity};
use crate::sanitize::{SanitizeContext, SanitizerRegistry};

/// What a fixup task does on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// The object is missing from the target and must be created.
    Create,
    /// The object exists on the target but is invalid and must be rebuilt.
    Recompile,
}

/// One unit of generated remediation work for one object.
///
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixupTask {
    /// Task identifier, unique within a run.
    pub id: Uuid,

    /// Source object being remediated.
    pub object: ObjectKey,

    /// Action to take.
    pub action: ActionKind,

    /// Resolved target identity (fallback included for conflicted objects).
    pub target: TargetIdentity,

    /// Sanitized statements to execute, possibly empty when the extractor
    /// captured no definition.
    pub statements: Vec<String>,

    /// Same-round tasks that must reach a terminal outcome first.
    pub depends_on: BTreeSet<Uuid>,
}

/// An ordered remediation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixupPlan {
    /// Tasks in execution order (dependencies first, cyclic tail last).
    pub tasks: Vec<FixupTask>,

    /// Objects that were part of a dependency cycle and scheduled
    /// best-effort at the end of the plan.
    pub cyclic_members: Vec<ObjectKey>,
}

impl FixupPlan {
    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Builds fixup plans from classifier and remap output.
pub struct Planner<'a> {
    source: &'a CatalogSnapshot,
    graph: &'a DependencyGraph,
    mapping: &'a ResolvedMapping,
    classification: &'a BTreeMap<ObjectKey, Classification>,
    sanitizer: &'a SanitizerRegistry,
}

impl<'a> Planner<'a> {
    /// Create a planner over one run's derived structures.
    pub fn new(
        source: &'a CatalogSnapshot,
        graph: &'a DependencyGraph,
        mapping: &'a ResolvedMapping,
        classification: &'a BTreeMap<ObjectKey, Classification>,
        sanitizer: &'a SanitizerRegistry,
    ) -> Self {
        Self {
            source,
            graph,
            mapping,
            classification,
            sanitizer,
        }
    }

    /// The remediation set: supported source objects that are missing from
    /// the target under their resolved identity, or present but invalid.
    pub fn pending_objects(&self, target: &CatalogSnapshot) -> Vec<(ObjectKey, ActionKind)> {
        let mut pending = Vec::new();

        for (key, class) in self.classification {
            if !class.is_supported() {
                continue;
            }
            let identity = match self.mapping.target_of(key) {
                Some(identity) => identity.clone(),
                None => TargetIdentity::identity_of(key),
            };
            let target_key = ObjectKey::new(&identity.schema, &identity.name, key.object_type);

            match target.get(&target_key) {
                None => pending.push((key.clone(), ActionKind::Create)),
                Some(obj) if obj.status != ObjectStatus::Valid => {
                    pending.push((key.clone(), ActionKind::Recompile))
                }
                Some(_) => {}
            }
        }

        pending
    }

    /// Build the dependency-ordered plan.
    pub fn plan(&self, target: &CatalogSnapshot) -> FixupPlan {
        let pending = self.pending_objects(target);
        if pending.is_empty() {
            debug!("Target catalog is already reconciled, nothing to plan");
            return FixupPlan {
                tasks: Vec::new(),
                cyclic_members: Vec::new(),
            };
        }

        let actions: BTreeMap<ObjectKey, ActionKind> = pending.into_iter().collect();
        let (ordered, cyclic_members) = self.order(&actions);

        info!(
            "Planned {} fixup tasks ({} cyclic, scheduled best-effort)",
            ordered.len(),
            cyclic_members.len()
        );

        // Assign ids in order; dependency sets reference only tasks that come
        // earlier, so intra-cycle edges drop out and the round cannot deadlock.
        let mut ids: BTreeMap<ObjectKey, Uuid> = BTreeMap::new();
        let mut tasks = Vec::with_capacity(ordered.len());

        for key in ordered {
            let id = Uuid::new_v4();
            let depends_on: BTreeSet<Uuid> = self
                .graph
                .dependencies(&key)
                .filter(|d| *d != &key)
                .filter_map(|d| ids.get(d).copied())
                .collect();

            let identity = match self.mapping.target_of(&key) {
                Some(identity) => identity.clone(),
                None => TargetIdentity::identity_of(&key),
            };
            let action = actions[&key];
            let statements = self.statements_for(&key, &identity);

            ids.insert(key.clone(), id);
            tasks.push(FixupTask {
                id,
                object: key,
                action,
                target: identity,
                statements,
                depends_on,
            });
        }

        FixupPlan {
            tasks,
            cyclic_members,
        }
    }

    /// Kahn topological sort restricted to the pending set; members of cycles
    /// are returned separately and appended to the order.
    fn order(
        &self,
        actions: &BTreeMap<ObjectKey, ActionKind>,
    ) -> (Vec<ObjectKey>, Vec<ObjectKey>) {
        let mut indegree: BTreeMap<&ObjectKey, usize> = BTreeMap::new();
        for key in actions.keys() {
            let degree = self
                .graph
                .dependencies(key)
                .filter(|d| *d != key && actions.contains_key(d))
                .count();
            indegree.insert(key, degree);
        }

        let mut ready: VecDeque<&ObjectKey> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut ordered = Vec::with_capacity(actions.len());

        while let Some(key) = ready.pop_front() {
            ordered.push(key.clone());
            for dependent in self.graph.dependents(key) {
                if dependent == key || !actions.contains_key(dependent) {
                    continue;
                }
                if let Some(degree) = indegree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        let cyclic: Vec<ObjectKey> = actions
            .keys()
            .filter(|k| !ordered.contains(k))
            .cloned()
            .collect();
        if !cyclic.is_empty() {
            warn!(
                "{} objects form dependency cycles; scheduling them as a best-effort final batch",
                cyclic.len()
            );
            ordered.extend(cyclic.iter().cloned());
        }

        (ordered, cyclic)
    }

    fn statements_for(&self, key: &ObjectKey, identity: &TargetIdentity) -> Vec<String> {
        let definition = self.source.get(key).and_then(|o| o.definition.as_deref());
        match definition {
            Some(ddl) => {
                let ctx = SanitizeContext {
                    source: key.clone(),
                    target: identity.clone(),
                };
                vec![self.sanitizer.sanitize(key.object_type, ddl, &ctx)]
            }
            None => Vec::new(),
        }
    }
}
