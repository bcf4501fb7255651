//! Remap resolution engine.
//!
//! Resolves each source object's target identity under schema consolidation.
//! Precedence order:
//!
//! 1. Explicit [`RemapRule`] supplied by the operator.
//! 2. Attached types inherit the owning table/view's resolved target schema.
//! 3. Types configured "no-schema-inference" default to the source schema.
//! 4. Otherwise infer from the transitive closure: if every closure table
//!    resolves to one target schema, adopt it.
//!
//! Resolution is a tagged result: conflicts and cycles are surfaced as
//! distinct outcomes with a deterministic source-schema fallback, never
//! masked as a silent 1:1 identity mapping.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::graph::{DependencyGraph, TransitiveClosureCache};
use crate::model::{CatalogSnapshot, ObjectKey, ObjectType};

/// Target-side identity of a remapped object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetIdentity {
    /// Target schema (lowercased).
    pub schema: String,

    /// Target object name (lowercased).
    pub name: String,
}

impl TargetIdentity {
    /// Create a case-normalized target identity.
    pub fn new(schema: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            schema: schema.as_ref().to_lowercase(),
            name: name.as_ref().to_lowercase(),
        }
    }

    /// The 1:1 identity of a source key (used as conflict fallback).
    pub fn identity_of(key: &ObjectKey) -> Self {
        Self {
            schema: key.schema.clone(),
            name: key.name.clone(),
        }
    }

    /// Fully qualified target name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// An explicit source→target identity mapping, highest precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapRule {
    /// Source object the rule applies to.
    pub source: ObjectKey,

    /// Target identity to map to.
    pub target: TargetIdentity,
}

impl RemapRule {
    /// Create a rule.
    pub fn new(source: ObjectKey, target: TargetIdentity) -> Self {
        Self { source, target }
    }
}

/// Externally configured set of explicit rules, evaluated in declared order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemapRuleSet {
    rules: Vec<RemapRule>,
}

impl RemapRuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of rules, preserving order.
    pub fn from_rules(rules: Vec<RemapRule>) -> Self {
        Self { rules }
    }

    /// Add a rule.
    pub fn push(&mut self, rule: RemapRule) {
        self.rules.push(rule);
    }

    /// Rules in declared order.
    pub fn rules(&self) -> &[RemapRule] {
        &self.rules
    }
}

/// How a resolved target identity was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// An explicit rule named this object.
    Explicit,
    /// Inherited from the owning table/view.
    ParentInherited,
    /// Inferred from the closure (or the source-schema default for
    /// no-inference types).
    Inferred,
}

/// Tagged per-object resolution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Resolution {
    /// Target identity resolved normally.
    Resolved {
        target: TargetIdentity,
        provenance: Provenance,
    },
    /// Resolution conflicted (duplicate target, empty or ambiguous closure);
    /// the fallback is the deterministic source-schema identity.
    Conflict { fallback: TargetIdentity },
    /// The object is a member of a dependency cycle; source-schema fallback.
    CycleDetected { fallback: TargetIdentity },
}

impl Resolution {
    /// Effective target identity, fallback included.
    pub fn target(&self) -> &TargetIdentity {
        match self {
            Resolution::Resolved { target, .. } => target,
            Resolution::Conflict { fallback } | Resolution::CycleDetected { fallback } => fallback,
        }
    }

    /// Whether this is a clean resolution.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }
}

/// A surfaced resolution conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RemapConflict {
    /// Two explicit rules target the same (schema, name, type). The second
    /// rule is excluded from the mapping.
    DuplicateTarget {
        source: ObjectKey,
        target: TargetIdentity,
        first_source: ObjectKey,
    },
    /// Closure tables resolve to more than one target schema.
    AmbiguousClosure {
        object: ObjectKey,
        schemas: Vec<String>,
    },
    /// No closure tables and no rule to decide the target schema.
    EmptyClosure { object: ObjectKey },
    /// A dependency cycle; recorded once per cycle, listing every member.
    GraphCycle { members: Vec<ObjectKey> },
}

/// Resolution output: per-object tagged resolutions plus surfaced conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedMapping {
    resolutions: BTreeMap<ObjectKey, Resolution>,
    conflicts: Vec<RemapConflict>,
}

impl ResolvedMapping {
    /// Resolution for one object.
    pub fn resolution(&self, key: &ObjectKey) -> Option<&Resolution> {
        self.resolutions.get(key)
    }

    /// Effective target identity for one object, fallback included.
    pub fn target_of(&self, key: &ObjectKey) -> Option<&TargetIdentity> {
        self.resolutions.get(key).map(Resolution::target)
    }

    /// All resolutions in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectKey, &Resolution)> {
        self.resolutions.iter()
    }

    /// Surfaced conflicts.
    pub fn conflicts(&self) -> &[RemapConflict] {
        &self.conflicts
    }

    /// Number of resolved objects.
    pub fn len(&self) -> usize {
        self.resolutions.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty()
    }
}

/// The resolution engine. Borrows the snapshot, graph, and closure cache;
/// all inputs are read-only.
pub struct RemapEngine<'a> {
    snapshot: &'a CatalogSnapshot,
    graph: &'a DependencyGraph,
    closures: &'a TransitiveClosureCache,
    no_inference_types: BTreeSet<ObjectType>,
}

impl<'a> RemapEngine<'a> {
    /// Create an engine over a snapshot and its derived structures.
    pub fn new(
        snapshot: &'a CatalogSnapshot,
        graph: &'a DependencyGraph,
        closures: &'a TransitiveClosureCache,
    ) -> Self {
        Self {
            snapshot,
            graph,
            closures,
            no_inference_types: BTreeSet::new(),
        }
    }

    /// Configure object types that never infer a schema from their closure
    /// and default to the source schema instead.
    pub fn with_no_inference_types(
        mut self,
        types: impl IntoIterator<Item = ObjectType>,
    ) -> Self {
        self.no_inference_types = types.into_iter().collect();
        self
    }

    /// Resolve the target identity of every object in the snapshot.
    ///
    /// Deterministic across repeated runs on identical input: rules are
    /// evaluated in declared order and all traversal is over ordered maps.
    pub fn resolve(&self, rules: &RemapRuleSet) -> ResolvedMapping {
        let mut conflicts = Vec::new();

        // Phase 1: accept explicit rules, excluding duplicate-target rules.
        let (accepted, rejected_sources) = self.accept_rules(rules, &mut conflicts);

        // Phase 2: detect dependency cycles among non-table nodes. One
        // conflict record per cycle, every member listed exactly once.
        let cycles = self.find_cycles();
        let mut in_cycle: BTreeSet<ObjectKey> = BTreeSet::new();
        for members in &cycles {
            for m in members {
                in_cycle.insert(m.clone());
            }
            warn!(
                "Dependency cycle of {} objects, forcing source-schema fallback",
                members.len()
            );
            conflicts.push(RemapConflict::GraphCycle {
                members: members.clone(),
            });
        }

        // Phase 3: resolve in key order.
        let mut resolutions: BTreeMap<ObjectKey, Resolution> = BTreeMap::new();
        for key in self.snapshot.keys() {
            let resolution = self.resolve_one(
                key,
                &accepted,
                &rejected_sources,
                &in_cycle,
                &mut conflicts,
            );
            resolutions.insert(key.clone(), resolution);
        }

        debug!(
            "Resolved {} objects with {} conflicts",
            resolutions.len(),
            conflicts.len()
        );

        ResolvedMapping {
            resolutions,
            conflicts,
        }
    }

    /// Validate explicit rules; the second rule targeting an occupied
    /// (schema, name, type) is excluded and surfaced, never silently dropped.
    fn accept_rules(
        &self,
        rules: &RemapRuleSet,
        conflicts: &mut Vec<RemapConflict>,
    ) -> (BTreeMap<ObjectKey, TargetIdentity>, BTreeSet<ObjectKey>) {
        let mut accepted: BTreeMap<ObjectKey, TargetIdentity> = BTreeMap::new();
        let mut occupied: BTreeMap<ObjectKey, ObjectKey> = BTreeMap::new();
        let mut rejected: BTreeSet<ObjectKey> = BTreeSet::new();

        for rule in rules.rules() {
            if accepted.contains_key(&rule.source) {
                warn!(
                    "Ignoring repeated rule for {} (first rule wins)",
                    rule.source
                );
                continue;
            }
            let target_key = ObjectKey::new(
                &rule.target.schema,
                &rule.target.name,
                rule.source.object_type,
            );
            if let Some(first_source) = occupied.get(&target_key) {
                warn!(
                    "Rules for {} and {} both target {}; excluding the later rule",
                    first_source,
                    rule.source,
                    rule.target.full_name()
                );
                conflicts.push(RemapConflict::DuplicateTarget {
                    source: rule.source.clone(),
                    target: rule.target.clone(),
                    first_source: first_source.clone(),
                });
                rejected.insert(rule.source.clone());
                continue;
            }
            occupied.insert(target_key, rule.source.clone());
            accepted.insert(rule.source.clone(), rule.target.clone());
        }

        (accepted, rejected)
    }

    fn resolve_one(
        &self,
        key: &ObjectKey,
        accepted: &BTreeMap<ObjectKey, TargetIdentity>,
        rejected: &BTreeSet<ObjectKey>,
        in_cycle: &BTreeSet<ObjectKey>,
        conflicts: &mut Vec<RemapConflict>,
    ) -> Resolution {
        // 1. Explicit rule.
        if let Some(target) = accepted.get(key) {
            return Resolution::Resolved {
                target: target.clone(),
                provenance: Provenance::Explicit,
            };
        }

        // Sources of excluded duplicate-target rules never revert silently
        // to an unmapped identity; the fallback is tagged as a conflict.
        if rejected.contains(key) {
            return Resolution::Conflict {
                fallback: TargetIdentity::identity_of(key),
            };
        }

        // 2. Attached types inherit from their owner.
        if key.object_type.is_attached() {
            if let Some(owner) = self.owning_base(key) {
                let owner_target =
                    self.base_target(&owner, accepted, in_cycle);
                return Resolution::Resolved {
                    target: TargetIdentity {
                        schema: owner_target.schema,
                        name: key.name.clone(),
                    },
                    provenance: Provenance::ParentInherited,
                };
            }
        }

        // Cycle members fall back to the source schema; the conflict record
        // was already emitted once for the whole cycle.
        if in_cycle.contains(key) {
            return Resolution::CycleDetected {
                fallback: TargetIdentity::identity_of(key),
            };
        }

        // 3. No-schema-inference types keep the source schema.
        if self.no_inference_types.contains(&key.object_type) {
            return Resolution::Resolved {
                target: TargetIdentity::identity_of(key),
                provenance: Provenance::Inferred,
            };
        }

        // 4. Closure-based inference.
        let tables = self.closures.tables_for(key);
        if tables.is_empty() {
            conflicts.push(RemapConflict::EmptyClosure { object: key.clone() });
            return Resolution::Conflict {
                fallback: TargetIdentity::identity_of(key),
            };
        }

        let schemas: BTreeSet<String> = tables
            .iter()
            .map(|t| self.base_target(t, accepted, in_cycle).schema)
            .collect();

        if schemas.len() == 1 {
            let schema = schemas.into_iter().next().unwrap_or_default();
            Resolution::Resolved {
                target: TargetIdentity {
                    schema,
                    name: key.name.clone(),
                },
                provenance: Provenance::Inferred,
            }
        } else {
            conflicts.push(RemapConflict::AmbiguousClosure {
                object: key.clone(),
                schemas: schemas.into_iter().collect(),
            });
            Resolution::Conflict {
                fallback: TargetIdentity::identity_of(key),
            }
        }
    }

    /// Effective target of a base (non-attached) object without recursing
    /// into full resolution: explicit rule, cycle fallback, or closure
    /// inference for views; tables resolve to their rule or identity.
    fn base_target(
        &self,
        key: &ObjectKey,
        accepted: &BTreeMap<ObjectKey, TargetIdentity>,
        in_cycle: &BTreeSet<ObjectKey>,
    ) -> TargetIdentity {
        if let Some(target) = accepted.get(key) {
            return target.clone();
        }
        if key.object_type == ObjectType::Table || in_cycle.contains(key) {
            return TargetIdentity::identity_of(key);
        }
        // Views and other base objects: single-schema closure wins, anything
        // else keeps the source schema.
        let schemas: BTreeSet<String> = self
            .closures
            .tables_for(key)
            .iter()
            .map(|t| {
                accepted
                    .get(t)
                    .map(|id| id.schema.clone())
                    .unwrap_or_else(|| t.schema.clone())
            })
            .collect();
        if schemas.len() == 1 {
            TargetIdentity {
                schema: schemas.into_iter().next().unwrap_or_default(),
                name: key.name.clone(),
            }
        } else {
            TargetIdentity::identity_of(key)
        }
    }

    /// Follow owner links to the owning table/view.
    fn owning_base(&self, key: &ObjectKey) -> Option<ObjectKey> {
        let mut current = self.snapshot.get(key)?.owner.clone()?;
        let mut seen = BTreeSet::new();
        while current.object_type.is_attached() {
            if !seen.insert(current.clone()) {
                return None;
            }
            current = self.snapshot.get(&current)?.owner.clone()?;
        }
        if self.snapshot.contains(&current) {
            Some(current)
        } else {
            None
        }
    }

    /// Strongly connected components of size >= 2 among non-table nodes,
    /// found with an iterative traversal (explicit stacks, no recursion), so
    /// arbitrarily long cycles terminate without exhausting the call stack.
    fn find_cycles(&self) -> Vec<Vec<ObjectKey>> {
        let nodes: Vec<ObjectKey> = self
            .graph
            .nodes()
            .filter(|k| k.object_type != ObjectType::Table)
            .cloned()
            .collect();
        let index_of: BTreeMap<&ObjectKey, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, k)| (k, i))
            .collect();

        let adjacency: Vec<Vec<usize>> = nodes
            .iter()
            .map(|k| {
                self.graph
                    .dependencies(k)
                    .filter(|d| *d != k)
                    .filter_map(|d| index_of.get(d).copied())
                    .collect()
            })
            .collect();

        let n = nodes.len();
        let mut index: Vec<Option<usize>> = vec![None; n];
        let mut lowlink: Vec<usize> = vec![0; n];
        let mut on_stack: Vec<bool> = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut components: Vec<Vec<ObjectKey>> = Vec::new();

        for start in 0..n {
            if index[start].is_some() {
                continue;
            }
            let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
            while let Some(&(v, child)) = frames.last() {
                if child == 0 && index[v].is_none() {
                    index[v] = Some(next_index);
                    lowlink[v] = next_index;
                    next_index += 1;
                    stack.push(v);
                    on_stack[v] = true;
                }
                if child < adjacency[v].len() {
                    let w = adjacency[v][child];
                    if let Some(frame) = frames.last_mut() {
                        frame.1 += 1;
                    }
                    if index[w].is_none() {
                        frames.push((w, 0));
                    } else if on_stack[w] {
                        if let Some(iw) = index[w] {
                            lowlink[v] = lowlink[v].min(iw);
                        }
                    }
                } else {
                    frames.pop();
                    if Some(lowlink[v]) == index[v] {
                        let mut members = Vec::new();
                        while let Some(w) = stack.pop() {
                            on_stack[w] = false;
                            members.push(nodes[w].clone());
                            if w == v {
                                break;
                            }
                        }
                        if members.len() > 1 {
                            members.sort();
                            components.push(members);
                        }
                    }
                    if let Some(&(parent, _)) = frames.last() {
                        lowlink[parent] = lowlink[parent].min(lowlink[v]);
                    }
                }
            }
        }

        components.sort();
        components
    }
}
