//! Support-state classification.
//!
//! Seeds an unsupported set from an injected, versionable
//! [`CompatibilityTable`], then propagates blockage outward over the reverse
//! dependency graph in one closed-set pass: any object with a direct or
//! transitive edge into the unsupported set becomes Blocked, its reason
//! naming the nearest blocking ancestor (the direct dependency through which
//! the block first arrives). Blocked and Unsupported stay distinct: an object
//! blocked only by a dependency is not itself intrinsically unsupported.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::graph::DependencyGraph;
use crate::model::{CatalogObject, CatalogSnapshot, ObjectKey, ObjectStatus, ObjectType, StorageKind};

/// Per-object support state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportState {
    /// Compatible and buildable on the target.
    Supported,
    /// Intrinsically incompatible with the target engine.
    Unsupported,
    /// Compatible in isolation but unbuildable because a dependency is
    /// unsupported or itself blocked.
    Blocked,
}

/// Classification result for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Support state.
    pub state: SupportState,

    /// Human-readable reason for Unsupported/Blocked states.
    pub reason: Option<String>,

    /// Nearest blocking ancestor for Blocked objects.
    pub blocker: Option<ObjectKey>,
}

impl Classification {
    fn supported() -> Self {
        Self {
            state: SupportState::Supported,
            reason: None,
            blocker: None,
        }
    }

    fn unsupported(reason: String) -> Self {
        Self {
            state: SupportState::Unsupported,
            reason: Some(reason),
            blocker: None,
        }
    }

    fn blocked(blocker: ObjectKey) -> Self {
        Self {
            state: SupportState::Blocked,
            reason: Some(format!("depends on {} which cannot be built", blocker)),
            blocker: Some(blocker),
        }
    }

    /// Whether the object needs no remediation gatekeeping.
    pub fn is_supported(&self) -> bool {
        self.state == SupportState::Supported
    }
}

/// A named dialect-incompatibility rule matching on DDL content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialectRule {
    /// Rule name, used in reasons.
    pub name: String,

    /// Restrict the rule to one object type (None = any type).
    pub object_type: Option<ObjectType>,

    /// Case-insensitive substring the object's definition must contain.
    pub definition_contains: String,
}

/// Injected static rule set defining intrinsic incompatibilities.
///
/// Versionable and externally supplied; the classifier hard-codes nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityTable {
    /// Rule-set version label, carried into logs.
    pub version: String,

    /// Object types the target engine cannot host at all.
    #[serde(default)]
    pub disallowed_types: BTreeSet<ObjectType>,

    /// Storage kinds the target engine cannot host.
    #[serde(default)]
    pub disallowed_storage: BTreeSet<StorageKind>,

    /// Dialect-level incompatibility rules.
    #[serde(default)]
    pub dialect_rules: Vec<DialectRule>,
}

impl CompatibilityTable {
    /// Create an empty table (everything supported).
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    /// Disallow an object type.
    pub fn disallow_type(mut self, ty: ObjectType) -> Self {
        self.disallowed_types.insert(ty);
        self
    }

    /// Disallow a storage kind.
    pub fn disallow_storage(mut self, storage: StorageKind) -> Self {
        self.disallowed_storage.insert(storage);
        self
    }

    /// Add a dialect rule.
    pub fn with_dialect_rule(mut self, rule: DialectRule) -> Self {
        self.dialect_rules.push(rule);
        self
    }

    /// Check one object for intrinsic incompatibility.
    ///
    /// Returns the reason when the object can never be built on the target,
    /// independent of its dependencies.
    pub fn intrinsic_incompatibility(&self, obj: &CatalogObject) -> Option<String> {
        if self.disallowed_types.contains(&obj.key.object_type) {
            return Some(format!(
                "object type {} is not supported by the target engine",
                obj.key.object_type
            ));
        }

        if let Some(storage) = &obj.storage {
            if self.disallowed_storage.contains(storage) {
                return Some(format!(
                    "storage kind {:?} is not supported by the target engine",
                    storage
                ));
            }
        }

        if obj.status == ObjectStatus::Invalid {
            return Some("object is invalid in the source catalog".to_string());
        }

        if let Some(definition) = &obj.definition {
            let lowered = definition.to_lowercase();
            for rule in &self.dialect_rules {
                if let Some(ty) = rule.object_type {
                    if ty != obj.key.object_type {
                        continue;
                    }
                }
                if lowered.contains(&rule.definition_contains.to_lowercase()) {
                    return Some(format!("dialect incompatibility: {}", rule.name));
                }
            }
        }

        None
    }
}

/// Fixed-point support classifier over a snapshot and its graph.
pub struct Classifier<'a> {
    snapshot: &'a CatalogSnapshot,
    graph: &'a DependencyGraph,
}

impl<'a> Classifier<'a> {
    /// Create a classifier.
    pub fn new(snapshot: &'a CatalogSnapshot, graph: &'a DependencyGraph) -> Self {
        Self { snapshot, graph }
    }

    /// Classify every object in the snapshot.
    pub fn classify(&self, table: &CompatibilityTable) -> BTreeMap<ObjectKey, Classification> {
        let mut result: BTreeMap<ObjectKey, Classification> = BTreeMap::new();

        // Seed: intrinsic incompatibilities.
        let mut frontier: VecDeque<ObjectKey> = VecDeque::new();
        for obj in self.snapshot.objects() {
            if let Some(reason) = table.intrinsic_incompatibility(obj) {
                debug!("{} unsupported: {}", obj.key, reason);
                result.insert(obj.key.clone(), Classification::unsupported(reason));
                frontier.push_back(obj.key.clone());
            }
        }

        // Propagate blockage outward over the reverse graph. Closed-set
        // discipline: an object reaching a terminal state is never revisited,
        // so cycles terminate and each object's state is final when computed.
        while let Some(node) = frontier.pop_front() {
            for dependent in self.graph.dependents(&node) {
                if dependent == &node || result.contains_key(dependent) {
                    continue;
                }
                result.insert(dependent.clone(), Classification::blocked(node.clone()));
                frontier.push_back(dependent.clone());
            }
        }

        // Everything unreached is supported.
        for key in self.snapshot.keys() {
            result
                .entry(key.clone())
                .or_insert_with(Classification::supported);
        }

        let blocked = result
            .values()
            .filter(|c| c.state == SupportState::Blocked)
            .count();
        let unsupported = result
            .values()
            .filter(|c| c.state == SupportState::Unsupported)
            .count();
        info!(
            "Classified {} objects with rule set '{}': {} unsupported, {} blocked",
            result.len(),
            table.version,
            unsupported,
            blocked
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CatalogObject, DependencyEdge};

    fn key(name: &str, ty: ObjectType) -> ObjectKey {
        ObjectKey::new("s", name, ty)
    }

    fn classify(
        objects: Vec<CatalogObject>,
        edges: Vec<DependencyEdge>,
        table: &CompatibilityTable,
    ) -> BTreeMap<ObjectKey, Classification> {
        let snapshot = CatalogSnapshot::new(objects, edges).unwrap();
        let graph = DependencyGraph::build(&snapshot);
        Classifier::new(&snapshot, &graph).classify(table)
    }

    #[test]
    fn test_unsupported_storage_blocks_dependent_view() {
        // Table T1 (unsupported storage) + View V1 referencing T1
        // => V1 = Blocked, reason -> T1.
        let t1 = key("t1", ObjectType::Table);
        let v1 = key("v1", ObjectType::View);
        let table = CompatibilityTable::new("v1").disallow_storage(StorageKind::MemoryOptimized);

        let result = classify(
            vec![
                CatalogObject::new(t1.clone()).with_storage(StorageKind::MemoryOptimized),
                CatalogObject::new(v1.clone()),
            ],
            vec![DependencyEdge::reference(v1.clone(), t1.clone())],
            &table,
        );

        assert_eq!(result[&t1].state, SupportState::Unsupported);
        assert_eq!(result[&v1].state, SupportState::Blocked);
        assert_eq!(result[&v1].blocker, Some(t1));
    }

    #[test]
    fn test_blocked_is_not_unsupported() {
        let t1 = key("t1", ObjectType::Table);
        let v1 = key("v1", ObjectType::View);
        let table = CompatibilityTable::new("v1").disallow_storage(StorageKind::External);

        let result = classify(
            vec![
                CatalogObject::new(t1.clone()).with_storage(StorageKind::External),
                CatalogObject::new(v1.clone()),
            ],
            vec![DependencyEdge::reference(v1.clone(), t1.clone())],
            &table,
        );

        assert_ne!(result[&v1].state, SupportState::Unsupported);
        assert_eq!(result[&v1].state, SupportState::Blocked);
    }

    #[test]
    fn test_transitive_block_names_nearest_ancestor() {
        // v2 -> v1 -> t1 (unsupported): v2's blocker is v1, not t1.
        let t1 = key("t1", ObjectType::Table);
        let v1 = key("v1", ObjectType::View);
        let v2 = key("v2", ObjectType::View);
        let table = CompatibilityTable::new("v1").disallow_storage(StorageKind::ColumnStore);

        let result = classify(
            vec![
                CatalogObject::new(t1.clone()).with_storage(StorageKind::ColumnStore),
                CatalogObject::new(v1.clone()),
                CatalogObject::new(v2.clone()),
            ],
            vec![
                DependencyEdge::reference(v1.clone(), t1.clone()),
                DependencyEdge::reference(v2.clone(), v1.clone()),
            ],
            &table,
        );

        assert_eq!(result[&v1].blocker, Some(t1));
        assert_eq!(result[&v2].state, SupportState::Blocked);
        assert_eq!(result[&v2].blocker, Some(v1));
    }

    #[test]
    fn test_attached_object_of_blocked_table_is_blocked() {
        let t1 = key("t1", ObjectType::Table);
        let idx = key("idx1", ObjectType::Index);
        let table = CompatibilityTable::new("v1").disallow_storage(StorageKind::MemoryOptimized);

        let result = classify(
            vec![
                CatalogObject::new(t1.clone()).with_storage(StorageKind::MemoryOptimized),
                CatalogObject::new(idx.clone()).with_owner(t1.clone()),
            ],
            vec![],
            &table,
        );

        assert_eq!(result[&idx].state, SupportState::Blocked);
        assert_eq!(result[&idx].blocker, Some(t1));
    }

    #[test]
    fn test_invalid_source_status_is_unsupported() {
        let v1 = key("v1", ObjectType::View);
        let result = classify(
            vec![CatalogObject::new(v1.clone()).with_status(ObjectStatus::Invalid)],
            vec![],
            &CompatibilityTable::new("v1"),
        );
        assert_eq!(result[&v1].state, SupportState::Unsupported);
    }

    #[test]
    fn test_dialect_rule_matches_definition() {
        let p = key("p1", ObjectType::Procedure);
        let table = CompatibilityTable::new("v2").with_dialect_rule(DialectRule {
            name: "no-linked-servers".into(),
            object_type: Some(ObjectType::Procedure),
            definition_contains: "openquery".into(),
        });

        let result = classify(
            vec![CatalogObject::new(p.clone())
                .with_definition("CREATE PROCEDURE p1 AS SELECT * FROM OPENQUERY(lnk, '...')")],
            vec![],
            &table,
        );
        assert_eq!(result[&p].state, SupportState::Unsupported);
        assert!(result[&p].reason.as_deref().unwrap().contains("no-linked-servers"));
    }

    #[test]
    fn test_independent_siblings_unaffected() {
        let t1 = key("t1", ObjectType::Table);
        let t2 = key("t2", ObjectType::Table);
        let v2 = key("v2", ObjectType::View);
        let table = CompatibilityTable::new("v1").disallow_storage(StorageKind::External);

        let result = classify(
            vec![
                CatalogObject::new(t1.clone()).with_storage(StorageKind::External),
                CatalogObject::new(t2.clone()),
                CatalogObject::new(v2.clone()),
            ],
            vec![DependencyEdge::reference(v2.clone(), t2.clone())],
            &table,
        );

        assert_eq!(result[&t2].state, SupportState::Supported);
        assert_eq!(result[&v2].state, SupportState::Supported);
    }

    #[test]
    fn test_cyclic_classification_terminates() {
        let t1 = key("t1", ObjectType::Table);
        let v1 = key("v1", ObjectType::View);
        let v2 = key("v2", ObjectType::View);
        let table = CompatibilityTable::new("v1").disallow_storage(StorageKind::External);

        let result = classify(
            vec![
                CatalogObject::new(t1.clone()).with_storage(StorageKind::External),
                CatalogObject::new(v1.clone()),
                CatalogObject::new(v2.clone()),
            ],
            vec![
                DependencyEdge::reference(v1.clone(), v2.clone()),
                DependencyEdge::reference(v2.clone(), v1.clone()),
                DependencyEdge::reference(v1.clone(), t1.clone()),
            ],
            &table,
        );

        assert_eq!(result[&v1].state, SupportState::Blocked);
        assert_eq!(result[&v2].state, SupportState::Blocked);
    }
}
