//! Memoized transitive closure of base-table reachability.
//!
//! Computed once per snapshot by reverse-graph breadth-first propagation
//! seeded from table nodes: the fact "table T is reachable" is pushed outward
//! from T to its dependents. Each (node, table) pair is processed at most
//! once, so the computation is O(edges) per table, order-independent, and
//! terminates for arbitrary cycles. Cycle members end up sharing identical
//! closures. Consumers (remap engine, classifier) treat the cache as
//! read-only.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::model::{CatalogSnapshot, ObjectKey, ObjectType};

use super::DependencyGraph;

/// Per-object set of transitively reachable base tables.
#[derive(Debug)]
pub struct TransitiveClosureCache {
    closures: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,
    empty: BTreeSet<ObjectKey>,
}

impl TransitiveClosureCache {
    /// Compute closures for every object in the snapshot.
    pub fn compute(snapshot: &CatalogSnapshot, graph: &DependencyGraph) -> Self {
        let mut closures: BTreeMap<ObjectKey, BTreeSet<ObjectKey>> = snapshot
            .keys()
            .map(|k| (k.clone(), BTreeSet::new()))
            .collect();

        // Frontier of (node, table) facts still to propagate. A table is a
        // member of its own closure.
        let mut frontier: VecDeque<(ObjectKey, ObjectKey)> = VecDeque::new();
        for key in snapshot.keys() {
            if key.object_type == ObjectType::Table {
                if let Some(set) = closures.get_mut(key) {
                    set.insert(key.clone());
                }
                frontier.push_back((key.clone(), key.clone()));
            }
        }

        // Closed-set discipline: a node is never re-expanded for a table
        // already recorded as reachable, which guarantees termination
        // regardless of cycle length.
        while let Some((node, table)) = frontier.pop_front() {
            for dependent in graph.dependents(&node) {
                if dependent == &node {
                    continue;
                }
                let set = closures.entry(dependent.clone()).or_default();
                if set.insert(table.clone()) {
                    frontier.push_back((dependent.clone(), table.clone()));
                }
            }
        }

        Self {
            closures,
            empty: BTreeSet::new(),
        }
    }

    /// Base tables transitively reachable from `key`.
    ///
    /// Unknown keys yield an empty set.
    pub fn tables_for(&self, key: &ObjectKey) -> &BTreeSet<ObjectKey> {
        self.closures.get(key).unwrap_or(&self.empty)
    }

    /// Number of objects with a computed closure.
    pub fn len(&self) -> usize {
        self.closures.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }
}
