//! Dependency graph construction over catalog snapshots.
//!
//! The builder converts raw [`DependencyEdge`] facts into forward/reverse
//! adjacency keyed by [`ObjectKey`]. Reference edges pointing at an attached
//! object (index, constraint, trigger, sequence) are redirected to that
//! object's owning table/view, since the attached object cannot exist apart
//! from its owner. The graph holds keys only; it never owns catalog objects.

pub mod closure;

pub use closure::TransitiveClosureCache;

use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::model::{CatalogSnapshot, ObjectKey};

/// Forward/reverse adjacency over object keys.
///
/// Building is idempotent given identical input: duplicate edges collapse
/// into the adjacency sets, and iteration order is deterministic (BTree).
/// Self-edges are retained; traversals skip them so they never loop.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// dependent -> objects it depends on.
    forward: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,

    /// referenced -> objects depending on it.
    reverse: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,
}

impl DependencyGraph {
    /// Build the graph from a snapshot's objects and edges.
    ///
    /// Edges with endpoints unknown to the snapshot are dropped with a log
    /// entry rather than failing the build. Ownership links recorded on
    /// attached objects are materialized as dependency edges so attached
    /// objects always depend on their owner.
    pub fn build(snapshot: &CatalogSnapshot) -> Self {
        let mut graph = Self::default();

        // Every object is a node even if it has no edges.
        for key in snapshot.keys() {
            graph.forward.entry(key.clone()).or_default();
            graph.reverse.entry(key.clone()).or_default();
        }

        for edge in snapshot.edges() {
            if !snapshot.contains(&edge.dependent) {
                warn!(
                    "Dropping edge with unknown dependent: {} -> {}",
                    edge.dependent, edge.referenced
                );
                continue;
            }
            if !snapshot.contains(&edge.referenced) {
                warn!(
                    "Dropping edge with unknown referenced object: {} -> {}",
                    edge.dependent, edge.referenced
                );
                continue;
            }

            let referenced = Self::resolve_attached(snapshot, &edge.referenced);
            graph.insert(edge.dependent.clone(), referenced);
        }

        // Attached objects depend on their owner.
        for obj in snapshot.objects() {
            if let Some(owner) = &obj.owner {
                if snapshot.contains(owner) {
                    graph.insert(obj.key.clone(), owner.clone());
                } else {
                    warn!(
                        "Attached object {} names unknown owner {}, skipping ownership edge",
                        obj.key, owner
                    );
                }
            }
        }

        graph
    }

    /// Follow owner links until a non-attached object is reached.
    ///
    /// A dependency on an index/constraint/trigger/sequence is really a
    /// dependency on the table or view that owns it.
    fn resolve_attached(snapshot: &CatalogSnapshot, key: &ObjectKey) -> ObjectKey {
        let mut current = key.clone();
        let mut seen = BTreeSet::new();
        while current.object_type.is_attached() {
            if !seen.insert(current.clone()) {
                // Malformed ownership loop; keep the last key rather than spin.
                break;
            }
            match snapshot.get(&current).and_then(|o| o.owner.clone()) {
                Some(owner) if snapshot.contains(&owner) => current = owner,
                _ => break,
            }
        }
        current
    }

    fn insert(&mut self, dependent: ObjectKey, referenced: ObjectKey) {
        self.forward
            .entry(dependent.clone())
            .or_default()
            .insert(referenced.clone());
        self.reverse
            .entry(referenced)
            .or_default()
            .insert(dependent);
    }

    /// Objects that `key` directly depends on.
    pub fn dependencies(&self, key: &ObjectKey) -> impl Iterator<Item = &ObjectKey> {
        self.forward.get(key).into_iter().flatten()
    }

    /// Objects that directly depend on `key`.
    pub fn dependents(&self, key: &ObjectKey) -> impl Iterator<Item = &ObjectKey> {
        self.reverse.get(key).into_iter().flatten()
    }

    /// All nodes in deterministic order.
    pub fn nodes(&self) -> impl Iterator<Item = &ObjectKey> {
        self.forward.keys()
    }

    /// Total number of distinct edges.
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }
}
