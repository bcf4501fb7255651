//! Catalog model types: object identities, per-object metadata, and snapshots.
//!
//! These types provide a database-agnostic, immutable representation of one
//! database's catalog. Snapshots are loaded once by external extraction
//! tooling and never mutated afterwards; everything downstream (graph,
//! closure, mapping, classification) derives from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ReconcileError, Result};

/// Kind of catalog object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    View,
    Index,
    Constraint,
    Trigger,
    Sequence,
    Procedure,
    Function,
    Synonym,
}

impl ObjectType {
    /// Attached types depend on an owning table/view for their existence.
    pub fn is_attached(&self) -> bool {
        matches!(
            self,
            ObjectType::Index | ObjectType::Constraint | ObjectType::Trigger | ObjectType::Sequence
        )
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectType::Table => "table",
            ObjectType::View => "view",
            ObjectType::Index => "index",
            ObjectType::Constraint => "constraint",
            ObjectType::Trigger => "trigger",
            ObjectType::Sequence => "sequence",
            ObjectType::Procedure => "procedure",
            ObjectType::Function => "function",
            ObjectType::Synonym => "synonym",
        };
        f.write_str(s)
    }
}

/// Unique identity of a catalog object within one snapshot.
///
/// Schema and name are case-normalized (lowercased) at construction so that
/// lookups are insensitive to the casing conventions of the source engine.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectKey {
    /// Schema name (lowercased).
    pub schema: String,

    /// Object name (lowercased).
    pub name: String,

    /// Object type.
    pub object_type: ObjectType,
}

impl ObjectKey {
    /// Create a case-normalized object key.
    pub fn new(schema: impl AsRef<str>, name: impl AsRef<str>, object_type: ObjectType) -> Self {
        Self {
            schema: schema.as_ref().to_lowercase(),
            name: name.as_ref().to_lowercase(),
            object_type,
        }
    }

    /// Get the fully qualified name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} ({})", self.schema, self.name, self.object_type)
    }
}

/// Validity status of an object as reported by the source engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    /// Object is valid and usable.
    Valid,
    /// Object is invalid and cannot be rebuilt automatically.
    Invalid,
    /// Object is invalid but a recompile is expected to restore it.
    RecompilableInvalid,
}

/// Physical storage organization of a table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Heap,
    Clustered,
    ColumnStore,
    MemoryOptimized,
    External,
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Engine-reported data type string.
    pub data_type: String,

    /// Whether the column accepts NULL.
    pub is_nullable: bool,
}

/// One catalog object with its type-specific attributes.
///
/// Read-only after snapshot load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogObject {
    /// Unique identity within the snapshot.
    pub key: ObjectKey,

    /// Owning table/view for attached types (index, constraint, trigger,
    /// sequence). None for standalone objects.
    pub owner: Option<ObjectKey>,

    /// Validity status in the source engine.
    pub status: ObjectStatus,

    /// Storage organization (tables only).
    pub storage: Option<StorageKind>,

    /// Raw DDL definition, when the extractor captured one.
    pub definition: Option<String>,

    /// Column definitions (tables and views).
    pub columns: Vec<Column>,
}

impl CatalogObject {
    /// Create a valid object with no attributes beyond its key.
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            owner: None,
            status: ObjectStatus::Valid,
            storage: None,
            definition: None,
            columns: Vec::new(),
        }
    }

    /// Set the owning object (for attached types).
    pub fn with_owner(mut self, owner: ObjectKey) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Set the validity status.
    pub fn with_status(mut self, status: ObjectStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the storage kind.
    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the raw DDL definition.
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }
}

/// Kind of dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// The dependent references the other object (view over table, procedure
    /// calling a function, FK to a table, ...).
    Reference,
    /// The dependent is attached to (owned by) the other object.
    Ownership,
}

/// A directed dependency fact between two objects. May form cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The object that depends on another.
    pub dependent: ObjectKey,

    /// The object being depended upon.
    pub referenced: ObjectKey,

    /// Edge kind.
    pub kind: EdgeKind,
}

impl DependencyEdge {
    /// Create a reference edge.
    pub fn reference(dependent: ObjectKey, referenced: ObjectKey) -> Self {
        Self {
            dependent,
            referenced,
            kind: EdgeKind::Reference,
        }
    }
}

/// An immutable, ObjectKey-indexed catalog snapshot plus its raw edge list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    objects: BTreeMap<ObjectKey, CatalogObject>,
    edges: Vec<DependencyEdge>,
}

impl CatalogSnapshot {
    /// Build a snapshot from extracted objects and edges.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Snapshot` if two objects share a key.
    pub fn new(objects: Vec<CatalogObject>, edges: Vec<DependencyEdge>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for obj in objects {
            let key = obj.key.clone();
            if map.insert(key.clone(), obj).is_some() {
                return Err(ReconcileError::Snapshot(format!(
                    "Duplicate object key in snapshot: {}",
                    key
                )));
            }
        }
        Ok(Self { objects: map, edges })
    }

    /// An empty snapshot.
    pub fn empty() -> Self {
        Self {
            objects: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    /// Look up an object by key.
    pub fn get(&self, key: &ObjectKey) -> Option<&CatalogObject> {
        self.objects.get(key)
    }

    /// Check whether a key is present.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Iterate objects in key order.
    pub fn objects(&self) -> impl Iterator<Item = &CatalogObject> {
        self.objects.values()
    }

    /// Iterate keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.objects.keys()
    }

    /// Raw dependency edges as extracted.
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the snapshot holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
