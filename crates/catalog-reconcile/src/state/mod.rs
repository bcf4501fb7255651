//! File-based run state for resumable remediation.
//!
//! The state file records per-object fixup progress so a later run can skip
//! already-remediated objects. Saves are atomic (temp file + rename) and the
//! config hash is validated on resume so a changed configuration cannot
//! silently continue an old run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ReconcileError, Result};
use crate::model::ObjectKey;

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Per-object fixup status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixupStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

/// Per-object state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectState {
    /// Fixup status.
    pub status: FixupStatus,

    /// Rounds this object has been attempted in.
    pub rounds_attempted: usize,

    /// Error message if failed.
    pub error: Option<String>,
}

/// Run state for resume capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileState {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Current run status.
    pub status: RunStatus,

    /// Per-object state, keyed by the object's stable state key.
    pub objects: BTreeMap<String, ObjectState>,

    /// Retry rounds fully recorded so far.
    pub rounds_completed: usize,

    /// When the run finished (if it did).
    pub completed_at: Option<DateTime<Utc>>,
}

/// Stable string key for an object (JSON map keys must be strings).
pub fn state_key(key: &ObjectKey) -> String {
    format!("{}.{}.{}", key.schema, key.name, key.object_type)
}

impl ReconcileState {
    /// Create a fresh state.
    pub fn new(run_id: String, config_hash: String) -> Self {
        Self {
            run_id,
            config_hash,
            started_at: Utc::now(),
            status: RunStatus::Running,
            objects: BTreeMap::new(),
            rounds_completed: 0,
            completed_at: None,
        }
    }

    /// Load state from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)?;
        Ok(state)
    }

    /// Save state to a file (atomic write).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ReconcileError::State(format!("Failed to serialize state: {}", e)))?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(ReconcileError::ConfigChanged);
        }
        Ok(())
    }

    /// Whether an object already completed in a previous run.
    pub fn is_completed(&self, key: &ObjectKey) -> bool {
        self.objects
            .get(&state_key(key))
            .map(|o| o.status == FixupStatus::Completed)
            .unwrap_or(false)
    }

    /// Record one object's outcome for the current round.
    pub fn record(&mut self, key: &ObjectKey, status: FixupStatus, error: Option<String>) {
        let entry = self
            .objects
            .entry(state_key(key))
            .or_insert_with(|| ObjectState {
                status: FixupStatus::Pending,
                rounds_attempted: 0,
                error: None,
            });
        entry.status = status;
        entry.rounds_attempted += 1;
        entry.error = error;
    }

    /// Mark one retry round as fully recorded.
    pub fn finish_round(&mut self) {
        self.rounds_completed += 1;
    }

    /// Mark the run finished with the given status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}
