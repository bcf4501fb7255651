//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::System;
use tracing::info;

use crate::classify::CompatibilityTable;
use crate::model::{ObjectKey, ObjectType, StorageKind};
use crate::orchestrator::ExecutionOptions;
use crate::remap::{RemapRule, RemapRuleSet, TargetIdentity};

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in bytes.
    pub total_memory_bytes: u64,
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_bytes = sys.total_memory();
        let total_memory_gb = total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_bytes,
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Run behavior configuration.
    #[serde(default)]
    pub run: RunConfig,

    /// Remap resolution configuration.
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Target compatibility configuration.
    #[serde(default)]
    pub compatibility: CompatibilityConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.run = self.run.with_auto_tuning(&resources);
        self
    }

    /// Build orchestrator options from the run section.
    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            workers: self.run.workers.unwrap_or(4),
            max_rounds: self.run.max_rounds,
            error_threshold: self.run.error_threshold,
            task_timeout: Duration::from_secs(self.run.task_timeout_secs),
        }
    }

    /// Build the ordered explicit rule set from the resolution section.
    pub fn remap_rules(&self) -> RemapRuleSet {
        RemapRuleSet::from_rules(
            self.resolution
                .rules
                .iter()
                .map(|r| {
                    let target_name = if r.target_name.is_empty() {
                        &r.source_name
                    } else {
                        &r.target_name
                    };
                    RemapRule::new(
                        ObjectKey::new(&r.source_schema, &r.source_name, r.object_type),
                        TargetIdentity::new(&r.target_schema, target_name),
                    )
                })
                .collect(),
        )
    }

    /// Build the compatibility table from the compatibility section.
    pub fn compatibility_table(&self) -> CompatibilityTable {
        let mut table = CompatibilityTable::new(&self.compatibility.target_version);
        for ty in &self.compatibility.disallowed_types {
            table = table.disallow_type(*ty);
        }
        for storage in &self.compatibility.disallowed_storage {
            table = table.disallow_storage(*storage);
        }
        table
    }
}

/// Run behavior configuration.
/// Performance fields use Option<T> to distinguish between "not set"
/// (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of parallel workers. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Maximum retry rounds, including the first (default: 3).
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Stop scheduling new tasks after this many failures in a round.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_threshold: Option<usize>,

    /// Deadline in seconds for one external executor call (default: 300).
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// State file for resume capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_rounds: default_max_rounds(),
            error_threshold: None,
            task_timeout_secs: default_task_timeout_secs(),
            state_file: None,
        }
    }
}

impl RunConfig {
    /// Fill unset performance knobs from detected resources.
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        if self.workers.is_none() {
            let workers = resources.cpu_cores.clamp(2, 16);
            info!("Auto-tuned workers: {} (from CPU cores)", workers);
            self.workers = Some(workers);
        }
        self
    }
}

/// One explicit remap rule as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemapRuleConfig {
    /// Source schema.
    pub source_schema: String,

    /// Source object name.
    pub source_name: String,

    /// Source object type.
    pub object_type: ObjectType,

    /// Target schema.
    pub target_schema: String,

    /// Target object name (defaults to the source name).
    #[serde(default)]
    pub target_name: String,
}

/// Remap resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Explicit rules, evaluated in declared order (first match wins).
    #[serde(default)]
    pub rules: Vec<RemapRuleConfig>,

    /// Object types that never infer a schema from their table closure and
    /// default to the source schema instead.
    #[serde(default = "default_no_inference_types")]
    pub no_schema_inference_types: Vec<ObjectType>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            no_schema_inference_types: default_no_inference_types(),
        }
    }
}

/// Target compatibility configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    /// Target engine version label.
    #[serde(default = "default_target_version")]
    pub target_version: String,

    /// Object types the target cannot represent.
    #[serde(default)]
    pub disallowed_types: Vec<ObjectType>,

    /// Storage kinds the target cannot represent.
    #[serde(default)]
    pub disallowed_storage: Vec<StorageKind>,
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            target_version: default_target_version(),
            disallowed_types: Vec::new(),
            disallowed_storage: Vec::new(),
        }
    }
}

fn default_max_rounds() -> usize {
    3
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_no_inference_types() -> Vec<ObjectType> {
    vec![ObjectType::Procedure, ObjectType::Function, ObjectType::Synonym]
}

fn default_target_version() -> String {
    "latest".to_string()
}
