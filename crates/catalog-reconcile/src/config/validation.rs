//! Configuration validation.

use super::Config;
use crate::error::{ReconcileError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Run validation - only check knobs that were explicitly set
    if let Some(0) = config.run.workers {
        return Err(ReconcileError::Config(
            "run.workers must be at least 1".into(),
        ));
    }
    if config.run.max_rounds == 0 {
        return Err(ReconcileError::Config(
            "run.max_rounds must be at least 1".into(),
        ));
    }
    if config.run.task_timeout_secs == 0 {
        return Err(ReconcileError::Config(
            "run.task_timeout_secs must be at least 1".into(),
        ));
    }
    if let Some(0) = config.run.error_threshold {
        return Err(ReconcileError::Config(
            "run.error_threshold must be at least 1".into(),
        ));
    }

    // Rule validation
    for (i, rule) in config.resolution.rules.iter().enumerate() {
        if rule.source_schema.is_empty() {
            return Err(ReconcileError::Config(format!(
                "resolution.rules[{}].source_schema is required",
                i
            )));
        }
        if rule.source_name.is_empty() {
            return Err(ReconcileError::Config(format!(
                "resolution.rules[{}].source_name is required",
                i
            )));
        }
        if rule.target_schema.is_empty() {
            return Err(ReconcileError::Config(format!(
                "resolution.rules[{}].target_schema is required",
                i
            )));
        }
    }

    if config.compatibility.target_version.is_empty() {
        return Err(ReconcileError::Config(
            "compatibility.target_version is required".into(),
        ));
    }

    Ok(())
}
