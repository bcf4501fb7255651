//! External remediation executor seam.
//!
//! The orchestrator is the only caller. Implementations run one object's
//! generated statement batch against the target (subprocess, network call)
//! and report success or a classified failure. Tests inject scripted mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::planner::FixupTask;

/// Classified execution failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// External call exceeded its deadline.
    Timeout,
    /// Lock contention on the target.
    LockContention,
    /// Object compiled invalid but a later attempt may succeed once its
    /// dependencies are in place.
    RecompilableInvalid,
    /// The statement uses syntax the target cannot accept. Never retried.
    UnsupportedSyntax,
    /// The external call was terminated by cancellation.
    Cancelled,
    /// The worker task itself failed (panic or runtime error). Never retried.
    Internal,
}

impl FailureKind {
    /// Transient failures are eligible for further bounded retry rounds.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::LockContention | FailureKind::RecompilableInvalid
        )
    }

    /// Stable label used as a tally key.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::LockContention => "lock_contention",
            FailureKind::RecompilableInvalid => "recompilable_invalid",
            FailureKind::UnsupportedSyntax => "unsupported_syntax",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

/// A classified failure with diagnostics from the external executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// Failure classification.
    pub kind: FailureKind,

    /// Diagnostic message.
    pub message: String,
}

impl ExecutionFailure {
    /// Create a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

/// Executes one fixup task against the target.
#[async_trait]
pub trait FixupExecutor: Send + Sync {
    /// Run the task's statement batch. The orchestrator bounds the call with
    /// its configured timeout; long-running implementations should still be
    /// cancel-safe.
    async fn execute(&self, task: &FixupTask) -> std::result::Result<(), ExecutionFailure>;
}
