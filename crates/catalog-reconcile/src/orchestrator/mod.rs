//! Fixup execution orchestrator.
//!
//! Runs a [`FixupPlan`] with a bounded worker pool. A task waits only on its
//! own same-round dependencies (per-task watch channels); a failure skips
//! everything depending on it but never cancels independent tasks. Transient
//! failures are re-planned into further bounded rounds, and per-round failure
//! counts are summed into cumulative tallies, never overwritten. A
//! cooperative cancellation flag stops scheduling new tasks once the
//! configured error threshold is reached; in-flight tasks finish normally
//! except the external call, which is terminated at its deadline and
//! recorded as cancelled.

pub mod executor;

pub use executor::{ExecutionFailure, FailureKind, FixupExecutor};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::model::ObjectKey;
use crate::planner::{FixupPlan, FixupTask};
use crate::state::{FixupStatus, ReconcileState, RunStatus};

/// Execution knobs for one run.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Worker pool size.
    pub workers: usize,

    /// Maximum retry rounds (including the first).
    pub max_rounds: usize,

    /// Stop scheduling new tasks once this many failures accumulate in a
    /// round. None disables the threshold.
    pub error_threshold: Option<usize>,

    /// Deadline for a single external executor call.
    pub task_timeout: Duration,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            max_rounds: 3,
            error_threshold: None,
            task_timeout: Duration::from_secs(300),
        }
    }
}

/// Why a task was skipped rather than executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A same-round dependency failed or was itself skipped.
    DependencyFailed,
    /// The run was cancelled before the task could be scheduled.
    Cancelled,
}

impl SkipReason {
    /// Stable label used as a tally key.
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::DependencyFailed => "dependency_failed",
            SkipReason::Cancelled => "cancelled",
        }
    }
}

/// Terminal outcome of one task in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum OutcomeKind {
    Succeeded,
    Failed { kind: FailureKind },
    Skipped { reason: SkipReason },
}

/// One task's recorded outcome for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixupOutcome {
    /// Task identifier.
    pub task_id: Uuid,

    /// Object the task remediates.
    pub object: ObjectKey,

    /// Round this outcome belongs to (1-based).
    pub round: usize,

    /// Terminal outcome.
    pub kind: OutcomeKind,

    /// Diagnostics from the executor, when any.
    pub message: Option<String>,

    /// When the outcome was recorded.
    pub completed_at: DateTime<Utc>,
}

/// Per-round outcome tallies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundTally {
    /// Round number (1-based).
    pub round: usize,

    /// Tasks that succeeded this round.
    pub succeeded: u64,

    /// Tasks that failed this round.
    pub failed: u64,

    /// Tasks skipped this round.
    pub skipped: u64,

    /// Failures by kind.
    pub failure_counts: BTreeMap<String, u64>,

    /// Skips by reason.
    pub skip_counts: BTreeMap<String, u64>,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, failed, or cancelled.
    pub status: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Rounds executed.
    pub rounds: usize,

    /// Tasks in the initial plan.
    pub tasks_planned: usize,

    /// Objects remediated successfully.
    pub objects_fixed: usize,

    /// Objects whose final outcome is a failure.
    pub objects_failed: usize,

    /// Objects whose final outcome is a skip.
    pub objects_skipped: usize,

    /// Per-round tallies in order.
    pub per_round: Vec<RoundTally>,

    /// Cumulative failure counts, summed across rounds.
    pub failure_counts: BTreeMap<String, u64>,

    /// Cumulative skip counts, summed across rounds.
    pub skip_counts: BTreeMap<String, u64>,

    /// Objects whose final outcome is a failure, by full name.
    pub failed_objects: Vec<String>,

    /// Every recorded outcome, all rounds.
    pub outcomes: Vec<FixupOutcome>,
}

impl RunSummary {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Shared per-round accumulator. Mutated only under a short-held lock that
/// never spans an external call.
#[derive(Default)]
struct RoundLedger {
    failures: usize,
    cancelled: bool,
}

/// Fixup execution orchestrator.
pub struct Orchestrator {
    executor: Arc<dyn FixupExecutor>,
    options: ExecutionOptions,
    state_file: Option<PathBuf>,
    config_hash: Option<String>,
}

impl Orchestrator {
    /// Create an orchestrator around an external executor.
    pub fn new(executor: Arc<dyn FixupExecutor>, options: ExecutionOptions) -> Self {
        Self {
            executor,
            options,
            state_file: None,
            config_hash: None,
        }
    }

    /// Enable the resumable state file. The config hash is validated when an
    /// existing state file is loaded.
    pub fn with_state_file(mut self, path: PathBuf, config_hash: impl Into<String>) -> Self {
        self.state_file = Some(path);
        self.config_hash = Some(config_hash.into());
        self
    }

    /// Execute a plan to completion, with bounded retry rounds.
    pub async fn run(
        &self,
        plan: FixupPlan,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        // When no external flag is supplied, hold a never-signalled sender
        // for the duration of the run.
        let _cancel_tx;
        let cancel = match cancel {
            Some(rx) => rx,
            None => {
                let (tx, rx) = watch::channel(false);
                _cancel_tx = tx;
                rx
            }
        };

        let mut state = self.load_state()?;
        let run_id = state
            .as_ref()
            .map(|s| s.run_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!("Starting reconciliation run: {}", run_id);

        // Resume: drop tasks whose object already completed in a prior run,
        // treating their dependency edges as satisfied.
        let mut tasks = plan.tasks;
        if let Some(state) = &state {
            let before = tasks.len();
            tasks.retain(|t| !state.is_completed(&t.object));
            let kept: BTreeSet<Uuid> = tasks.iter().map(|t| t.id).collect();
            for task in &mut tasks {
                task.depends_on.retain(|d| kept.contains(d));
            }
            if before != tasks.len() {
                info!(
                    "Resuming: {} of {} tasks already completed in a prior run",
                    before - tasks.len(),
                    before
                );
            }
        }

        let tasks_planned = tasks.len();
        let mut all_outcomes: Vec<FixupOutcome> = Vec::new();
        let mut cancelled = false;
        let mut round = 0;
        let mut round_tasks = tasks;

        while !round_tasks.is_empty() && round < self.options.max_rounds {
            round += 1;
            info!(
                "Round {}: executing {} fixup tasks with {} workers",
                round,
                round_tasks.len(),
                self.options.workers
            );

            let (outcomes, round_cancelled) =
                self.run_round(&round_tasks, round, cancel.clone()).await;

            if let Some(state) = state.as_mut() {
                for outcome in &outcomes {
                    let status = match &outcome.kind {
                        OutcomeKind::Succeeded => FixupStatus::Completed,
                        OutcomeKind::Failed { .. } => FixupStatus::Failed,
                        OutcomeKind::Skipped { .. } => FixupStatus::Skipped,
                    };
                    state.record(&outcome.object, status, outcome.message.clone());
                }
                state.finish_round();
                self.save_state(state)?;
            }

            // Round N+1 never starts before round N's outcomes are recorded.
            let retryable = retry_set(&round_tasks, &outcomes);
            all_outcomes.extend(outcomes);

            cancelled = cancelled || round_cancelled || *cancel.borrow();
            if cancelled {
                info!("Cancellation requested, no further rounds will run");
                break;
            }

            round_tasks = round_tasks
                .into_iter()
                .filter(|t| retryable.contains(&t.id))
                .map(|mut t| {
                    t.depends_on.retain(|d| retryable.contains(d));
                    t
                })
                .collect();
        }

        let summary = self.summarize(
            run_id,
            started_at,
            round,
            tasks_planned,
            all_outcomes,
            cancelled,
        );

        if let Some(state) = state.as_mut() {
            let status = match summary.status.as_str() {
                "completed" => RunStatus::Completed,
                "cancelled" => RunStatus::Cancelled,
                _ => RunStatus::Failed,
            };
            state.finish(status);
            self.save_state(state)?;
        }

        info!(
            "Reconciliation {}: {} tasks, {} fixed, {} failed in {:.1}s over {} rounds",
            summary.status,
            summary.tasks_planned,
            summary.objects_fixed,
            summary.objects_failed,
            summary.duration_seconds,
            summary.rounds
        );

        Ok(summary)
    }

    /// Execute one round; returns its outcomes and whether the error
    /// threshold tripped the cancellation flag.
    async fn run_round(
        &self,
        tasks: &[FixupTask],
        round: usize,
        cancel: watch::Receiver<bool>,
    ) -> (Vec<FixupOutcome>, bool) {
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let ledger = Arc::new(Mutex::new(RoundLedger::default()));

        // One terminal channel per task; dependents watch it. A panicked
        // task drops its sender, which dependents observe as a failure.
        let mut senders: HashMap<Uuid, watch::Sender<Option<bool>>> = HashMap::new();
        let mut receivers: HashMap<Uuid, watch::Receiver<Option<bool>>> = HashMap::new();
        for task in tasks {
            let (tx, rx) = watch::channel(None);
            senders.insert(task.id, tx);
            receivers.insert(task.id, rx);
        }

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let tx = match senders.remove(&task.id) {
                Some(tx) => tx,
                None => continue,
            };
            let dep_rxs: Vec<watch::Receiver<Option<bool>>> = task
                .depends_on
                .iter()
                .filter_map(|d| receivers.get(d).cloned())
                .collect();

            let task = task.clone();
            let semaphore = semaphore.clone();
            let ledger = ledger.clone();
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            let task_timeout = self.options.task_timeout;
            let error_threshold = self.options.error_threshold;

            handles.push(tokio::spawn(async move {
                let (kind, message) = execute_one(
                    &task,
                    dep_rxs,
                    semaphore,
                    &ledger,
                    &cancel,
                    executor,
                    task_timeout,
                )
                .await;

                let succeeded = matches!(kind, OutcomeKind::Succeeded);
                match &kind {
                    OutcomeKind::Succeeded => info!("{}: fixed", task.object),
                    OutcomeKind::Failed { kind } => error!(
                        "{}: failed ({}) - {}",
                        task.object,
                        kind.label(),
                        message.as_deref().unwrap_or("no diagnostics")
                    ),
                    OutcomeKind::Skipped { reason } => {
                        debug!("{}: skipped ({})", task.object, reason.label())
                    }
                }

                if matches!(kind, OutcomeKind::Failed { .. }) {
                    let mut ledger = ledger.lock().unwrap();
                    ledger.failures += 1;
                    if let Some(threshold) = error_threshold {
                        if ledger.failures >= threshold && !ledger.cancelled {
                            ledger.cancelled = true;
                            warn!(
                                "Error threshold of {} reached, stopping new task scheduling",
                                threshold
                            );
                        }
                    }
                }

                let _ = tx.send(Some(succeeded));
                FixupOutcome {
                    task_id: task.id,
                    object: task.object.clone(),
                    round,
                    kind,
                    message,
                    completed_at: Utc::now(),
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (task, handle) in tasks.iter().zip(handles) {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("{}: task panicked - {}", task.object, e);
                    if let Ok(mut ledger) = ledger.lock() {
                        ledger.failures += 1;
                    }
                    outcomes.push(FixupOutcome {
                        task_id: task.id,
                        object: task.object.clone(),
                        round,
                        kind: OutcomeKind::Failed {
                            kind: FailureKind::Internal,
                        },
                        message: Some(format!("task panicked: {}", e)),
                        completed_at: Utc::now(),
                    });
                }
            }
        }

        let cancelled = ledger.lock().map(|l| l.cancelled).unwrap_or(true);
        (outcomes, cancelled)
    }

    fn summarize(
        &self,
        run_id: String,
        started_at: DateTime<Utc>,
        rounds: usize,
        tasks_planned: usize,
        outcomes: Vec<FixupOutcome>,
        cancelled: bool,
    ) -> RunSummary {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let mut per_round: Vec<RoundTally> = (1..=rounds)
            .map(|round| RoundTally {
                round,
                succeeded: 0,
                failed: 0,
                skipped: 0,
                failure_counts: BTreeMap::new(),
                skip_counts: BTreeMap::new(),
            })
            .collect();
        // Cumulative counts are summed across rounds, never overwritten.
        let mut failure_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut skip_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut final_by_object: BTreeMap<ObjectKey, &FixupOutcome> = BTreeMap::new();

        for outcome in &outcomes {
            if let Some(tally) = per_round.get_mut(outcome.round.saturating_sub(1)) {
                match &outcome.kind {
                    OutcomeKind::Succeeded => tally.succeeded += 1,
                    OutcomeKind::Failed { kind } => {
                        tally.failed += 1;
                        *tally.failure_counts.entry(kind.label().into()).or_insert(0) += 1;
                        *failure_counts.entry(kind.label().into()).or_insert(0) += 1;
                    }
                    OutcomeKind::Skipped { reason } => {
                        tally.skipped += 1;
                        *tally.skip_counts.entry(reason.label().into()).or_insert(0) += 1;
                        *skip_counts.entry(reason.label().into()).or_insert(0) += 1;
                    }
                }
            }
            final_by_object.insert(outcome.object.clone(), outcome);
        }

        let objects_fixed = final_by_object
            .values()
            .filter(|o| matches!(o.kind, OutcomeKind::Succeeded))
            .count();
        let failed_objects: Vec<String> = final_by_object
            .values()
            .filter(|o| matches!(o.kind, OutcomeKind::Failed { .. }))
            .map(|o| o.object.full_name())
            .collect();
        let objects_skipped = final_by_object
            .values()
            .filter(|o| matches!(o.kind, OutcomeKind::Skipped { .. }))
            .count();

        let status = if cancelled {
            "cancelled"
        } else if !failed_objects.is_empty() {
            "failed"
        } else {
            "completed"
        };

        RunSummary {
            run_id,
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds,
            rounds,
            tasks_planned,
            objects_fixed,
            objects_failed: failed_objects.len(),
            objects_skipped,
            per_round,
            failure_counts,
            skip_counts,
            failed_objects,
            outcomes,
        }
    }

    fn load_state(&self) -> Result<Option<ReconcileState>> {
        let (path, hash) = match (&self.state_file, &self.config_hash) {
            (Some(path), Some(hash)) => (path, hash),
            _ => return Ok(None),
        };
        if path.exists() {
            let state = ReconcileState::load(path)?;
            state.validate_config(hash)?;
            info!("Resuming from state file: {:?}", path);
            Ok(Some(state))
        } else {
            Ok(Some(ReconcileState::new(
                Uuid::new_v4().to_string(),
                hash.clone(),
            )))
        }
    }

    fn save_state(&self, state: &ReconcileState) -> Result<()> {
        if let Some(path) = &self.state_file {
            state.save(path)?;
        }
        Ok(())
    }
}

/// Run one task to its terminal outcome: wait on same-round dependencies,
/// honor cancellation, then call the external executor under a worker permit
/// and a deadline.
async fn execute_one(
    task: &FixupTask,
    dep_rxs: Vec<watch::Receiver<Option<bool>>>,
    semaphore: Arc<Semaphore>,
    ledger: &Mutex<RoundLedger>,
    cancel: &watch::Receiver<bool>,
    executor: Arc<dyn FixupExecutor>,
    task_timeout: Duration,
) -> (OutcomeKind, Option<String>) {
    // Wait for every dependency to reach a terminal outcome. A dropped
    // sender (panicked dependency) counts as failure.
    let mut deps_ok = true;
    for mut rx in dep_rxs {
        let ok = loop {
            let current = *rx.borrow();
            if let Some(ok) = current {
                break ok;
            }
            if rx.changed().await.is_err() {
                break false;
            }
        };
        if !ok {
            deps_ok = false;
            break;
        }
    }

    if !deps_ok {
        return (
            OutcomeKind::Skipped {
                reason: SkipReason::DependencyFailed,
            },
            None,
        );
    }

    if is_cancelled(ledger, cancel) {
        return (
            OutcomeKind::Skipped {
                reason: SkipReason::Cancelled,
            },
            None,
        );
    }

    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return (
                OutcomeKind::Skipped {
                    reason: SkipReason::Cancelled,
                },
                None,
            )
        }
    };

    // The flag may have flipped while queued for a worker.
    if is_cancelled(ledger, cancel) {
        return (
            OutcomeKind::Skipped {
                reason: SkipReason::Cancelled,
            },
            None,
        );
    }

    match tokio::time::timeout(task_timeout, executor.execute(task)).await {
        Ok(Ok(())) => (OutcomeKind::Succeeded, None),
        Ok(Err(failure)) => (
            OutcomeKind::Failed { kind: failure.kind },
            Some(failure.message),
        ),
        Err(_) => {
            // The external call was terminated at the deadline. Under an
            // active cancellation this is recorded as cancelled, otherwise
            // as a retryable timeout.
            let kind = if is_cancelled(ledger, cancel) {
                FailureKind::Cancelled
            } else {
                FailureKind::Timeout
            };
            (
                OutcomeKind::Failed { kind },
                Some(format!(
                    "external call exceeded {}s deadline",
                    task_timeout.as_secs()
                )),
            )
        }
    }
}

/// Tasks eligible for the next round: transient failures, plus tasks skipped
/// on a failed dependency when every unmet dependency is itself retried. A
/// task behind a structural failure stays skipped for good.
fn retry_set(tasks: &[FixupTask], outcomes: &[FixupOutcome]) -> BTreeSet<Uuid> {
    let mut succeeded = BTreeSet::new();
    let mut retry = BTreeSet::new();
    let mut dep_skipped: Vec<&FixupTask> = Vec::new();

    let by_id: HashMap<Uuid, &FixupTask> = tasks.iter().map(|t| (t.id, t)).collect();
    for outcome in outcomes {
        match &outcome.kind {
            OutcomeKind::Succeeded => {
                succeeded.insert(outcome.task_id);
            }
            OutcomeKind::Failed { kind } if kind.is_transient() => {
                retry.insert(outcome.task_id);
            }
            OutcomeKind::Skipped {
                reason: SkipReason::DependencyFailed,
            } => {
                if let Some(task) = by_id.get(&outcome.task_id) {
                    dep_skipped.push(task);
                }
            }
            _ => {}
        }
    }

    // Fixed point: a skipped chain re-enters behind its retried root.
    loop {
        let mut added = false;
        for task in &dep_skipped {
            if retry.contains(&task.id) {
                continue;
            }
            let eligible = task
                .depends_on
                .iter()
                .all(|d| succeeded.contains(d) || retry.contains(d));
            if eligible {
                retry.insert(task.id);
                added = true;
            }
        }
        if !added {
            break;
        }
    }

    retry
}

fn is_cancelled(ledger: &Mutex<RoundLedger>, cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || ledger.lock().map(|l| l.cancelled).unwrap_or(true)
}
