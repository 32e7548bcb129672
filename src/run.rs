//! Payroll runs: many employees computed concurrently.
//!
//! Each employee is an independent task on a [`JoinSet`]. A [`Semaphore`]
//! bounds how many computations are in flight so the stores behind the
//! engine are not flooded. The per-employee pipeline itself is synchronous
//! and runs on the blocking pool under a timeout.
//!
//! Cancellation and the run deadline are only honoured between employees:
//! a computation that has started always finishes (or times out), and its
//! usage is committed only when it succeeded in time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::{PayrollEngine, PaycheckRequest};
use crate::error::{ComputationError, EngineError, ErrorKind};
use crate::models::{PaycheckResult, PipelineStage};

/// Limits applied to a payroll run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Maximum number of employees computed at once.
    pub max_concurrency: usize,
    /// Time budget for one employee's paycheck.
    pub employee_timeout: Duration,
    /// Wall-clock budget for starting employees.
    pub run_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            employee_timeout: Duration::from_millis(5_000),
            run_timeout: Duration::from_millis(300_000),
        }
    }
}

/// Cooperative cancellation flag for a run.
///
/// Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Employees not yet started will be skipped.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every employee was attempted.
    Completed,
    /// Cancelled before every employee started.
    Cancelled,
    /// The run deadline passed before every employee started.
    TimedOut,
}

/// One employee whose paycheck is absent from the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// The employee.
    pub employee_id: String,
    /// What kind of error occurred.
    pub kind: ErrorKind,
    /// The pipeline stage, when the pipeline reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
    /// The component being processed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_code: Option<String>,
    /// Human-readable description.
    pub message: String,
}

impl RunFailure {
    fn from_computation(error: &ComputationError) -> Self {
        Self {
            employee_id: error.employee_id.clone(),
            kind: error.kind(),
            stage: Some(error.stage),
            component_code: error.component_code.clone(),
            message: error.source.to_string(),
        }
    }

    fn outside_pipeline(employee_id: &str, error: &EngineError) -> Self {
        Self {
            employee_id: employee_id.to_string(),
            kind: error.kind(),
            stage: None,
            component_code: None,
            message: error.to_string(),
        }
    }
}

/// A configuration or integrity problem, grouped across the employees it
/// affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAlert {
    /// The error kind.
    pub kind: ErrorKind,
    /// The error message.
    pub message: String,
    /// Affected employees, in input order.
    pub employee_ids: Vec<String>,
}

/// The outcome of a payroll run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identifier for the run.
    pub run_id: Uuid,
    /// How the run ended.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the last employee finished.
    pub finished_at: DateTime<Utc>,
    /// Committed paychecks, in input order.
    pub paychecks: Vec<PaycheckResult>,
    /// Employees whose paycheck failed, in input order.
    pub failures: Vec<RunFailure>,
    /// Employees never started because of cancellation or the deadline.
    pub skipped: Vec<String>,
    /// Failures that need an operator, grouped by message.
    pub operator_alerts: Vec<OperatorAlert>,
}

enum Outcome {
    Paid(Box<PaycheckResult>),
    Failed(RunFailure),
}

/// Runs payroll for `requests`.
///
/// Successful paychecks have their usage committed before they are reported.
/// A paycheck whose commit is rejected (for example because another run
/// already consumed the same usage) is reported as a failure.
pub async fn run_payroll(
    engine: PayrollEngine,
    requests: Vec<PaycheckRequest>,
    options: RunOptions,
    cancel: CancelToken,
) -> RunReport {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let deadline = Instant::now() + options.run_timeout;
    let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
    let total = requests.len();

    info!(
        run_id = %run_id,
        employees = total,
        max_concurrency = options.max_concurrency,
        "Payroll run started"
    );

    let mut status = RunStatus::Completed;
    let mut skipped_from: Option<usize> = None;
    let mut tasks = JoinSet::new();

    for (index, request) in requests.iter().enumerate() {
        if let Some(stop) = stop_reason(&cancel, deadline) {
            status = stop;
            skipped_from = Some(index);
            break;
        }
        let permit = match tokio::time::timeout_at(deadline, semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                error!(run_id = %run_id, "Concurrency limiter closed; stopping run");
                status = RunStatus::Cancelled;
                skipped_from = Some(index);
                break;
            }
            Err(_) => {
                status = RunStatus::TimedOut;
                skipped_from = Some(index);
                break;
            }
        };
        if let Some(stop) = stop_reason(&cancel, deadline) {
            status = stop;
            skipped_from = Some(index);
            break;
        }

        let engine = engine.clone();
        let request = request.clone();
        let limit = options.employee_timeout;
        tasks.spawn(async move { (index, process_employee(engine, request, limit, permit).await) });
    }

    let mut outcomes: BTreeMap<usize, Outcome> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => {
                outcomes.insert(index, outcome);
            }
            Err(e) => error!(run_id = %run_id, error = %e, "Payroll task aborted"),
        }
    }

    let skipped: Vec<String> = skipped_from
        .map(|from| requests[from..].iter().map(|r| r.employee_id.clone()).collect())
        .unwrap_or_default();

    let mut paychecks = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes.into_values() {
        match outcome {
            Outcome::Paid(result) => paychecks.push(*result),
            Outcome::Failed(failure) => failures.push(failure),
        }
    }
    let operator_alerts = group_alerts(&failures);

    match status {
        RunStatus::Completed => info!(
            run_id = %run_id,
            paid = paychecks.len(),
            failed = failures.len(),
            "Payroll run completed"
        ),
        _ => warn!(
            run_id = %run_id,
            status = ?status,
            paid = paychecks.len(),
            failed = failures.len(),
            skipped = skipped.len(),
            "Payroll run stopped early"
        ),
    }

    RunReport {
        run_id,
        status,
        started_at,
        finished_at: Utc::now(),
        paychecks,
        failures,
        skipped,
        operator_alerts,
    }
}

fn stop_reason(cancel: &CancelToken, deadline: Instant) -> Option<RunStatus> {
    if cancel.is_cancelled() {
        Some(RunStatus::Cancelled)
    } else if Instant::now() >= deadline {
        Some(RunStatus::TimedOut)
    } else {
        None
    }
}

/// The permit travels with the blocking computation, so an employee that
/// timed out keeps its slot until its computation actually returns.
async fn process_employee(
    engine: PayrollEngine,
    request: PaycheckRequest,
    limit: Duration,
    permit: OwnedSemaphorePermit,
) -> Outcome {
    let employee_id = request.employee_id.clone();
    let worker = engine.clone();
    let computation = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        worker.compute_paycheck(&request)
    });

    let result = match tokio::time::timeout(limit, computation).await {
        Ok(Ok(Ok(result))) => result,
        Ok(Ok(Err(error))) => return Outcome::Failed(RunFailure::from_computation(&error)),
        Ok(Err(join_error)) => {
            let error = EngineError::integrity(format!("paycheck computation aborted: {}", join_error));
            error!(employee_id = %employee_id, error = %error, "Paycheck task did not complete");
            return Outcome::Failed(RunFailure::outside_pipeline(&employee_id, &error));
        }
        Err(_) => {
            let error = EngineError::Timeout {
                limit_ms: limit.as_millis() as u64,
            };
            warn!(employee_id = %employee_id, limit_ms = limit.as_millis() as u64, "Paycheck timed out; result discarded");
            return Outcome::Failed(RunFailure::outside_pipeline(&employee_id, &error));
        }
    };

    match engine.commit_usage(&result) {
        Ok(()) => Outcome::Paid(Box::new(result)),
        Err(error) => {
            warn!(employee_id = %employee_id, error = %error, "Usage commit rejected; paycheck discarded");
            Outcome::Failed(RunFailure::outside_pipeline(&employee_id, &error))
        }
    }
}

fn group_alerts(failures: &[RunFailure]) -> Vec<OperatorAlert> {
    let mut alerts: Vec<OperatorAlert> = Vec::new();
    for failure in failures
        .iter()
        .filter(|f| matches!(f.kind, ErrorKind::Configuration | ErrorKind::Integrity))
    {
        match alerts
            .iter_mut()
            .find(|a| a.kind == failure.kind && a.message == failure.message)
        {
            Some(alert) => alert.employee_ids.push(failure.employee_id.clone()),
            None => alerts.push(OperatorAlert {
                kind: failure.kind,
                message: failure.message.clone(),
                employee_ids: vec![failure.employee_id.clone()],
            }),
        }
    }
    alerts
}
