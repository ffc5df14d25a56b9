//! Job executor: runs one job body under a timeout and a cancellation token.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use daylog_core::error::AppError;

use super::job::JobFn;

/// Error from a single job run.
///
/// Never surfaced to callers of `add_job`; it only drives the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// The job body returned an error
    #[error("Job failed: {0}")]
    Failed(#[from] AppError),

    /// The job body exceeded its timeout
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// The run was cancelled by the scheduler
    #[error("Job was cancelled")]
    Cancelled,

    /// The job body panicked
    #[error("Job panicked: {0}")]
    Panicked(String),
}

impl JobExecutionError {
    /// Whether the error counts against the job's retry budget.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Run a job body once.
///
/// Timeouts and cancellation drop the body's future at its next suspension point.
pub(crate) async fn execute(
    task: JobFn,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), JobExecutionError> {
    let run = AssertUnwindSafe(async move { (task)().await }).catch_unwind();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobExecutionError::Cancelled),
        outcome = tokio::time::timeout(timeout, run) => match outcome {
            Err(_) => Err(JobExecutionError::Timeout(timeout)),
            Ok(Err(panic)) => Err(JobExecutionError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result.map_err(JobExecutionError::Failed),
        },
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
