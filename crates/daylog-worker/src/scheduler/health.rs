//! Scheduler health report.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{Job, JobStatus};

/// Severity of a health issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Degraded but working.
    Warning,
    /// Needs attention now.
    Critical,
}

/// One problem found by the health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthIssue {
    /// Machine-readable issue type.
    #[serde(rename = "type")]
    pub issue_type: String,
    /// Severity level.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

impl HealthIssue {
    fn new(issue_type: &str, severity: Severity, message: String) -> Self {
        Self {
            issue_type: issue_type.to_string(),
            severity,
            message,
        }
    }
}

/// Aggregate health of a [`JobScheduler`](super::JobScheduler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerHealth {
    /// Whether the control loop is running
    pub running: bool,
    /// Seconds since `start()`, zero when stopped
    pub uptime_seconds: f64,
    /// Registered jobs
    pub total_jobs: usize,
    /// Runs currently in flight
    pub running_jobs: usize,
    /// Jobs late by more than the overdue threshold
    pub overdue_jobs: usize,
    /// Jobs sitting in the failed state
    pub permanently_failed_jobs: usize,
    /// Problems found, most severe first
    pub issues: Vec<HealthIssue>,
}

impl SchedulerHealth {
    /// Whether no critical issue was found.
    pub fn is_healthy(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|issue| issue.severity == Severity::Critical)
    }
}

/// Compute the health report from a snapshot of the registry.
pub(crate) fn assess<'a>(
    jobs: impl Iterator<Item = &'a Job>,
    running_jobs: usize,
    started_at: Option<DateTime<Utc>>,
    overdue_threshold: Duration,
    now: DateTime<Utc>,
) -> SchedulerHealth {
    let mut total_jobs = 0;
    let mut overdue_jobs = 0;
    let mut permanently_failed_jobs = 0;
    let mut retrying_jobs = 0;

    for job in jobs {
        total_jobs += 1;
        if job.is_overdue(now, overdue_threshold) {
            overdue_jobs += 1;
        }
        if job.status == JobStatus::Failed {
            permanently_failed_jobs += 1;
        }
        if job.error_count > 0 {
            retrying_jobs += 1;
        }
    }

    let running = started_at.is_some();
    let uptime_seconds = started_at
        .map(|start| (now - start).num_milliseconds().max(0) as f64 / 1000.0)
        .unwrap_or(0.0);

    let mut issues = Vec::new();
    if !running {
        issues.push(HealthIssue::new(
            "scheduler_not_running",
            Severity::Critical,
            "Scheduler is not running".to_string(),
        ));
    }
    if overdue_jobs > 0 {
        issues.push(HealthIssue::new(
            "overdue_jobs",
            Severity::Critical,
            format!(
                "{} jobs overdue by more than {}s",
                overdue_jobs,
                overdue_threshold.as_secs()
            ),
        ));
    }
    if total_jobs == 0 {
        issues.push(HealthIssue::new(
            "no_jobs",
            Severity::Warning,
            "No jobs scheduled".to_string(),
        ));
    }
    if permanently_failed_jobs > 0 {
        issues.push(HealthIssue::new(
            "failed_jobs",
            Severity::Warning,
            format!("{} jobs in failed state", permanently_failed_jobs),
        ));
    }
    if retrying_jobs > 0 {
        issues.push(HealthIssue::new(
            "retrying_jobs",
            Severity::Warning,
            format!("{} jobs retrying after failures", retrying_jobs),
        ));
    }

    SchedulerHealth {
        running,
        uptime_seconds,
        total_jobs,
        running_jobs,
        overdue_jobs,
        permanently_failed_jobs,
        issues,
    }
}
