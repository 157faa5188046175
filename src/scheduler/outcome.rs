use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ErrorKind, HarvestError};
use crate::scheduler::job::JobSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeResult {
    Success { artifact: PathBuf },
    Failed { kind: ErrorKind, message: String },
}

/// The single recorded result of one job attempt.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub sequence: usize,
    pub label: String,
    pub worker_id: usize,
    pub result: OutcomeResult,
    /// Soft problems that did not fail the job (e.g. a skipped parameter step)
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn success(
        job: &JobSpec,
        worker_id: usize,
        artifact: PathBuf,
        warnings: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::build(
            job,
            worker_id,
            OutcomeResult::Success { artifact },
            warnings,
            started_at,
        )
    }

    pub fn failure(
        job: &JobSpec,
        worker_id: usize,
        error: &HarvestError,
        warnings: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::build(
            job,
            worker_id,
            OutcomeResult::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
            warnings,
            started_at,
        )
    }

    fn build(
        job: &JobSpec,
        worker_id: usize,
        result: OutcomeResult,
        warnings: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job.id,
            sequence: job.sequence,
            label: job.label(),
            worker_id,
            result,
            warnings,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, OutcomeResult::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.result {
            OutcomeResult::Success { .. } => None,
            OutcomeResult::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn artifact(&self) -> Option<&PathBuf> {
        match &self.result {
            OutcomeResult::Success { artifact } => Some(artifact),
            OutcomeResult::Failed { .. } => None,
        }
    }
}

/// Append-only record of outcomes, in completion order.
#[derive(Debug, Default)]
pub struct OutcomeLog {
    outcomes: Mutex<Vec<JobOutcome>>,
}

impl OutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, outcome: JobOutcome) {
        self.outcomes.lock().await.push(outcome);
    }

    pub async fn len(&self) -> usize {
        self.outcomes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.outcomes.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<JobOutcome> {
        self.outcomes.lock().await.clone()
    }

    pub fn into_inner(self) -> Vec<JobOutcome> {
        self.outcomes.into_inner()
    }
}

/// Aggregate counts over a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub warnings: usize,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[JobOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            summary.warnings += outcome.warnings.len();
            match outcome.error_kind() {
                None => summary.succeeded += 1,
                Some(kind) => {
                    summary.failed += 1;
                    *summary.failures_by_kind.entry(kind).or_default() += 1;
                }
            }
        }
        summary
    }
}
