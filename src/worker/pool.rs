use std::sync::Arc;

use chrono::Utc;

use crate::error::HarvestError;
use crate::scheduler::{JobOutcome, JobQueue, JobSpec, OutcomeLog, QueueEntry};
use crate::worker::executor::JobExecutor;

/// Fixed set of workers draining one shared queue.
///
/// Each worker handles one job at a time on its own session. A job that
/// fails, or panics, produces a failed outcome and the worker moves on.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    executor: Arc<JobExecutor>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(executor: Arc<JobExecutor>, concurrency: usize) -> Self {
        Self {
            executor,
            concurrency,
        }
    }

    /// Number of workers started for a batch of `job_count` jobs.
    pub fn size_for(&self, job_count: usize) -> usize {
        self.concurrency.min(job_count).max(1)
    }

    /// Run every job and return one outcome per job, in completion order.
    ///
    /// Returns only after all workers have stopped.
    pub async fn submit(&self, jobs: Vec<JobSpec>) -> Vec<JobOutcome> {
        let size = self.size_for(jobs.len());
        let queue = Arc::new(JobQueue::new());
        let log = Arc::new(OutcomeLog::new());

        tracing::info!(jobs = jobs.len(), workers = size, "Starting worker pool");

        for (sequence, mut job) in jobs.into_iter().enumerate() {
            job.sequence = sequence;
            queue.put_job(job);
        }
        queue.put_sentinels(size);

        let handles: Vec<_> = (0..size)
            .map(|worker_id| {
                let queue = queue.clone();
                let log = log.clone();
                let executor = self.executor.clone();
                tokio::spawn(async move {
                    Self::worker_loop(worker_id, queue, executor, log).await;
                })
            })
            .collect();

        queue.join().await;
        for (worker_id, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!(worker_id, error = %e, "Worker task failed");
            }
        }

        let outcomes = log.snapshot().await;
        tracing::info!(outcomes = outcomes.len(), "Worker pool finished");
        outcomes
    }

    async fn worker_loop(
        worker_id: usize,
        queue: Arc<JobQueue>,
        executor: Arc<JobExecutor>,
        log: Arc<OutcomeLog>,
    ) {
        tracing::debug!(worker_id, "Worker started");
        while let Some(entry) = queue.get().await {
            match entry {
                QueueEntry::Sentinel => {
                    queue.task_done();
                    break;
                }
                QueueEntry::Job(job) => {
                    let outcome = Self::attempt(worker_id, &executor, *job).await;
                    log.record(outcome).await;
                    queue.task_done();
                }
            }
        }
        tracing::debug!(worker_id, "Worker stopped");
    }

    /// Run one job on its own task so a panic surfaces as a failed outcome.
    async fn attempt(worker_id: usize, executor: &Arc<JobExecutor>, job: JobSpec) -> JobOutcome {
        let started_at = Utc::now();
        let task_executor = executor.clone();
        let task_job = job.clone();
        let attempt =
            tokio::spawn(async move { task_executor.execute(&task_job, worker_id).await });

        match attempt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = HarvestError::SessionCrashed(format!("job task aborted: {}", e));
                tracing::error!(job_id = %job.id, worker_id, error = %err, "Job attempt panicked");
                JobOutcome::failure(&job, worker_id, &err, Vec::new(), started_at)
            }
        }
    }
}
