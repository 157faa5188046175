use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::HarvestConfig;
use crate::driver::{DispatchTable, SessionFactory};
use crate::error::Result;
use crate::scheduler::{JobOutcome, JobSpec, RunSummary};
use crate::schema::SchemaRegistry;
use crate::worker::{JobExecutor, WorkerPool};

/// Outcomes of one batch plus their tally.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    /// In completion order
    pub outcomes: Vec<JobOutcome>,
    pub summary: RunSummary,
}

impl HarvestReport {
    /// Outcomes sorted back into submission order.
    pub fn in_submission_order(&self) -> Vec<&JobOutcome> {
        let mut outcomes: Vec<_> = self.outcomes.iter().collect();
        outcomes.sort_by_key(|o| o.sequence);
        outcomes
    }
}

/// Wires the registry, dispatch table and a session backend into a worker pool.
pub struct Harvester {
    config: Arc<HarvestConfig>,
    registry: Arc<SchemaRegistry>,
    dispatch: Arc<DispatchTable>,
    factory: Arc<dyn SessionFactory>,
}

impl Harvester {
    pub fn new(
        config: HarvestConfig,
        registry: SchemaRegistry,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            dispatch: Arc::new(DispatchTable::standard()),
            factory,
        }
    }

    pub fn with_dispatch(mut self, dispatch: DispatchTable) -> Self {
        self.dispatch = Arc::new(dispatch);
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Run a batch to completion.
    ///
    /// Individual job failures are reported in the outcomes; only setup
    /// problems (an unusable download directory) fail the call.
    pub async fn run(&self, jobs: Vec<JobSpec>) -> Result<HarvestReport> {
        tokio::fs::create_dir_all(&self.config.session.download_dir).await?;

        for (name, count) in output_collisions(&jobs, &self.config.output_template) {
            tracing::warn!(
                output = %name,
                jobs = count,
                "Several jobs render the same output name, they cannot all export"
            );
        }

        let executor = Arc::new(JobExecutor::new(
            self.config.clone(),
            self.registry.clone(),
            self.dispatch.clone(),
            self.factory.clone(),
        ));
        let pool = WorkerPool::new(executor, self.config.concurrency);
        let outcomes = pool.submit(jobs).await;
        let summary = RunSummary::from_outcomes(&outcomes);

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Harvest complete"
        );
        Ok(HarvestReport { outcomes, summary })
    }
}

/// Output names rendered by more than one job, with how many jobs share each.
pub fn output_collisions(jobs: &[JobSpec], default_template: &str) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for job in jobs {
        *counts.entry(job.output_name(default_template)).or_default() += 1;
    }
    counts.into_iter().filter(|(_, n)| *n > 1).collect()
}
