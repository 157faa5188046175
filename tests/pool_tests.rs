
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use report_harvest::backend::{Fault, FaultRule};
use report_harvest::config::{HarvestConfig, SessionConfig};
use report_harvest::driver::{Anchor, DispatchTable, Group, SessionFactory, Surface};
use report_harvest::error::{ErrorKind, Result};
use report_harvest::scheduler::JobSpec;
use report_harvest::schema::{Parameter, SchemaRegistry};
use report_harvest::worker::{JobExecutor, WorkerPool};
use tempfile::TempDir;

use test_harness::{eoc_job, factory, factory_with_faults, grade_job, harvester, test_config, TARGETS};

fn pool_over(factory: Arc<dyn SessionFactory>, config: HarvestConfig) -> WorkerPool {
    let concurrency = config.concurrency;
    let executor = JobExecutor::new(
        Arc::new(config),
        Arc::new(SchemaRegistry::builtin()),
        Arc::new(DispatchTable::standard()),
        factory,
    );
    WorkerPool::new(Arc::new(executor), concurrency)
}

fn eoc_jobs(count: usize) -> Vec<JobSpec> {
    TARGETS.iter().take(count).map(|t| eoc_job(t)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_job_gets_one_outcome() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let pool = pool_over(Arc::new(factory.clone()), test_config(dir.path(), 2));
    let jobs = eoc_jobs(5);
    let ids: HashSet<_> = jobs.iter().map(|j| j.id).collect();

    let outcomes = pool.submit(jobs).await;

    assert_eq!(outcomes.len(), 5);
    let outcome_ids: HashSet<_> = outcomes.iter().map(|o| o.job_id).collect();
    assert_eq!(outcome_ids, ids);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert!(outcomes.iter().all(|o| o.worker_id < 2));

    // One fresh session per job, never more than the pool size at once
    assert_eq!(factory.sessions_created(), 5);
    assert!(factory.peak_sessions() <= 2);
    assert_eq!(factory.live_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_is_isolated_to_its_job() {
    let dir = TempDir::new().unwrap();
    let factory = factory_with_faults(vec![FaultRule::for_target(
        "Dallas ISD",
        Fault::Hide(Anchor::Section(Group::Report)),
    )]);
    let pool = pool_over(Arc::new(factory.clone()), test_config(dir.path(), 3));

    let outcomes = pool.submit(eoc_jobs(3)).await;

    assert_eq!(outcomes.len(), 3);
    for outcome in &outcomes {
        if outcome.label.starts_with("Dallas ISD") {
            assert_eq!(outcome.error_kind(), Some(ErrorKind::StepTimeout));
        } else {
            assert!(outcome.is_success(), "outcome: {:?}", outcome);
        }
    }
    assert_eq!(factory.live_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_worker_preserves_submission_order() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let pool = pool_over(Arc::new(factory.clone()), test_config(dir.path(), 1));
    let jobs = vec![
        eoc_job("Austin ISD"),
        grade_job(&["Dallas ISD", "Houston ISD"]),
        eoc_job("Plano ISD"),
    ];
    let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();

    let outcomes = pool.submit(jobs).await;

    let sequences: Vec<_> = outcomes.iter().map(|o| o.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    let outcome_ids: Vec<_> = outcomes.iter().map(|o| o.job_id).collect();
    assert_eq!(outcome_ids, ids);
    assert!(outcomes.iter().all(|o| o.worker_id == 0));
    assert_eq!(factory.peak_sessions(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_as_wide_as_batch() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let pool = pool_over(Arc::new(factory.clone()), test_config(dir.path(), 3));

    let outcomes = pool.submit(eoc_jobs(3)).await;

    assert_eq!(outcomes.len(), 3);
    let mut sequences: Vec<_> = outcomes.iter().map(|o| o.sequence).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert!(outcomes.iter().all(|o| o.is_success()));
}

#[test]
fn test_pool_size() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let pool = pool_over(Arc::new(factory.clone()), test_config(dir.path(), 3));
    assert_eq!(pool.size_for(10), 3);
    assert_eq!(pool.size_for(2), 2);
    assert_eq!(pool.size_for(0), 1);

    let pool = pool_over(Arc::new(factory), test_config(dir.path(), 0));
    assert_eq!(pool.size_for(5), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_batch_returns_immediately() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let pool = pool_over(Arc::new(factory.clone()), test_config(dir.path(), 3));

    let outcomes = pool.submit(Vec::new()).await;

    assert!(outcomes.is_empty());
    assert_eq!(factory.sessions_created(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_version_is_soft_warning() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let pool = pool_over(Arc::new(factory.clone()), test_config(dir.path(), 2));
    let mut partial = eoc_job("Austin ISD");
    partial.parameters.remove(&Parameter::Version);

    let outcomes = pool.submit(vec![partial, eoc_job("Dallas ISD")]).await;

    assert!(outcomes.iter().all(|o| o.is_success()));
    let warned: Vec<_> = outcomes.iter().filter(|o| !o.warnings.is_empty()).collect();
    assert_eq!(warned.len(), 1);
    assert!(warned[0].label.starts_with("Austin ISD"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_cannot_share_an_export() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let pool = pool_over(Arc::new(factory.clone()), test_config(dir.path(), 2));

    let outcomes = pool
        .submit(vec![eoc_job("Austin ISD"), eoc_job("Austin ISD")])
        .await;

    assert_eq!(outcomes.len(), 2);
    let succeeded: Vec<_> = outcomes.iter().filter(|o| o.is_success()).collect();
    assert_eq!(succeeded.len(), 1);
    assert!(succeeded[0].artifact().unwrap().exists());
    assert_eq!(
        outcomes.iter().filter(|o| o.error_kind() == Some(ErrorKind::OutputConflict)).count(),
        1
    );
    assert_eq!(factory.sessions_created(), 1);
}

struct PanickingFactory;

#[async_trait]
impl SessionFactory for PanickingFactory {
    async fn create(&self, _config: &SessionConfig) -> Result<Box<dyn Surface>> {
        panic!("renderer exploded");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panic_becomes_session_crashed() {
    let dir = TempDir::new().unwrap();
    let pool = pool_over(Arc::new(PanickingFactory), test_config(dir.path(), 1));

    let outcomes = pool.submit(eoc_jobs(2)).await;

    // The worker survives the first panic and handles the second job too
    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        assert_eq!(outcome.error_kind(), Some(ErrorKind::SessionCrashed));
        assert_eq!(outcome.worker_id, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_harvester_end_to_end() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let harvester = harvester(&factory, test_config(dir.path(), 2));
    let jobs = vec![
        eoc_job("Austin ISD"),
        eoc_job("Dallas ISD"),
        JobSpec::new(vec!["Houston ISD".into()], "STAAR EOC", "No Such Report"),
        grade_job(&["El Paso ISD"]),
    ];

    let report = harvester.run(jobs).await.unwrap();

    assert_eq!(report.summary.total, 4);
    assert_eq!(report.summary.succeeded, 3);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(
        report.summary.failures_by_kind.get(&ErrorKind::UnknownReportKind),
        Some(&1)
    );

    let ordered = report.in_submission_order();
    assert_eq!(
        ordered.iter().map(|o| o.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    for outcome in report.outcomes.iter().filter(|o| o.is_success()) {
        assert!(outcome.artifact().unwrap().starts_with(dir.path()));
        assert!(outcome.artifact().unwrap().exists());
    }
    assert_eq!(factory.sessions_created(), 3);
}
