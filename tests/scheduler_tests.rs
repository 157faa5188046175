use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use report_harvest::error::{ErrorKind, HarvestError};
use report_harvest::scheduler::manifest::parse_manifest;
use report_harvest::scheduler::{JobOutcome, JobQueue, JobSpec, QueueEntry, RunSummary};
use report_harvest::schema::Parameter;
use tokio::sync::Mutex;

const MANIFEST: &str = r#"
[[job]]
targets = "ALDINE ISD; HOUSTON ISD"
program = "STAAR 3-8"
report = "Standard Summary"
administration = "Spring 2023;Spring 2024"
subject = "Mathematics"
grade = "Grade 3;Grade 4"
version = "English"

[[job]]
targets = ""
program = "STAAR EOC"
report = "Standard Summary"

[[job]]
targets = "PLANO ISD"
program = "TELPAS"
report = "Standard Summary For Cluster"
administration = "Spring 2024"
cluster = "K-1;2-3"
breakdowns = "Ethnicity"
output = "{target}_{cluster}"
"#;

#[test]
fn test_manifest_parsing() {
    let jobs = parse_manifest(MANIFEST).unwrap();

    // The row without targets is skipped
    assert_eq!(jobs.len(), 2);

    let first = &jobs[0];
    assert_eq!(first.targets, vec!["ALDINE ISD", "HOUSTON ISD"]);
    assert_eq!(
        first.values(Parameter::Administration).unwrap(),
        ["Spring 2023", "Spring 2024"]
    );
    assert_eq!(first.values(Parameter::Version).unwrap(), ["English"]);
    assert!(first.values(Parameter::Cluster).is_none());
    assert!(first.breakdowns.is_none());

    let second = &jobs[1];
    assert_eq!(second.values(Parameter::Cluster).unwrap(), ["K-1", "2-3"]);
    assert_eq!(second.breakdowns, Some(vec!["Ethnicity".to_string()]));
    assert_eq!(second.output_name("ignored"), "PLANO ISD_K-1-2-3");
}

#[test]
fn test_manifest_rejects_missing_report() {
    let err = parse_manifest(
        r#"
[[job]]
targets = "PLANO ISD"
program = "TELPAS"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, HarvestError::InvalidJob(_)));
}

#[test]
fn test_manifest_jobs_get_distinct_ids() {
    let jobs = parse_manifest(MANIFEST).unwrap();
    let ids: HashSet<_> = jobs.iter().map(|j| j.id).collect();
    assert_eq!(ids.len(), jobs.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_hands_each_job_to_exactly_one_consumer() {
    let queue = Arc::new(JobQueue::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let consumers = 4;

    for n in 0..50 {
        let mut job = JobSpec::new(vec![format!("T{}", n)], "P", "R");
        job.sequence = n;
        queue.put_job(job);
    }
    queue.put_sentinels(consumers);

    let handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = queue.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                while let Some(entry) = queue.get().await {
                    match entry {
                        QueueEntry::Sentinel => {
                            queue.task_done();
                            break;
                        }
                        QueueEntry::Job(job) => {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            seen.lock().await.push(job.sequence);
                            queue.task_done();
                        }
                    }
                }
            })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(5), queue.join())
        .await
        .expect("queue should drain");
    for handle in handles {
        handle.await.unwrap();
    }

    let mut seen = seen.lock().await.clone();
    seen.sort_unstable();
    assert_eq!(seen, (0..50).collect::<Vec<_>>());
    assert_eq!(queue.outstanding(), 0);
}

#[test]
fn test_run_summary_counts_by_kind() {
    let job = JobSpec::new(vec!["A".into()], "P", "R");
    let started = chrono::Utc::now();
    let timeout = HarvestError::StepTimeout {
        target: "report section".into(),
        timeout: Duration::from_millis(10),
    };
    let outcomes = vec![
        JobOutcome::success(&job, 0, "a.csv".into(), vec!["w".into()], started),
        JobOutcome::failure(&job, 1, &timeout, Vec::new(), started),
        JobOutcome::failure(&job, 0, &timeout, Vec::new(), started),
        JobOutcome::failure(
            &job,
            2,
            &HarvestError::SessionCrashed("gone".into()),
            Vec::new(),
            started,
        ),
    ];

    let summary = RunSummary::from_outcomes(&outcomes);
    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.warnings, 1);
    assert_eq!(summary.failures_by_kind[&ErrorKind::StepTimeout], 2);
    assert_eq!(summary.failures_by_kind[&ErrorKind::SessionCrashed], 1);
}
