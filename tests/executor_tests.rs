
use std::sync::Arc;

use report_harvest::backend::{Fault, FaultRule, SimulatedPortalFactory};
use report_harvest::config::{HarvestConfig, MissingParameterPolicy};
use report_harvest::driver::{Anchor, DispatchTable, Group};
use report_harvest::error::ErrorKind;
use report_harvest::scheduler::JobSpec;
use report_harvest::schema::{Parameter, SchemaRegistry};
use report_harvest::worker::JobExecutor;
use tempfile::TempDir;

use test_harness::{eoc_job, factory, factory_with_faults, grade_job, test_config};

/// Create a test executor over the simulated portal
fn test_executor(factory: &SimulatedPortalFactory, config: HarvestConfig) -> JobExecutor {
    JobExecutor::new(
        Arc::new(config),
        Arc::new(SchemaRegistry::builtin()),
        Arc::new(DispatchTable::standard()),
        Arc::new(factory.clone()),
    )
}

#[tokio::test]
async fn test_execute_single_target_job() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let executor = test_executor(&factory, test_config(dir.path(), 1));
    let job = eoc_job("Austin ISD");

    let outcome = executor.execute(&job, 0).await;

    assert!(outcome.is_success(), "outcome: {:?}", outcome);
    assert_eq!(outcome.job_id, job.id);
    assert!(outcome.warnings.is_empty());
    let artifact = outcome.artifact().unwrap();
    assert_eq!(
        artifact,
        &dir.path().join("Austin ISD_Standard Summary_Spring 2024.csv")
    );
    assert!(artifact.exists());

    let view = &factory.views()[0];
    assert_eq!(view.program().as_deref(), Some("STAAR EOC"));
    assert_eq!(view.selected(Parameter::Subject), vec!["Algebra I", "Biology"]);
    assert_eq!(view.selected(Parameter::Version), vec!["STAAR"]);
    assert_eq!(
        view.applied_breakdowns(),
        vec!["Ethnicity", "Economically Disadvantaged"]
    );
}

#[tokio::test]
async fn test_execute_multi_target_job() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let executor = test_executor(&factory, test_config(dir.path(), 1));
    let job = grade_job(&["Austin ISD", "Dallas ISD", "Houston ISD"]);

    let outcome = executor.execute(&job, 0).await;

    assert!(outcome.is_success(), "outcome: {:?}", outcome);
    let view = &factory.views()[0];
    assert_eq!(
        view.selected_targets(),
        vec!["Austin ISD", "Dallas ISD", "Houston ISD"]
    );
    assert_eq!(view.selected(Parameter::Grade), vec!["Grade 3", "Grade 4"]);

    let exports = view.exports();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].targets.len(), 3);
    assert_eq!(
        exports[0].name,
        "Austin ISD-Dallas ISD-Houston ISD_Score Codes Summary_Spring 2023"
    );
}

#[tokio::test]
async fn test_job_breakdowns_override_defaults() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let executor = test_executor(&factory, test_config(dir.path(), 1));
    let job = eoc_job("Austin ISD").with_breakdowns(vec!["Gender".into()]);

    let outcome = executor.execute(&job, 0).await;

    assert!(outcome.is_success());
    assert_eq!(factory.views()[0].applied_breakdowns(), vec!["Gender"]);
}

#[tokio::test]
async fn test_custom_output_template() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let executor = test_executor(&factory, test_config(dir.path(), 1));
    let job = eoc_job("El Paso ISD").with_output_template("{program}/{subject}");

    let outcome = executor.execute(&job, 0).await;

    assert_eq!(
        outcome.artifact().unwrap(),
        &dir.path().join("STAAR EOC_Algebra I-Biology.csv")
    );
}

#[tokio::test]
async fn test_missing_parameter_warns_and_continues() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let executor = test_executor(&factory, test_config(dir.path(), 1));
    let mut job = eoc_job("Austin ISD");
    job.parameters.remove(&Parameter::Version);

    let outcome = executor.execute(&job, 0).await;

    assert!(outcome.is_success(), "outcome: {:?}", outcome);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("version"));
    let view = &factory.views()[0];
    assert_eq!(view.selected(Parameter::Administration), vec!["Spring 2024"]);
    assert_eq!(view.selected(Parameter::Subject), vec!["Algebra I", "Biology"]);
    assert!(view.selected(Parameter::Version).is_empty());
}

#[tokio::test]
async fn test_missing_parameter_fails_before_session_when_strict() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let config =
        test_config(dir.path(), 1).with_missing_parameter(MissingParameterPolicy::Fail);
    let executor = test_executor(&factory, config);
    let mut job = eoc_job("Austin ISD");
    job.parameters.remove(&Parameter::Subject);

    let outcome = executor.execute(&job, 0).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::MissingParameter));
    assert_eq!(factory.sessions_created(), 0);
}

#[tokio::test]
async fn test_unknown_report_kind() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let executor = test_executor(&factory, test_config(dir.path(), 1));
    let job = JobSpec::new(vec!["Austin ISD".into()], "STAAR EOC", "Attendance Summary");

    let outcome = executor.execute(&job, 0).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::UnknownReportKind));
    assert_eq!(factory.sessions_created(), 0);
}

#[tokio::test]
async fn test_session_released_after_failure() {
    let dir = TempDir::new().unwrap();
    let factory = factory_with_faults(vec![FaultRule::always(Fault::Hide(Anchor::Section(
        Group::Parameter(Parameter::Subject),
    )))]);
    let executor = test_executor(&factory, test_config(dir.path(), 1));

    let outcome = executor.execute(&eoc_job("Austin ISD"), 0).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::StepTimeout));
    assert_eq!(factory.sessions_created(), 1);
    assert_eq!(factory.live_sessions(), 0);
    assert!(factory.views()[0].is_closed());
}

#[tokio::test]
async fn test_unmatched_option_is_locator_not_found() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let executor = test_executor(&factory, test_config(dir.path(), 1));
    let job = eoc_job("Austin ISD").with_parameter(Parameter::Subject, ["Chemistry"]);

    let outcome = executor.execute(&job, 0).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::LocatorNotFound));
    assert_eq!(factory.live_sessions(), 0);
}

#[tokio::test]
async fn test_lost_download_is_step_timeout() {
    let dir = TempDir::new().unwrap();
    let factory = factory_with_faults(vec![FaultRule::for_target(
        "Dallas ISD",
        Fault::DropDownload,
    )]);
    let executor = test_executor(&factory, test_config(dir.path(), 1));

    let ok = executor.execute(&eoc_job("Austin ISD"), 0).await;
    let lost = executor.execute(&eoc_job("Dallas ISD"), 0).await;

    assert!(ok.is_success());
    assert_eq!(lost.error_kind(), Some(ErrorKind::StepTimeout));
}

#[tokio::test]
async fn test_existing_export_file_is_output_conflict() {
    let dir = TempDir::new().unwrap();
    let stale = dir.path().join("Austin ISD_Standard Summary_Spring 2024.csv");
    std::fs::write(&stale, "from an earlier run\n").unwrap();
    let factory = factory_with_faults(vec![FaultRule::always(Fault::DropDownload)]);
    let executor = test_executor(&factory, test_config(dir.path(), 1));

    let outcome = executor.execute(&eoc_job("Austin ISD"), 0).await;

    assert!(!outcome.is_success(), "outcome: {:?}", outcome);
    assert_eq!(outcome.error_kind(), Some(ErrorKind::OutputConflict));
    assert!(outcome.artifact().is_none());
    assert_eq!(factory.sessions_created(), 0);
    assert_eq!(
        std::fs::read_to_string(&stale).unwrap(),
        "from an earlier run\n"
    );
}

#[tokio::test]
async fn test_replaced_file_must_be_rewritten_by_export() {
    let dir = TempDir::new().unwrap();
    let stale = dir.path().join("Austin ISD_Standard Summary_Spring 2024.csv");
    std::fs::write(&stale, "from an earlier run\n").unwrap();
    let factory = factory_with_faults(vec![FaultRule::always(Fault::DropDownload)]);
    let config = test_config(dir.path(), 1).with_replace_existing(true);
    let executor = test_executor(&factory, config);

    let outcome = executor.execute(&eoc_job("Austin ISD"), 0).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::StepTimeout));
    assert!(!stale.exists());
}

#[tokio::test]
async fn test_replace_existing_exports_fresh_file() {
    let dir = TempDir::new().unwrap();
    let stale = dir.path().join("Austin ISD_Standard Summary_Spring 2024.csv");
    std::fs::write(&stale, "from an earlier run\n").unwrap();
    let factory = factory();
    let config = test_config(dir.path(), 1).with_replace_existing(true);
    let executor = test_executor(&factory, config);

    let outcome = executor.execute(&eoc_job("Austin ISD"), 0).await;

    assert!(outcome.is_success(), "outcome: {:?}", outcome);
    let contents = std::fs::read_to_string(outcome.artifact().unwrap()).unwrap();
    assert!(contents.starts_with("Organization,Program,Report"));
}

#[tokio::test]
async fn test_second_job_with_same_output_name_conflicts() {
    let dir = TempDir::new().unwrap();
    let factory = factory();
    let executor = test_executor(&factory, test_config(dir.path(), 1));

    let first = executor.execute(&eoc_job("Austin ISD"), 0).await;
    let second = executor.execute(&eoc_job("Austin ISD"), 0).await;

    assert!(first.is_success());
    assert!(first.artifact().unwrap().exists());
    assert_eq!(second.error_kind(), Some(ErrorKind::OutputConflict));
    assert_eq!(factory.sessions_created(), 1);
}
