use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::config::{HarvestConfig, MissingParameterPolicy};
use crate::driver::{artifact_path, DispatchTable, Group, Session, SessionFactory, StepExecutor};
use crate::error::{HarvestError, Result};
use crate::scheduler::{JobOutcome, JobSpec};
use crate::schema::{Parameter, SchemaRegistry};

/// Everything decided about a job before a session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    /// Parameter steps to run, in schema order, with the values to select
    pub steps: Vec<(Parameter, Vec<String>)>,
    pub breakdowns: Vec<String>,
    pub output_name: String,
    pub warnings: Vec<String>,
}

/// Export paths currently owned by a running job.
#[derive(Debug, Default)]
struct ArtifactClaims {
    paths: Mutex<HashSet<PathBuf>>,
}

impl ArtifactClaims {
    fn claim(self: &Arc<Self>, path: &Path) -> Result<ArtifactClaim> {
        let mut paths = self.paths.lock().unwrap_or_else(|e| e.into_inner());
        if !paths.insert(path.to_path_buf()) {
            return Err(HarvestError::OutputConflict(path.to_path_buf()));
        }
        Ok(ArtifactClaim {
            claims: self.clone(),
            path: path.to_path_buf(),
        })
    }
}

/// Released on drop, including when the job panics.
struct ArtifactClaim {
    claims: Arc<ArtifactClaims>,
    path: PathBuf,
}

impl Drop for ArtifactClaim {
    fn drop(&mut self) {
        let mut paths = self.claims.paths.lock().unwrap_or_else(|e| e.into_inner());
        paths.remove(&self.path);
    }
}

/// Runs one job end to end on a fresh session.
///
/// Every job gets its own session, which is released whether the job
/// succeeds or fails.
#[derive(Clone)]
pub struct JobExecutor {
    config: Arc<HarvestConfig>,
    registry: Arc<SchemaRegistry>,
    dispatch: Arc<DispatchTable>,
    factory: Arc<dyn SessionFactory>,
    steps: StepExecutor,
    claims: Arc<ArtifactClaims>,
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("config", &self.config)
            .field("reports", &self.registry.len())
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

impl JobExecutor {
    pub fn new(
        config: Arc<HarvestConfig>,
        registry: Arc<SchemaRegistry>,
        dispatch: Arc<DispatchTable>,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let steps = StepExecutor::new(config.driver.clone());
        Self {
            config,
            registry,
            dispatch,
            factory,
            steps,
            claims: Arc::default(),
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Resolve the job's schema and check its parameters.
    ///
    /// Fails with `UnknownReportKind` for an unlisted (program, report) pair,
    /// and with `MissingParameter` when a required parameter is absent under
    /// [`MissingParameterPolicy::Fail`].
    pub fn plan(&self, job: &JobSpec) -> Result<JobPlan> {
        if job.targets.is_empty() {
            return Err(HarvestError::InvalidJob(format!(
                "job {} names no targets",
                job.id
            )));
        }

        let schema = self.registry.lookup(&job.program, &job.report)?;
        let mut steps = Vec::with_capacity(schema.len());
        let mut warnings = Vec::new();

        for &parameter in schema {
            match job.values(parameter) {
                Some(values) => steps.push((parameter, values.to_vec())),
                None => match self.config.missing_parameter {
                    MissingParameterPolicy::Warn => {
                        tracing::warn!(
                            job_id = %job.id,
                            parameter = %parameter,
                            program = %job.program,
                            report = %job.report,
                            "Required parameter missing, skipping step"
                        );
                        warnings.push(format!("{} step skipped: no values given", parameter));
                    }
                    MissingParameterPolicy::Fail => {
                        return Err(HarvestError::MissingParameter {
                            parameter,
                            program: job.program.clone(),
                            report: job.report.clone(),
                        });
                    }
                },
            }
        }

        for parameter in job.parameters.keys().filter(|p| !schema.contains(*p)) {
            tracing::debug!(job_id = %job.id, parameter = %parameter, "Parameter not used by report, ignoring");
        }

        let breakdowns = job
            .breakdowns
            .clone()
            .unwrap_or_else(|| self.config.default_breakdowns.clone());

        Ok(JobPlan {
            steps,
            breakdowns,
            output_name: job.output_name(&self.config.output_template),
            warnings,
        })
    }

    /// Run `job` and turn whatever happens into an outcome.
    pub async fn execute(&self, job: &JobSpec, worker_id: usize) -> JobOutcome {
        let started_at = Utc::now();
        tracing::info!(job_id = %job.id, worker_id, job = %job.label(), "Job started");

        let plan = match self.plan(job) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(job_id = %job.id, worker_id, error = %e, "Job rejected before session");
                return JobOutcome::failure(job, worker_id, &e, Vec::new(), started_at);
            }
        };

        let mut warnings = plan.warnings.clone();
        let result = match self.reserve_output(&plan).await {
            Ok(_claim) => self.run(job, &plan, &mut warnings).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(artifact) => {
                tracing::info!(
                    job_id = %job.id,
                    worker_id,
                    artifact = %artifact.display(),
                    warnings = warnings.len(),
                    "Job succeeded"
                );
                JobOutcome::success(job, worker_id, artifact, warnings, started_at)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, worker_id, kind = %e.kind(), error = %e, "Job failed");
                JobOutcome::failure(job, worker_id, &e, warnings, started_at)
            }
        }
    }

    /// Claim the job's export path for the rest of its run.
    ///
    /// Another running job holding the same path, or a file already there
    /// (unless `replace_existing` is set), is an `OutputConflict` and no
    /// session is opened.
    async fn reserve_output(&self, plan: &JobPlan) -> Result<ArtifactClaim> {
        let download_dir = &self.config.session.download_dir;
        let format = self.steps.config().export_format;
        let claim = self
            .claims
            .claim(&artifact_path(download_dir, &plan.output_name, format))?;
        self.steps
            .prepare_artifact(
                download_dir,
                &plan.output_name,
                format,
                self.config.replace_existing,
            )
            .await?;
        Ok(claim)
    }

    /// Open a session, drive it, and always release it.
    async fn run(
        &self,
        job: &JobSpec,
        plan: &JobPlan,
        warnings: &mut Vec<String>,
    ) -> Result<PathBuf> {
        let mut session = Session::open(self.factory.as_ref(), self.config.session.clone()).await?;
        let session_id = session.id();
        tracing::debug!(job_id = %job.id, session_id = %session_id, "Session acquired");

        let result = self.drive(&mut session, job, plan).await;

        if let Err(e) = session.release().await {
            tracing::warn!(job_id = %job.id, session_id = %session_id, error = %e, "Session release failed");
            warnings.push(format!("session release failed: {}", e));
        }
        result
    }

    async fn drive(&self, session: &mut Session, job: &JobSpec, plan: &JobPlan) -> Result<PathBuf> {
        for (index, target) in job.targets.iter().enumerate() {
            self.steps.select_target(session, target, index == 0).await?;
        }

        self.steps
            .select_single_choice(session, Group::Program, &job.program)
            .await?;
        self.steps
            .select_single_choice(session, Group::Report, &job.report)
            .await?;

        for (parameter, values) in &plan.steps {
            let handler = self.dispatch.handler(*parameter)?;
            handler.run(&self.steps, session, values).await?;
        }

        self.steps.apply_filters(session, &plan.breakdowns).await?;

        let format = self.steps.config().export_format;
        self.steps
            .trigger_export(session, &plan.output_name, format)
            .await?;
        self.steps
            .await_artifact(&self.config.session.download_dir, &plan.output_name, format)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PortalModel, SimulatedPortalFactory};

    fn executor(config: HarvestConfig) -> JobExecutor {
        JobExecutor::new(
            Arc::new(config),
            Arc::new(SchemaRegistry::builtin()),
            Arc::new(DispatchTable::standard()),
            Arc::new(SimulatedPortalFactory::new(PortalModel::new())),
        )
    }

    fn staar_job() -> JobSpec {
        JobSpec::new(vec!["Austin ISD".into()], "STAAR 3-8", "Score Codes Summary")
            .with_parameter(Parameter::Administration, ["Spring 2024"])
            .with_parameter(Parameter::Subject, ["Reading"])
    }

    #[test]
    fn plan_follows_schema_order() {
        let exec = executor(HarvestConfig::new("downloads"));
        let job = staar_job().with_parameter(Parameter::Grade, ["Grade 3"]);
        let plan = exec.plan(&job).unwrap();

        let order: Vec<Parameter> = plan.steps.iter().map(|(p, _)| *p).collect();
        assert_eq!(
            order,
            vec![Parameter::Administration, Parameter::Grade, Parameter::Subject]
        );
        assert!(plan.warnings.is_empty());
        assert_eq!(plan.output_name, "Austin ISD_Score Codes Summary_Spring 2024");
    }

    #[test]
    fn plan_warns_on_missing_parameter() {
        let exec = executor(HarvestConfig::new("downloads"));
        let plan = exec.plan(&staar_job()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("grade"));
    }

    #[test]
    fn plan_fails_on_missing_parameter_when_strict() {
        let exec = executor(
            HarvestConfig::new("downloads").with_missing_parameter(MissingParameterPolicy::Fail),
        );
        let err = exec.plan(&staar_job()).unwrap_err();
        assert!(matches!(
            err,
            HarvestError::MissingParameter {
                parameter: Parameter::Grade,
                ..
            }
        ));
    }

    #[test]
    fn plan_rejects_unknown_report() {
        let exec = executor(HarvestConfig::new("downloads"));
        let job = JobSpec::new(vec!["Austin ISD".into()], "STAAR 3-8", "No Such Report");
        let err = exec.plan(&job).unwrap_err();
        assert!(matches!(err, HarvestError::UnknownReportKind { .. }));
    }

    #[test]
    fn plan_uses_default_breakdowns_unless_overridden() {
        let exec = executor(HarvestConfig::new("downloads"));
        let plan = exec.plan(&staar_job()).unwrap();
        assert_eq!(plan.breakdowns, vec!["Ethnicity", "Economically Disadvantaged"]);

        let job = staar_job().with_breakdowns(vec![]);
        assert!(exec.plan(&job).unwrap().breakdowns.is_empty());
    }
}
