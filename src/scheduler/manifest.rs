//! Job manifest ingestion.
//!
//! A manifest is a TOML file of `[[job]]` tables. Multi-valued fields are
//! single strings with `;` between values, mirroring the spreadsheet rows
//! the job lists are usually exported from:
//!
//! ```toml
//! [[job]]
//! targets = "ALDINE ISD;HOUSTON ISD"
//! program = "STAAR 3-8"
//! report = "Standard Summary"
//! administration = "Spring 2023;Spring 2024"
//! subject = "Mathematics"
//! grade = "Grade 3;Grade 4"
//! version = "English"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{HarvestError, Result};
use crate::scheduler::job::JobSpec;
use crate::schema::Parameter;

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default, rename = "job")]
    jobs: Vec<JobRecord>,
}

/// One raw manifest row before splitting.
#[derive(Debug, Default, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub targets: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub report: String,
    #[serde(default)]
    pub administration: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub cluster: String,
    pub breakdowns: Option<String>,
    pub output: Option<String>,
}

/// Split a `;`-delimited field, trimming items and dropping empty ones.
pub fn split_values(field: &str) -> Vec<String> {
    field
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl JobRecord {
    fn field(&self, parameter: Parameter) -> &str {
        match parameter {
            Parameter::Administration => self.administration.as_str(),
            Parameter::Subject => self.subject.as_str(),
            Parameter::Grade => self.grade.as_str(),
            Parameter::Version => self.version.as_str(),
            Parameter::Cluster => self.cluster.as_str(),
        }
    }

    /// Decode into a job. Returns `Ok(None)` for rows without any target.
    pub fn into_spec(self) -> Result<Option<JobSpec>> {
        let targets = split_values(&self.targets);
        if targets.is_empty() {
            return Ok(None);
        }
        let program = self.program.trim();
        let report = self.report.trim();
        if program.is_empty() || report.is_empty() {
            return Err(HarvestError::InvalidJob(format!(
                "job for {} is missing its program or report",
                targets.join(";")
            )));
        }

        let mut job = JobSpec::new(targets, program, report);
        for parameter in Parameter::ALL {
            let values = split_values(self.field(parameter));
            if !values.is_empty() {
                job = job.with_parameter(parameter, values);
            }
        }
        if let Some(breakdowns) = &self.breakdowns {
            job = job.with_breakdowns(split_values(breakdowns));
        }
        if let Some(output) = self.output.as_deref().map(str::trim) {
            if !output.is_empty() {
                job = job.with_output_template(output);
            }
        }
        Ok(Some(job))
    }
}

pub fn parse_manifest(input: &str) -> Result<Vec<JobSpec>> {
    let manifest: Manifest = toml::from_str(input)?;
    let mut jobs = Vec::with_capacity(manifest.jobs.len());
    for (row, record) in manifest.jobs.into_iter().enumerate() {
        match record.into_spec()? {
            Some(job) => {
                tracing::debug!(row, job = %job.label(), "Job loaded");
                jobs.push(job);
            }
            None => tracing::warn!(row, "Manifest row has no targets, skipped"),
        }
    }
    Ok(jobs)
}

pub fn load_manifest(path: &Path) -> Result<Vec<JobSpec>> {
    let input = std::fs::read_to_string(path)?;
    parse_manifest(&input)
}
