use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::Parameter;

const ILLEGAL_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// One report request: targets, program, report and the parameter values to select.
///
/// Never mutated once handed to the pool; the pool only stamps `sequence`
/// while enqueueing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: Uuid,
    /// Position in the submitted batch
    pub sequence: usize,
    pub targets: Vec<String>,
    pub program: String,
    pub report: String,
    pub parameters: BTreeMap<Parameter, Vec<String>>,
    /// Breakdown filters; `None` falls back to the configured defaults
    pub breakdowns: Option<Vec<String>>,
    pub output_template: Option<String>,
}

impl JobSpec {
    pub fn new(
        targets: Vec<String>,
        program: impl Into<String>,
        report: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            targets,
            program: program.into(),
            report: report.into(),
            parameters: BTreeMap::new(),
            breakdowns: None,
            output_template: None,
        }
    }

    pub fn with_parameter<I, S>(mut self, parameter: Parameter, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters
            .insert(parameter, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_breakdowns(mut self, breakdowns: Vec<String>) -> Self {
        self.breakdowns = Some(breakdowns);
        self
    }

    pub fn with_output_template(mut self, template: impl Into<String>) -> Self {
        self.output_template = Some(template.into());
        self
    }

    /// Values for a parameter, or `None` when the job leaves it unset or empty.
    pub fn values(&self, parameter: Parameter) -> Option<&[String]> {
        self.parameters
            .get(&parameter)
            .map(Vec::as_slice)
            .filter(|v| !v.is_empty())
    }

    /// Short human-readable description for logs and reports.
    pub fn label(&self) -> String {
        format!(
            "{} | {} | {}",
            self.targets.join(";"),
            self.program,
            self.report
        )
    }

    /// Render the export file name (without extension).
    ///
    /// Multi-valued fields are joined with `-`, and characters that are not
    /// allowed in file names are replaced with `_`. Unknown placeholders are
    /// left as written.
    pub fn output_name(&self, default_template: &str) -> String {
        let template = self.output_template.as_deref().unwrap_or(default_template);
        let join = |p: Parameter| {
            self.parameters
                .get(&p)
                .map(|v| v.join("-"))
                .unwrap_or_default()
        };

        let mut name = template
            .replace("{target}", &self.targets.join("-"))
            .replace("{program}", &self.program)
            .replace("{report}", &self.report)
            .replace("{job_id}", &self.id.to_string());
        for p in Parameter::ALL {
            name = name.replace(&format!("{{{}}}", p), &join(p));
        }

        name.chars()
            .map(|c| {
                if ILLEGAL_FILENAME_CHARS.contains(&c) || c.is_control() {
                    '_'
                } else {
                    c
                }
            })
            .collect::<String>()
            .trim()
            .to_string()
    }
}
