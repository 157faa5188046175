use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::Parameter;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Unknown report kind: program {program:?} has no report {report:?}")]
    UnknownReportKind { program: String, report: String },

    #[error("Unsupported control type {found:?} for option {label:?}")]
    UnsupportedControlType { label: String, found: String },

    #[error("Timed out after {timeout:?} waiting for {target}")]
    StepTimeout { target: String, timeout: Duration },

    #[error("No locator strategy matched {target}")]
    LocatorNotFound { target: String },

    #[error("Control not interactable: {0}")]
    NotInteractable(String),

    #[error("Session crashed: {0}")]
    SessionCrashed(String),

    #[error("Required parameter {parameter} missing for {program} / {report}")]
    MissingParameter {
        parameter: Parameter,
        program: String,
        report: String,
    },

    #[error("Export target {} already exists or is claimed by another running job", .0.display())]
    OutputConflict(PathBuf),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HarvestError {
    /// Classify this error for the outcome record.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::UnknownReportKind { .. } => ErrorKind::UnknownReportKind,
            HarvestError::UnsupportedControlType { .. } => ErrorKind::UnsupportedControlType,
            HarvestError::StepTimeout { .. } | HarvestError::NotInteractable(_) => {
                ErrorKind::StepTimeout
            }
            HarvestError::LocatorNotFound { .. } => ErrorKind::LocatorNotFound,
            HarvestError::SessionCrashed(_) => ErrorKind::SessionCrashed,
            HarvestError::MissingParameter { .. } => ErrorKind::MissingParameter,
            HarvestError::OutputConflict(_) => ErrorKind::OutputConflict,
            HarvestError::InvalidJob(_)
            | HarvestError::Config(_)
            | HarvestError::Io(_)
            | HarvestError::Toml(_) => ErrorKind::Internal,
        }
    }
}

/// Failure classification recorded on a [`JobOutcome`](crate::scheduler::JobOutcome).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownReportKind,
    UnsupportedControlType,
    StepTimeout,
    LocatorNotFound,
    SessionCrashed,
    MissingParameter,
    OutputConflict,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::UnknownReportKind => write!(f, "unknown_report_kind"),
            ErrorKind::UnsupportedControlType => write!(f, "unsupported_control_type"),
            ErrorKind::StepTimeout => write!(f, "step_timeout"),
            ErrorKind::LocatorNotFound => write!(f, "locator_not_found"),
            ErrorKind::SessionCrashed => write!(f, "session_crashed"),
            ErrorKind::MissingParameter => write!(f, "missing_parameter"),
            ErrorKind::OutputConflict => write!(f, "output_conflict"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
