use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

pub const DEFAULT_PORTAL_URL: &str = "https://txresearchportal.com/selections";
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "{target}_{report}_{administration}";

/// Per-session settings, handed to the session factory when a session is created.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Entry page every session navigates to before the first step
    pub portal_url: String,
    /// Shared directory exported artifacts land in
    pub download_dir: PathBuf,
    /// Run the browser without a visible window
    pub headless: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            download_dir: PathBuf::from("downloads"),
            headless: true,
        }
    }
}

/// Export file formats offered by the portal's download dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(HarvestError::Config(format!("unknown export format {:?}", other))),
        }
    }
}

/// Wait and pacing policy for the step executor.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Upper bound on waiting for any anchor to become interactable
    pub step_timeout: Duration,
    /// Delay between readiness probes
    pub poll_interval: Duration,
    /// Pause after scrolls and toggles, where the surface gives no readiness signal
    pub settle_delay: Duration,
    /// Upper bound on waiting for the exported file to appear on disk
    pub download_timeout: Duration,
    pub export_format: ExportFormat,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            settle_delay: Duration::from_millis(500),
            download_timeout: Duration::from_secs(30),
            export_format: ExportFormat::Csv,
        }
    }
}

/// What to do when a job lacks a parameter its report schema requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingParameterPolicy {
    /// Skip the step and attach a warning to the outcome
    #[default]
    Warn,
    /// Fail the job before a session is opened
    Fail,
}

impl FromStr for MissingParameterPolicy {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warn" => Ok(MissingParameterPolicy::Warn),
            "fail" => Ok(MissingParameterPolicy::Fail),
            other => Err(HarvestError::Config(format!(
                "unknown missing-parameter policy {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub session: SessionConfig,
    pub driver: DriverConfig,
    /// Requested number of concurrent sessions
    pub concurrency: usize,
    pub missing_parameter: MissingParameterPolicy,
    /// Breakdown filters applied to jobs that do not name their own
    pub default_breakdowns: Vec<String>,
    pub output_template: String,
    /// Delete an existing export file of the same name instead of failing the job
    pub replace_existing: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            driver: DriverConfig::default(),
            concurrency: 3,
            missing_parameter: MissingParameterPolicy::default(),
            default_breakdowns: vec![
                "Ethnicity".to_string(),
                "Economically Disadvantaged".to_string(),
            ],
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            replace_existing: false,
        }
    }
}

impl HarvestConfig {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            session: SessionConfig {
                download_dir: download_dir.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_missing_parameter(mut self, policy: MissingParameterPolicy) -> Self {
        self.missing_parameter = policy;
        self
    }

    pub fn with_driver(mut self, driver: DriverConfig) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_breakdowns(mut self, breakdowns: Vec<String>) -> Self {
        self.default_breakdowns = breakdowns;
        self
    }

    pub fn with_replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }
}
