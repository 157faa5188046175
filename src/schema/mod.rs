//! Report schemas: which parameter steps a report needs, and in what order.
//!
//! The portal only renders a later section once the earlier one has a
//! selection, so the order stored here is a hard dependency of the step
//! sequence, not a display preference.

pub mod registry;

pub use registry::{SchemaEntry, SchemaRegistry};

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// A selectable report parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    Administration,
    Subject,
    Grade,
    Version,
    Cluster,
}

impl Parameter {
    pub const ALL: [Parameter; 5] = [
        Parameter::Administration,
        Parameter::Subject,
        Parameter::Grade,
        Parameter::Version,
        Parameter::Cluster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Administration => "administration",
            Parameter::Subject => "subject",
            Parameter::Grade => "grade",
            Parameter::Version => "version",
            Parameter::Cluster => "cluster",
        }
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parameter {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "administration" => Ok(Parameter::Administration),
            "subject" => Ok(Parameter::Subject),
            "grade" => Ok(Parameter::Grade),
            "version" => Ok(Parameter::Version),
            "cluster" => Ok(Parameter::Cluster),
            other => Err(HarvestError::Config(format!("unknown parameter {:?}", other))),
        }
    }
}
