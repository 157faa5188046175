use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{HarvestError, Result};
use crate::schema::Parameter;

use crate::schema::Parameter::{Administration as Admin, Cluster, Grade, Subject, Version};

/// Ordered parameter steps for one (program, report) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub program: String,
    pub report: String,
    pub steps: Vec<Parameter>,
}

/// Read-only table mapping (program, report) to its ordered parameter steps.
///
/// Built once at startup and shared behind an `Arc` by every worker.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entries: BTreeMap<(String, String), Vec<Parameter>>,
}

#[derive(Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "report")]
    reports: Vec<SchemaRecord>,
}

#[derive(Deserialize)]
struct SchemaRecord {
    program: String,
    report: String,
    steps: Vec<String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The program/report table of the Texas research portal.
    pub fn builtin() -> Self {
        let table: &[(&str, &str, &[Parameter])] = &[
            ("STAAR 3-8", "Standard Constructed Response Summary", &[Admin, Grade, Version]),
            ("STAAR 3-8", "Standard Combined Summary", &[Admin, Subject, Grade]),
            (
                "STAAR 3-8",
                "Group Summary: Performance Levels & Reporting Categories",
                &[Admin, Subject, Grade],
            ),
            ("STAAR 3-8", "Standard Summary", &[Admin, Subject, Version, Grade]),
            ("STAAR 3-8", "Item Analysis Summary", &[Admin, Grade, Subject, Version]),
            ("STAAR 3-8", "Score Codes Summary", &[Admin, Grade, Subject]),
            ("STAAR 3-8 Alternate 2 3-8", "Group Summary", &[Admin, Grade, Subject]),
            ("STAAR 3-8 Alternate 2 3-8", "Score Codes Summary", &[Admin, Grade, Subject]),
            ("STAAR 3-8 Alternate 2 3-8", "Standard Summary", &[Admin, Grade, Subject]),
            ("STAAR Alternate 2 EOC", "Group Summary: Performance Levels", &[Admin, Subject]),
            ("STAAR Alternate 2 EOC", "Score Codes Summary", &[Admin, Subject]),
            ("STAAR Alternate 2 EOC", "Standard Summary", &[Admin, Subject]),
            ("STAAR Cumulative", "Standard Cummulative Summary", &[Admin, Grade, Subject]),
            (
                "STAAR EOC",
                "Group Summary: Performance Levels & Reporting Categories",
                &[Admin, Subject],
            ),
            ("STAAR EOC", "Standard Combined Summary", &[Admin, Subject]),
            ("STAAR EOC", "Item Analysis Summary", &[Admin, Subject]),
            ("STAAR EOC", "Score Codes Summary", &[Admin, Subject]),
            ("STAAR EOC", "Standard Constructed Response Summary", &[Admin, Subject, Version]),
            ("STAAR EOC", "Standard Summary", &[Admin, Subject, Version]),
            ("TELPAS", "Cluster Summary", &[Admin, Subject, Cluster]),
            ("TELPAS", "Standard Summary For Grade", &[Admin, Grade]),
            ("TELPAS", "Group Summary: Performance Levels", &[Admin, Subject, Grade]),
            ("TELPAS", "Score Codes Summary", &[Admin, Grade, Subject]),
            ("TELPAS", "Standard Summary For Cluster", &[Admin, Cluster]),
            ("TELPAS Alternate", "Group Summary: Performance Levels", &[Admin, Subject, Grade]),
            ("TELPAS Alternate", "Score Codes Summary", &[Admin, Grade]),
            ("TELPAS Alternate", "Standard Summary", &[Admin, Grade]),
        ];

        let mut registry = Self::new();
        for (program, report, steps) in table {
            registry
                .entries
                .insert((program.to_string(), report.to_string()), steps.to_vec());
        }
        registry
    }

    /// Parse a registry from `[[report]]` tables.
    ///
    /// ```toml
    /// [[report]]
    /// program = "STAAR EOC"
    /// report = "Standard Summary"
    /// steps = ["administration", "subject", "version"]
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: SchemaFile = toml::from_str(input)?;
        let mut registry = Self::new();
        for record in file.reports {
            let steps = record
                .steps
                .iter()
                .map(|s| s.parse::<Parameter>())
                .collect::<Result<Vec<_>>>()?;
            registry.insert(&record.program, &record.report, steps)?;
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// Register a report. Rejects duplicates, empty step lists and repeated steps.
    pub fn insert(&mut self, program: &str, report: &str, steps: Vec<Parameter>) -> Result<()> {
        if steps.is_empty() {
            return Err(HarvestError::Config(format!(
                "{} / {} declares no steps",
                program, report
            )));
        }
        for (i, step) in steps.iter().enumerate() {
            if steps[..i].contains(step) {
                return Err(HarvestError::Config(format!(
                    "{} / {} lists {} twice",
                    program, report, step
                )));
            }
        }
        let key = (program.to_string(), report.to_string());
        if self.entries.contains_key(&key) {
            return Err(HarvestError::Config(format!(
                "duplicate schema entry for {} / {}",
                program, report
            )));
        }
        self.entries.insert(key, steps);
        Ok(())
    }

    /// Ordered parameter steps for a (program, report) pair.
    pub fn lookup(&self, program: &str, report: &str) -> Result<&[Parameter]> {
        self.entries
            .get(&(program.to_string(), report.to_string()))
            .map(Vec::as_slice)
            .ok_or_else(|| HarvestError::UnknownReportKind {
                program: program.to_string(),
                report: report.to_string(),
            })
    }

    pub fn programs(&self) -> Vec<&str> {
        let mut programs: Vec<&str> = self.entries.keys().map(|(p, _)| p.as_str()).collect();
        programs.dedup();
        programs
    }

    pub fn reports(&self, program: &str) -> Vec<&str> {
        self.entries
            .keys()
            .filter(|(p, _)| p == program)
            .map(|(_, r)| r.as_str())
            .collect()
    }

    /// All entries, sorted by program then report.
    pub fn entries(&self) -> Vec<SchemaEntry> {
        self.entries
            .iter()
            .map(|((program, report), steps)| SchemaEntry {
                program: program.clone(),
                report: report.clone(),
                steps: steps.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn builtin_lookup_preserves_declared_order() {
        let registry = SchemaRegistry::builtin();
        let steps = registry.lookup("STAAR 3-8", "Item Analysis Summary").unwrap();
        assert_eq!(steps, &[Admin, Grade, Subject, Version]);

        let steps = registry.lookup("STAAR 3-8", "Standard Summary").unwrap();
        assert_eq!(steps, &[Admin, Subject, Version, Grade]);
    }

    #[test]
    fn lookup_is_deterministic() {
        let registry = SchemaRegistry::builtin();
        for entry in registry.entries() {
            let first = registry.lookup(&entry.program, &entry.report).unwrap().to_vec();
            for _ in 0..3 {
                assert_eq!(registry.lookup(&entry.program, &entry.report).unwrap(), first);
            }
            assert_eq!(first, entry.steps);
        }
    }

    #[test]
    fn same_report_name_differs_per_program() {
        let registry = SchemaRegistry::builtin();
        let eoc = registry.lookup("STAAR EOC", "Standard Summary").unwrap();
        let grades = registry.lookup("STAAR 3-8", "Standard Summary").unwrap();
        assert_ne!(eoc, grades);
    }

    #[test]
    fn unknown_pair_is_unknown_report_kind() {
        let registry = SchemaRegistry::builtin();
        let err = registry.lookup("TELPAS", "Nonexistent Summary").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownReportKind);
    }

    #[test]
    fn programs_and_reports_are_sorted() {
        let registry = SchemaRegistry::builtin();
        let programs = registry.programs();
        assert_eq!(programs.len(), 7);
        assert_eq!(programs[0], "STAAR 3-8");
        assert_eq!(
            registry.reports("TELPAS Alternate"),
            vec![
                "Group Summary: Performance Levels",
                "Score Codes Summary",
                "Standard Summary"
            ]
        );
    }

    #[test]
    fn from_toml_parses_reports() {
        let registry = SchemaRegistry::from_toml_str(
            r#"
            [[report]]
            program = "P"
            report = "R"
            steps = ["administration", "Subject", "version"]
            "#,
        )
        .unwrap();
        assert_eq!(registry.lookup("P", "R").unwrap(), &[Admin, Subject, Version]);
    }

    #[test]
    fn from_toml_rejects_bad_tables() {
        let unknown = r#"
            [[report]]
            program = "P"
            report = "R"
            steps = ["district"]
        "#;
        assert!(SchemaRegistry::from_toml_str(unknown).is_err());

        let duplicate = r#"
            [[report]]
            program = "P"
            report = "R"
            steps = ["grade"]

            [[report]]
            program = "P"
            report = "R"
            steps = ["subject"]
        "#;
        assert!(SchemaRegistry::from_toml_str(duplicate).is_err());

        let empty = r#"
            [[report]]
            program = "P"
            report = "R"
            steps = []
        "#;
        assert!(SchemaRegistry::from_toml_str(empty).is_err());
    }

    #[test]
    fn insert_rejects_repeated_steps() {
        let mut registry = SchemaRegistry::new();
        assert!(registry.insert("P", "R", vec![Grade, Grade]).is_err());
        assert!(registry.is_empty());
    }
}
