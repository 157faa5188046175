//! In-memory portal.
//!
//! Models the selection form closely enough to exercise the step executor:
//! sections appear only after the previous one has a selection, options are
//! checkboxes or radios, exports write a small CSV into the download
//! directory. Faults can be injected per target to simulate hung controls,
//! crashed sessions and odd input types.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::config::{ExportFormat, SessionConfig};
use crate::driver::session::SessionFactory;
use crate::driver::surface::{
    Anchor, ControlKind, ElementHandle, Group, Locator, Strategy, Surface,
};
use crate::error::{HarvestError, Result};
use crate::scheduler::JobSpec;
use crate::schema::{Parameter, SchemaRegistry};

/// One parameter section of a report form.
#[derive(Debug, Clone)]
pub struct SectionModel {
    pub parameter: Parameter,
    /// Value of the `type` attribute of every option input
    pub input_type: String,
    pub options: Vec<String>,
}

impl SectionModel {
    pub fn checkboxes<I, S>(parameter: Parameter, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_input_type(parameter, "checkbox", options)
    }

    pub fn radios<I, S>(parameter: Parameter, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_input_type(parameter, "radio", options)
    }

    pub fn with_input_type<I, S>(parameter: Parameter, input_type: &str, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parameter,
            input_type: input_type.to_string(),
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct ReportModel {
    name: String,
    sections: Vec<SectionModel>,
}

#[derive(Debug, Clone)]
struct ProgramModel {
    name: String,
    reports: Vec<ReportModel>,
}

/// Static content of the simulated portal.
#[derive(Debug, Clone)]
pub struct PortalModel {
    directory: Vec<String>,
    programs: Vec<ProgramModel>,
    breakdowns: Vec<String>,
    formats: Vec<ExportFormat>,
}

impl Default for PortalModel {
    fn default() -> Self {
        Self {
            directory: Vec::new(),
            programs: Vec::new(),
            breakdowns: Vec::new(),
            formats: vec![ExportFormat::Csv, ExportFormat::Xlsx],
        }
    }
}

impl PortalModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for target in targets {
            let target = target.into();
            if !self.directory.contains(&target) {
                self.directory.push(target);
            }
        }
        self
    }

    /// Add a report; options are listed in insertion order, so earlier entries
    /// win substring matches.
    pub fn with_report(mut self, program: &str, report: &str, sections: Vec<SectionModel>) -> Self {
        let index = match self.programs.iter().position(|p| p.name == program) {
            Some(index) => index,
            None => {
                self.programs.push(ProgramModel {
                    name: program.to_string(),
                    reports: Vec::new(),
                });
                self.programs.len() - 1
            }
        };
        self.programs[index].reports.push(ReportModel {
            name: report.to_string(),
            sections,
        });
        self
    }

    pub fn with_breakdowns<I, S>(mut self, breakdowns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.breakdowns = breakdowns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_formats(mut self, formats: Vec<ExportFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Build a portal that offers everything `jobs` ask for.
    ///
    /// Sections follow the registry's order; versions are radios, every other
    /// parameter is a checkbox list. Programs and reports are listed sorted.
    pub fn from_jobs(registry: &SchemaRegistry, jobs: &[JobSpec], breakdowns: &[String]) -> Self {
        let mut options: BTreeMap<(String, String, Parameter), BTreeSet<String>> = BTreeMap::new();
        let mut reports: BTreeSet<(String, String)> = BTreeSet::new();
        let mut all_breakdowns: BTreeSet<String> = breakdowns.iter().cloned().collect();
        let mut model = Self::new();

        for job in jobs {
            model = model.with_targets(job.targets.iter().cloned());
            if let Some(b) = &job.breakdowns {
                all_breakdowns.extend(b.iter().cloned());
            }
            if registry.lookup(&job.program, &job.report).is_err() {
                continue;
            }
            reports.insert((job.program.clone(), job.report.clone()));
            for (parameter, values) in &job.parameters {
                options
                    .entry((job.program.clone(), job.report.clone(), *parameter))
                    .or_default()
                    .extend(values.iter().cloned());
            }
        }

        for (program, report) in reports {
            let Ok(steps) = registry.lookup(&program, &report) else {
                continue;
            };
            let sections = steps
                .iter()
                .map(|&parameter| {
                    let values = options
                        .get(&(program.clone(), report.clone(), parameter))
                        .cloned()
                        .unwrap_or_default();
                    if parameter == Parameter::Version {
                        SectionModel::radios(parameter, values)
                    } else {
                        SectionModel::checkboxes(parameter, values)
                    }
                })
                .collect();
            model = model.with_report(&program, &report, sections);
        }
        model.with_breakdowns(all_breakdowns)
    }
}

/// An injected misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The anchor never becomes interactable, under any strategy
    Hide(Anchor),
    /// The anchor only resolves under the relaxed strategy
    PrimaryMisses(Anchor),
    /// Probing the anchor reports a crashed session
    Crash(Anchor),
    /// The first `n` clicks on the anchor are intercepted, as by an overlay still fading out
    ClickBlocked(Anchor, usize),
    /// Options of this parameter report the given input type
    InputType(Parameter, String),
    /// Exports are confirmed but no file is written
    DropDownload,
}

/// A fault, optionally limited to sessions that have selected `target`.
#[derive(Debug, Clone)]
pub struct FaultRule {
    pub target: Option<String>,
    pub fault: Fault,
}

impl FaultRule {
    pub fn always(fault: Fault) -> Self {
        Self {
            target: None,
            fault,
        }
    }

    pub fn for_target(target: impl Into<String>, fault: Fault) -> Self {
        Self {
            target: Some(target.into()),
            fault,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    SearchInput,
    SearchSubmit,
    ResultsTable,
    Result(usize),
    SearchAgain,
    Section(Group),
    Program(usize),
    Report(usize),
    Option { section: usize, option: usize },
    SubmitSelections,
    FilterDialogOpen,
    FilterDialog,
    Filter(usize),
    FilterApply,
    ExportOpen,
    ExportName,
    ExportFormatMenu,
    ExportFormat(ExportFormat),
    ExportConfirm,
}

/// A file written by a confirmed export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub name: String,
    pub format: ExportFormat,
    pub targets: Vec<String>,
}

#[derive(Debug, Default)]
struct PortalState {
    opened: bool,
    closed: bool,
    search_visible: bool,
    searched: bool,
    query: String,
    selected_targets: Vec<String>,
    program: Option<usize>,
    report: Option<usize>,
    checked: Vec<Vec<bool>>,
    submitted: bool,
    filter_dialog_open: bool,
    filter_checked: Vec<bool>,
    applied_breakdowns: Vec<String>,
    export_open: bool,
    export_name: String,
    format_menu_open: bool,
    chosen_format: Option<ExportFormat>,
    exports: Vec<ExportRecord>,
    clicks: usize,
    elements: Vec<Element>,
    /// Intercepted clicks still to come, per element
    blocked_clicks: Vec<(Element, usize)>,
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn label_matches(option: &str, label: &str, strategy: Strategy) -> bool {
    match strategy {
        Strategy::Primary => option.contains(label),
        Strategy::Relaxed => normalize(option).contains(&normalize(label)),
    }
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Read-only view of one simulated session, for assertions.
#[derive(Debug, Clone)]
pub struct SessionView {
    model: Arc<PortalModel>,
    state: Arc<Mutex<PortalState>>,
}

impl SessionView {
    fn lock(&self) -> MutexGuard<'_, PortalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn selected_targets(&self) -> Vec<String> {
        self.lock().selected_targets.clone()
    }

    pub fn program(&self) -> Option<String> {
        let state = self.lock();
        state.program.map(|p| self.model.programs[p].name.clone())
    }

    pub fn report(&self) -> Option<String> {
        let state = self.lock();
        let program = state.program?;
        state
            .report
            .map(|r| self.model.programs[program].reports[r].name.clone())
    }

    /// Labels currently selected in a parameter section.
    pub fn selected(&self, parameter: Parameter) -> Vec<String> {
        let state = self.lock();
        let (Some(p), Some(r)) = (state.program, state.report) else {
            return Vec::new();
        };
        let report = &self.model.programs[p].reports[r];
        let Some(section) = report.sections.iter().position(|s| s.parameter == parameter) else {
            return Vec::new();
        };
        report.sections[section]
            .options
            .iter()
            .zip(&state.checked[section])
            .filter(|&(_, &checked)| checked)
            .map(|(label, _)| label.clone())
            .collect()
    }

    pub fn applied_breakdowns(&self) -> Vec<String> {
        self.lock().applied_breakdowns.clone()
    }

    pub fn exports(&self) -> Vec<ExportRecord> {
        self.lock().exports.clone()
    }

    pub fn clicks(&self) -> usize {
        self.lock().clicks
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[derive(Debug, Default)]
struct SessionStats {
    created: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
}

/// A single simulated portal session.
pub struct SimulatedPortal {
    model: Arc<PortalModel>,
    faults: Arc<Vec<FaultRule>>,
    state: Arc<Mutex<PortalState>>,
    download_dir: std::path::PathBuf,
    stats: Option<Arc<SessionStats>>,
}

impl SimulatedPortal {
    pub fn new(model: Arc<PortalModel>, faults: Arc<Vec<FaultRule>>, config: &SessionConfig) -> Self {
        Self {
            model,
            faults,
            state: Arc::new(Mutex::new(PortalState::default())),
            download_dir: config.download_dir.clone(),
            stats: None,
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            model: self.model.clone(),
            state: self.state.clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PortalState>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return Err(HarvestError::SessionCrashed("session already closed".to_string()));
        }
        Ok(state)
    }

    fn active_faults<'a>(&'a self, state: &'a PortalState) -> impl Iterator<Item = &'a Fault> + 'a {
        self.faults
            .iter()
            .filter(move |rule| match &rule.target {
                None => true,
                Some(target) => state.selected_targets.iter().any(|t| t == target),
            })
            .map(|rule| &rule.fault)
    }

    fn section_visible(&self, state: &PortalState, group: Group) -> bool {
        if !state.opened || state.search_visible {
            return false;
        }
        match group {
            Group::Program => !state.selected_targets.is_empty(),
            Group::Report => state.program.is_some(),
            Group::Parameter(parameter) => {
                let Some(index) = self.section_index(state, parameter) else {
                    return false;
                };
                state.checked[..index]
                    .iter()
                    .all(|section| section.iter().any(|&c| c))
            }
        }
    }

    fn section_index(&self, state: &PortalState, parameter: Parameter) -> Option<usize> {
        let report = self.current_report(state)?;
        report.sections.iter().position(|s| s.parameter == parameter)
    }

    fn current_report<'a>(&'a self, state: &PortalState) -> Option<&'a ReportModel> {
        let program = state.program?;
        let report = state.report?;
        Some(&self.model.programs[program].reports[report])
    }

    fn resolve(&self, state: &PortalState, locator: &Locator) -> Option<Element> {
        let form_visible = state.opened && !state.search_visible;
        let results_visible = state.opened && state.search_visible && state.searched;
        let view_visible = form_visible && state.submitted;

        match &locator.anchor {
            Anchor::SearchInput if state.opened && state.search_visible => Some(Element::SearchInput),
            Anchor::SearchSubmit if state.opened && state.search_visible => Some(Element::SearchSubmit),
            Anchor::ResultsTable if results_visible => Some(Element::ResultsTable),
            Anchor::FirstResult if results_visible => {
                let query = normalize(&state.query);
                if query.is_empty() {
                    return None;
                }
                self.model
                    .directory
                    .iter()
                    .position(|entry| normalize(entry).contains(&query))
                    .map(Element::Result)
            }
            Anchor::SearchAgain if form_visible && !state.selected_targets.is_empty() => {
                Some(Element::SearchAgain)
            }
            Anchor::Section(group) if self.section_visible(state, *group) => {
                Some(Element::Section(*group))
            }
            Anchor::Choice { group, label } if self.section_visible(state, *group) => {
                match group {
                    Group::Program => self
                        .model
                        .programs
                        .iter()
                        .position(|p| label_matches(&p.name, label, locator.strategy))
                        .map(Element::Program),
                    Group::Report => {
                        let program = &self.model.programs[state.program?];
                        program
                            .reports
                            .iter()
                            .position(|r| label_matches(&r.name, label, locator.strategy))
                            .map(Element::Report)
                    }
                    Group::Parameter(parameter) => {
                        let section = self.section_index(state, *parameter)?;
                        let report = self.current_report(state)?;
                        report.sections[section]
                            .options
                            .iter()
                            .position(|o| label_matches(o, label, locator.strategy))
                            .map(|option| Element::Option { section, option })
                    }
                }
            }
            Anchor::SubmitSelections if form_visible && !state.submitted => {
                let report = self.current_report(state)?;
                let first_done = state
                    .checked
                    .first()
                    .map_or(true, |section| section.iter().any(|&c| c));
                (report.sections.is_empty() || first_done).then_some(Element::SubmitSelections)
            }
            Anchor::FilterDialogOpen if view_visible && !state.filter_dialog_open && !state.export_open => {
                Some(Element::FilterDialogOpen)
            }
            Anchor::FilterDialog if state.filter_dialog_open => Some(Element::FilterDialog),
            Anchor::FilterOption(name) if state.filter_dialog_open => {
                self.model
                    .breakdowns
                    .iter()
                    .position(|b| match locator.strategy {
                        Strategy::Primary => b.trim() == name.trim(),
                        Strategy::Relaxed => normalize(b).contains(&normalize(name)),
                    })
                    .map(Element::Filter)
            }
            Anchor::FilterApply if state.filter_dialog_open => Some(Element::FilterApply),
            Anchor::ExportOpen if view_visible && !state.filter_dialog_open && !state.export_open => {
                Some(Element::ExportOpen)
            }
            Anchor::ExportName if state.export_open => Some(Element::ExportName),
            Anchor::ExportFormatMenu if state.export_open => Some(Element::ExportFormatMenu),
            Anchor::ExportFormat(format)
                if state.export_open
                    && state.format_menu_open
                    && self.model.formats.contains(format) =>
            {
                Some(Element::ExportFormat(*format))
            }
            Anchor::ExportConfirm
                if state.export_open
                    && state.chosen_format.is_some()
                    && !state.export_name.trim().is_empty() =>
            {
                Some(Element::ExportConfirm)
            }
            _ => None,
        }
    }

    fn element(state: &PortalState, handle: ElementHandle) -> Result<Element> {
        state
            .elements
            .get(handle.0 as usize)
            .copied()
            .ok_or_else(|| HarvestError::SessionCrashed(format!("stale element handle {}", handle.0)))
    }

    fn handle_for(state: &mut PortalState, element: Element) -> ElementHandle {
        let index = match state.elements.iter().position(|&e| e == element) {
            Some(index) => index,
            None => {
                state.elements.push(element);
                state.elements.len() - 1
            }
        };
        ElementHandle(index as u64)
    }

    /// Apply a click. Returns a pending export to write once the lock is released.
    fn apply_click(&self, state: &mut PortalState, element: Element) -> Option<ExportRecord> {
        state.clicks += 1;
        match element {
            Element::SearchSubmit => state.searched = true,
            Element::Result(index) => {
                let target = self.model.directory[index].clone();
                if !state.selected_targets.contains(&target) {
                    state.selected_targets.push(target);
                }
                state.search_visible = false;
                state.searched = false;
            }
            Element::SearchAgain => {
                state.search_visible = true;
                state.searched = false;
                state.query.clear();
            }
            Element::Program(index) => {
                state.program = Some(index);
                state.report = None;
                state.checked.clear();
                state.submitted = false;
            }
            Element::Report(index) => {
                state.report = Some(index);
                state.submitted = false;
                state.checked = self
                    .current_report(state)
                    .map(|r| r.sections.iter().map(|s| vec![false; s.options.len()]).collect())
                    .unwrap_or_default();
            }
            Element::Option { section, option } => {
                let is_radio = self
                    .current_report(state)
                    .map(|r| r.sections[section].input_type == "radio")
                    .unwrap_or(false);
                let flags = &mut state.checked[section];
                if is_radio {
                    flags.iter_mut().for_each(|f| *f = false);
                    flags[option] = true;
                } else {
                    flags[option] = !flags[option];
                }
            }
            Element::SubmitSelections => state.submitted = true,
            Element::FilterDialogOpen => {
                state.filter_dialog_open = true;
                if state.filter_checked.len() != self.model.breakdowns.len() {
                    state.filter_checked = vec![false; self.model.breakdowns.len()];
                }
            }
            Element::Filter(index) => state.filter_checked[index] = !state.filter_checked[index],
            Element::FilterApply => {
                state.filter_dialog_open = false;
                state.applied_breakdowns = self
                    .model
                    .breakdowns
                    .iter()
                    .zip(&state.filter_checked)
                    .filter(|&(_, &checked)| checked)
                    .map(|(name, _)| name.clone())
                    .collect();
            }
            Element::ExportOpen => {
                state.export_open = true;
                state.export_name = "Report".to_string();
                state.format_menu_open = false;
                state.chosen_format = None;
            }
            Element::ExportFormatMenu => state.format_menu_open = true,
            Element::ExportFormat(format) => {
                state.chosen_format = Some(format);
                state.format_menu_open = false;
            }
            Element::ExportConfirm => {
                state.export_open = false;
                let format = state.chosen_format?;
                let record = ExportRecord {
                    name: state.export_name.clone(),
                    format,
                    targets: state.selected_targets.clone(),
                };
                state.exports.push(record.clone());
                return Some(record);
            }
            Element::SearchInput
            | Element::ResultsTable
            | Element::Section(_)
            | Element::FilterDialog
            | Element::ExportName => {}
        }
        None
    }

    fn render_export(&self, state: &PortalState, record: &ExportRecord) -> String {
        let mut header = vec!["Organization".to_string(), "Program".to_string(), "Report".to_string()];
        let mut values = Vec::new();
        if let Some(report) = self.current_report(state) {
            for (section, model) in report.sections.iter().enumerate() {
                header.push(model.parameter.to_string());
                let selected: Vec<&str> = model
                    .options
                    .iter()
                    .zip(&state.checked[section])
                    .filter(|&(_, &c)| c)
                    .map(|(o, _)| o.as_str())
                    .collect();
                values.push(selected.join("; "));
            }
        }
        let program = state
            .program
            .map(|p| self.model.programs[p].name.as_str())
            .unwrap_or_default();
        let report = self
            .current_report(state)
            .map(|r| r.name.as_str())
            .unwrap_or_default();

        let mut out = header.iter().map(|h| quote(h)).collect::<Vec<_>>().join(",");
        out.push('\n');
        for target in &record.targets {
            let mut row = vec![quote(target), quote(&program), quote(&report)];
            row.extend(values.iter().map(|v| quote(v)));
            out.push_str(&row.join(","));
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl Surface for SimulatedPortal {
    async fn open(&mut self, _url: &str) -> Result<()> {
        let mut state = self.lock()?;
        let elements = std::mem::take(&mut state.elements);
        *state = PortalState {
            opened: true,
            search_visible: true,
            elements,
            ..Default::default()
        };
        Ok(())
    }

    async fn probe(&mut self, locator: &Locator) -> Result<Option<ElementHandle>> {
        let mut state = self.lock()?;
        for fault in self.active_faults(&state) {
            match fault {
                Fault::Crash(anchor) if *anchor == locator.anchor => {
                    return Err(HarvestError::SessionCrashed(format!(
                        "renderer died while locating {}",
                        locator
                    )));
                }
                Fault::Hide(anchor) if *anchor == locator.anchor => return Ok(None),
                Fault::PrimaryMisses(anchor)
                    if *anchor == locator.anchor && locator.strategy == Strategy::Primary =>
                {
                    return Ok(None)
                }
                _ => {}
            }
        }
        let Some(element) = self.resolve(&state, locator) else {
            return Ok(None);
        };
        let blocked = self.active_faults(&state).find_map(|f| match f {
            Fault::ClickBlocked(anchor, n) if *anchor == locator.anchor => Some(*n),
            _ => None,
        });
        if let Some(n) = blocked {
            if !state.blocked_clicks.iter().any(|(e, _)| *e == element) {
                state.blocked_clicks.push((element, n));
            }
        }
        Ok(Some(Self::handle_for(&mut state, element)))
    }

    async fn click(&mut self, element: ElementHandle) -> Result<()> {
        let (pending, contents) = {
            let mut state = self.lock()?;
            let element = Self::element(&state, element)?;
            if let Some((_, remaining)) = state
                .blocked_clicks
                .iter_mut()
                .find(|(e, n)| *e == element && *n > 0)
            {
                *remaining -= 1;
                return Err(HarvestError::NotInteractable(format!(
                    "{:?} is covered by another element",
                    element
                )));
            }
            let drop_download = self
                .active_faults(&state)
                .any(|f| *f == Fault::DropDownload);
            match self.apply_click(&mut state, element) {
                Some(record) if !drop_download => {
                    let contents = self.render_export(&state, &record);
                    (Some(record), contents)
                }
                _ => (None, String::new()),
            }
        };

        if let Some(record) = pending {
            tokio::fs::create_dir_all(&self.download_dir).await?;
            let path = self
                .download_dir
                .join(format!("{}.{}", record.name, record.format.extension()));
            tokio::fs::write(&path, contents).await?;
            tracing::debug!(path = %path.display(), "Simulated export written");
        }
        Ok(())
    }

    async fn clear_and_type(&mut self, element: ElementHandle, text: &str) -> Result<()> {
        let mut state = self.lock()?;
        match Self::element(&state, element)? {
            Element::SearchInput => state.query = text.to_string(),
            Element::ExportName => state.export_name = text.to_string(),
            other => {
                return Err(HarvestError::UnsupportedControlType {
                    label: format!("{:?}", other),
                    found: "not a text field".to_string(),
                })
            }
        }
        Ok(())
    }

    async fn control_kind(&mut self, element: ElementHandle) -> Result<ControlKind> {
        let state = self.lock()?;
        let kind = match Self::element(&state, element)? {
            Element::Option { section, .. } => {
                let section_model = self
                    .current_report(&state)
                    .map(|r| &r.sections[section])
                    .ok_or_else(|| HarvestError::SessionCrashed("report changed".to_string()))?;
                let overridden = self.active_faults(&state).find_map(|f| match f {
                    Fault::InputType(p, t) if *p == section_model.parameter => Some(t.clone()),
                    _ => None,
                });
                ControlKind::from_input_type(overridden.as_deref().unwrap_or(&section_model.input_type))
            }
            Element::Program(_) | Element::Report(_) => ControlKind::Radio,
            Element::Result(_) | Element::Filter(_) => ControlKind::Checkbox,
            _ => ControlKind::Other("button".to_string()),
        };
        Ok(kind)
    }

    async fn is_selected(&mut self, element: ElementHandle) -> Result<bool> {
        let state = self.lock()?;
        let selected = match Self::element(&state, element)? {
            Element::Option { section, option } => state
                .checked
                .get(section)
                .and_then(|s| s.get(option))
                .copied()
                .unwrap_or(false),
            Element::Filter(index) => state.filter_checked.get(index).copied().unwrap_or(false),
            Element::Program(index) => state.program == Some(index),
            Element::Report(index) => state.report == Some(index),
            _ => false,
        };
        Ok(selected)
    }

    async fn scroll_into_view(&mut self, element: ElementHandle) -> Result<()> {
        let state = self.lock()?;
        Self::element(&state, element)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.lock()?;
        state.closed = true;
        if let Some(stats) = &self.stats {
            stats.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Hands out simulated sessions that share one [`PortalModel`].
#[derive(Clone)]
pub struct SimulatedPortalFactory {
    model: Arc<PortalModel>,
    faults: Arc<Vec<FaultRule>>,
    stats: Arc<SessionStats>,
    views: Arc<Mutex<Vec<SessionView>>>,
}

impl SimulatedPortalFactory {
    pub fn new(model: PortalModel) -> Self {
        Self {
            model: Arc::new(model),
            faults: Arc::new(Vec::new()),
            stats: Arc::new(SessionStats::default()),
            views: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_faults(mut self, faults: Vec<FaultRule>) -> Self {
        self.faults = Arc::new(faults);
        self
    }

    pub fn sessions_created(&self) -> usize {
        self.stats.created.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet closed.
    pub fn live_sessions(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Views of every session created so far, in creation order.
    pub fn views(&self) -> Vec<SessionView> {
        self.views.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SessionFactory for SimulatedPortalFactory {
    async fn create(&self, config: &SessionConfig) -> Result<Box<dyn Surface>> {
        let mut portal = SimulatedPortal::new(self.model.clone(), self.faults.clone(), config);
        portal.stats = Some(self.stats.clone());

        self.stats.created.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(live, Ordering::SeqCst);

        self.views
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(portal.view());
        Ok(Box::new(portal))
    }
}
