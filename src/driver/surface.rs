use async_trait::async_trait;

use crate::config::ExportFormat;
use crate::error::Result;
use crate::schema::Parameter;

/// A selection group on the form, i.e. one section with its own heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Program,
    Report,
    Parameter(Parameter),
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Group::Program => write!(f, "program"),
            Group::Report => write!(f, "report"),
            Group::Parameter(p) => write!(f, "{}", p),
        }
    }
}

/// Semantic handle for a control on the portal.
///
/// Backends translate anchors into whatever their engine understands, so the
/// step executor never sees selectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Anchor {
    SearchInput,
    SearchSubmit,
    ResultsTable,
    FirstResult,
    SearchAgain,
    Section(Group),
    /// A labeled option inside a group, matched by visible-text containment
    Choice { group: Group, label: String },
    SubmitSelections,
    FilterDialogOpen,
    FilterDialog,
    FilterOption(String),
    FilterApply,
    ExportOpen,
    ExportName,
    ExportFormatMenu,
    ExportFormat(ExportFormat),
    ExportConfirm,
}

impl std::fmt::Display for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anchor::SearchInput => write!(f, "search input"),
            Anchor::SearchSubmit => write!(f, "search button"),
            Anchor::ResultsTable => write!(f, "results table"),
            Anchor::FirstResult => write!(f, "first search result"),
            Anchor::SearchAgain => write!(f, "search-again control"),
            Anchor::Section(group) => write!(f, "{} section", group),
            Anchor::Choice { group, label } => write!(f, "{} option {:?}", group, label),
            Anchor::SubmitSelections => write!(f, "view-selections button"),
            Anchor::FilterDialogOpen => write!(f, "breakdown button"),
            Anchor::FilterDialog => write!(f, "breakdown dialog"),
            Anchor::FilterOption(name) => write!(f, "breakdown option {:?}", name),
            Anchor::FilterApply => write!(f, "breakdown apply button"),
            Anchor::ExportOpen => write!(f, "download button"),
            Anchor::ExportName => write!(f, "export name field"),
            Anchor::ExportFormatMenu => write!(f, "export format menu"),
            Anchor::ExportFormat(format) => write!(f, "export format {}", format),
            Anchor::ExportConfirm => write!(f, "export confirm button"),
        }
    }
}

/// How strictly a backend should match an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Primary,
    /// Looser matching used only after the primary strategy timed out
    Relaxed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub anchor: Anchor,
    pub strategy: Strategy,
}

impl Locator {
    pub fn primary(anchor: Anchor) -> Self {
        Self {
            anchor,
            strategy: Strategy::Primary,
        }
    }

    pub fn relaxed(anchor: Anchor) -> Self {
        Self {
            anchor,
            strategy: Strategy::Relaxed,
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.strategy {
            Strategy::Primary => write!(f, "{}", self.anchor),
            Strategy::Relaxed => write!(f, "{} (relaxed)", self.anchor),
        }
    }
}

/// Opaque reference to an element resolved by a backend.
///
/// Only valid on the surface that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// The input type underneath a labeled option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    Checkbox,
    Radio,
    Other(String),
}

impl ControlKind {
    pub fn from_input_type(input_type: &str) -> Self {
        match input_type.to_ascii_lowercase().as_str() {
            "checkbox" => ControlKind::Checkbox,
            "radio" => ControlKind::Radio,
            other => ControlKind::Other(other.to_string()),
        }
    }
}

/// One live interactive target: a browser tab, or a simulated portal.
///
/// Every method returns `SessionCrashed` once the target is no longer usable.
#[async_trait]
pub trait Surface: Send {
    /// Navigate to the portal entry page.
    async fn open(&mut self, url: &str) -> Result<()>;

    /// Resolve a locator if its element is present and interactable right now.
    async fn probe(&mut self, locator: &Locator) -> Result<Option<ElementHandle>>;

    /// Click an element. `NotInteractable` means the target is fine but the
    /// element cannot take the click yet.
    async fn click(&mut self, element: ElementHandle) -> Result<()>;

    /// Clear the field completely, then type `text`.
    async fn clear_and_type(&mut self, element: ElementHandle, text: &str) -> Result<()>;

    async fn control_kind(&mut self, element: ElementHandle) -> Result<ControlKind>;

    async fn is_selected(&mut self, element: ElementHandle) -> Result<bool>;

    async fn scroll_into_view(&mut self, element: ElementHandle) -> Result<()>;

    /// Release the underlying target. Called exactly once per session.
    async fn close(&mut self) -> Result<()>;
}
