//! Chromium backend over the DevTools protocol.
//!
//! Each session launches its own browser so downloads, cookies and form
//! state never leak between jobs.

use std::path::PathBuf;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::driver::session::SessionFactory;
use crate::driver::surface::{
    Anchor, ControlKind, ElementHandle, Group, Locator, Strategy, Surface,
};
use crate::error::{HarvestError, Result};
use crate::schema::Parameter;

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn crashed(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::SessionCrashed(e.to_string())
}

/// A concrete query the page can answer.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Query {
    Css(String),
    XPath(String),
}

/// Quote `s` as an XPath string literal.
fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        return format!("'{}'", s);
    }
    if !s.contains('"') {
        return format!("\"{}\"", s);
    }
    let parts: Vec<String> = s.split('\'').map(|p| format!("'{}'", p)).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

/// Case-insensitive `contains()` over normalized text.
fn xpath_icontains(expr: &str, needle: &str) -> String {
    format!(
        "contains(translate(normalize-space({}), '{}', '{}'), {})",
        expr,
        UPPER,
        LOWER,
        xpath_literal(&needle.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
    )
}

fn heading(group: Group) -> &'static str {
    match group {
        Group::Program => "Select the Program",
        Group::Report => "Select a Report",
        Group::Parameter(Parameter::Administration) => "Select the Administration",
        Group::Parameter(Parameter::Subject) => "Select a Subject",
        Group::Parameter(Parameter::Grade) => "Select a Grade",
        Group::Parameter(Parameter::Version) => "Select a Version",
        Group::Parameter(Parameter::Cluster) => "Select a Cluster",
    }
}

const RESULTS_TABLE: &str = "div.MuiTableContainer-root.selections-table.selections-div";

/// Map an anchor to the portal's markup.
fn query_for(locator: &Locator) -> Query {
    let relaxed = locator.strategy == Strategy::Relaxed;
    match &locator.anchor {
        Anchor::SearchInput if relaxed => Query::Css("input[placeholder*='District']".into()),
        Anchor::SearchInput => Query::Css(
            "input[placeholder='Enter a Campus or District Name or CDC code']".into(),
        ),
        Anchor::SearchSubmit if relaxed => Query::Css("button[type='submit']".into()),
        Anchor::SearchSubmit => Query::Css(
            "button.MuiButton-contained.MuiButton-colorInherit[type='submit']".into(),
        ),
        Anchor::ResultsTable if relaxed => Query::Css("div.selections-table".into()),
        Anchor::ResultsTable => Query::Css(RESULTS_TABLE.into()),
        Anchor::FirstResult if relaxed => {
            Query::Css("div.selections-table input[type='checkbox']".into())
        }
        Anchor::FirstResult => Query::Css(format!(
            "{} input.PrivateSwitchBase-input[type='checkbox']",
            RESULTS_TABLE
        )),
        Anchor::SearchAgain if relaxed => Query::Css("button[aria-label='Search Again']".into()),
        Anchor::SearchAgain => Query::Css(
            "div.MuiGrid-container button.MuiLink-button[aria-label='Search Again']".into(),
        ),
        Anchor::Section(group) if relaxed => Query::XPath(format!(
            "//h4[{}]",
            xpath_icontains(".", heading(*group))
        )),
        Anchor::Section(group) => Query::XPath(format!(
            "//h4[contains(text(), {})]",
            xpath_literal(heading(*group))
        )),
        Anchor::Choice { label, .. } if relaxed => Query::XPath(format!(
            "//label[{}]//input",
            xpath_icontains(".", label)
        )),
        Anchor::Choice { label, .. } => Query::XPath(format!(
            "//label[contains(@class, 'MuiFormControlLabel-root') and contains(., {})]//input",
            xpath_literal(label)
        )),
        Anchor::SubmitSelections if relaxed => {
            Query::XPath("//button[contains(., 'View Selections')]".into())
        }
        Anchor::SubmitSelections => Query::Css("#selectionsSubmitButton".into()),
        Anchor::FilterDialogOpen => Query::XPath("//button[contains(text(), 'Breakdown')]".into()),
        Anchor::FilterDialog if relaxed => {
            Query::XPath(format!("//div[{}]", xpath_icontains("text()", "breakdown by")))
        }
        Anchor::FilterDialog => {
            Query::XPath("//div[contains(text(), 'Breakdown by Demographic')]".into())
        }
        Anchor::FilterOption(name) if relaxed => Query::XPath(format!(
            "//label[{}]//input[@type='checkbox']",
            xpath_icontains(".", name)
        )),
        Anchor::FilterOption(name) => Query::XPath(format!(
            "//label[normalize-space()={}]/input[@type='checkbox']",
            xpath_literal(name.trim())
        )),
        Anchor::FilterApply if relaxed => {
            Query::XPath("//button[normalize-space()='Apply']".into())
        }
        Anchor::FilterApply => Query::XPath("//button[text()='Apply']".into()),
        Anchor::ExportOpen => Query::XPath("//button[contains(text(), 'Download')]".into()),
        Anchor::ExportName if relaxed => Query::Css("div[role='dialog'] input[type='text']".into()),
        Anchor::ExportName => Query::Css(
            "input.MuiInputBase-input.MuiOutlinedInput-input.MuiInputBase-inputSizeSmall".into(),
        ),
        Anchor::ExportFormatMenu if relaxed => Query::Css("[aria-haspopup='listbox']".into()),
        Anchor::ExportFormatMenu => {
            Query::Css("div[role='button'][aria-haspopup='listbox']".into())
        }
        Anchor::ExportFormat(format) => {
            Query::Css(format!("li[data-value='{}']", format.as_str()))
        }
        Anchor::ExportConfirm if relaxed => Query::XPath(format!(
            "//div[@role='dialog']//button[{}]",
            xpath_icontains(".", "download")
        )),
        Anchor::ExportConfirm => Query::XPath("//button[text()='DOWNLOAD']".into()),
    }
}

/// Store `item` in the slot of an equivalent entry, or append it.
fn slot_for<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T, &T) -> bool) -> usize {
    match items.iter().position(|existing| same(existing, &item)) {
        Some(index) => {
            items[index] = item;
            index
        }
        None => {
            items.push(item);
            items.len() - 1
        }
    }
}

/// One browser, one tab.
pub struct ChromiumSurface {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    elements: Vec<Element>,
}

impl ChromiumSurface {
    fn element(&self, handle: ElementHandle) -> Result<&Element> {
        self.elements
            .get(handle.0 as usize)
            .ok_or_else(|| crashed(format!("stale element handle {}", handle.0)))
    }

    /// A CDP error is only fatal once the connection to the browser is gone.
    fn failure(&self, e: impl std::fmt::Display) -> HarvestError {
        if self.handler.is_finished() {
            crashed(format!("browser connection lost: {}", e))
        } else {
            HarvestError::NotInteractable(e.to_string())
        }
    }

    /// Laid out with a non-empty box and not disabled.
    async fn interactable(element: &Element) -> bool {
        let laid_out = match element.bounding_box().await {
            Ok(bounds) => bounds.width > 0.0 && bounds.height > 0.0,
            Err(_) => false,
        };
        laid_out && matches!(element.attribute("disabled").await, Ok(None))
    }

    /// Reuse the handle of an element already resolved for the same node.
    fn handle_for(&mut self, element: Element) -> ElementHandle {
        let index = slot_for(&mut self.elements, element, |a, b| {
            a.backend_node_id == b.backend_node_id
        });
        ElementHandle(index as u64)
    }
}

#[async_trait]
impl Surface for ChromiumSurface {
    async fn open(&mut self, url: &str) -> Result<()> {
        self.page.goto(url).await.map_err(crashed)?;
        self.elements.clear();
        Ok(())
    }

    async fn probe(&mut self, locator: &Locator) -> Result<Option<ElementHandle>> {
        let found = match query_for(locator) {
            Query::Css(selector) => self.page.find_element(selector).await,
            Query::XPath(xpath) => self.page.find_xpath(xpath).await,
        };
        match found {
            Ok(element) => {
                if Self::interactable(&element).await {
                    return Ok(Some(self.handle_for(element)));
                }
                tracing::trace!(locator = %locator, "Found but not interactable yet");
                Ok(None)
            }
            Err(e) => {
                if self.handler.is_finished() {
                    return Err(self.failure(e));
                }
                tracing::trace!(locator = %locator, error = %e, "Probe missed");
                Ok(None)
            }
        }
    }

    async fn click(&mut self, element: ElementHandle) -> Result<()> {
        let element = self.element(element)?;
        element.click().await.map_err(|e| self.failure(e))?;
        Ok(())
    }

    async fn clear_and_type(&mut self, element: ElementHandle, text: &str) -> Result<()> {
        let element = self.element(element)?;
        element.focus().await.map_err(|e| self.failure(e))?;
        element
            .call_js_fn("function() { this.select(); }", false)
            .await
            .map_err(|e| self.failure(e))?;
        element
            .press_key("Backspace")
            .await
            .map_err(|e| self.failure(e))?;
        element.type_str(text).await.map_err(|e| self.failure(e))?;
        Ok(())
    }

    async fn control_kind(&mut self, element: ElementHandle) -> Result<ControlKind> {
        let input_type = self
            .element(element)?
            .attribute("type")
            .await
            .map_err(|e| self.failure(e))?
            .unwrap_or_default();
        Ok(ControlKind::from_input_type(&input_type))
    }

    async fn is_selected(&mut self, element: ElementHandle) -> Result<bool> {
        let checked = self
            .element(element)?
            .property("checked")
            .await
            .map_err(|e| self.failure(e))?;
        Ok(checked.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn scroll_into_view(&mut self, element: ElementHandle) -> Result<()> {
        self.element(element)?
            .scroll_into_view()
            .await
            .map_err(|e| self.failure(e))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.elements.clear();
        let result = self.browser.close().await;
        self.handler.abort();
        result.map_err(crashed)?;
        Ok(())
    }
}

/// Launches one Chromium per session.
#[derive(Debug, Clone)]
pub struct ChromiumFactory {
    /// Browser binary; downloaded into `fetch_dir` when unset
    pub executable: Option<PathBuf>,
    pub fetch_dir: PathBuf,
}

impl Default for ChromiumFactory {
    fn default() -> Self {
        Self {
            executable: None,
            fetch_dir: std::env::temp_dir().join("report-harvest-chromium"),
        }
    }
}

impl ChromiumFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    async fn executable(&self) -> Result<PathBuf> {
        if let Some(path) = &self.executable {
            return Ok(path.clone());
        }
        tokio::fs::create_dir_all(&self.fetch_dir).await?;
        let options = BrowserFetcherOptions::builder()
            .with_path(&self.fetch_dir)
            .build()
            .map_err(crashed)?;
        let info = BrowserFetcher::new(options).fetch().await.map_err(crashed)?;
        Ok(info.executable_path)
    }
}

#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn create(&self, config: &SessionConfig) -> Result<Box<dyn Surface>> {
        tokio::fs::create_dir_all(&config.download_dir).await?;
        let download_dir = tokio::fs::canonicalize(&config.download_dir).await?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(self.executable().await?)
            .arg("--disable-gpu")
            .arg("--no-sandbox");
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(crashed)?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(crashed)?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().into_owned())
            .build()
            .map_err(crashed)?;
        browser.execute(behavior).await.map_err(crashed)?;

        let page = browser.new_page("about:blank").await.map_err(crashed)?;
        tracing::debug!(download_dir = %download_dir.display(), headless = config.headless, "Browser launched");

        Ok(Box::new(ChromiumSurface {
            browser,
            page,
            handler,
            elements: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpath_literal_handles_quotes() {
        assert_eq!(xpath_literal("Reading"), "'Reading'");
        assert_eq!(xpath_literal("Children's"), "\"Children's\"");
        assert_eq!(
            xpath_literal("a'b\"c"),
            "concat('a', \"'\", 'b\"c')"
        );
    }

    #[test]
    fn repeated_probes_reuse_the_slot() {
        let mut nodes: Vec<(u32, &str)> = Vec::new();
        assert_eq!(slot_for(&mut nodes, (7, "first"), |a, b| a.0 == b.0), 0);
        assert_eq!(slot_for(&mut nodes, (9, "other"), |a, b| a.0 == b.0), 1);
        for _ in 0..50 {
            assert_eq!(slot_for(&mut nodes, (7, "again"), |a, b| a.0 == b.0), 0);
        }
        assert_eq!(nodes, vec![(7, "again"), (9, "other")]);
    }

    #[test]
    fn choice_queries_differ_by_strategy() {
        let anchor = Anchor::Choice {
            group: Group::Parameter(Parameter::Subject),
            label: "Reading".into(),
        };
        let primary = query_for(&Locator::primary(anchor.clone()));
        let relaxed = query_for(&Locator::relaxed(anchor));
        assert_ne!(primary, relaxed);
        match relaxed {
            Query::XPath(xpath) => assert!(xpath.contains("'reading'")),
            Query::Css(_) => panic!("expected xpath"),
        }
    }
}
