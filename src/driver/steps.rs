//! The individual form interactions a job is made of.
//!
//! Each step waits for its anchor with a bounded timeout before touching it.
//! Options are toggled idempotently: a checkbox is clicked only when it is
//! not already selected, while a radio is always activated.

use std::path::{Path, PathBuf};

use crate::config::{DriverConfig, ExportFormat};
use crate::driver::session::Session;
use crate::driver::surface::{Anchor, ControlKind, ElementHandle, Group, Locator, Surface};
use crate::driver::wait::Waiter;
use crate::error::{HarvestError, Result};
use crate::schema::Parameter;

/// Drives one session through named steps according to a [`DriverConfig`].
#[derive(Debug, Clone)]
pub struct StepExecutor {
    config: DriverConfig,
}

impl StepExecutor {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn waiter(&self) -> Waiter {
        Waiter::new(self.config.step_timeout, self.config.poll_interval)
    }

    async fn settle(&self) {
        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }
    }

    async fn wait(&self, surface: &mut dyn Surface, anchor: Anchor) -> Result<ElementHandle> {
        self.waiter()
            .until_ready(surface, &Locator::primary(anchor))
            .await
    }

    async fn wait_and_click(&self, surface: &mut dyn Surface, anchor: Anchor) -> Result<()> {
        let element = self.wait(surface, anchor.clone()).await?;
        self.click(surface, element, &anchor).await
    }

    async fn click(
        &self,
        surface: &mut dyn Surface,
        element: ElementHandle,
        anchor: &Anchor,
    ) -> Result<()> {
        self.waiter().until_clicked(surface, element, anchor).await
    }

    /// Click `element` unless it is already selected. Returns whether a click was issued.
    async fn ensure_selected(
        &self,
        surface: &mut dyn Surface,
        element: ElementHandle,
        anchor: &Anchor,
    ) -> Result<bool> {
        if surface.is_selected(element).await? {
            return Ok(false);
        }
        self.click(surface, element, anchor).await?;
        self.settle().await;
        Ok(true)
    }

    /// Search for a target and select the first result.
    ///
    /// For every target after the first in a batch, the search-again control
    /// must be used to get back to the search form.
    pub async fn select_target(
        &self,
        session: &mut Session,
        target: &str,
        is_first_in_batch: bool,
    ) -> Result<()> {
        let surface = session.surface();
        if !is_first_in_batch {
            let again = self.wait(surface, Anchor::SearchAgain).await?;
            surface.scroll_into_view(again).await?;
            self.settle().await;
            self.click(surface, again, &Anchor::SearchAgain).await?;
        }

        let input = self.wait(surface, Anchor::SearchInput).await?;
        surface.clear_and_type(input, target).await?;
        self.wait_and_click(surface, Anchor::SearchSubmit).await?;
        self.wait(surface, Anchor::ResultsTable).await?;

        let first = self.wait(surface, Anchor::FirstResult).await?;
        surface.scroll_into_view(first).await?;
        self.settle().await;
        self.click(surface, first, &Anchor::FirstResult).await?;
        tracing::debug!(target_id = target, "Target selected");
        Ok(())
    }

    /// Activate the first option in `group` whose label contains `value`.
    pub async fn select_single_choice(
        &self,
        session: &mut Session,
        group: Group,
        value: &str,
    ) -> Result<()> {
        let surface = session.surface();
        let section = self.wait(surface, Anchor::Section(group)).await?;
        surface.scroll_into_view(section).await?;
        self.settle().await;

        let anchor = Anchor::Choice {
            group,
            label: value.to_string(),
        };
        let option = self.waiter().with_fallback(surface, &anchor).await?;
        self.click(surface, option, &anchor).await?;
        tracing::debug!(group = %group, value, "Option selected");
        Ok(())
    }

    /// Select every value of one report parameter.
    pub async fn select_parameter(
        &self,
        session: &mut Session,
        parameter: Parameter,
        values: &[String],
    ) -> Result<()> {
        let group = Group::Parameter(parameter);
        let surface = session.surface();
        let section = self.wait(surface, Anchor::Section(group)).await?;
        surface.scroll_into_view(section).await?;
        self.settle().await;

        for value in values {
            let anchor = Anchor::Choice {
                group,
                label: value.clone(),
            };
            let option = self.waiter().with_fallback(surface, &anchor).await?;

            match surface.control_kind(option).await? {
                ControlKind::Checkbox => {
                    let clicked = self.ensure_selected(surface, option, &anchor).await?;
                    tracing::debug!(parameter = %parameter, value = %value, clicked, "Checkbox ensured");
                }
                ControlKind::Radio => {
                    self.click(surface, option, &anchor).await?;
                    self.settle().await;
                    tracing::debug!(parameter = %parameter, value = %value, "Radio activated");
                }
                ControlKind::Other(found) => {
                    return Err(HarvestError::UnsupportedControlType {
                        label: value.clone(),
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    /// Submit the selections and apply breakdown filters.
    ///
    /// With no breakdowns only the submit is performed.
    pub async fn apply_filters(&self, session: &mut Session, breakdowns: &[String]) -> Result<()> {
        let surface = session.surface();
        self.wait_and_click(surface, Anchor::SubmitSelections).await?;
        if breakdowns.is_empty() {
            return Ok(());
        }

        self.wait_and_click(surface, Anchor::FilterDialogOpen).await?;
        self.wait(surface, Anchor::FilterDialog).await?;
        for name in breakdowns {
            let anchor = Anchor::FilterOption(name.clone());
            let option = self.waiter().with_fallback(surface, &anchor).await?;
            let clicked = self.ensure_selected(surface, option, &anchor).await?;
            tracing::debug!(breakdown = %name, clicked, "Breakdown ensured");
        }
        self.wait_and_click(surface, Anchor::FilterApply).await
    }

    /// Fill in the export dialog and confirm it.
    pub async fn trigger_export(
        &self,
        session: &mut Session,
        name: &str,
        format: ExportFormat,
    ) -> Result<()> {
        let surface = session.surface();
        self.wait_and_click(surface, Anchor::ExportOpen).await?;

        let field = self.wait(surface, Anchor::ExportName).await?;
        surface.clear_and_type(field, name).await?;

        self.wait_and_click(surface, Anchor::ExportFormatMenu).await?;
        self.wait_and_click(surface, Anchor::ExportFormat(format)).await?;
        self.wait_and_click(surface, Anchor::ExportConfirm).await?;
        tracing::debug!(name, format = %format, "Export confirmed");
        Ok(())
    }

    /// Make sure `<name>.<ext>` does not exist before an export is triggered.
    ///
    /// A file already at that path is deleted when `replace` is set and is an
    /// `OutputConflict` otherwise, so whatever `await_artifact` finds later
    /// was written by this export.
    pub async fn prepare_artifact(
        &self,
        download_dir: &Path,
        name: &str,
        format: ExportFormat,
        replace: bool,
    ) -> Result<PathBuf> {
        let path = artifact_path(download_dir, name, format);
        if tokio::fs::try_exists(&path).await? {
            if !replace {
                return Err(HarvestError::OutputConflict(path));
            }
            tokio::fs::remove_file(&path).await?;
            tracing::info!(path = %path.display(), "Replaced previous export");
        }
        Ok(path)
    }

    /// Wait for the exported file to land in `download_dir`.
    pub async fn await_artifact(
        &self,
        download_dir: &Path,
        name: &str,
        format: ExportFormat,
    ) -> Result<PathBuf> {
        let path = artifact_path(download_dir, name, format);
        Waiter::new(self.config.download_timeout, self.config.poll_interval)
            .until_file(&path)
            .await
    }
}

/// Where an export named `name` is saved.
pub fn artifact_path(download_dir: &Path, name: &str, format: ExportFormat) -> PathBuf {
    download_dir.join(format!("{}.{}", name, format.extension()))
}
