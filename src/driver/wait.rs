use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::driver::surface::{Anchor, ElementHandle, Locator, Surface};
use crate::error::{HarvestError, Result};

/// Bounded readiness polling.
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Waiter {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Poll until `locator` resolves or the timeout expires.
    ///
    /// Probe errors (a crashed session) end the wait immediately.
    pub async fn until_ready(
        &self,
        surface: &mut dyn Surface,
        locator: &Locator,
    ) -> Result<ElementHandle> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(element) = surface.probe(locator).await? {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(HarvestError::StepTimeout {
                    target: locator.to_string(),
                    timeout: self.timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Try the primary strategy, then the relaxed one, each with the full timeout.
    ///
    /// Both strategies timing out is reported as `LocatorNotFound`.
    pub async fn with_fallback(
        &self,
        surface: &mut dyn Surface,
        anchor: &Anchor,
    ) -> Result<ElementHandle> {
        match self
            .until_ready(surface, &Locator::primary(anchor.clone()))
            .await
        {
            Ok(element) => return Ok(element),
            Err(HarvestError::StepTimeout { .. }) => {
                tracing::debug!(anchor = %anchor, "Primary locator timed out, trying relaxed");
            }
            Err(e) => return Err(e),
        }

        match self
            .until_ready(surface, &Locator::relaxed(anchor.clone()))
            .await
        {
            Ok(element) => Ok(element),
            Err(HarvestError::StepTimeout { .. }) => Err(HarvestError::LocatorNotFound {
                target: anchor.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Click `element`, retrying while the backend reports it not interactable.
    ///
    /// An element that stays covered or disabled past the timeout is a
    /// `StepTimeout` on `anchor`.
    pub async fn until_clicked(
        &self,
        surface: &mut dyn Surface,
        element: ElementHandle,
        anchor: &Anchor,
    ) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match surface.click(element).await {
                Ok(()) => return Ok(()),
                Err(HarvestError::NotInteractable(reason)) => {
                    tracing::trace!(anchor = %anchor, reason = %reason, "Click intercepted");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(HarvestError::StepTimeout {
                    target: anchor.to_string(),
                    timeout: self.timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll the filesystem until `path` exists.
    pub async fn until_file(&self, path: &Path) -> Result<PathBuf> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if tokio::fs::try_exists(path).await? {
                return Ok(path.to_path_buf());
            }
            if Instant::now() >= deadline {
                return Err(HarvestError::StepTimeout {
                    target: format!("download of {}", path.display()),
                    timeout: self.timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
