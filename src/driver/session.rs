use async_trait::async_trait;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::driver::surface::Surface;
use crate::error::Result;

/// Creates fresh surfaces. Shared by all workers; each call yields an
/// independent target.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, config: &SessionConfig) -> Result<Box<dyn Surface>>;
}

/// Exclusive handle to one interactive target for the duration of one job.
///
/// Not `Clone`: a session moves into the job that opened it and is consumed
/// by [`Session::release`].
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    surface: Box<dyn Surface>,
    released: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("download_dir", &self.config.download_dir)
            .field("released", &self.released)
            .finish()
    }
}

impl Session {
    /// Create a surface through `factory` and navigate it to the portal.
    pub async fn open(factory: &dyn SessionFactory, config: SessionConfig) -> Result<Self> {
        let mut surface = factory.create(&config).await?;
        let id = Uuid::new_v4();
        if let Err(e) = surface.open(&config.portal_url).await {
            if let Err(close_err) = surface.close().await {
                tracing::warn!(session_id = %id, error = %close_err, "Failed to close session after open error");
            }
            return Err(e);
        }
        tracing::debug!(session_id = %id, url = %config.portal_url, "Session opened");
        Ok(Self {
            id,
            config,
            surface,
            released: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn surface(&mut self) -> &mut dyn Surface {
        self.surface.as_mut()
    }

    /// Tear down the underlying target.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let result = self.surface.close().await;
        tracing::debug!(session_id = %self.id, ok = result.is_ok(), "Session released");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(session_id = %self.id, "Session dropped without release");
        }
    }
}
