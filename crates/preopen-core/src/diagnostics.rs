use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::models::Checkpoint;
use crate::traits::PageSession;

/// Writes full-page screenshots at fixed, checkpoint-named paths.
#[derive(Debug, Clone)]
pub struct DiagnosticRecorder {
    dir: PathBuf,
}

impl DiagnosticRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, checkpoint: Checkpoint) -> PathBuf {
        self.dir.join(checkpoint.file_name())
    }

    /// Capture a snapshot for `checkpoint`, overwriting any previous one.
    ///
    /// Never fails the run: errors are logged and reported as `None`.
    pub async fn record<S: PageSession>(&self, session: &S, checkpoint: Checkpoint) -> Option<PathBuf> {
        let path = self.path_for(checkpoint);
        match self.try_record(session, &path).await {
            Ok(()) => {
                tracing::info!(%checkpoint, path = %path.display(), "Screenshot saved");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(%checkpoint, error = %e, "Failed to capture screenshot");
                None
            }
        }
    }

    async fn try_record<S: PageSession>(&self, session: &S, path: &Path) -> Result<(), AppError> {
        let png = session.screenshot().await?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(path, png).await?;
        Ok(())
    }
}
