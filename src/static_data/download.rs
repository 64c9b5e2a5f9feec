use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RefreshError;

/// Persisted record of the last successful static download. Passed into
/// and returned from a static refresh; the caller owns its storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadState {
    pub last_downloaded_at: Option<DateTime<Utc>>,
}

impl DownloadState {
    pub fn downloaded_at(at: DateTime<Utc>) -> Self {
        Self {
            last_downloaded_at: Some(at),
        }
    }
}

/// JSON file holding a [`DownloadState`].
#[derive(Debug, Clone)]
pub struct DownloadStateFile {
    path: PathBuf,
}

impl DownloadStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state. A missing file means "never downloaded"; an
    /// unreadable one is treated the same way, with a warning.
    pub async fn load(&self) -> DownloadState {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted download state");
                return DownloadState::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read download state");
                return DownloadState::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt download state");
                DownloadState::default()
            }
        }
    }

    /// Writes the state to a sibling temp file and renames it into place.
    pub async fn save(&self, state: &DownloadState) -> Result<(), RefreshError> {
        let io_err = |source| RefreshError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(state).map_err(|e| io_err(e.into()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}
