use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::archive::{StaticSnapshot, load_archive};
use super::{DownloadState, RefreshPolicy};
use crate::config::ArchiveLimits;
use crate::error::{ArchiveInvalidError, DownloadError, RefreshError};
use crate::fetch::ByteSource;

/// Result of a static refresh that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StaticRefreshOutcome {
    /// A new archive was downloaded, validated and published.
    Published {
        generation: u64,
        /// The state to persist: the download time of this archive.
        state: DownloadState,
        stations: usize,
        routes: usize,
        trips: usize,
    },
    /// Too soon since the last download; nothing was fetched.
    RateLimited {
        next_allowed_at: Option<DateTime<Utc>>,
    },
}

/// Holds the published static snapshot and the archive it came from.
///
/// The snapshot is replaced by swapping an `Arc`; readers keep whatever
/// generation they already hold.
pub struct StaticDatasetStore {
    archive_path: PathBuf,
    limits: ArchiveLimits,
    policy: RefreshPolicy,
    current: RwLock<Option<Arc<StaticSnapshot>>>,
    generation: AtomicU64,
}

impl StaticDatasetStore {
    pub fn new(
        archive_path: impl Into<PathBuf>,
        limits: ArchiveLimits,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            limits,
            policy,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// The latest published snapshot, if one has ever loaded.
    pub fn current(&self) -> Option<Arc<StaticSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn should_refresh(&self, state: &DownloadState, now: DateTime<Utc>) -> bool {
        self.policy.should_refresh(state, now)
    }

    /// Parses the archive at `path` on the blocking pool.
    pub async fn load(&self, path: &Path) -> Result<StaticSnapshot, RefreshError> {
        let path = path.to_path_buf();
        let limits = self.limits;
        let snapshot = tokio::task::spawn_blocking(move || load_archive(&path, &limits))
            .await
            .map_err(|e| RefreshError::Task(e.to_string()))??;
        Ok(snapshot)
    }

    /// Publishes the archive already on disk, without downloading. Returns
    /// `None` if there is no archive yet.
    pub async fn load_from_disk(&self) -> Result<Option<u64>, RefreshError> {
        if !tokio::fs::try_exists(&self.archive_path)
            .await
            .unwrap_or(false)
        {
            debug!(path = %self.archive_path.display(), "No static archive on disk");
            return Ok(None);
        }
        let snapshot = self.load(&self.archive_path).await?;
        Ok(Some(self.publish(snapshot)))
    }

    /// Fetches an archive from `source` and stages it next to the live one.
    /// Returns the staged path; the live archive is untouched.
    pub async fn download(
        &self,
        source: &dyn ByteSource,
        timeout: Duration,
    ) -> Result<PathBuf, RefreshError> {
        let bytes = tokio::time::timeout(timeout, source.fetch())
            .await
            .map_err(|_| DownloadError::Timeout(timeout))??;

        if bytes.is_empty() {
            return Err(ArchiveInvalidError::Empty.into());
        }
        let size = bytes.len() as u64;
        if size > self.limits.max_download_bytes {
            return Err(ArchiveInvalidError::TooLarge {
                size,
                limit: self.limits.max_download_bytes,
            }
            .into());
        }

        let staged = self.staged_path();
        let io_err = |source| RefreshError::Io {
            path: staged.clone(),
            source,
        };
        if let Some(dir) = staged.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        }
        tokio::fs::write(&staged, &bytes).await.map_err(io_err)?;

        info!(source = %source.describe(), bytes = size, "Downloaded static archive");
        Ok(staged)
    }

    /// Downloads, validates and publishes a new archive unless the rate
    /// limit says it is too soon and `force` is not set.
    ///
    /// On any failure the staged file is removed, and both the live archive
    /// and the published snapshot are left as they were.
    #[instrument(skip_all, fields(force = force))]
    pub async fn refresh(
        &self,
        source: &dyn ByteSource,
        state: DownloadState,
        now: DateTime<Utc>,
        force: bool,
        timeout: Duration,
    ) -> Result<StaticRefreshOutcome, RefreshError> {
        if !force && !self.policy.should_refresh(&state, now) {
            let next_allowed_at = self.policy.next_allowed_at(&state, now);
            info!(
                last_downloaded_at = ?state.last_downloaded_at,
                next_allowed_at = ?next_allowed_at,
                "Static refresh rate limited"
            );
            return Ok(StaticRefreshOutcome::RateLimited { next_allowed_at });
        }

        let staged = self.download(source, timeout).await?;
        let snapshot = match self.load(&staged).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                discard(&staged).await;
                return Err(e);
            }
        };

        if let Err(source) = tokio::fs::rename(&staged, &self.archive_path).await {
            discard(&staged).await;
            return Err(RefreshError::Io {
                path: self.archive_path.clone(),
                source,
            });
        }

        let (stations, routes, trips) = (
            snapshot.station_count(),
            snapshot.route_count(),
            snapshot.trip_count(),
        );
        let generation = self.publish(snapshot);
        Ok(StaticRefreshOutcome::Published {
            generation,
            state: DownloadState::downloaded_at(now),
            stations,
            routes,
            trips,
        })
    }

    /// Makes `snapshot` the current one and returns its generation.
    pub fn publish(&self, snapshot: StaticSnapshot) -> u64 {
        let (stations, routes, trips) = (
            snapshot.station_count(),
            snapshot.route_count(),
            snapshot.trip_count(),
        );
        let generation = {
            // Generation is taken under the write lock so publishes stay ordered
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *current = Some(Arc::new(snapshot.with_generation(generation)));
            generation
        };
        info!(generation, stations, routes, trips, "Published static snapshot");
        generation
    }

    fn staged_path(&self) -> PathBuf {
        self.archive_path.with_extension("zip.part")
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove staged archive");
    }
}
