//! The relay engine: both stores, their sources, and the query surface.
//!
//! Queries take the current snapshot of each store once and answer entirely
//! from those two generations. Refreshes run behind per-source async mutexes
//! that queries never touch.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::{DownloadError, QueryError, RefreshError};
use crate::fetch::{ByteSource, HttpSource, http_client};
use crate::model::{EnrichedTrainRecord, EnrichedVehicle, Route, ServiceAlert, Station};
use crate::query::{AlertFilter, Listing, QueryEngine, TrainFilter, VehicleFilter};
use crate::realtime::{RealtimeSnapshot, RealtimeSnapshotStore};
use crate::static_data::{
    DownloadState, DownloadStateFile, RefreshPolicy, StaticDatasetStore, StaticRefreshOutcome,
    StaticSnapshot,
};
use crate::stats::FeedStats;

/// Where a source is in its publish cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    /// Nothing has been published yet.
    #[default]
    Empty,
    Refreshing,
    Published,
    /// The last refresh failed; the previous snapshot is still served.
    RefreshFailedRetained,
}

/// Freshness of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub phase: RefreshPhase,
    pub generation: Option<u64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SourceStatus {
    fn begin(&mut self, now: DateTime<Utc>) {
        self.phase = RefreshPhase::Refreshing;
        self.last_attempt = Some(now);
    }

    fn succeed(&mut self, generation: u64, now: DateTime<Utc>) {
        self.phase = RefreshPhase::Published;
        self.generation = Some(generation);
        self.last_success = Some(now);
        self.last_error = None;
    }

    fn fail(&mut self, err: &RefreshError) {
        self.phase = if self.generation.is_some() {
            RefreshPhase::RefreshFailedRetained
        } else {
            RefreshPhase::Empty
        };
        self.last_error = Some(err.to_string());
    }

    /// A refresh that ended without publishing or failing.
    fn settle(&mut self) {
        self.phase = if self.generation.is_some() {
            RefreshPhase::Published
        } else {
            RefreshPhase::Empty
        };
    }
}

/// Rate-limit view of the static download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadStatus {
    pub last_downloaded_at: Option<DateTime<Utc>>,
    pub can_download_now: bool,
    pub next_allowed_at: Option<DateTime<Utc>>,
    pub min_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub static_schedule: SourceStatus,
    pub realtime_feed: SourceStatus,
    pub download: DownloadStatus,
}

#[derive(Debug, Default)]
struct Health {
    static_schedule: SourceStatus,
    realtime_feed: SourceStatus,
    download_state: DownloadState,
}

/// The current snapshot of each store, taken together.
#[derive(Clone)]
pub struct SnapshotPair {
    pub schedule: Option<Arc<StaticSnapshot>>,
    pub realtime: Option<Arc<RealtimeSnapshot>>,
    timezone: Tz,
}

impl SnapshotPair {
    pub fn query(&self) -> QueryEngine<'_> {
        QueryEngine::new(
            self.schedule.as_deref(),
            self.realtime.as_deref(),
            self.timezone,
        )
    }
}

pub struct RelayEngine {
    config: EngineConfig,
    static_store: StaticDatasetStore,
    realtime_store: RealtimeSnapshotStore,
    static_source: Arc<dyn ByteSource>,
    realtime_source: Arc<dyn ByteSource>,
    state_file: Option<DownloadStateFile>,
    static_refresh: tokio::sync::Mutex<()>,
    realtime_refresh: tokio::sync::Mutex<()>,
    health: Mutex<Health>,
}

impl RelayEngine {
    pub fn new(
        config: EngineConfig,
        static_source: Arc<dyn ByteSource>,
        realtime_source: Arc<dyn ByteSource>,
    ) -> Self {
        let static_store = StaticDatasetStore::new(
            config.archive_path(),
            config.archive_limits,
            RefreshPolicy::new(config.static_min_interval),
        );
        Self {
            config,
            static_store,
            realtime_store: RealtimeSnapshotStore::new(),
            static_source,
            realtime_source,
            state_file: None,
            static_refresh: tokio::sync::Mutex::new(()),
            realtime_refresh: tokio::sync::Mutex::new(()),
            health: Mutex::new(Health::default()),
        }
    }

    /// Builds HTTP sources from `config` and restores the persisted download
    /// state from the data directory.
    pub async fn from_config(config: EngineConfig) -> Result<Self, DownloadError> {
        let api_key = config.api_key.as_deref();
        let realtime_client = http_client(api_key, config.realtime_timeout)?;
        let static_client = http_client(api_key, config.static_timeout)?;

        let realtime_source = Arc::new(HttpSource::new(
            realtime_client,
            config.realtime_url.clone(),
            config.max_feed_bytes,
        ));
        let static_source = Arc::new(HttpSource::new(
            static_client,
            config.static_url.clone(),
            config.archive_limits.max_download_bytes,
        ));

        let state_file = DownloadStateFile::new(config.download_state_path());
        let state = state_file.load().await;
        Ok(Self::new(config, static_source, realtime_source)
            .with_download_state(state)
            .with_state_file(state_file))
    }

    pub fn with_download_state(self, state: DownloadState) -> Self {
        self.lock_health().download_state = state;
        self
    }

    /// Persists the download state to `file` after each successful download.
    pub fn with_state_file(mut self, file: DownloadStateFile) -> Self {
        self.state_file = Some(file);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock_health(&self) -> std::sync::MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn download_state(&self) -> DownloadState {
        self.lock_health().download_state
    }

    /// Publishes the archive already in the data directory, if any.
    pub async fn load_static_from_disk(&self) -> Result<Option<u64>, RefreshError> {
        let _guard = self.static_refresh.lock().await;
        let now = Utc::now();
        self.lock_health().static_schedule.begin(now);

        match self.static_store.load_from_disk().await {
            Ok(Some(generation)) => {
                self.lock_health().static_schedule.succeed(generation, now);
                Ok(Some(generation))
            }
            Ok(None) => {
                self.lock_health().static_schedule.settle();
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Failed to load static archive from disk");
                self.lock_health().static_schedule.fail(&e);
                Err(e)
            }
        }
    }

    /// Refreshes the static schedule now. Without `force` this is a no-op
    /// returning [`StaticRefreshOutcome::RateLimited`] inside the minimum
    /// interval.
    pub async fn refresh_static_now(
        &self,
        force: bool,
    ) -> Result<StaticRefreshOutcome, RefreshError> {
        self.refresh_static_at(force, Utc::now()).await
    }

    /// As [`refresh_static_now`](Self::refresh_static_now), with an explicit
    /// current time for the rate-limit decision.
    pub async fn refresh_static_at(
        &self,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<StaticRefreshOutcome, RefreshError> {
        let _guard = self.static_refresh.lock().await;
        let state = self.download_state();

        if force || self.static_store.should_refresh(&state, now) {
            self.lock_health().static_schedule.begin(now);
        }

        let result = self
            .static_store
            .refresh(
                self.static_source.as_ref(),
                state,
                now,
                force,
                self.config.static_timeout,
            )
            .await;

        match &result {
            Ok(StaticRefreshOutcome::Published {
                generation, state, ..
            }) => {
                {
                    let mut health = self.lock_health();
                    health.static_schedule.succeed(*generation, now);
                    health.download_state = *state;
                }
                if let Some(file) = &self.state_file
                    && let Err(e) = file.save(state).await
                {
                    error!(
                        error = %e,
                        path = %file.path().display(),
                        "Failed to persist download state"
                    );
                }
            }
            Ok(StaticRefreshOutcome::RateLimited { .. }) => {}
            Err(e) => {
                error!(
                    error = %e,
                    kind = e.kind(),
                    "Static refresh failed; keeping previous snapshot"
                );
                self.lock_health().static_schedule.fail(e);
            }
        }
        result
    }

    /// Fetches and publishes one real-time feed response.
    pub async fn refresh_realtime_now(&self) -> Result<FeedStats, RefreshError> {
        let _guard = self.realtime_refresh.lock().await;
        let now = Utc::now();
        self.lock_health().realtime_feed.begin(now);

        let result = self
            .realtime_store
            .refresh(self.realtime_source.as_ref(), self.config.realtime_timeout)
            .await;

        match &result {
            Ok(stats) => {
                let generation = stats.generation.unwrap_or_default();
                self.lock_health().realtime_feed.succeed(generation, now);
                info!(
                    generation,
                    trip_updates = stats.trip_updates,
                    vehicles = stats.vehicles,
                    alerts = stats.alerts,
                    track_pct = stats.track_pct(),
                    "Realtime refresh complete"
                );
            }
            Err(e) => {
                warn!(
                    error = %e,
                    kind = e.kind(),
                    "Realtime refresh failed; keeping previous snapshot"
                );
                self.lock_health().realtime_feed.fail(e);
            }
        }
        result
    }

    pub fn status(&self) -> EngineStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> EngineStatus {
        let health = self.lock_health();
        let policy = self.static_store.policy();
        let state = health.download_state;
        EngineStatus {
            static_schedule: health.static_schedule.clone(),
            realtime_feed: health.realtime_feed.clone(),
            download: DownloadStatus {
                last_downloaded_at: state.last_downloaded_at,
                can_download_now: policy.should_refresh(&state, now),
                next_allowed_at: policy.next_allowed_at(&state, now),
                min_interval_secs: policy.min_interval.as_secs(),
            },
        }
    }

    /// The current snapshot of each store. Hold on to it to run several
    /// queries against the same generations.
    pub fn snapshot(&self) -> SnapshotPair {
        SnapshotPair {
            schedule: self.static_store.current(),
            realtime: self.realtime_store.current(),
            timezone: self.config.timezone,
        }
    }

    pub fn query_trains(&self, filter: &TrainFilter) -> Listing<EnrichedTrainRecord> {
        self.snapshot().query().query_trains(filter)
    }

    pub fn query_train_by_trip_id(
        &self,
        trip_id: &str,
    ) -> Result<EnrichedTrainRecord, QueryError> {
        self.snapshot().query().query_train_by_trip_id(trip_id)
    }

    pub fn query_stations(&self) -> Listing<Station> {
        self.snapshot().query().query_stations()
    }

    pub fn query_routes(&self) -> Listing<Route> {
        self.snapshot().query().query_routes()
    }

    pub fn query_vehicle_positions(&self, filter: &VehicleFilter) -> Listing<EnrichedVehicle> {
        self.snapshot().query().query_vehicle_positions(filter)
    }

    pub fn query_alerts(&self, filter: &AlertFilter) -> Listing<ServiceAlert> {
        self.snapshot().query().query_alerts(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct Unreachable;

    #[async_trait]
    impl ByteSource for Unreachable {
        async fn fetch(&self) -> Result<Bytes, DownloadError> {
            Err(DownloadError::Status { status: 503 })
        }

        fn describe(&self) -> String {
            "unreachable".to_string()
        }
    }

    fn engine(dir: &std::path::Path) -> RelayEngine {
        RelayEngine::new(
            EngineConfig::default().with_data_dir(dir),
            Arc::new(Unreachable),
            Arc::new(Unreachable),
        )
    }

    #[tokio::test]
    async fn failed_first_refresh_stays_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        let err = engine.refresh_realtime_now().await.unwrap_err();
        assert_eq!(err.kind(), "download_error");

        let status = engine.status();
        assert_eq!(status.realtime_feed.phase, RefreshPhase::Empty);
        assert!(status.realtime_feed.last_error.is_some());
        assert!(status.realtime_feed.last_success.is_none());
        assert!(status.download.can_download_now);
    }

    #[tokio::test]
    async fn failed_static_download_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        assert!(engine.refresh_static_now(false).await.is_err());
        assert_eq!(engine.download_state(), DownloadState::default());
        assert_eq!(engine.status().static_schedule.phase, RefreshPhase::Empty);
        assert!(engine.query_stations().unavailable.is_some());
    }
}
