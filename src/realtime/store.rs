use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::decoder::{DecodedFeed, decode_feed};
use crate::error::{DownloadError, RefreshError};
use crate::fetch::ByteSource;
use crate::model::{ServiceAlert, TripUpdate, VehiclePosition};
use crate::stats::FeedStats;

/// Every record of one successful fetch cycle. Replaced whole on the next
/// successful cycle; never merged.
#[derive(Debug)]
pub struct RealtimeSnapshot {
    pub generation: u64,
    pub fetched_at: DateTime<Utc>,
    pub feed_timestamp: Option<DateTime<Utc>>,
    pub version: String,
    pub trip_updates: Vec<TripUpdate>,
    pub vehicles: Vec<VehiclePosition>,
    pub alerts: Vec<ServiceAlert>,
    by_trip: HashMap<String, usize>,
}

impl RealtimeSnapshot {
    pub fn new(feed: DecodedFeed, fetched_at: DateTime<Utc>) -> Self {
        let mut by_trip = HashMap::with_capacity(feed.trip_updates.len());
        for (i, tu) in feed.trip_updates.iter().enumerate() {
            by_trip.entry(tu.trip_id.clone()).or_insert(i);
        }
        if by_trip.len() < feed.trip_updates.len() {
            warn!(
                trip_updates = feed.trip_updates.len(),
                unique = by_trip.len(),
                "Feed repeats trip ids; lookups use the first update"
            );
        }

        Self {
            generation: 0,
            fetched_at,
            feed_timestamp: feed.header.timestamp,
            version: feed.header.version,
            trip_updates: feed.trip_updates,
            vehicles: feed.vehicles,
            alerts: feed.alerts,
            by_trip,
        }
    }

    pub fn trip_update(&self, trip_id: &str) -> Option<&TripUpdate> {
        self.by_trip
            .get(trip_id)
            .and_then(|&i| self.trip_updates.get(i))
    }
}

/// Holds the published real-time snapshot.
#[derive(Debug, Default)]
pub struct RealtimeSnapshotStore {
    current: RwLock<Option<Arc<RealtimeSnapshot>>>,
    generation: AtomicU64,
}

impl RealtimeSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest published snapshot. Never waits on an in-flight refresh.
    pub fn current(&self) -> Option<Arc<RealtimeSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetches and decodes one feed response, then publishes it. Nothing is
    /// published unless the whole message decodes.
    #[instrument(skip_all, fields(source = %source.describe()))]
    pub async fn refresh(
        &self,
        source: &dyn ByteSource,
        timeout: Duration,
    ) -> Result<FeedStats, RefreshError> {
        let bytes = tokio::time::timeout(timeout, source.fetch())
            .await
            .map_err(|_| DownloadError::Timeout(timeout))??;

        let feed = decode_feed(&bytes)?;
        if feed.header.differential {
            warn!("Feed is marked differential; treating it as a full dataset");
        }
        let stats = FeedStats::from_feed(&feed);
        let generation = self.publish(RealtimeSnapshot::new(feed, Utc::now()));
        Ok(stats.with_generation(generation))
    }

    /// Makes `snapshot` the current one and returns its generation.
    pub fn publish(&self, snapshot: RealtimeSnapshot) -> u64 {
        let (trip_updates, vehicles, alerts) = (
            snapshot.trip_updates.len(),
            snapshot.vehicles.len(),
            snapshot.alerts.len(),
        );
        let generation = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *current = Some(Arc::new(RealtimeSnapshot {
                generation,
                ..snapshot
            }));
            generation
        };
        info!(
            generation,
            trip_updates, vehicles, alerts, "Published realtime snapshot"
        );
        generation
    }
}
