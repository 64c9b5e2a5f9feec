use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::decoder::DecodedFeed;

/// Counts for one realtime refresh, written as one CSV row.
#[derive(Debug, Default, Serialize)]
pub struct FeedStats {
    pub timestamp: DateTime<Utc>,
    pub feed_timestamp: Option<DateTime<Utc>>,
    pub feed_version: Option<String>,
    pub generation: Option<u64>,

    // entity types
    pub trip_updates: usize,
    pub vehicles: usize,
    pub alerts: usize,

    // trip update fields
    pub stop_time_updates: usize,
    pub with_eta: usize,
    pub with_track: usize,
    pub with_train_status: usize,
    pub skipped_stops: usize,

    // vehicle fields
    pub with_position: usize,
    pub with_bearing: usize,
    pub with_speed: usize,
    pub carriages: usize,
    pub with_carriage_amenities: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl FeedStats {
    pub fn from_feed(feed: &DecodedFeed) -> Self {
        let mut s = FeedStats {
            timestamp: Utc::now(),
            feed_timestamp: feed.header.timestamp,
            feed_version: Some(feed.header.version.clone()),
            trip_updates: feed.trip_updates.len(),
            vehicles: feed.vehicles.len(),
            alerts: feed.alerts.len(),
            ..Default::default()
        };

        for tu in &feed.trip_updates {
            if tu.eta().is_some() {
                s.with_eta += 1;
            }

            for stu in &tu.stop_time_updates {
                s.stop_time_updates += 1;

                if stu.track().is_some() {
                    s.with_track += 1;
                }

                if stu.status().is_some() {
                    s.with_train_status += 1;
                }

                if stu.skipped {
                    s.skipped_stops += 1;
                }
            }
        }

        for v in &feed.vehicles {
            if v.coordinates.is_some() {
                s.with_position += 1;
            }

            if v.bearing.is_some() {
                s.with_bearing += 1;
            }

            if v.speed.is_some() {
                s.with_speed += 1;
            }

            s.carriages += v.carriages.len();
            s.with_carriage_amenities += v
                .carriages
                .iter()
                .filter(|c| c.amenities.is_some())
                .count();
        }

        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of stop-time updates carrying a track assignment.
    pub fn track_pct(&self) -> f64 {
        Self::pct(self.with_track, self.stop_time_updates)
    }

    /// Share of carriages carrying the railroad amenity extension.
    pub fn amenity_pct(&self) -> f64 {
        Self::pct(self.with_carriage_amenities, self.carriages)
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error_type: &str, error_message: &str) -> Self {
        FeedStats {
            timestamp: Utc::now(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    /// Set the snapshot generation the feed was published as.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }
}
