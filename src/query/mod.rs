//! Filtered, ordered queries over one pair of published snapshots.
//!
//! A [`QueryEngine`] borrows the snapshots it was built from, so every
//! record it returns comes from the same static and real-time generation.

mod filter;

pub use filter::{AlertFilter, TimeWindow, TrainFilter, VehicleFilter, parse_time_of_day};

use std::cmp::Ordering;
use std::fmt;

use chrono_tz::Tz;
use serde::Serialize;

use crate::enrich::{enrich, enrich_vehicle};
use crate::error::QueryError;
use crate::model::{EnrichedTrainRecord, EnrichedVehicle, Route, ServiceAlert, Station};
use crate::realtime::RealtimeSnapshot;
use crate::static_data::StaticSnapshot;

/// Which dataset has never been published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unavailable {
    RealtimeFeed,
    StaticSchedule,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::RealtimeFeed => f.write_str("real-time feed unavailable"),
            Unavailable::StaticSchedule => f.write_str("static schedule unavailable"),
        }
    }
}

/// Result of a listing query. When the dataset it reads has never been
/// published the items are empty and `unavailable` says why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    /// Matches before `limit` was applied.
    pub total_matches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<Unavailable>,
    pub static_generation: Option<u64>,
    pub realtime_generation: Option<u64>,
}

impl<T> Listing<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

pub struct QueryEngine<'a> {
    schedule: Option<&'a StaticSnapshot>,
    realtime: Option<&'a RealtimeSnapshot>,
    timezone: Tz,
}

impl<'a> QueryEngine<'a> {
    /// `fallback_timezone` applies when the schedule names no agency timezone.
    pub fn new(
        schedule: Option<&'a StaticSnapshot>,
        realtime: Option<&'a RealtimeSnapshot>,
        fallback_timezone: Tz,
    ) -> Self {
        let timezone = schedule
            .and_then(|s| s.timezone)
            .unwrap_or(fallback_timezone);
        Self {
            schedule,
            realtime,
            timezone,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn listing<T>(&self, items: Vec<T>, total_matches: usize) -> Listing<T> {
        Listing {
            items,
            total_matches,
            unavailable: None,
            static_generation: self.schedule.map(|s| s.generation),
            realtime_generation: self.realtime.map(|r| r.generation),
        }
    }

    fn unavailable<T>(&self, reason: Unavailable) -> Listing<T> {
        Listing {
            unavailable: Some(reason),
            ..self.listing(Vec::new(), 0)
        }
    }

    /// Enriched trains matching every filter, earliest ETA first. Trains
    /// without an ETA sort last; ties break on trip id.
    pub fn query_trains(&self, filter: &TrainFilter) -> Listing<EnrichedTrainRecord> {
        let Some(realtime) = self.realtime else {
            return self.unavailable(Unavailable::RealtimeFeed);
        };

        let mut records: Vec<_> = realtime
            .trip_updates
            .iter()
            .map(|tu| enrich(tu, self.schedule))
            .filter(|r| filter.matches(r, self.timezone))
            .collect();
        records.sort_by(by_eta_then_trip);

        let total = records.len();
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        self.listing(records, total)
    }

    pub fn query_train_by_trip_id(
        &self,
        trip_id: &str,
    ) -> Result<EnrichedTrainRecord, QueryError> {
        let realtime = self
            .realtime
            .ok_or(QueryError::Unavailable(Unavailable::RealtimeFeed))?;
        realtime
            .trip_update(trip_id)
            .map(|tu| enrich(tu, self.schedule))
            .ok_or_else(|| QueryError::NotFound(trip_id.to_string()))
    }

    /// All stations, by display name and then id. Unnamed stations sort last.
    pub fn query_stations(&self) -> Listing<Station> {
        let Some(schedule) = self.schedule else {
            return self.unavailable(Unavailable::StaticSchedule);
        };
        let mut stations: Vec<Station> = schedule.stations().cloned().collect();
        stations.sort_by(|a, b| {
            (a.name.is_none(), &a.name, &a.stop_id).cmp(&(b.name.is_none(), &b.name, &b.stop_id))
        });
        let total = stations.len();
        self.listing(stations, total)
    }

    /// All routes, by route id.
    pub fn query_routes(&self) -> Listing<Route> {
        let Some(schedule) = self.schedule else {
            return self.unavailable(Unavailable::StaticSchedule);
        };
        let mut routes: Vec<Route> = schedule.routes().cloned().collect();
        routes.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        let total = routes.len();
        self.listing(routes, total)
    }

    /// Enriched vehicle positions, by vehicle id.
    pub fn query_vehicle_positions(&self, filter: &VehicleFilter) -> Listing<EnrichedVehicle> {
        let Some(realtime) = self.realtime else {
            return self.unavailable(Unavailable::RealtimeFeed);
        };
        let mut vehicles: Vec<_> = realtime
            .vehicles
            .iter()
            .map(|v| enrich_vehicle(v, self.schedule))
            .filter(|v| filter.matches(v))
            .collect();
        vehicles.sort_by(|a, b| {
            (a.vehicle_id.is_none(), &a.vehicle_id, &a.trip_id).cmp(&(
                b.vehicle_id.is_none(),
                &b.vehicle_id,
                &b.trip_id,
            ))
        });
        let total = vehicles.len();
        self.listing(vehicles, total)
    }

    /// Alerts in feed order.
    pub fn query_alerts(&self, filter: &AlertFilter) -> Listing<ServiceAlert> {
        let Some(realtime) = self.realtime else {
            return self.unavailable(Unavailable::RealtimeFeed);
        };
        let alerts: Vec<_> = realtime
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        let total = alerts.len();
        self.listing(alerts, total)
    }
}

fn by_eta_then_trip(a: &EnrichedTrainRecord, b: &EnrichedTrainRecord) -> Ordering {
    match (a.eta, b.eta) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.trip_id.cmp(&b.trip_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodedFeed, FeedHeaderInfo};
    use crate::model::{ScheduledTrip, StopTimeUpdate, TripUpdate};
    use chrono::{DateTime, NaiveTime, TimeZone, Utc};

    const TZ: Tz = chrono_tz::America::New_York;

    /// Local wall-clock time on 2024-03-15 in New York.
    fn local(h: u32, m: u32) -> DateTime<Utc> {
        TZ.with_ymd_and_hms(2024, 3, 15, h, m, 0).unwrap().to_utc()
    }

    fn train(trip_id: &str, route: &str, stops: &[&str], eta: Option<DateTime<Utc>>) -> TripUpdate {
        TripUpdate {
            trip_id: trip_id.to_string(),
            route_id: Some(route.to_string()),
            stop_time_updates: stops
                .iter()
                .enumerate()
                .map(|(i, s)| StopTimeUpdate {
                    stop_id: Some(s.to_string()),
                    predicted_arrival: if i == 0 { eta } else { None },
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn realtime(trains: Vec<TripUpdate>) -> RealtimeSnapshot {
        RealtimeSnapshot::new(
            DecodedFeed {
                header: FeedHeaderInfo {
                    version: "2.0".to_string(),
                    differential: false,
                    timestamp: None,
                },
                trip_updates: trains,
                vehicles: vec![],
                alerts: vec![],
            },
            Utc::now(),
        )
    }

    fn schedule() -> StaticSnapshot {
        StaticSnapshot::from_records(
            vec![
                Station::new("1", "Grand Central"),
                Station::new("4", "Harlem-125 St"),
                Station::new("9", "Croton-Harmon"),
                Station::new("10", "Beacon"),
            ],
            vec![Route::new("1", "Hudson"), Route::new("2", "Harlem")],
            vec![ScheduledTrip::new("T1", "1", "Poughkeepsie")],
        )
    }

    fn trip_ids(listing: &Listing<EnrichedTrainRecord>) -> Vec<&str> {
        listing.items.iter().map(|r| r.trip_id.as_str()).collect()
    }

    #[test]
    fn destination_matches_terminus_only() {
        let rt = realtime(vec![
            train("A", "1", &["1", "4", "9"], Some(local(14, 0))),
            train("B", "1", &["4", "9", "10"], Some(local(14, 5))),
        ]);
        let engine = QueryEngine::new(None, Some(&rt), TZ);

        let to_9 = engine.query_trains(&TrainFilter::new().destination("9"));
        assert_eq!(trip_ids(&to_9), vec!["A"]);

        let from_9 = engine.query_trains(&TrainFilter::new().origin("9"));
        assert_eq!(trip_ids(&from_9), vec!["A", "B"]);
    }

    #[test]
    fn limit_applies_after_filter_and_sort() {
        let rt = realtime(vec![
            train("late", "1", &["1"], Some(local(15, 0))),
            train("other-route", "2", &["1"], Some(local(13, 0))),
            train("early", "1", &["1"], Some(local(14, 0))),
            train("middle", "1", &["1"], Some(local(14, 30))),
        ]);
        let engine = QueryEngine::new(None, Some(&rt), TZ);

        let listing = engine.query_trains(&TrainFilter::new().route("1").limit(2));
        assert_eq!(trip_ids(&listing), vec!["early", "middle"]);
        assert_eq!(listing.total_matches, 3);
    }

    #[test]
    fn ordering_puts_unknown_eta_last_and_breaks_ties_on_trip_id() {
        let rt = realtime(vec![
            train("C", "1", &["1"], None),
            train("B", "1", &["1"], Some(local(14, 0))),
            train("A", "1", &["1"], Some(local(14, 0))),
        ]);
        let engine = QueryEngine::new(None, Some(&rt), TZ);

        let listing = engine.query_trains(&TrainFilter::new());
        assert_eq!(trip_ids(&listing), vec!["A", "B", "C"]);
    }

    #[test]
    fn time_window_uses_local_time() {
        let rt = realtime(vec![
            train("A", "1", &["1"], Some(local(14, 45))),
            train("B", "1", &["1"], Some(local(16, 0))),
            train("C", "1", &["1"], None),
        ]);
        let engine = QueryEngine::new(None, Some(&rt), TZ);
        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();

        let window = TrainFilter::new().from_time(at(14, 0)).to_time(at(15, 0));
        assert_eq!(trip_ids(&engine.query_trains(&window)), vec!["A"]);

        let after = TrainFilter::new().from_time(at(15, 0));
        assert_eq!(trip_ids(&engine.query_trains(&after)), vec!["B"]);
    }

    #[test]
    fn filters_are_anded() {
        let rt = realtime(vec![
            train("A", "1", &["1", "9"], Some(local(14, 0))),
            train("B", "2", &["1", "9"], Some(local(14, 0))),
        ]);
        let engine = QueryEngine::new(None, Some(&rt), TZ);

        let listing = engine.query_trains(&TrainFilter::new().route("2").destination("9"));
        assert_eq!(trip_ids(&listing), vec!["B"]);

        let none = engine.query_trains(&TrainFilter::new().route("2").destination("1"));
        assert!(none.is_empty());
    }

    #[test]
    fn realtime_unavailable() {
        let snapshot = schedule();
        let engine = QueryEngine::new(Some(&snapshot), None, TZ);

        let listing = engine.query_trains(&TrainFilter::new());
        assert!(listing.is_empty());
        assert_eq!(listing.unavailable, Some(Unavailable::RealtimeFeed));
        assert_eq!(
            engine.query_train_by_trip_id("T1"),
            Err(QueryError::Unavailable(Unavailable::RealtimeFeed))
        );
        // Static queries still answer
        assert_eq!(engine.query_routes().len(), 2);
    }

    #[test]
    fn static_unavailable() {
        let engine = QueryEngine::new(None, None, TZ);
        let stations = engine.query_stations();
        assert_eq!(stations.unavailable, Some(Unavailable::StaticSchedule));
        assert_eq!(stations.static_generation, None);
    }

    #[test]
    fn train_by_trip_id() {
        let snapshot = schedule();
        let rt = realtime(vec![train("T1", "1", &["1", "4"], Some(local(14, 45)))]);
        let engine = QueryEngine::new(Some(&snapshot), Some(&rt), TZ);

        let record = engine.query_train_by_trip_id("T1").unwrap();
        assert_eq!(record.headsign.as_deref(), Some("Poughkeepsie"));
        assert_eq!(
            engine.query_train_by_trip_id("T2"),
            Err(QueryError::NotFound("T2".to_string()))
        );
    }

    #[test]
    fn stations_sorted_by_name_routes_by_id() {
        let snapshot = schedule();
        let engine = QueryEngine::new(Some(&snapshot), None, TZ);

        let names: Vec<_> = engine
            .query_stations()
            .items
            .into_iter()
            .filter_map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec!["Beacon", "Croton-Harmon", "Grand Central", "Harlem-125 St"]
        );

        let ids: Vec<_> = engine
            .query_routes()
            .items
            .into_iter()
            .map(|r| r.route_id)
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }
}
