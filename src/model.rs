//! Plain data types handed across the engine boundary.
//!
//! Static records come from the GTFS schedule archive, real-time records from
//! the decoded GTFS-realtime feed, and the enriched records join the two.
//! Every identifier a producer can omit is an `Option`: an absent value is
//! never replaced by an empty string, zero or the epoch.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

// --- Static schedule ---

/// A stop or station from `stops.txt`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Station {
    pub stop_id: String,
    pub name: Option<String>,
    /// Rider-facing short code (`stop_code`).
    pub code: Option<String>,
    pub coordinates: Option<Coordinates>,
    /// `wheelchair_boarding`: `Some(true)` for 1, `Some(false)` for 2.
    pub accessible: Option<bool>,
    pub description: Option<String>,
    pub zone_id: Option<String>,
    pub parent_station: Option<String>,
    pub platform_code: Option<String>,
}

impl Station {
    /// A station with only an id and a name, other fields unset.
    pub fn new(stop_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            stop_id: stop_id.into(),
            name: Some(name.into()),
            code: None,
            coordinates: None,
            accessible: None,
            description: None,
            zone_id: None,
            parent_station: None,
            platform_code: None,
        }
    }
}

/// A line from `routes.txt`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub route_id: String,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub color: Option<String>,
    pub text_color: Option<String>,
    /// GTFS `route_type` (2 = rail).
    pub route_type: Option<i32>,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl Route {
    pub fn new(route_id: impl Into<String>, long_name: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            long_name: Some(long_name.into()),
            short_name: None,
            color: None,
            text_color: None,
            route_type: None,
            description: None,
            url: None,
        }
    }

    /// Long name, falling back to the short name.
    pub fn display_name(&self) -> Option<&str> {
        self.long_name.as_deref().or(self.short_name.as_deref())
    }
}

/// A planned trip from `trips.txt`, with its stop pattern from
/// `stop_times.txt` when the archive has one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTrip {
    pub trip_id: String,
    pub route_id: String,
    pub headsign: Option<String>,
    pub short_name: Option<String>,
    pub direction_id: Option<u8>,
    pub wheelchair_accessible: Option<bool>,
    pub bikes_allowed: Option<bool>,
    /// Stop ids ordered by `stop_sequence`. Empty if the archive has no
    /// stop times for this trip.
    pub stop_ids: Vec<String>,
}

impl ScheduledTrip {
    pub fn new(
        trip_id: impl Into<String>,
        route_id: impl Into<String>,
        headsign: impl Into<String>,
    ) -> Self {
        Self {
            trip_id: trip_id.into(),
            route_id: route_id.into(),
            headsign: Some(headsign.into()),
            short_name: None,
            direction_id: None,
            wheelchair_accessible: None,
            bikes_allowed: None,
            stop_ids: Vec::new(),
        }
    }
}

// --- Real-time feed ---

/// MTA railroad extension block of a stop-time update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopExtension {
    pub track: Option<String>,
    pub train_status: Option<String>,
}

/// Predicted and scheduled times for one stop of a trip update. The trip id
/// lives on the owning [`TripUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StopTimeUpdate {
    pub stop_id: Option<String>,
    pub stop_sequence: Option<u32>,
    pub predicted_arrival: Option<DateTime<Utc>>,
    pub scheduled_arrival: Option<DateTime<Utc>>,
    pub predicted_departure: Option<DateTime<Utc>>,
    pub scheduled_departure: Option<DateTime<Utc>>,
    pub arrival_delay_secs: Option<i32>,
    pub departure_delay_secs: Option<i32>,
    pub skipped: bool,
    /// `None` when the producer sent no railroad extension for this stop.
    pub extension: Option<StopExtension>,
}

impl StopTimeUpdate {
    pub fn arrival(&self) -> Option<DateTime<Utc>> {
        self.predicted_arrival.or(self.scheduled_arrival)
    }

    pub fn departure(&self) -> Option<DateTime<Utc>> {
        self.predicted_departure.or(self.scheduled_departure)
    }

    pub fn track(&self) -> Option<&str> {
        self.extension.as_ref()?.track.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.extension.as_ref()?.train_status.as_deref()
    }
}

/// One train's progress along its trip, from a `TripUpdate` entity.
///
/// The first stop-time update is the train's current stop and the second its
/// next stop; the last one is the trip's terminus.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TripUpdate {
    pub entity_id: String,
    pub trip_id: String,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub start_date: Option<NaiveDate>,
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub delay_secs: Option<i32>,
    pub stop_time_updates: Vec<StopTimeUpdate>,
}

impl TripUpdate {
    pub fn current_stop(&self) -> Option<&str> {
        self.stop_time_updates.first()?.stop_id.as_deref()
    }

    pub fn next_stop(&self) -> Option<&str> {
        self.stop_time_updates.get(1)?.stop_id.as_deref()
    }

    pub fn terminus(&self) -> Option<&str> {
        self.stop_time_updates.last()?.stop_id.as_deref()
    }

    /// Estimated arrival at the current stop, or its departure if the feed
    /// only carries one.
    pub fn eta(&self) -> Option<DateTime<Utc>> {
        let first = self.stop_time_updates.first()?;
        first.arrival().or_else(|| first.departure())
    }

    pub fn stop_ids(&self) -> impl Iterator<Item = &str> {
        self.stop_time_updates
            .iter()
            .filter_map(|stu| stu.stop_id.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStopStatus {
    IncomingAt,
    StoppedAt,
    InTransitTo,
}

impl VehicleStopStatus {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(VehicleStopStatus::IncomingAt),
            1 => Some(VehicleStopStatus::StoppedAt),
            2 => Some(VehicleStopStatus::InTransitTo),
            _ => None,
        }
    }
}

/// Bicycle allowance of a carriage, as encoded by the MTA extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "count")]
pub enum BicycleAllowance {
    NoLimit,
    Prohibited,
    Limited(u32),
}

impl BicycleAllowance {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => BicycleAllowance::Prohibited,
            n if n > 0 => BicycleAllowance::Limited(n.unsigned_abs()),
            _ => BicycleAllowance::NoLimit,
        }
    }
}

/// MTA railroad extension block of a carriage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CarriageAmenities {
    pub bicycles: Option<BicycleAllowance>,
    pub carriage_class: Option<String>,
    pub quiet_carriage: Option<bool>,
    pub toilet_onboard: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CarriageDetails {
    pub id: Option<String>,
    pub label: Option<String>,
    pub sequence: Option<u32>,
    pub occupancy_percentage: Option<i32>,
    /// `None` when the producer sent no railroad extension for this carriage.
    pub amenities: Option<CarriageAmenities>,
}

/// A vehicle's reported position, from a `VehiclePosition` entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehiclePosition {
    pub entity_id: String,
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
    pub current_stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub current_status: Option<VehicleStopStatus>,
    pub timestamp: Option<DateTime<Utc>>,
    pub carriages: Vec<CarriageDetails>,
}

impl VehiclePosition {
    /// The stop the vehicle is at. Without a status the reported stop is
    /// taken to be the current one.
    pub fn current_stop(&self) -> Option<&str> {
        match self.current_status {
            None | Some(VehicleStopStatus::StoppedAt) => self.stop_id.as_deref(),
            Some(_) => None,
        }
    }

    /// The stop the vehicle is heading to.
    pub fn next_stop(&self) -> Option<&str> {
        match self.current_status {
            Some(VehicleStopStatus::IncomingAt | VehicleStopStatus::InTransitTo) => {
                self.stop_id.as_deref()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivePeriod {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Route, stop or trip an alert applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InformedEntity {
    pub agency_id: Option<String>,
    pub route_id: Option<String>,
    pub stop_id: Option<String>,
    pub trip_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceAlert {
    pub id: String,
    pub header: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    /// Proto enum name, e.g. `WEATHER`.
    pub cause: Option<String>,
    /// Proto enum name, e.g. `SIGNIFICANT_DELAYS`.
    pub effect: Option<String>,
    pub active_periods: Vec<ActivePeriod>,
    pub informed_entities: Vec<InformedEntity>,
}

impl ServiceAlert {
    pub fn affects_route(&self, route_id: &str) -> bool {
        self.informed_entities
            .iter()
            .any(|e| e.route_id.as_deref() == Some(route_id))
    }

    pub fn affects_stop(&self, stop_id: &str) -> bool {
        self.informed_entities
            .iter()
            .any(|e| e.stop_id.as_deref() == Some(stop_id))
    }
}

// --- Enriched views ---

/// One stop of an enriched train, with its name resolved when the schedule
/// knows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedStop {
    pub stop_id: Option<String>,
    pub stop_name: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub arrival: Option<DateTime<Utc>>,
    pub departure: Option<DateTime<Utc>>,
    pub track: Option<String>,
    pub status: Option<String>,
    pub skipped: bool,
}

/// A trip update joined with the static schedule. Raw ids are always kept;
/// the resolved fields are `None` when the schedule has no match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTrainRecord {
    pub trip_id: String,
    pub route_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub start_date: Option<NaiveDate>,

    pub route_name: Option<String>,
    pub route_short_name: Option<String>,
    pub route_color: Option<String>,
    pub route_text_color: Option<String>,
    pub headsign: Option<String>,
    pub direction_id: Option<u8>,
    pub wheelchair_accessible: Option<bool>,
    pub bikes_allowed: Option<bool>,

    pub current_stop: Option<String>,
    pub current_stop_name: Option<String>,
    pub current_platform_code: Option<String>,
    pub next_stop: Option<String>,
    pub next_stop_name: Option<String>,
    pub next_platform_code: Option<String>,

    pub eta: Option<DateTime<Utc>>,
    pub track: Option<String>,
    pub status: Option<String>,
    pub stops: Vec<EnrichedStop>,
}

impl EnrichedTrainRecord {
    pub fn terminus(&self) -> Option<&str> {
        self.stops.last()?.stop_id.as_deref()
    }

    pub fn stop_ids(&self) -> impl Iterator<Item = &str> {
        self.stops.iter().filter_map(|s| s.stop_id.as_deref())
    }
}

/// A vehicle position joined with the static schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedVehicle {
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub route_name: Option<String>,
    pub route_color: Option<String>,
    pub headsign: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
    pub current_status: Option<VehicleStopStatus>,
    pub current_stop: Option<String>,
    pub current_stop_name: Option<String>,
    pub next_stop: Option<String>,
    pub next_stop_name: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub carriages: Vec<CarriageDetails>,
}
