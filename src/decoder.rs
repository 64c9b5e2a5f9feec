//! Decoding of GTFS-realtime protobuf messages into engine records.
//!
//! Decoding is pure: it does no I/O and keeps no state between calls. The MTA
//! railroad extension blocks are resolved here, once, into `Option` fields on
//! the records; nothing downstream inspects the protobuf again.

use chrono::{DateTime, NaiveDate, Utc};
use prost::Message;
use tracing::debug;

use crate::error::DecodeError;
use crate::gtfs_rt::{self, FeedMessage};
use crate::model::{
    ActivePeriod, BicycleAllowance, CarriageAmenities, CarriageDetails, Coordinates,
    InformedEntity, ServiceAlert, StopExtension, StopTimeUpdate, TripUpdate, VehiclePosition,
    VehicleStopStatus,
};

/// Schema major versions this decoder understands.
const SUPPORTED_MAJOR_VERSIONS: &[&str] = &["1", "2"];

/// `StopTimeUpdate.schedule_relationship` value for a skipped stop.
const SKIPPED: i32 = 1;

/// Header metadata of one decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedHeaderInfo {
    pub version: String,
    pub differential: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Every record of one fetch response.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFeed {
    pub header: FeedHeaderInfo,
    pub trip_updates: Vec<TripUpdate>,
    pub vehicles: Vec<VehiclePosition>,
    pub alerts: Vec<ServiceAlert>,
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Decodes one fetch response into typed records.
///
/// # Errors
///
/// [`DecodeError::Malformed`] for truncated or invalid protobuf,
/// [`DecodeError::MissingHeader`] when the header has no schema version and
/// [`DecodeError::UnsupportedVersion`] for an unknown major version.
pub fn decode_feed(bytes: &[u8]) -> Result<DecodedFeed, DecodeError> {
    let message = parse_feed(bytes)?;
    let header = decode_header(&message.header)?;

    let mut trip_updates = Vec::new();
    let mut vehicles = Vec::new();
    let mut alerts = Vec::new();
    let mut skipped = 0usize;

    for entity in &message.entity {
        if entity.is_deleted == Some(true) {
            skipped += 1;
            continue;
        }
        if let Some(tu) = &entity.trip_update {
            match decode_trip_update(&entity.id, tu) {
                Some(update) => trip_updates.push(update),
                None => skipped += 1,
            }
        }
        if let Some(vp) = &entity.vehicle {
            vehicles.push(decode_vehicle(&entity.id, vp));
        }
        if let Some(alert) = &entity.alert {
            alerts.push(decode_alert(&entity.id, alert));
        }
    }

    debug!(
        entities = message.entity.len(),
        trip_updates = trip_updates.len(),
        vehicles = vehicles.len(),
        alerts = alerts.len(),
        skipped,
        "Decoded feed message"
    );

    Ok(DecodedFeed {
        header,
        trip_updates,
        vehicles,
        alerts,
    })
}

fn decode_header(header: &gtfs_rt::FeedHeader) -> Result<FeedHeaderInfo, DecodeError> {
    let version = header.gtfs_realtime_version.trim();
    if version.is_empty() {
        return Err(DecodeError::MissingHeader);
    }
    let major = version.split('.').next().unwrap_or_default();
    if !SUPPORTED_MAJOR_VERSIONS.contains(&major) {
        return Err(DecodeError::UnsupportedVersion(version.to_string()));
    }

    Ok(FeedHeaderInfo {
        version: version.to_string(),
        differential: header.incrementality == Some(1),
        timestamp: header.timestamp.and_then(from_unix_u64),
    })
}

/// Trip updates without a trip id cannot be joined or looked up, so they are
/// skipped.
fn decode_trip_update(entity_id: &str, tu: &gtfs_rt::TripUpdate) -> Option<TripUpdate> {
    let trip_id = tu.trip.trip_id.clone().and_then(non_empty)?;
    let vehicle = tu.vehicle.as_ref();

    Some(TripUpdate {
        entity_id: entity_id.to_string(),
        trip_id,
        route_id: tu.trip.route_id.clone().and_then(non_empty),
        direction_id: tu.trip.direction_id,
        start_date: tu.trip.start_date.as_deref().and_then(parse_service_date),
        vehicle_id: vehicle.and_then(|v| v.id.clone()).and_then(non_empty),
        vehicle_label: vehicle.and_then(|v| v.label.clone()).and_then(non_empty),
        timestamp: tu.timestamp.and_then(from_unix_u64),
        delay_secs: tu.delay,
        stop_time_updates: tu.stop_time_update.iter().map(decode_stop_time).collect(),
    })
}

fn decode_stop_time(stu: &gtfs_rt::trip_update::StopTimeUpdate) -> StopTimeUpdate {
    let arrival = stu.arrival.as_ref();
    let departure = stu.departure.as_ref();

    StopTimeUpdate {
        stop_id: stu.stop_id.clone().and_then(non_empty),
        stop_sequence: stu.stop_sequence,
        predicted_arrival: arrival.and_then(|e| e.time).and_then(from_unix),
        scheduled_arrival: arrival.and_then(|e| e.scheduled_time).and_then(from_unix),
        predicted_departure: departure.and_then(|e| e.time).and_then(from_unix),
        scheduled_departure: departure.and_then(|e| e.scheduled_time).and_then(from_unix),
        arrival_delay_secs: arrival.and_then(|e| e.delay),
        departure_delay_secs: departure.and_then(|e| e.delay),
        skipped: stu.schedule_relationship == Some(SKIPPED),
        extension: stu
            .mta_railroad_stop_time_update
            .as_ref()
            .map(|ext| StopExtension {
                track: ext.track.clone().and_then(non_empty),
                train_status: ext.train_status.clone().and_then(non_empty),
            }),
    }
}

fn decode_vehicle(entity_id: &str, vp: &gtfs_rt::VehiclePosition) -> VehiclePosition {
    let trip = vp.trip.as_ref();
    let vehicle = vp.vehicle.as_ref();
    let position = vp.position.as_ref();

    VehiclePosition {
        entity_id: entity_id.to_string(),
        vehicle_id: vehicle.and_then(|v| v.id.clone()).and_then(non_empty),
        vehicle_label: vehicle.and_then(|v| v.label.clone()).and_then(non_empty),
        trip_id: trip.and_then(|t| t.trip_id.clone()).and_then(non_empty),
        route_id: trip.and_then(|t| t.route_id.clone()).and_then(non_empty),
        coordinates: position.and_then(|p| coordinates(p.latitude, p.longitude)),
        bearing: position.and_then(|p| p.bearing),
        speed: position.and_then(|p| p.speed),
        current_stop_sequence: vp.current_stop_sequence,
        stop_id: vp.stop_id.clone().and_then(non_empty),
        current_status: vp.current_status.and_then(VehicleStopStatus::from_raw),
        timestamp: vp.timestamp.and_then(from_unix_u64),
        carriages: vp.multi_carriage_details.iter().map(decode_carriage).collect(),
    }
}

fn decode_carriage(carriage: &gtfs_rt::vehicle_position::CarriageDetails) -> CarriageDetails {
    CarriageDetails {
        id: carriage.id.clone().and_then(non_empty),
        label: carriage.label.clone().and_then(non_empty),
        sequence: carriage.carriage_sequence,
        occupancy_percentage: carriage.occupancy_percentage.filter(|p| *p >= 0),
        amenities: carriage
            .mta_railroad_carriage_details
            .as_ref()
            .map(|ext| CarriageAmenities {
                bicycles: ext.bicycles_allowed.map(BicycleAllowance::from_raw),
                carriage_class: ext.carriage_class.clone().and_then(non_empty),
                quiet_carriage: ext.quiet_carriage.and_then(yes_no),
                toilet_onboard: ext.toilet_facilities.and_then(yes_no),
            }),
    }
}

fn decode_alert(entity_id: &str, alert: &gtfs_rt::Alert) -> ServiceAlert {
    ServiceAlert {
        id: entity_id.to_string(),
        header: alert.header_text.as_ref().and_then(pick_translation),
        description: alert.description_text.as_ref().and_then(pick_translation),
        url: alert.url.as_ref().and_then(pick_translation),
        cause: alert
            .cause
            .and_then(|raw| gtfs_rt::alert::Cause::try_from(raw).ok())
            .map(|c| c.as_str_name().to_string()),
        effect: alert
            .effect
            .and_then(|raw| gtfs_rt::alert::Effect::try_from(raw).ok())
            .map(|e| e.as_str_name().to_string()),
        active_periods: alert
            .active_period
            .iter()
            .map(|p| ActivePeriod {
                start: p.start.and_then(from_unix_u64),
                end: p.end.and_then(from_unix_u64),
            })
            .collect(),
        informed_entities: alert
            .informed_entity
            .iter()
            .map(|e| InformedEntity {
                agency_id: e.agency_id.clone().and_then(non_empty),
                route_id: e.route_id.clone().and_then(non_empty),
                stop_id: e.stop_id.clone().and_then(non_empty),
                trip_id: e
                    .trip
                    .as_ref()
                    .and_then(|t| t.trip_id.clone())
                    .and_then(non_empty),
            })
            .collect(),
    }
}

/// English text if tagged, else the untagged translation, else the first.
fn pick_translation(text: &gtfs_rt::TranslatedString) -> Option<String> {
    let tr = &text.translation;
    tr.iter()
        .find(|t| t.language.as_deref().is_some_and(|l| l.starts_with("en")))
        .or_else(|| tr.iter().find(|t| t.language.is_none()))
        .or_else(|| tr.first())
        .map(|t| t.text.clone())
        .and_then(non_empty)
}

/// Both MTA amenity enums use 1 for "yes", 2 for "no" and 0 for unknown.
fn yes_no(raw: i32) -> Option<bool> {
    match raw {
        1 => Some(true),
        2 => Some(false),
        _ => None,
    }
}

/// Producers encode "no position" as 0/0; that is not a real coordinate.
fn coordinates(lat: f32, lon: f32) -> Option<Coordinates> {
    if lat == 0.0 && lon == 0.0 {
        return None;
    }
    Some(Coordinates {
        lat: f64::from(lat),
        lon: f64::from(lon),
    })
}

/// Zero and negative timestamps mean "unknown", never the epoch.
fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

fn from_unix_u64(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs).ok().and_then(from_unix)
}

fn parse_service_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}
