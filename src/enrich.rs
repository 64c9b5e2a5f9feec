//! Joins real-time records with the static schedule.
//!
//! Both functions are total: any combination of present and absent static
//! data yields a record. A lookup that misses leaves the resolved field
//! `None` and keeps the raw id.

use crate::model::{
    EnrichedStop, EnrichedTrainRecord, EnrichedVehicle, Route, ScheduledTrip, Station,
    TripUpdate, VehiclePosition,
};
use crate::static_data::StaticSnapshot;

struct Lookup<'a> {
    schedule: Option<&'a StaticSnapshot>,
}

impl<'a> Lookup<'a> {
    fn trip(&self, trip_id: Option<&str>) -> Option<&'a ScheduledTrip> {
        self.schedule?.trip(trip_id?)
    }

    fn route(&self, route_id: Option<&str>) -> Option<&'a Route> {
        self.schedule?.route(route_id?)
    }

    fn station(&self, stop_id: Option<&str>) -> Option<&'a Station> {
        self.schedule?.station(stop_id?)
    }
}

/// Builds the enriched view of one trip update.
///
/// Trip resolves route and headsign; current and next stop resolve their
/// names independently. The route id is the feed's, or the scheduled trip's
/// when the feed omits it.
pub fn enrich(update: &TripUpdate, schedule: Option<&StaticSnapshot>) -> EnrichedTrainRecord {
    let lookup = Lookup { schedule };
    let trip = lookup.trip(Some(&update.trip_id));
    let route_id = update
        .route_id
        .clone()
        .or_else(|| trip.map(|t| t.route_id.clone()));
    let route = lookup.route(route_id.as_deref());

    let current_stop = update.current_stop();
    let next_stop = update.next_stop();
    let current = lookup.station(current_stop);
    let next = lookup.station(next_stop);
    let first = update.stop_time_updates.first();

    let stops = update
        .stop_time_updates
        .iter()
        .map(|stu| {
            let station = lookup.station(stu.stop_id.as_deref());
            EnrichedStop {
                stop_id: stu.stop_id.clone(),
                stop_name: station.and_then(|s| s.name.clone()),
                coordinates: station.and_then(|s| s.coordinates),
                arrival: stu.arrival(),
                departure: stu.departure(),
                track: stu.track().map(str::to_string),
                status: stu.status().map(str::to_string),
                skipped: stu.skipped,
            }
        })
        .collect();

    EnrichedTrainRecord {
        trip_id: update.trip_id.clone(),
        route_id,
        vehicle_id: update.vehicle_id.clone(),
        start_date: update.start_date,

        route_name: route.and_then(|r| r.display_name()).map(str::to_string),
        route_short_name: route.and_then(|r| r.short_name.clone()),
        route_color: route.and_then(|r| r.color.clone()),
        route_text_color: route.and_then(|r| r.text_color.clone()),
        headsign: trip.and_then(|t| t.headsign.clone()),
        direction_id: trip.and_then(|t| t.direction_id),
        wheelchair_accessible: trip.and_then(|t| t.wheelchair_accessible),
        bikes_allowed: trip.and_then(|t| t.bikes_allowed),

        current_stop: current_stop.map(str::to_string),
        current_stop_name: current.and_then(|s| s.name.clone()),
        current_platform_code: current.and_then(|s| s.platform_code.clone()),
        next_stop: next_stop.map(str::to_string),
        next_stop_name: next.and_then(|s| s.name.clone()),
        next_platform_code: next.and_then(|s| s.platform_code.clone()),

        eta: update.eta(),
        track: first.and_then(|s| s.track()).map(str::to_string),
        status: first.and_then(|s| s.status()).map(str::to_string),
        stops,
    }
}

/// Builds the enriched view of one vehicle position.
pub fn enrich_vehicle(
    vehicle: &VehiclePosition,
    schedule: Option<&StaticSnapshot>,
) -> EnrichedVehicle {
    let lookup = Lookup { schedule };
    let trip = lookup.trip(vehicle.trip_id.as_deref());
    let route_id = vehicle
        .route_id
        .clone()
        .or_else(|| trip.map(|t| t.route_id.clone()));
    let route = lookup.route(route_id.as_deref());

    let current_stop = vehicle.current_stop();
    let next_stop = vehicle.next_stop();

    EnrichedVehicle {
        vehicle_id: vehicle.vehicle_id.clone(),
        vehicle_label: vehicle.vehicle_label.clone(),
        trip_id: vehicle.trip_id.clone(),
        route_name: route.and_then(|r| r.display_name()).map(str::to_string),
        route_color: route.and_then(|r| r.color.clone()),
        route_id,
        headsign: trip.and_then(|t| t.headsign.clone()),
        coordinates: vehicle.coordinates,
        bearing: vehicle.bearing,
        speed: vehicle.speed,
        current_status: vehicle.current_status,
        current_stop: current_stop.map(str::to_string),
        current_stop_name: lookup.station(current_stop).and_then(|s| s.name.clone()),
        next_stop: next_stop.map(str::to_string),
        next_stop_name: lookup.station(next_stop).and_then(|s| s.name.clone()),
        timestamp: vehicle.timestamp,
        carriages: vehicle.carriages.clone(),
    }
}
