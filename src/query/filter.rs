use chrono::{NaiveTime, Timelike};
use chrono_tz::Tz;

use crate::error::QueryError;
use crate::model::{EnrichedTrainRecord, EnrichedVehicle, ServiceAlert};

/// Parses a local time of day written as `HH:MM`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, QueryError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| QueryError::InvalidTimeOfDay(s.to_string()))
}

/// Local time-of-day window, compared at minute resolution.
///
/// Both bounds are inclusive. A window whose start is later than its end
/// wraps past midnight (`22:00`..`02:00`). A missing bound leaves that side
/// open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: Option<NaiveTime>,
    pub to: Option<NaiveTime>,
}

impl TimeWindow {
    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let t = NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time);
        match (self.from, self.to) {
            (None, None) => true,
            (Some(from), None) => t >= from,
            (None, Some(to)) => t <= to,
            (Some(from), Some(to)) if from <= to => from <= t && t <= to,
            (Some(from), Some(to)) => t >= from || t <= to,
        }
    }
}

/// Filters for train listings. Every supplied filter must match; `limit`
/// applies after filtering and ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainFilter {
    /// Matches the current stop, the next stop or any stop of the trip.
    pub origin_station: Option<String>,
    /// Matches the trip's last stop only.
    pub destination_station: Option<String>,
    pub route: Option<String>,
    pub window: TimeWindow,
    pub limit: Option<usize>,
}

impl TrainFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(mut self, station: impl Into<String>) -> Self {
        self.origin_station = Some(station.into());
        self
    }

    pub fn destination(mut self, station: impl Into<String>) -> Self {
        self.destination_station = Some(station.into());
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn from_time(mut self, from: NaiveTime) -> Self {
        self.window.from = Some(from);
        self
    }

    pub fn to_time(mut self, to: NaiveTime) -> Self {
        self.window.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` passes every supplied filter. ETAs are converted to
    /// `timezone` for the time window; a record without an ETA never passes
    /// a window with a bound.
    pub fn matches(&self, record: &EnrichedTrainRecord, timezone: Tz) -> bool {
        if let Some(origin) = self.origin_station.as_deref() {
            let at_origin = record.current_stop.as_deref() == Some(origin)
                || record.next_stop.as_deref() == Some(origin)
                || record.stop_ids().any(|s| s == origin);
            if !at_origin {
                return false;
            }
        }

        if let Some(destination) = self.destination_station.as_deref()
            && record.terminus() != Some(destination)
        {
            return false;
        }

        if let Some(route) = self.route.as_deref()
            && record.route_id.as_deref() != Some(route)
        {
            return false;
        }

        if !self.window.is_open() {
            let Some(eta) = record.eta else {
                return false;
            };
            if !self.window.contains(eta.with_timezone(&timezone).time()) {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleFilter {
    pub route: Option<String>,
    pub trip: Option<String>,
}

impl VehicleFilter {
    pub fn matches(&self, vehicle: &EnrichedVehicle) -> bool {
        self.route
            .as_deref()
            .is_none_or(|r| vehicle.route_id.as_deref() == Some(r))
            && self
                .trip
                .as_deref()
                .is_none_or(|t| vehicle.trip_id.as_deref() == Some(t))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertFilter {
    pub route: Option<String>,
    pub stop: Option<String>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &ServiceAlert) -> bool {
        self.route.as_deref().is_none_or(|r| alert.affects_route(r))
            && self.stop.as_deref().is_none_or(|s| alert.affects_stop(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(s: &str) -> NaiveTime {
        parse_time_of_day(s).unwrap()
    }

    #[test]
    fn parse_valid_and_invalid() {
        assert_eq!(hm("14:45"), NaiveTime::from_hms_opt(14, 45, 0).unwrap());
        assert_eq!(
            parse_time_of_day("25:00"),
            Err(QueryError::InvalidTimeOfDay("25:00".to_string()))
        );
        assert!(parse_time_of_day("2pm").is_err());
    }

    #[test]
    fn one_sided_windows() {
        let from = TimeWindow {
            from: Some(hm("14:00")),
            to: None,
        };
        assert!(from.contains(hm("14:00")));
        assert!(from.contains(hm("23:59")));
        assert!(!from.contains(hm("13:59")));

        let to = TimeWindow {
            from: None,
            to: Some(hm("14:00")),
        };
        assert!(to.contains(hm("00:00")));
        assert!(!to.contains(hm("14:01")));
    }

    #[test]
    fn bounds_are_inclusive_at_minute_resolution() {
        let window = TimeWindow {
            from: Some(hm("14:00")),
            to: Some(hm("14:45")),
        };
        let late_in_minute = NaiveTime::from_hms_opt(14, 45, 30).unwrap();
        assert!(window.contains(late_in_minute));
        assert!(!window.contains(hm("14:46")));
    }

    #[test]
    fn window_wraps_past_midnight() {
        let window = TimeWindow {
            from: Some(hm("22:00")),
            to: Some(hm("02:00")),
        };
        assert!(window.contains(hm("23:30")));
        assert!(window.contains(hm("01:15")));
        assert!(!window.contains(hm("12:00")));
    }

    #[test]
    fn alert_filter_requires_all() {
        let alert = ServiceAlert {
            informed_entities: vec![crate::model::InformedEntity {
                route_id: Some("1".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let by_route = AlertFilter {
            route: Some("1".to_string()),
            stop: None,
        };
        let by_both = AlertFilter {
            route: Some("1".to_string()),
            stop: Some("4".to_string()),
        };
        assert!(by_route.matches(&alert));
        assert!(!by_both.matches(&alert));
        assert!(AlertFilter::default().matches(&alert));
    }
}
