//! Parsing of the static GTFS archive into an immutable snapshot.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use csv::StringRecord;
use tracing::{info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::config::ArchiveLimits;
use crate::error::ArchiveInvalidError;
use crate::model::{Coordinates, Route, ScheduledTrip, Station};

/// Files an archive must contain to be accepted.
pub const REQUIRED_FILES: [&str; 3] = ["routes.txt", "stops.txt", "trips.txt"];

/// One loaded generation of the static schedule. Never mutated after it is
/// published; a refresh builds a new one.
#[derive(Debug, Clone)]
pub struct StaticSnapshot {
    pub generation: u64,
    pub loaded_at: DateTime<Utc>,
    /// Agency timezone from `agency.txt`, when present and valid.
    pub timezone: Option<Tz>,
    stations: HashMap<String, Station>,
    routes: HashMap<String, Route>,
    trips: HashMap<String, ScheduledTrip>,
}

impl StaticSnapshot {
    /// Indexes the records by id. Trips whose route or scheduled stops do not
    /// resolve within the same records are dropped with a warning.
    pub fn from_records(
        stations: Vec<Station>,
        routes: Vec<Route>,
        trips: Vec<ScheduledTrip>,
    ) -> Self {
        let stations: HashMap<_, _> = stations
            .into_iter()
            .map(|s| (s.stop_id.clone(), s))
            .collect();
        let routes: HashMap<_, _> = routes
            .into_iter()
            .map(|r| (r.route_id.clone(), r))
            .collect();

        let total = trips.len();
        let mut unknown_route = 0usize;
        let mut unknown_stop = 0usize;
        let trips: HashMap<_, _> = trips
            .into_iter()
            .filter(|t| {
                if !routes.contains_key(&t.route_id) {
                    unknown_route += 1;
                    return false;
                }
                if t.stop_ids.iter().any(|s| !stations.contains_key(s)) {
                    unknown_stop += 1;
                    return false;
                }
                true
            })
            .map(|t| (t.trip_id.clone(), t))
            .collect();

        if unknown_route > 0 || unknown_stop > 0 {
            warn!(
                total,
                unknown_route, unknown_stop, "Dropped trips with unresolved references"
            );
        }

        Self {
            generation: 0,
            loaded_at: Utc::now(),
            timezone: None,
            stations,
            routes,
            trips,
        }
    }

    pub fn with_timezone(mut self, timezone: Option<Tz>) -> Self {
        self.timezone = timezone;
        self
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn station(&self, stop_id: &str) -> Option<&Station> {
        self.stations.get(stop_id)
    }

    pub fn route(&self, route_id: &str) -> Option<&Route> {
        self.routes.get(route_id)
    }

    pub fn trip(&self, trip_id: &str) -> Option<&ScheduledTrip> {
        self.trips.get(trip_id)
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }
}

/// Opens and parses the archive at `path`. Blocking; call on
/// `spawn_blocking` from async code.
pub fn load_archive(
    path: &Path,
    limits: &ArchiveLimits,
) -> Result<StaticSnapshot, ArchiveInvalidError> {
    let file = File::open(path).map_err(|source| ArchiveInvalidError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let size = file
        .metadata()
        .map_err(|source| ArchiveInvalidError::Open {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if size == 0 {
        return Err(ArchiveInvalidError::Empty);
    }
    parse_archive(file, limits)
}

/// Sum of the uncompressed sizes declared by every entry. An entry that
/// cannot be read makes the whole archive invalid.
fn declared_size<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<u64, ArchiveInvalidError> {
    let mut total: u64 = 0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(ArchiveInvalidError::NotAnArchive)?;
        total = total.saturating_add(entry.size());
    }
    Ok(total)
}

/// Validates and parses an archive from any seekable reader.
pub fn parse_archive<R: Read + Seek>(
    reader: R,
    limits: &ArchiveLimits,
) -> Result<StaticSnapshot, ArchiveInvalidError> {
    let mut archive = ZipArchive::new(reader).map_err(ArchiveInvalidError::NotAnArchive)?;
    if archive.is_empty() {
        return Err(ArchiveInvalidError::Empty);
    }

    // Zip bomb protection: check total uncompressed size
    let total_uncompressed = declared_size(&mut archive)?;
    if total_uncompressed > limits.max_decompressed_bytes {
        return Err(ArchiveInvalidError::TooLarge {
            size: total_uncompressed,
            limit: limits.max_decompressed_bytes,
        });
    }

    let names: HashSet<String> = archive.file_names().map(str::to_string).collect();
    for required in REQUIRED_FILES {
        if !names.contains(required) {
            return Err(ArchiveInvalidError::MissingFile(required));
        }
    }

    let stations = read_table(&mut archive, "stops.txt", &["stop_id"], parse_stop)?;
    info!(count = stations.len(), "Parsed GTFS stops");

    let routes = read_table(&mut archive, "routes.txt", &["route_id"], parse_route)?;
    info!(count = routes.len(), "Parsed GTFS routes");

    let mut trips = read_table(&mut archive, "trips.txt", &["trip_id", "route_id"], parse_trip)?;
    info!(count = trips.len(), "Parsed GTFS trips");

    if names.contains("stop_times.txt") {
        let stop_times = read_table(
            &mut archive,
            "stop_times.txt",
            &["trip_id", "stop_id", "stop_sequence"],
            parse_stop_time,
        )?;
        info!(count = stop_times.len(), "Parsed GTFS stop_times");
        attach_stop_patterns(&mut trips, stop_times);
    }

    let timezone = if names.contains("agency.txt") {
        read_table(&mut archive, "agency.txt", &[], parse_agency_timezone)?
            .into_iter()
            .next()
    } else {
        None
    };

    let snapshot = StaticSnapshot::from_records(stations, routes, trips).with_timezone(timezone);
    info!(
        stations = snapshot.station_count(),
        routes = snapshot.route_count(),
        trips = snapshot.trip_count(),
        timezone = ?snapshot.timezone,
        "Loaded static schedule"
    );
    Ok(snapshot)
}

/// Header positions of one CSV file.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_string(), i))
                .collect(),
        )
    }

    /// Trimmed, non-empty value of `column` in `record`.
    fn get<'r>(&self, record: &'r StringRecord, column: &str) -> Option<&'r str> {
        let idx = *self.0.get(column)?;
        let value = record.get(idx)?.trim();
        if value.is_empty() { None } else { Some(value) }
    }

    fn owned(&self, record: &StringRecord, column: &str) -> Option<String> {
        self.get(record, column).map(str::to_string)
    }

    fn parse<T: std::str::FromStr>(&self, record: &StringRecord, column: &str) -> Option<T> {
        self.get(record, column).and_then(|s| s.parse().ok())
    }

    /// GTFS tri-state flags: 1 is yes, 2 is no, anything else unknown.
    fn flag(&self, record: &StringRecord, column: &str) -> Option<bool> {
        match self.get(record, column) {
            Some("1") => Some(true),
            Some("2") => Some(false),
            _ => None,
        }
    }
}

/// Reads every row of `file`, keeping the rows `row` accepts. Rows it rejects
/// are counted and logged.
fn read_table<R: Read + Seek, T>(
    archive: &mut ZipArchive<R>,
    file: &'static str,
    required: &[&'static str],
    row: fn(&Columns, &StringRecord) -> Option<T>,
) -> Result<Vec<T>, ArchiveInvalidError> {
    let entry = archive.by_name(file).map_err(|e| match e {
        ZipError::FileNotFound => ArchiveInvalidError::MissingFile(file),
        other => ArchiveInvalidError::NotAnArchive(other),
    })?;
    let csv_err = |source| ArchiveInvalidError::Csv { file, source };

    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(entry);
    let columns = Columns::new(rdr.headers().map_err(csv_err)?);
    for &column in required {
        if !columns.0.contains_key(column) {
            return Err(ArchiveInvalidError::MissingColumn { file, column });
        }
    }

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result.map_err(csv_err)?;
        match row(&columns, &record) {
            Some(value) => rows.push(value),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(file, skipped, "Skipped records with missing identifiers");
    }
    Ok(rows)
}

fn parse_stop(c: &Columns, r: &StringRecord) -> Option<Station> {
    let coordinates = match (c.parse(r, "stop_lat"), c.parse(r, "stop_lon")) {
        (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
        _ => None,
    };
    Some(Station {
        stop_id: c.owned(r, "stop_id")?,
        name: c.owned(r, "stop_name"),
        code: c.owned(r, "stop_code"),
        coordinates,
        accessible: c.flag(r, "wheelchair_boarding"),
        description: c.owned(r, "stop_desc"),
        zone_id: c.owned(r, "zone_id"),
        parent_station: c.owned(r, "parent_station"),
        platform_code: c.owned(r, "platform_code"),
    })
}

fn parse_route(c: &Columns, r: &StringRecord) -> Option<Route> {
    Some(Route {
        route_id: c.owned(r, "route_id")?,
        long_name: c.owned(r, "route_long_name"),
        short_name: c.owned(r, "route_short_name"),
        color: c.owned(r, "route_color"),
        text_color: c.owned(r, "route_text_color"),
        route_type: c.parse(r, "route_type"),
        description: c.owned(r, "route_desc"),
        url: c.owned(r, "route_url"),
    })
}

fn parse_trip(c: &Columns, r: &StringRecord) -> Option<ScheduledTrip> {
    Some(ScheduledTrip {
        trip_id: c.owned(r, "trip_id")?,
        route_id: c.owned(r, "route_id")?,
        headsign: c.owned(r, "trip_headsign"),
        short_name: c.owned(r, "trip_short_name"),
        direction_id: c.parse(r, "direction_id"),
        wheelchair_accessible: c.flag(r, "wheelchair_accessible"),
        bikes_allowed: c.flag(r, "bikes_allowed"),
        stop_ids: Vec::new(),
    })
}

struct StopTimeRow {
    trip_id: String,
    stop_id: String,
    stop_sequence: u32,
}

fn parse_stop_time(c: &Columns, r: &StringRecord) -> Option<StopTimeRow> {
    Some(StopTimeRow {
        trip_id: c.owned(r, "trip_id")?,
        stop_id: c.owned(r, "stop_id")?,
        stop_sequence: c.parse(r, "stop_sequence")?,
    })
}

fn parse_agency_timezone(c: &Columns, r: &StringRecord) -> Option<Tz> {
    c.parse(r, "agency_timezone")
}

fn attach_stop_patterns(trips: &mut [ScheduledTrip], stop_times: Vec<StopTimeRow>) {
    let mut by_trip: HashMap<String, Vec<(u32, String)>> = HashMap::new();
    for st in stop_times {
        by_trip
            .entry(st.trip_id)
            .or_default()
            .push((st.stop_sequence, st.stop_id));
    }

    for trip in trips.iter_mut() {
        if let Some(mut pattern) = by_trip.remove(&trip.trip_id) {
            pattern.sort_by_key(|(seq, _)| *seq);
            trip.stop_ids = pattern.into_iter().map(|(_, stop)| stop).collect();
        }
    }

    if !by_trip.is_empty() {
        warn!(
            trips = by_trip.len(),
            "Ignored stop_times for trips not in trips.txt"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    const STOPS: &str = "stop_id,stop_code,stop_name,stop_lat,stop_lon,wheelchair_boarding\n\
                         1,GCT,Grand Central,40.752998,-73.977056,1\n\
                         4,125,Harlem-125 St,40.805157,-73.939149,1\n\
                         ,X,No Id,0,0,\n";
    const ROUTES: &str = "route_id,agency_id,route_short_name,route_long_name,route_type,route_color,route_text_color\n\
                          1,1,,Hudson,2,009B3A,FFFFFF\n";
    const TRIPS: &str = "route_id,service_id,trip_id,trip_headsign,direction_id\n\
                         1,S1,T1,Poughkeepsie,0\n\
                         9,S1,T9,Nowhere,0\n";

    fn build_zip(files: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            for (name, content) in files {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    fn parse(files: &[(&str, &str)]) -> Result<StaticSnapshot, ArchiveInvalidError> {
        parse_archive(Cursor::new(build_zip(files)), &ArchiveLimits::default())
    }

    #[test]
    fn test_parse_minimal_archive() {
        let snapshot = parse(&[
            ("stops.txt", STOPS),
            ("routes.txt", ROUTES),
            ("trips.txt", TRIPS),
        ])
        .unwrap();

        assert_eq!(snapshot.station_count(), 2);
        assert_eq!(snapshot.route_count(), 1);

        let gct = snapshot.station("1").unwrap();
        assert_eq!(gct.name.as_deref(), Some("Grand Central"));
        assert_eq!(gct.code.as_deref(), Some("GCT"));
        assert_eq!(gct.accessible, Some(true));
        assert!(gct.coordinates.is_some());

        let hudson = snapshot.route("1").unwrap();
        assert_eq!(hudson.display_name(), Some("Hudson"));
        assert_eq!(hudson.short_name, None);
        assert_eq!(hudson.route_type, Some(2));

        let trip = snapshot.trip("T1").unwrap();
        assert_eq!(trip.headsign.as_deref(), Some("Poughkeepsie"));
        assert_eq!(trip.direction_id, Some(0));
        assert!(snapshot.timezone.is_none());
    }

    #[test]
    fn test_trip_with_unknown_route_is_dropped() {
        let snapshot = parse(&[
            ("stops.txt", STOPS),
            ("routes.txt", ROUTES),
            ("trips.txt", TRIPS),
        ])
        .unwrap();

        assert!(snapshot.trip("T9").is_none());
        assert_eq!(snapshot.trip_count(), 1);
    }

    #[test]
    fn test_stop_patterns_are_ordered_and_validated() {
        let trips = "route_id,service_id,trip_id\n1,S1,T1\n1,S1,T2\n";
        let stop_times = "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                          T1,08:10:00,08:10:00,4,2\n\
                          T1,08:00:00,08:00:00,1,1\n\
                          T2,09:00:00,09:00:00,1,1\n\
                          T2,09:10:00,09:10:00,77,2\n";
        let snapshot = parse(&[
            ("stops.txt", STOPS),
            ("routes.txt", ROUTES),
            ("trips.txt", trips),
            ("stop_times.txt", stop_times),
        ])
        .unwrap();

        assert_eq!(snapshot.trip("T1").unwrap().stop_ids, vec!["1", "4"]);
        // Stop 77 does not exist
        assert!(snapshot.trip("T2").is_none());
    }

    #[test]
    fn test_agency_timezone() {
        let agency = "agency_id,agency_name,agency_url,agency_timezone\n\
                      1,Metro-North Railroad,https://new.mta.info,America/New_York\n";
        let snapshot = parse(&[
            ("agency.txt", agency),
            ("stops.txt", STOPS),
            ("routes.txt", ROUTES),
            ("trips.txt", TRIPS),
        ])
        .unwrap();
        assert_eq!(snapshot.timezone, Some(chrono_tz::America::New_York));
    }

    #[test]
    fn test_missing_file() {
        let result = parse(&[("stops.txt", STOPS), ("routes.txt", ROUTES)]);
        assert!(matches!(
            result,
            Err(ArchiveInvalidError::MissingFile("trips.txt"))
        ));
    }

    #[test]
    fn test_missing_column() {
        let trips = "service_id,trip_id\nS1,T1\n";
        let result = parse(&[
            ("stops.txt", STOPS),
            ("routes.txt", ROUTES),
            ("trips.txt", trips),
        ]);
        assert!(matches!(
            result,
            Err(ArchiveInvalidError::MissingColumn {
                file: "trips.txt",
                column: "route_id"
            })
        ));
    }

    #[test]
    fn test_not_a_zip() {
        let result = parse_archive(
            Cursor::new(b"<html>maintenance</html>".to_vec()),
            &ArchiveLimits::default(),
        );
        assert!(matches!(result, Err(ArchiveInvalidError::NotAnArchive(_))));
    }

    #[test]
    fn test_decompressed_size_limit() {
        let limits = ArchiveLimits {
            max_download_bytes: 1024 * 1024,
            max_decompressed_bytes: 16,
        };
        let bytes = build_zip(&[
            ("stops.txt", STOPS),
            ("routes.txt", ROUTES),
            ("trips.txt", TRIPS),
        ]);
        let result = parse_archive(Cursor::new(bytes), &limits);
        assert!(matches!(result, Err(ArchiveInvalidError::TooLarge { .. })));
    }

    #[test]
    fn test_decompressed_size_counts_every_entry() {
        let files = [
            ("stops.txt", STOPS),
            ("routes.txt", ROUTES),
            ("trips.txt", TRIPS),
        ];
        let total: u64 = files.iter().map(|(_, c)| c.len() as u64).sum();
        let mut archive = ZipArchive::new(Cursor::new(build_zip(&files))).unwrap();
        assert_eq!(declared_size(&mut archive).unwrap(), total);

        let at_limit = ArchiveLimits {
            max_download_bytes: 1024 * 1024,
            max_decompressed_bytes: total,
        };
        assert!(parse_archive(Cursor::new(build_zip(&files)), &at_limit).is_ok());

        let below = ArchiveLimits {
            max_decompressed_bytes: total - 1,
            ..at_limit
        };
        let result = parse_archive(Cursor::new(build_zip(&files)), &below);
        assert!(matches!(
            result,
            Err(ArchiveInvalidError::TooLarge { size, .. }) if size == total
        ));
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gtfsmnr.zip");
        std::fs::write(&path, b"").unwrap();

        let result = load_archive(&path, &ArchiveLimits::default());
        assert!(matches!(result, Err(ArchiveInvalidError::Empty)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_archive(&dir.path().join("absent.zip"), &ArchiveLimits::default());
        assert!(matches!(result, Err(ArchiveInvalidError::Open { .. })));
    }
}
