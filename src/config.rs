//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

/// MTA Metro-North Railroad GTFS-realtime endpoint.
pub const DEFAULT_REALTIME_URL: &str =
    "https://api-endpoint.mta.info/Dataservice/mtagtfsfeeds/mnr%2Fgtfs-mnr";

/// MTA Metro-North Railroad static GTFS archive.
pub const DEFAULT_STATIC_URL: &str = "https://rrgtfsfeeds.s3.amazonaws.com/gtfsmnr.zip";

/// Minimum time between static archive downloads: 24 hours.
pub const DEFAULT_STATIC_MIN_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum accepted real-time payload (50 MB).
pub const DEFAULT_MAX_FEED_BYTES: u64 = 50 * 1024 * 1024;

/// Maximum accepted static archive download (500 MB).
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 500 * 1024 * 1024;

/// Maximum total decompressed size of the static archive (2 GB).
pub const DEFAULT_MAX_DECOMPRESSED_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Size limits applied to a static archive before it is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_download_bytes: u64,
    pub max_decompressed_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_download_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            max_decompressed_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
        }
    }
}

/// Everything the engine needs to know about its sources and schedules.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub realtime_url: String,
    pub static_url: String,
    /// Sent as the `x-api-key` header on both sources when set.
    pub api_key: Option<String>,
    /// Holds the downloaded archive and the persisted download state.
    pub data_dir: PathBuf,
    pub static_min_interval: Duration,
    /// How often the scheduler asks the static store whether a download is due.
    pub static_check_interval: Duration,
    pub realtime_interval: Duration,
    pub realtime_timeout: Duration,
    pub static_timeout: Duration,
    pub max_feed_bytes: u64,
    pub archive_limits: ArchiveLimits,
    /// Used for time-of-day filters when the archive has no `agency.txt`.
    pub timezone: Tz,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            static_url: DEFAULT_STATIC_URL.to_string(),
            api_key: None,
            data_dir: PathBuf::from("gtfs/metro-north-railroad"),
            static_min_interval: DEFAULT_STATIC_MIN_INTERVAL,
            static_check_interval: Duration::from_secs(60 * 60),
            realtime_interval: Duration::from_secs(30),
            realtime_timeout: Duration::from_secs(30),
            static_timeout: Duration::from_secs(60),
            max_feed_bytes: DEFAULT_MAX_FEED_BYTES,
            archive_limits: ArchiveLimits::default(),
            timezone: chrono_tz::America::New_York,
        }
    }
}

impl EngineConfig {
    /// Where the last good static archive lives.
    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join("gtfsmnr.zip")
    }

    /// Where the last successful download time is persisted.
    pub fn download_state_path(&self) -> PathBuf {
        self.data_dir.join("last_download.json")
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_static_min_interval(mut self, interval: Duration) -> Self {
        self.static_min_interval = interval;
        self
    }

    pub fn with_realtime_interval(mut self, interval: Duration) -> Self {
        self.realtime_interval = interval;
        self
    }

    pub fn with_realtime_timeout(mut self, timeout: Duration) -> Self {
        self.realtime_timeout = timeout;
        self
    }

    pub fn with_static_timeout(mut self, timeout: Duration) -> Self {
        self.static_timeout = timeout;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_data_dir() {
        let config = EngineConfig::default().with_data_dir("/tmp/relay");
        assert_eq!(config.archive_path(), PathBuf::from("/tmp/relay/gtfsmnr.zip"));
        assert_eq!(
            config.download_state_path(),
            PathBuf::from("/tmp/relay/last_download.json")
        );
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let config = EngineConfig::default().with_api_key(Some(String::new()));
        assert!(config.api_key.is_none());
    }
}
