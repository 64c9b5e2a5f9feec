//! Error types for the ingestion, refresh and query paths.
//!
//! None of these are fatal to the engine: a failed refresh leaves the last
//! published snapshot serving queries.

use std::path::PathBuf;
use std::time::Duration;

use crate::query::Unavailable;

/// A real-time payload that could not be turned into records.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The header carries no schema version.
    #[error("feed header is missing or has no gtfs_realtime_version")]
    MissingHeader,

    /// The header names a schema major version we do not understand.
    #[error("unsupported gtfs_realtime_version {0:?}")]
    UnsupportedVersion(String),

    /// The protobuf payload is truncated or otherwise malformed.
    #[error("malformed feed payload: {0}")]
    Malformed(#[from] prost::DecodeError),
}

/// Transport-level failure while fetching bytes from a source.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// HTTP request failed (connection, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured URL could not be parsed.
    #[error("invalid URL {url:?}: {message}")]
    InvalidUrl { url: String, message: String },

    /// The configured API key cannot be sent as a header value.
    #[error("invalid API key header: {0}")]
    InvalidHeader(String),

    /// The server answered with a non-success status.
    #[error("server returned status {status}")]
    Status { status: u16 },

    /// The fetch did not complete within its timeout.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The payload exceeded the configured size limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
}

/// A static archive that does not have the expected contents.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveInvalidError {
    #[error("archive is empty")]
    Empty,

    #[error("not a readable zip archive: {0}")]
    NotAnArchive(zip::result::ZipError),

    #[error("archive is missing {0}")]
    MissingFile(&'static str),

    #[error("{file} is missing required column {column}")]
    MissingColumn {
        file: &'static str,
        column: &'static str,
    },

    #[error("archive decompresses to {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("failed to read {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a refresh of either dataset was abandoned.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    ArchiveInvalid(#[from] ArchiveInvalidError),

    /// Writing the archive to disk failed.
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking parse task panicked or was cancelled.
    #[error("archive parse task failed: {0}")]
    Task(String),
}

impl RefreshError {
    /// Short machine-readable label, used in logs and refresh statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::Download(DownloadError::Timeout(_)) => "timeout",
            RefreshError::Download(_) => "download_error",
            RefreshError::Decode(_) => "decode_error",
            RefreshError::ArchiveInvalid(_) => "archive_invalid",
            RefreshError::Io { .. } => "io_error",
            RefreshError::Task(_) => "task_error",
        }
    }
}

/// Errors from the query surface. Listings never fail; only lookups of a
/// specific record and filter construction do.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("no train with trip id {0:?}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(Unavailable),

    #[error("invalid time of day {0:?}, expected HH:MM")]
    InvalidTimeOfDay(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = QueryError::NotFound("T1".into());
        assert_eq!(err.to_string(), "no train with trip id \"T1\"");

        let err = DownloadError::Status { status: 503 };
        assert_eq!(err.to_string(), "server returned status 503");

        let err = ArchiveInvalidError::MissingColumn {
            file: "trips.txt",
            column: "route_id",
        };
        assert_eq!(err.to_string(), "trips.txt is missing required column route_id");
    }

    #[test]
    fn refresh_error_kind() {
        let err = RefreshError::from(DownloadError::Timeout(Duration::from_secs(30)));
        assert_eq!(err.kind(), "timeout");

        let err = RefreshError::from(DecodeError::MissingHeader);
        assert_eq!(err.kind(), "decode_error");

        let err = RefreshError::from(ArchiveInvalidError::Empty);
        assert_eq!(err.kind(), "archive_invalid");
    }
}
