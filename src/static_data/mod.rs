//! Static GTFS schedule: archive parsing, download, rate limiting and the
//! published snapshot.

mod archive;
mod download;
mod policy;
mod store;

pub use archive::{REQUIRED_FILES, StaticSnapshot, load_archive, parse_archive};
pub use download::{DownloadState, DownloadStateFile};
pub use policy::RefreshPolicy;
pub use store::{StaticDatasetStore, StaticRefreshOutcome};
