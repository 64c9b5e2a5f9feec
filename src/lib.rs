//! Real-time relay for the Metro-North Railroad GTFS feeds.
//!
//! The engine decodes the GTFS-realtime protobuf feed (including the MTA
//! railroad extensions), joins it against the static GTFS schedule, and
//! answers filtered queries while both datasets refresh in the background.

pub mod config;
pub mod decoder;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod model;
pub mod output;
pub mod query;
pub mod realtime;
pub mod scheduler;
pub mod static_data;
pub mod stats;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
