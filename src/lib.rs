pub mod analyzers;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod normalizer;
pub mod output;
pub mod reconciler;
pub mod records;
pub mod schedule;
pub mod store;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
