pub mod campaign;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod output;
pub mod parser;
pub mod poll;
pub mod records;
pub mod schedule;
pub mod upload;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
