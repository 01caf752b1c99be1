pub mod analyzers;
pub mod config;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod infra;
pub mod layout;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod services;
pub mod sources;
pub mod validator;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
