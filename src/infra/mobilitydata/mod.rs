mod client;

pub use client::MobilityDataClient;
