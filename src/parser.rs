//! Protobuf parser for GTFS Realtime snapshots.

use prost::Message;

use crate::gtfs_rt::FeedMessage;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, prost::DecodeError> {
    FeedMessage::decode(bytes)
}

/// Producer timestamp of a snapshot in milliseconds, if the header has one.
pub fn snapshot_millis(feed: &FeedMessage) -> Option<u64> {
    feed.header
        .timestamp
        .filter(|secs| *secs > 0)
        .map(|secs| secs.saturating_mul(1000))
}
