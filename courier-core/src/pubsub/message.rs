//! Inbound message record

use chrono::Utc;
use std::fmt;
use std::time::Instant;

/// A message waiting for, or undergoing, dispatch.
///
/// The payload is opaque to the core. Records are created at ingestion
/// (transport sink or local publish) and dropped after one dispatch pass.
#[derive(Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel name the message was published on
    pub channel: String,

    /// Raw payload bytes
    pub payload: Vec<u8>,

    /// Monotonic receive time
    pub received_at: Instant,

    /// Wall-clock receive time, microseconds since the Unix epoch
    pub utime: i64,

    /// Sequence number assigned by the inbound queue (0 until enqueued)
    pub seq: u64,
}

impl InboundMessage {
    /// Create a new message stamped with the current time
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            received_at: Instant::now(),
            utime: Utc::now().timestamp_micros(),
            seq: 0,
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("channel", &self.channel)
            .field("size", &self.payload.len())
            .field("utime", &self.utime)
            .field("seq", &self.seq)
            .finish()
    }
}
