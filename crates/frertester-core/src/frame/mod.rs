//! Frame model and wire formats
//!
//! - R-TAG encode/decode ([`rtag`])
//! - Ethernet/VLAN layout and test payload ([`ethernet`])

pub mod ethernet;
pub mod rtag;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 16-bit FRER stream identifier carried in the R-TAG
pub type StreamId = u16;

/// 16-bit R-TAG sequence number (wraps modulo 65536)
pub type SequenceNumber = u16;

/// Physical path a frame was captured on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathId(pub u8);

impl PathId {
    pub const A: PathId = PathId(0);
    pub const B: PathId = PathId(1);
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("A"),
            1 => f.write_str("B"),
            n => write!(f, "path-{}", n),
        }
    }
}

/// One observed frame, as handed from capture to the recovery engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: StreamId,
    pub sequence_number: SequenceNumber,
    pub path_id: PathId,
    /// Embedded by the generator at transmission; `None` for foreign traffic
    pub send_timestamp: Option<DateTime<Utc>>,
    /// Stamped by capture
    pub arrival_timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn new(
        stream_id: StreamId,
        sequence_number: SequenceNumber,
        path_id: PathId,
        arrival_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stream_id,
            sequence_number,
            path_id,
            send_timestamp: None,
            arrival_timestamp,
        }
    }

    pub fn with_send_timestamp(mut self, send_timestamp: DateTime<Utc>) -> Self {
        self.send_timestamp = Some(send_timestamp);
        self
    }

    /// Build from a parsed wire frame
    pub fn from_parsed(
        parsed: &ethernet::ParsedFrame,
        path_id: PathId,
        arrival_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            stream_id: parsed.tag.stream_id,
            sequence_number: parsed.tag.sequence_number,
            path_id,
            send_timestamp: parsed.send_timestamp,
            arrival_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_display() {
        assert_eq!(PathId::A.to_string(), "A");
        assert_eq!(PathId::B.to_string(), "B");
        assert_eq!(PathId(7).to_string(), "path-7");
    }

    #[test]
    fn test_path_serializes_as_number() {
        assert_eq!(serde_json::to_string(&PathId::B).unwrap(), "1");
    }
}
