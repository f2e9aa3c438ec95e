//! R-TAG codec
//!
//! The redundancy tag is six bytes, all fields big-endian:
//!
//! ```text
//! +----------------+-----------------+-----------+
//! | EtherType 893D | sequence_number | stream_id |
//! |    2 bytes     |     2 bytes     |  2 bytes  |
//! +----------------+-----------------+-----------+
//! ```
//!
//! Encoding and decoding are pure; decoding never panics on short or
//! foreign input.

use super::{SequenceNumber, StreamId};
use std::fmt;
use thiserror::Error;

/// EtherType identifying an R-TAG
pub const RTAG_ETHERTYPE: u16 = 0x893D;

/// Encoded R-TAG length in bytes
pub const RTAG_LEN: usize = 6;

/// Decoded R-TAG fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RTag {
    pub stream_id: StreamId,
    pub sequence_number: SequenceNumber,
}

/// Why a buffer is not a valid R-TAG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// Fewer than [`RTAG_LEN`] bytes available
    Truncated { len: usize },
    /// First two bytes are not [`RTAG_ETHERTYPE`]
    EtherType { found: u16 },
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::Truncated { len } => {
                write!(f, "{} bytes, need {}", len, RTAG_LEN)
            }
            MalformedReason::EtherType { found } => {
                write!(f, "EtherType 0x{:04X}, expected 0x{:04X}", found, RTAG_ETHERTYPE)
            }
        }
    }
}

/// R-TAG decode failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtagError {
    #[error("malformed R-TAG: {0}")]
    MalformedTag(MalformedReason),
}

/// Encode a tag into its 6-byte wire form
///
/// # Example
/// ```
/// use frertester_core::frame::rtag;
///
/// let bytes = rtag::encode(1, 0x0102);
/// assert_eq!(bytes, [0x89, 0x3D, 0x01, 0x02, 0x00, 0x01]);
/// ```
pub fn encode(stream_id: StreamId, sequence_number: SequenceNumber) -> [u8; RTAG_LEN] {
    let mut buf = [0u8; RTAG_LEN];
    buf[0..2].copy_from_slice(&RTAG_ETHERTYPE.to_be_bytes());
    buf[2..4].copy_from_slice(&sequence_number.to_be_bytes());
    buf[4..6].copy_from_slice(&stream_id.to_be_bytes());
    buf
}

/// Decode the first six bytes of `buf` as an R-TAG
///
/// Trailing bytes are ignored, so `buf` may be the rest of a frame.
pub fn decode(buf: &[u8]) -> Result<RTag, RtagError> {
    if buf.len() < RTAG_LEN {
        return Err(RtagError::MalformedTag(MalformedReason::Truncated {
            len: buf.len(),
        }));
    }

    let ethertype = u16::from_be_bytes([buf[0], buf[1]]);
    if ethertype != RTAG_ETHERTYPE {
        return Err(RtagError::MalformedTag(MalformedReason::EtherType {
            found: ethertype,
        }));
    }

    Ok(RTag {
        sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
        stream_id: u16::from_be_bytes([buf[4], buf[5]]),
    })
}
