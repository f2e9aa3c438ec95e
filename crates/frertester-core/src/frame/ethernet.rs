//! Ethernet frame layout for FRER test traffic
//!
//! ```text
//! | DMAC (6) | SMAC (6) | VLAN (4) | R-TAG (6) | EtherType (2) | Payload |
//! ```
//!
//! The VLAN tag is optional on receive: when the EtherType after SMAC is not
//! 0x8100 the R-TAG is expected directly after SMAC.
//!
//! Generated payloads start with a marker carrying a 32-bit frame counter and
//! the send timestamp (nanoseconds since the Unix epoch), padded with `X`:
//!
//! ```text
//! | "FRER_TEST_" (10) | counter (4) | send_ns (8) | 'X' padding |
//! ```

use super::rtag::{self, RTag, RtagError, RTAG_LEN};
use super::{SequenceNumber, StreamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 802.1Q tag protocol identifier
pub const VLAN_TPID: u16 = 0x8100;

/// EtherType placed after the R-TAG (IEEE local experimental)
pub const INNER_ETHERTYPE: u16 = 0x88B5;

/// Marker identifying a generated test payload
pub const PAYLOAD_MARKER: &[u8; 10] = b"FRER_TEST_";

/// Smallest payload that fits marker, counter and timestamp
pub const MIN_PAYLOAD_SIZE: usize = PAYLOAD_MARKER.len() + 4 + 8;

/// Default payload length in bytes
pub const DEFAULT_PAYLOAD_SIZE: usize = 100;

/// Default VLAN id for generated traffic
pub const DEFAULT_VLAN_ID: u16 = 100;

/// Default PCP (high priority for TSN traffic)
pub const DEFAULT_PRIORITY: u8 = 6;

const MAC_LEN: usize = 6;
const ADDRS_LEN: usize = 2 * MAC_LEN;
const VLAN_TAG_LEN: usize = 4;
const COUNTER_OFFSET: usize = PAYLOAD_MARKER.len();
const TIMESTAMP_OFFSET: usize = COUNTER_OFFSET + 4;
const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Frame layout errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    Truncated { len: usize },

    #[error(transparent)]
    Tag(#[from] RtagError),

    #[error("payload size {size} below minimum {}", MIN_PAYLOAD_SIZE)]
    PayloadTooSmall { size: usize },

    #[error("invalid MAC address: {0}")]
    InvalidMac(String),
}

/// 48-bit MAC address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; MAC_LEN]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; MAC_LEN]);

    fn from_slice(bytes: &[u8]) -> Self {
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&bytes[..MAC_LEN]);
        Self(mac)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({})", self)
    }
}

impl FromStr for MacAddr {
    type Err = FrameError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FrameError::InvalidMac(s.to_string());
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != MAC_LEN {
            return Err(invalid());
        }
        let mut mac = [0u8; MAC_LEN];
        for (byte, part) in mac.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(mac))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = FrameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// 802.1Q tag control information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanTag {
    /// Priority code point (0-7)
    pub priority: u8,
    /// VLAN identifier (0-4095)
    pub vlan_id: u16,
}

impl VlanTag {
    pub fn tci(self) -> u16 {
        ((self.priority as u16 & 0x7) << 13) | (self.vlan_id & 0x0FFF)
    }

    pub fn from_tci(tci: u16) -> Self {
        Self {
            priority: (tci >> 13) as u8,
            vlan_id: tci & 0x0FFF,
        }
    }
}

/// Addressing shared by every frame of a generated stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub vlan: Option<VlanTag>,
}

/// Pre-built frame with the per-frame fields patched in place
///
/// Building once and patching the sequence number, counter and timestamp
/// keeps the work between reading the clock and transmitting to a few
/// byte copies.
#[derive(Debug, Clone)]
pub struct FrameTemplate {
    bytes: Vec<u8>,
    rtag_offset: usize,
    payload_offset: usize,
}

impl FrameTemplate {
    /// Build a template for `stream_id` with a `payload_size`-byte payload
    pub fn new(
        header: FrameHeader,
        stream_id: StreamId,
        payload_size: usize,
    ) -> Result<Self, FrameError> {
        if payload_size < MIN_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooSmall { size: payload_size });
        }

        let mut bytes =
            Vec::with_capacity(ADDRS_LEN + VLAN_TAG_LEN + RTAG_LEN + 2 + payload_size);
        bytes.extend_from_slice(&header.dst.0);
        bytes.extend_from_slice(&header.src.0);
        if let Some(vlan) = header.vlan {
            bytes.extend_from_slice(&VLAN_TPID.to_be_bytes());
            bytes.extend_from_slice(&vlan.tci().to_be_bytes());
        }

        let rtag_offset = bytes.len();
        bytes.extend_from_slice(&rtag::encode(stream_id, 0));
        bytes.extend_from_slice(&INNER_ETHERTYPE.to_be_bytes());

        let payload_offset = bytes.len();
        bytes.extend_from_slice(PAYLOAD_MARKER);
        bytes.resize(payload_offset + payload_size, b'X');

        Ok(Self {
            bytes,
            rtag_offset,
            payload_offset,
        })
    }

    /// Patch the R-TAG sequence number and the payload frame counter
    pub fn set_sequence(&mut self, sequence_number: SequenceNumber, counter: u32) {
        let seq = self.rtag_offset + 2;
        self.bytes[seq..seq + 2].copy_from_slice(&sequence_number.to_be_bytes());
        let ctr = self.payload_offset + COUNTER_OFFSET;
        self.bytes[ctr..ctr + 4].copy_from_slice(&counter.to_be_bytes());
    }

    /// Write the send timestamp and return the finished frame
    pub fn stamp(&mut self, send_timestamp: DateTime<Utc>) -> &[u8] {
        let nanos = timestamp_to_nanos(send_timestamp);
        let ts = self.payload_offset + TIMESTAMP_OFFSET;
        self.bytes[ts..ts + 8].copy_from_slice(&nanos.to_be_bytes());
        &self.bytes
    }

    /// Current frame bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Fields recovered from a received frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub vlan: Option<VlanTag>,
    pub tag: RTag,
    pub inner_ethertype: Option<u16>,
    /// Generator frame counter, when the payload carries the test marker
    pub counter: Option<u32>,
    /// Generator send timestamp, when the payload carries the test marker
    pub send_timestamp: Option<DateTime<Utc>>,
}

/// Parse a raw Ethernet frame carrying an R-TAG
pub fn parse(buf: &[u8]) -> Result<ParsedFrame, FrameError> {
    if buf.len() < ADDRS_LEN + 2 {
        return Err(FrameError::Truncated { len: buf.len() });
    }

    let dst = MacAddr::from_slice(&buf[0..MAC_LEN]);
    let src = MacAddr::from_slice(&buf[MAC_LEN..ADDRS_LEN]);

    let mut offset = ADDRS_LEN;
    let mut vlan = None;
    if read_u16(buf, offset) == Some(VLAN_TPID) {
        let tci = read_u16(buf, offset + 2).ok_or(FrameError::Truncated { len: buf.len() })?;
        vlan = Some(VlanTag::from_tci(tci));
        offset += VLAN_TAG_LEN;
    }

    let tag = rtag::decode(&buf[offset..])?;
    offset += RTAG_LEN;

    let inner_ethertype = read_u16(buf, offset);
    let payload = buf.get(offset + 2..).unwrap_or(&[]);
    let (counter, send_timestamp) = parse_payload(payload);

    Ok(ParsedFrame {
        dst,
        src,
        vlan,
        tag,
        inner_ethertype,
        counter,
        send_timestamp,
    })
}

fn parse_payload(payload: &[u8]) -> (Option<u32>, Option<DateTime<Utc>>) {
    if payload.len() < MIN_PAYLOAD_SIZE || !payload.starts_with(PAYLOAD_MARKER) {
        return (None, None);
    }
    let counter = payload
        .get(COUNTER_OFFSET..COUNTER_OFFSET + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_be_bytes);
    let send_timestamp = payload
        .get(TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(i64::from_be_bytes)
        .and_then(nanos_to_timestamp);
    (counter, send_timestamp)
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn timestamp_to_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
        .saturating_mul(NANOS_PER_SEC)
        .saturating_add(ts.timestamp_subsec_nanos() as i64)
}

fn nanos_to_timestamp(nanos: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(
        nanos.div_euclid(NANOS_PER_SEC),
        nanos.rem_euclid(NANOS_PER_SEC) as u32,
    )
}
