//! Per-frame metric samples and their aggregation
//!
//! - [`MetricSample`]: one record per observed frame
//! - [`histogram`]: fixed-bucket latency histogram
//! - [`aggregator`]: per-stream counters, loss accounting and failover detection

pub mod aggregator;
pub mod histogram;

use crate::frame::{Frame, PathId, SequenceNumber, StreamId};
use crate::recovery::{Decision, Verdict};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Derived record of one recovery decision
///
/// Built once per observed frame and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub stream_id: StreamId,
    pub path_id: PathId,
    pub sequence_number: SequenceNumber,
    /// `arrival - send`; `None` when the frame carried no send timestamp
    pub latency: Option<Duration>,
    pub decision: Decision,
    /// Arrival time of the frame
    pub timestamp: DateTime<Utc>,
    /// Send timestamp was later than arrival; latency clamped to zero
    pub clock_skew: bool,
    /// Recovery history was reset before this frame
    pub reset: bool,
    /// Signed sequence advance of an accepted frame
    pub advance: Option<i32>,
}

impl MetricSample {
    pub fn new(frame: &Frame, verdict: &Verdict) -> Self {
        let (latency, clock_skew) = match frame.send_timestamp {
            Some(sent) => match (frame.arrival_timestamp - sent).to_std() {
                Ok(latency) => (Some(latency), false),
                Err(_) => (Some(Duration::ZERO), true),
            },
            None => (None, false),
        };

        if clock_skew {
            tracing::debug!(
                stream_id = frame.stream_id,
                seq = frame.sequence_number,
                path = %frame.path_id,
                "clock_skew"
            );
        }

        Self {
            stream_id: frame.stream_id,
            path_id: frame.path_id,
            sequence_number: frame.sequence_number,
            latency,
            decision: verdict.decision,
            timestamp: frame.arrival_timestamp,
            clock_skew,
            reset: verdict.reset,
            advance: verdict.advance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::offset;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn accepted() -> Verdict {
        Verdict {
            decision: Decision::Accepted,
            reset: false,
            advance: Some(1),
        }
    }

    #[test]
    fn test_latency_from_timestamps() {
        let frame = Frame::new(1, 2, PathId::A, offset(epoch(), Duration::from_micros(150)))
            .with_send_timestamp(epoch());
        let sample = MetricSample::new(&frame, &accepted());
        assert_eq!(sample.latency, Some(Duration::from_micros(150)));
        assert!(!sample.clock_skew);
        assert_eq!(sample.advance, Some(1));
    }

    #[test]
    fn test_negative_latency_clamped_and_flagged() {
        let frame = Frame::new(1, 2, PathId::B, epoch())
            .with_send_timestamp(offset(epoch(), Duration::from_millis(1)));
        let sample = MetricSample::new(&frame, &accepted());
        assert_eq!(sample.latency, Some(Duration::ZERO));
        assert!(sample.clock_skew);
    }

    #[test]
    fn test_foreign_frame_has_no_latency() {
        let frame = Frame::new(1, 2, PathId::A, epoch());
        let sample = MetricSample::new(&frame, &accepted());
        assert_eq!(sample.latency, None);
        assert!(!sample.clock_skew);
    }
}
