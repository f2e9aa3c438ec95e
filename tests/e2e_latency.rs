//! E2E latency tests
//!
//! Frames carry their send time in the payload; arrival times come from
//! source-supplied timestamps, so every latency below is known exactly.

use approx::assert_relative_eq;
use chrono::{DateTime, TimeDelta, Utc};
use frertester::frame::ethernet::{FrameHeader, FrameTemplate, MacAddr};
use frertester::pipeline::{intake_channel, IntakeEvent};
use frertester::shutdown;
use frertester::traffic::{CaptureSource, CapturedBytes, DualPathCapture, SourceError};
use frertester::{
    Frame, ManualClock, PathId, RecoveryEngine, RecoveryPipeline, Report, ReportExporter,
    StreamConfig,
};
use std::collections::VecDeque;
use std::sync::Arc;

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Replays pre-stamped frames, then ends
struct StampedSource {
    frames: VecDeque<CapturedBytes>,
}

impl CaptureSource for StampedSource {
    async fn next_frame(&mut self) -> Result<Option<CapturedBytes>, SourceError> {
        Ok(self.frames.pop_front())
    }
}

/// `count` frames sent 1 ms apart, arriving `delay_us` later
fn stamped(count: u16, delay_us: i64) -> StampedSource {
    let header = FrameHeader {
        dst: MacAddr::BROADCAST,
        src: MacAddr::default(),
        vlan: None,
    };
    let mut template = FrameTemplate::new(header, 1, 64).unwrap();
    let frames = (0..count)
        .map(|seq| {
            let sent = epoch() + TimeDelta::milliseconds(i64::from(seq));
            template.set_sequence(seq, u32::from(seq));
            let mut captured = CapturedBytes::new(template.stamp(sent).to_vec());
            captured.timestamp = Some(sent + TimeDelta::microseconds(delay_us));
            captured
        })
        .collect();
    StampedSource { frames }
}

async fn run(a: StampedSource, b: StampedSource) -> Report {
    let mut engine = RecoveryEngine::new();
    engine.register_stream(StreamConfig::new(1)).unwrap();

    let (intake_tx, intake_rx) = intake_channel();
    let (_shutdown_tx, shutdown_rx) = shutdown::channel();
    let (_handle, pipeline) =
        RecoveryPipeline::new(engine, epoch()).spawn(intake_rx, shutdown_rx.clone());

    let clock = Arc::new(ManualClock::new(epoch()));
    let capture = DualPathCapture::spawn(a, b, clock.clone(), intake_tx, shutdown_rx, None);
    for result in capture.join().await {
        result.unwrap();
    }

    let snapshot = pipeline.await.unwrap();
    ReportExporter::new(clock).render(&snapshot)
}

#[tokio::test]
async fn test_constant_latency_lands_in_one_bucket() {
    let report = run(stamped(500, 100), stamped(0, 0)).await;
    let stream = report.stream(1).unwrap();

    assert_eq!(stream.accepted_count, 500);
    let histogram = &stream.latency_histogram;
    assert_eq!(histogram.count, 500);
    assert_eq!(histogram.min_us, Some(100.0));
    assert_eq!(histogram.max_us, Some(100.0));
    assert_relative_eq!(histogram.mean_us.unwrap(), 100.0);
    for bucket in &histogram.buckets {
        let expected = if bucket.le_us == 100 { 500 } else { 0 };
        assert_eq!(bucket.count, expected, "bucket le {}", bucket.le_us);
    }
    assert_eq!(histogram.overflow, 0);
}

#[test]
fn test_histogram_tracks_winning_copy() {
    let mut engine = RecoveryEngine::new();
    engine.register_stream(StreamConfig::new(1)).unwrap();
    let mut pipeline = RecoveryPipeline::new(engine, epoch());

    // B is faster and always arrives first; A's copies are duplicates
    for seq in 0..200u16 {
        let sent = epoch() + TimeDelta::milliseconds(i64::from(seq));
        for (path, delay_us) in [(PathId::B, 40), (PathId::A, 750)] {
            let frame = Frame::new(1, seq, path, sent + TimeDelta::microseconds(delay_us))
                .with_send_timestamp(sent);
            pipeline.process(IntakeEvent::Frame(frame));
        }
    }

    let report = ReportExporter::new(Arc::new(ManualClock::new(epoch()))).render(&pipeline.snapshot());
    let stream = report.stream(1).unwrap();
    assert_eq!(stream.latency_histogram.min_us, Some(40.0));
    assert_eq!(stream.latency_histogram.max_us, Some(40.0));
    let bucket_50 = stream
        .latency_histogram
        .buckets
        .iter()
        .find(|b| b.le_us == 50)
        .unwrap();
    assert_eq!(bucket_50.count, 200);

    // Per-path statistics still see every frame
    assert_eq!(stream.paths[&PathId::A].latency.count, 200);
    assert_relative_eq!(stream.paths[&PathId::A].latency.mean_us.unwrap(), 750.0);
}

#[tokio::test]
async fn test_overflow_bucket() {
    let report = run(stamped(10, 25_000), stamped(0, 0)).await;
    let histogram = &report.stream(1).unwrap().latency_histogram;
    assert_eq!(histogram.overflow, 10);
    assert!(histogram.buckets.iter().all(|b| b.count == 0));
}

#[test]
fn test_arrival_before_send_is_clock_skew() {
    let mut engine = RecoveryEngine::new();
    engine.register_stream(StreamConfig::new(1)).unwrap();
    let mut pipeline = RecoveryPipeline::new(engine, epoch());

    let early = Frame::new(1, 0, PathId::A, epoch())
        .with_send_timestamp(epoch() + TimeDelta::microseconds(30));
    pipeline.process(IntakeEvent::Frame(early));

    let snapshot = pipeline.snapshot();
    let stream = snapshot.stream(1).unwrap();
    assert_eq!(stream.clock_skew_count, 1);
    assert_eq!(snapshot.totals.clock_skew_frames, 1);
    assert_eq!(stream.latency.summary().min(), Some(std::time::Duration::ZERO));
}
