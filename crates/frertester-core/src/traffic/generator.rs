//! Paced generator for one stream
//!
//! Frames are built once from a template; per frame only the sequence
//! number, payload counter and send timestamp are patched. The timestamp is
//! read from the clock immediately before the frame is handed to the sink.

use crate::clock::Clock;
use crate::frame::ethernet::{
    FrameError, FrameHeader, FrameTemplate, MacAddr, VlanTag, DEFAULT_PAYLOAD_SIZE,
    DEFAULT_PRIORITY, DEFAULT_VLAN_ID,
};
use crate::frame::{SequenceNumber, StreamId};
use crate::shutdown::{self, ShutdownReceiver};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};

/// Frames between progress log lines
const PROGRESS_EVERY: u64 = 100;

/// Transmission failure
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where generated frames go (network interface, socket, simulated wire)
pub trait TransmitSink: Send {
    fn transmit(&mut self, frame: Vec<u8>) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// When a generator run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLimit {
    /// Fixed number of frames
    Count(u64),
    /// Fixed wall time, in milliseconds
    Duration(#[serde(with = "crate::duration_ms")] Duration),
    /// Until shutdown
    Unbounded,
}

impl Default for RunLimit {
    fn default() -> Self {
        RunLimit::Count(1000)
    }
}

fn default_rate() -> f64 {
    1000.0
}

fn default_vlan() -> Option<VlanTag> {
    Some(VlanTag {
        priority: DEFAULT_PRIORITY,
        vlan_id: DEFAULT_VLAN_ID,
    })
}

fn default_src_mac() -> MacAddr {
    // Locally administered unicast
    MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01])
}

fn default_dst_mac() -> MacAddr {
    MacAddr::BROADCAST
}

fn default_payload_size() -> usize {
    DEFAULT_PAYLOAD_SIZE
}

/// Generator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub stream_id: StreamId,
    /// Frames per second
    #[serde(default = "default_rate")]
    pub rate_fps: f64,
    #[serde(default)]
    pub limit: RunLimit,
    /// First sequence number; later ones wrap modulo 65536
    #[serde(default)]
    pub base_sequence: SequenceNumber,
    /// 802.1Q tag, `None` for untagged frames
    #[serde(default = "default_vlan")]
    pub vlan: Option<VlanTag>,
    #[serde(default = "default_src_mac")]
    pub src_mac: MacAddr,
    #[serde(default = "default_dst_mac")]
    pub dst_mac: MacAddr,
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
}

impl GeneratorConfig {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            rate_fps: default_rate(),
            limit: RunLimit::default(),
            base_sequence: 0,
            vlan: default_vlan(),
            src_mac: default_src_mac(),
            dst_mac: default_dst_mac(),
            payload_size: default_payload_size(),
        }
    }

    pub fn with_rate(mut self, rate_fps: f64) -> Self {
        self.rate_fps = rate_fps;
        self
    }

    pub fn with_limit(mut self, limit: RunLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_base_sequence(mut self, base: SequenceNumber) -> Self {
        self.base_sequence = base;
        self
    }
}

/// Outcome of a generator run, complete or partial
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratorReport {
    pub stream_id: StreamId,
    /// Frames actually handed to the sink
    pub sent: u64,
    #[serde(rename = "elapsed_ms", with = "crate::duration_ms")]
    pub elapsed: Duration,
    /// Achieved frames per second
    pub actual_rate: f64,
    pub first_sequence: Option<SequenceNumber>,
    pub last_sequence: Option<SequenceNumber>,
    /// Stopped by the shutdown signal before reaching its limit
    pub cancelled: bool,
}

/// Generator errors
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("transmission sink unavailable after {} frames: {source}", .report.sent)]
    SinkUnavailable {
        report: GeneratorReport,
        #[source]
        source: SinkError,
    },

    #[error("invalid generator config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl GeneratorError {
    /// Partial-run statistics, when frames may have been sent
    pub fn report(&self) -> Option<&GeneratorReport> {
        match self {
            GeneratorError::SinkUnavailable { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Emits frames for one stream at a fixed rate
#[derive(Debug)]
pub struct FrameGenerator {
    config: GeneratorConfig,
    template: FrameTemplate,
    interval: Duration,
}

impl FrameGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, GeneratorError> {
        if !config.rate_fps.is_finite() || config.rate_fps <= 0.0 {
            return Err(GeneratorError::InvalidConfig(format!(
                "rate must be a positive number of frames per second, got {}",
                config.rate_fps
            )));
        }
        let interval = Duration::try_from_secs_f64(1.0 / config.rate_fps)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| {
                GeneratorError::InvalidConfig(format!("rate {} is too high", config.rate_fps))
            })?;
        if let RunLimit::Duration(duration) = config.limit {
            if duration.is_zero() {
                return Err(GeneratorError::InvalidConfig(
                    "duration must be positive".to_string(),
                ));
            }
        }

        let header = FrameHeader {
            dst: config.dst_mac,
            src: config.src_mac,
            vlan: config.vlan,
        };
        let template = FrameTemplate::new(header, config.stream_id, config.payload_size)?;

        Ok(Self {
            config,
            template,
            interval,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Nominal inter-frame interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Emit frames until the limit is reached or shutdown is requested
    ///
    /// A sink failure aborts the run; the error carries the partial report.
    pub async fn run<S, C>(
        &mut self,
        sink: &mut S,
        clock: &C,
        mut shutdown: ShutdownReceiver,
    ) -> Result<GeneratorReport, GeneratorError>
    where
        S: TransmitSink,
        C: Clock + ?Sized,
    {
        let stream_id = self.config.stream_id;
        tracing::info!(
            stream_id,
            rate_fps = self.config.rate_fps,
            limit = ?self.config.limit,
            base_seq = self.config.base_sequence,
            "generator_started"
        );

        let started = Instant::now();
        let deadline = match self.config.limit {
            RunLimit::Duration(duration) => Some(started + duration),
            _ => None,
        };
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let mut seq = self.config.base_sequence;
        let mut sent: u64 = 0;
        let mut last_sequence = None;
        let mut cancelled = false;

        loop {
            if let RunLimit::Count(count) = self.config.limit {
                if sent >= count {
                    break;
                }
            }

            tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown) => {
                    cancelled = true;
                    break;
                }
                tick = ticker.tick() => {
                    if deadline.is_some_and(|deadline| tick >= deadline) {
                        break;
                    }
                }
            }

            // Counter in the payload is the running frame index
            self.template.set_sequence(seq, sent as u32);
            let frame = self.template.stamp(clock.now()).to_vec();
            if let Err(source) = sink.transmit(frame).await {
                let report = self.report(sent, started.elapsed(), last_sequence, cancelled);
                tracing::error!(stream_id, sent, error = %source, "generator_sink_failed");
                return Err(GeneratorError::SinkUnavailable { report, source });
            }

            last_sequence = Some(seq);
            sent += 1;
            seq = seq.wrapping_add(1);

            if sent % PROGRESS_EVERY == 0 {
                let elapsed = started.elapsed().as_secs_f64();
                let rate = if elapsed > 0.0 { sent as f64 / elapsed } else { 0.0 };
                tracing::info!(stream_id, sent, rate, seq, "generator_progress");
            }
        }

        let report = self.report(sent, started.elapsed(), last_sequence, cancelled);
        tracing::info!(
            stream_id,
            sent = report.sent,
            elapsed_ms = report.elapsed.as_millis() as u64,
            actual_rate = report.actual_rate,
            cancelled,
            "generator_finished"
        );
        Ok(report)
    }

    fn report(
        &self,
        sent: u64,
        elapsed: Duration,
        last_sequence: Option<SequenceNumber>,
        cancelled: bool,
    ) -> GeneratorReport {
        let secs = elapsed.as_secs_f64();
        GeneratorReport {
            stream_id: self.config.stream_id,
            sent,
            elapsed,
            actual_rate: if secs > 0.0 { sent as f64 / secs } else { 0.0 },
            first_sequence: (sent > 0).then_some(self.config.base_sequence),
            last_sequence,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{MonotonicClock, SystemClock};
    use crate::frame::ethernet::parse;
    use chrono::{DateTime, Utc};

    /// Collects frames; fails after `fail_after` frames when set
    #[derive(Default)]
    struct VecSink {
        frames: Vec<Vec<u8>>,
        fail_after: Option<usize>,
    }

    impl TransmitSink for VecSink {
        async fn transmit(&mut self, frame: Vec<u8>) -> Result<(), SinkError> {
            if self.fail_after.is_some_and(|n| self.frames.len() >= n) {
                return Err(SinkError::Unavailable("link down".to_string()));
            }
            self.frames.push(frame);
            Ok(())
        }
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_rejects_bad_rate() {
        for rate in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let config = GeneratorConfig::new(1).with_rate(rate);
            assert!(matches!(
                FrameGenerator::new(config),
                Err(GeneratorError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_rejects_small_payload() {
        let mut config = GeneratorConfig::new(1);
        config.payload_size = 8;
        assert!(matches!(
            FrameGenerator::new(config),
            Err(GeneratorError::Frame(FrameError::PayloadTooSmall { size: 8 }))
        ));
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: GeneratorConfig = serde_json::from_str(r#"{"stream_id": 4}"#).unwrap();
        assert_eq!(config, GeneratorConfig::new(4));

        let config: GeneratorConfig =
            serde_json::from_str(r#"{"stream_id": 4, "limit": {"duration": 2500}}"#).unwrap();
        assert_eq!(config.limit, RunLimit::Duration(Duration::from_millis(2500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_limit_and_wraparound() {
        let config = GeneratorConfig::new(3)
            .with_rate(100.0)
            .with_base_sequence(65534)
            .with_limit(RunLimit::Count(4));
        let mut generator = FrameGenerator::new(config).unwrap();
        let (_tx, rx) = shutdown::channel();
        let mut sink = VecSink::default();

        let report = generator
            .run(&mut sink, &MonotonicClock::anchored_at(epoch()), rx)
            .await
            .unwrap();

        assert_eq!(report.sent, 4);
        assert_eq!(report.first_sequence, Some(65534));
        assert_eq!(report.last_sequence, Some(1));
        assert!(!report.cancelled);

        let seqs: Vec<u16> = sink
            .frames
            .iter()
            .map(|f| parse(f).unwrap().tag.sequence_number)
            .collect();
        assert_eq!(seqs, vec![65534, 65535, 0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timestamps_follow_pacing() {
        let config = GeneratorConfig::new(1)
            .with_rate(100.0)
            .with_limit(RunLimit::Count(3));
        let mut generator = FrameGenerator::new(config).unwrap();
        let (_tx, rx) = shutdown::channel();
        let mut sink = VecSink::default();

        generator
            .run(&mut sink, &MonotonicClock::anchored_at(epoch()), rx)
            .await
            .unwrap();

        let stamps: Vec<_> = sink
            .frames
            .iter()
            .map(|f| parse(f).unwrap().send_timestamp.unwrap())
            .collect();
        assert_eq!(stamps[0], epoch());
        assert_eq!((stamps[2] - stamps[0]).num_milliseconds(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_limit() {
        let config = GeneratorConfig::new(1)
            .with_rate(100.0)
            .with_limit(RunLimit::Duration(Duration::from_secs(1)));
        let mut generator = FrameGenerator::new(config).unwrap();
        let (_tx, rx) = shutdown::channel();
        let mut sink = VecSink::default();

        let report = generator.run(&mut sink, &SystemClock, rx).await.unwrap();
        assert_eq!(report.sent, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_reports_partial_run() {
        let config = GeneratorConfig::new(1).with_limit(RunLimit::Count(10));
        let mut generator = FrameGenerator::new(config).unwrap();
        let (_tx, rx) = shutdown::channel();
        let mut sink = VecSink {
            fail_after: Some(3),
            ..VecSink::default()
        };

        let err = generator.run(&mut sink, &SystemClock, rx).await.unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.last_sequence, Some(2));
        assert!(err.to_string().contains("after 3 frames"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_unbounded_run() {
        let config = GeneratorConfig::new(1)
            .with_rate(100.0)
            .with_limit(RunLimit::Unbounded);
        let mut generator = FrameGenerator::new(config).unwrap();
        let (tx, rx) = shutdown::channel();
        let mut sink = VecSink::default();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(95)).await;
            let _ = tx.send(true);
        });
        let report = generator.run(&mut sink, &SystemClock, rx).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.sent, 10);
    }
}
