//! Versioned report for external dashboards
//!
//! [`Report`] is a pure transformation of an [`AggregateSnapshot`]. The
//! [`ReportExporter`] produces one on demand or on a fixed interval and hands
//! it to a [`ReportSink`]. Bump [`REPORT_SCHEMA_VERSION`] whenever a field is
//! renamed or removed; adding fields keeps the version.

use crate::clock::{Clock, SystemClock};
use crate::frame::{PathId, StreamId};
use crate::metrics::aggregator::{
    AggregateSnapshot, FailoverEvent, PathMetrics, StreamMetrics, TotalCounters,
};
use crate::metrics::histogram::{LatencyHistogram, LatencySummary};
use crate::pipeline::{PipelineError, PipelineHandle};
use crate::shutdown::{self, ShutdownReceiver};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Current report schema version
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Point-in-time statistics of every stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub streams: Vec<StreamReport>,
    pub totals: TotalsReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReport {
    pub stream_id: StreamId,
    pub accepted_count: u64,
    pub duplicate_count: u64,
    pub out_of_window_count: u64,
    pub total_count: u64,
    /// duplicate / (accepted + duplicate)
    pub duplicate_rate: f64,
    pub latency_histogram: HistogramReport,
    /// Accepted frames per path id
    pub path_utilization: BTreeMap<PathId, u64>,
    pub paths: BTreeMap<PathId, PathReport>,
    pub failover_events: Vec<FailoverEventReport>,
    pub loss: LossReport,
    pub reset_count: u64,
    pub clock_skew_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramReport {
    /// Upper-bound-inclusive buckets, ascending
    pub buckets: Vec<BucketReport>,
    /// Latencies above the last bucket
    pub overflow: u64,
    pub count: u64,
    pub min_us: Option<f64>,
    pub mean_us: Option<f64>,
    pub max_us: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketReport {
    pub le_us: u64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathReport {
    pub received: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub out_of_window: u64,
    pub latency: LatencyStatsReport,
    pub last_arrival: Option<DateTime<Utc>>,
    pub down: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStatsReport {
    pub count: u64,
    pub min_us: Option<f64>,
    pub mean_us: Option<f64>,
    pub max_us: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEventReport {
    pub start_time: DateTime<Utc>,
    /// Microseconds
    pub duration: u64,
    /// `null` for a whole-stream gap
    pub failed_path: Option<PathId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    pub sequence_gaps: u64,
    pub missing: u64,
    pub loss_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsReport {
    pub frames_observed: u64,
    pub malformed_frames: u64,
    pub malformed_by_path: BTreeMap<PathId, u64>,
    pub unknown_stream_frames: u64,
    pub clock_skew_frames: u64,
}

fn micros(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000.0
}

impl From<&LatencyHistogram> for HistogramReport {
    fn from(histogram: &LatencyHistogram) -> Self {
        let summary = histogram.summary();
        Self {
            buckets: histogram
                .buckets()
                .map(|(le_us, count)| BucketReport { le_us, count })
                .collect(),
            overflow: histogram.overflow(),
            count: summary.count(),
            min_us: summary.min().map(micros),
            mean_us: summary.mean().map(micros),
            max_us: summary.max().map(micros),
        }
    }
}

impl From<&LatencySummary> for LatencyStatsReport {
    fn from(summary: &LatencySummary) -> Self {
        Self {
            count: summary.count(),
            min_us: summary.min().map(micros),
            mean_us: summary.mean().map(micros),
            max_us: summary.max().map(micros),
        }
    }
}

impl From<&PathMetrics> for PathReport {
    fn from(path: &PathMetrics) -> Self {
        Self {
            received: path.received,
            accepted: path.accepted,
            duplicates: path.duplicates,
            out_of_window: path.out_of_window,
            latency: (&path.latency).into(),
            last_arrival: path.last_arrival,
            down: path.down,
        }
    }
}

impl From<&FailoverEvent> for FailoverEventReport {
    fn from(event: &FailoverEvent) -> Self {
        Self {
            start_time: event.start_time,
            duration: event.duration.as_micros().min(u64::MAX as u128) as u64,
            failed_path: event.failed_path,
        }
    }
}

impl From<&StreamMetrics> for StreamReport {
    fn from(stream: &StreamMetrics) -> Self {
        Self {
            stream_id: stream.stream_id,
            accepted_count: stream.accepted,
            duplicate_count: stream.duplicates,
            out_of_window_count: stream.out_of_window,
            total_count: stream.total,
            duplicate_rate: stream.duplicate_rate(),
            latency_histogram: (&stream.latency).into(),
            path_utilization: stream
                .paths
                .iter()
                .map(|(id, path)| (*id, path.accepted))
                .collect(),
            paths: stream
                .paths
                .iter()
                .map(|(id, path)| (*id, path.into()))
                .collect(),
            failover_events: stream.failover_events.iter().map(Into::into).collect(),
            loss: LossReport {
                sequence_gaps: stream.sequence_gaps,
                missing: stream.missing,
                loss_rate: stream.loss_rate(),
            },
            reset_count: stream.reset_count,
            clock_skew_count: stream.clock_skew_count,
        }
    }
}

impl From<&TotalCounters> for TotalsReport {
    fn from(totals: &TotalCounters) -> Self {
        Self {
            frames_observed: totals.frames_observed,
            malformed_frames: totals.malformed_frames,
            malformed_by_path: totals.malformed_by_path.clone(),
            unknown_stream_frames: totals.unknown_stream_frames,
            clock_skew_frames: totals.clock_skew_frames,
        }
    }
}

impl Report {
    pub fn from_snapshot(snapshot: &AggregateSnapshot, generated_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            generated_at,
            started_at: snapshot.started_at,
            streams: snapshot.streams.iter().map(Into::into).collect(),
            totals: (&snapshot.totals).into(),
        }
    }

    pub fn stream(&self, stream_id: StreamId) -> Option<&StreamReport> {
        self.streams.iter().find(|s| s.stream_id == stream_id)
    }
}

/// Consumer of finished reports
pub trait ReportSink: Send {
    fn publish(&mut self, report: &Report) -> Result<(), ExportError>;
}

/// Rewrites one JSON file per report
///
/// Writes to a sibling temp file first and renames it into place, so readers
/// never see a half-written report.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonFileSink {
    fn publish(&mut self, report: &Report) -> Result<(), ExportError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "report_written");
        Ok(())
    }
}

/// One compact JSON document per line
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ReportSink for JsonLinesSink<W> {
    fn publish(&mut self, report: &Report) -> Result<(), ExportError> {
        serde_json::to_writer(&mut self.writer, report)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Fans reports out to WebSocket subscribers as JSON text
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

impl ReportSink for BroadcastSink {
    fn publish(&mut self, report: &Report) -> Result<(), ExportError> {
        let json = serde_json::to_string(report)?;
        // No subscribers is not an error
        let _ = self.tx.send(json);
        Ok(())
    }
}

/// Builds reports from pipeline snapshots
#[derive(Clone)]
pub struct ReportExporter {
    clock: Arc<dyn Clock>,
}

impl Default for ReportExporter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ReportExporter {
    /// `clock` stamps `generated_at`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn render(&self, snapshot: &AggregateSnapshot) -> Report {
        Report::from_snapshot(snapshot, self.clock.now())
    }

    /// On-demand report
    pub async fn snapshot(&self, handle: &PipelineHandle) -> Result<Report, ExportError> {
        let snapshot = handle.snapshot().await?;
        Ok(self.render(&snapshot))
    }

    /// Publish a report every `interval` until shutdown or until the
    /// pipeline stops
    ///
    /// Returns the sink so the caller can publish the pipeline's final,
    /// fully drained snapshot with [`ReportExporter::publish_final`].
    pub async fn run_periodic<S: ReportSink>(
        &self,
        handle: &PipelineHandle,
        mut sink: S,
        interval: Duration,
        mut shutdown: ShutdownReceiver,
    ) -> Result<S, ExportError> {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut published: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            match self.snapshot(handle).await {
                Ok(report) => {
                    sink.publish(&report)?;
                    published += 1;
                }
                Err(ExportError::Pipeline(PipelineError::Closed)) => break,
                Err(err) => return Err(err),
            }
        }

        tracing::info!(published, "periodic_export_stopped");
        Ok(sink)
    }

    /// Render and publish `snapshot`
    pub fn publish_final<S: ReportSink + ?Sized>(
        &self,
        sink: &mut S,
        snapshot: &AggregateSnapshot,
    ) -> Result<Report, ExportError> {
        let report = self.render(snapshot);
        sink.publish(&report)?;
        Ok(report)
    }
}
