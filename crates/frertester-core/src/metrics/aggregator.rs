//! Per-stream FRER statistics
//!
//! Consumes [`MetricSample`]s in processing order and maintains:
//! - accepted / duplicate / out-of-window counters and the duplicate rate
//! - a latency histogram over accepted frames
//! - per-path utilization and latency
//! - sequence-gap loss estimation
//! - failover events
//!
//! Two kinds of failover event are recorded. A *stream gap* is a silence
//! between consecutive accepted arrivals longer than the failover threshold,
//! with no recovery reset in between. A *path loss* is one path falling
//! silent for longer than the threshold while another path keeps delivering;
//! its duration runs from the lost path's last arrival to the first frame
//! accepted from a surviving path after it, which is the interruption the
//! receiver actually experienced.

use super::histogram::{LatencyHistogram, LatencySummary};
use super::MetricSample;
use crate::clock::elapsed_between;
use crate::frame::{PathId, StreamId};
use crate::recovery::{Decision, StreamConfig};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Weight of the newest gap in the smoothed inter-arrival estimate
const INTERVAL_SMOOTHING: f64 = 0.1;

/// A detected interruption of delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverEvent {
    /// Last arrival before the interruption
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    /// Path that stopped delivering, `None` for a whole-stream gap
    pub failed_path: Option<PathId>,
}

/// Statistics of one path within one stream
#[derive(Debug, Clone, Default)]
pub struct PathMetrics {
    /// Frames received on this path
    pub received: u64,
    /// Frames from this path that were the first arrival (utilization)
    pub accepted: u64,
    pub duplicates: u64,
    pub out_of_window: u64,
    /// Latency over every frame received on this path
    pub latency: LatencySummary,
    pub last_arrival: Option<DateTime<Utc>>,
    /// Silent past the failover threshold while another path delivered
    pub down: bool,
    /// First frame accepted from another path after `last_arrival`
    first_accept_elsewhere: Option<DateTime<Utc>>,
    /// Index of this path's failover event still waiting for its end
    pending_event: Option<usize>,
}

impl PathMetrics {
    fn clear_tracking(&mut self) {
        self.last_arrival = None;
        self.down = false;
        self.first_accept_elsewhere = None;
        self.pending_event = None;
    }
}

/// Statistics of one stream
#[derive(Debug, Clone)]
pub struct StreamMetrics {
    pub stream_id: StreamId,
    pub accepted: u64,
    pub duplicates: u64,
    pub out_of_window: u64,
    /// Every observed frame of the stream
    pub total: u64,
    pub reset_count: u64,
    pub clock_skew_count: u64,
    /// Forward jumps of the highest accepted sequence number by more than one
    pub sequence_gaps: u64,
    /// Sequence numbers skipped and not (yet) filled in late
    pub missing: u64,
    /// Latency of accepted frames
    pub latency: LatencyHistogram,
    pub paths: BTreeMap<PathId, PathMetrics>,
    pub failover_events: Vec<FailoverEvent>,
    static_threshold: Option<Duration>,
    failover_factor: u32,
    /// Smoothed accepted inter-arrival interval in seconds
    interval_estimate: Option<f64>,
    last_accepted_arrival: Option<DateTime<Utc>>,
}

impl StreamMetrics {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            stream_id: config.stream_id,
            accepted: 0,
            duplicates: 0,
            out_of_window: 0,
            total: 0,
            reset_count: 0,
            clock_skew_count: 0,
            sequence_gaps: 0,
            missing: 0,
            latency: LatencyHistogram::new(),
            paths: BTreeMap::new(),
            failover_events: Vec::new(),
            static_threshold: config.static_failover_threshold(),
            failover_factor: config.failover_factor.max(1),
            interval_estimate: None,
            last_accepted_arrival: None,
        }
    }

    fn configure(&mut self, config: &StreamConfig) {
        self.static_threshold = config.static_failover_threshold();
        self.failover_factor = config.failover_factor.max(1);
    }

    /// duplicate / (accepted + duplicate), 0 before any frame
    pub fn duplicate_rate(&self) -> f64 {
        let denominator = self.accepted + self.duplicates;
        if denominator == 0 {
            return 0.0;
        }
        self.duplicates as f64 / denominator as f64
    }

    /// missing / (accepted + missing), 0 before any frame
    pub fn loss_rate(&self) -> f64 {
        let denominator = self.accepted + self.missing;
        if denominator == 0 {
            return 0.0;
        }
        self.missing as f64 / denominator as f64
    }

    /// Gap length beyond which delivery counts as interrupted
    ///
    /// Configured value, else factor x nominal interval, else factor x the
    /// smoothed observed interval. `None` until an estimate exists.
    pub fn failover_threshold(&self) -> Option<Duration> {
        self.static_threshold.or_else(|| {
            self.interval_estimate.and_then(|secs| {
                Duration::try_from_secs_f64(secs * self.failover_factor as f64).ok()
            })
        })
    }

    fn record(&mut self, sample: &MetricSample) {
        self.total += 1;
        if sample.reset {
            self.reset_count += 1;
            self.last_accepted_arrival = None;
            self.paths.values_mut().for_each(PathMetrics::clear_tracking);
        }
        if sample.clock_skew {
            self.clock_skew_count += 1;
        }

        let now = sample.timestamp;
        let accepted = sample.decision.is_accepted();
        let previous_arrival = self.record_path(sample);

        match sample.decision {
            Decision::Accepted => {
                self.accepted += 1;
                if let Some(latency) = sample.latency {
                    self.latency.record(latency);
                }
                match sample.advance {
                    Some(advance) if advance > 1 => {
                        self.sequence_gaps += 1;
                        self.missing += (advance - 1) as u64;
                    }
                    Some(advance) if advance < 0 => {
                        self.missing = self.missing.saturating_sub(1);
                    }
                    _ => {}
                }
            }
            Decision::Duplicate => self.duplicates += 1,
            Decision::OutOfWindow => self.out_of_window += 1,
        }

        if accepted {
            self.note_surviving_accept(sample.path_id, now);
        }

        if let Some(threshold) = self.failover_threshold() {
            self.detect_path_loss(sample.path_id, previous_arrival, now, threshold);
        }

        if accepted {
            self.track_accepted_gap(now);
        }
    }

    /// Per-path counters; returns the path's previous arrival
    fn record_path(&mut self, sample: &MetricSample) -> Option<DateTime<Utc>> {
        let stream_id = self.stream_id;
        let now = sample.timestamp;
        let path = self.paths.entry(sample.path_id).or_default();

        if path.down {
            path.down = false;
            let down_for = path
                .last_arrival
                .and_then(|last| elapsed_between(last, now))
                .unwrap_or_default();
            tracing::info!(
                stream_id,
                path = %sample.path_id,
                down_ms = down_for.as_millis() as u64,
                "path_restored"
            );
            if let Some(index) = path.pending_event.take() {
                if let Some(event) = self.failover_events.get_mut(index) {
                    event.duration = elapsed_between(event.start_time, now).unwrap_or_default();
                }
            }
        }

        path.received += 1;
        match sample.decision {
            Decision::Accepted => path.accepted += 1,
            Decision::Duplicate => path.duplicates += 1,
            Decision::OutOfWindow => path.out_of_window += 1,
        }
        if let Some(latency) = sample.latency {
            path.latency.record(latency);
        }

        let previous = path.last_arrival;
        if previous.map_or(true, |last| last <= now) {
            path.last_arrival = Some(now);
            path.first_accept_elsewhere = None;
        }
        previous
    }

    /// An accepted frame on `from` ends the interruption of every other path
    fn note_surviving_accept(&mut self, from: PathId, now: DateTime<Utc>) {
        for (id, path) in self.paths.iter_mut() {
            if *id == from {
                continue;
            }
            if path.first_accept_elsewhere.is_none()
                && path.last_arrival.is_some_and(|last| last <= now)
            {
                path.first_accept_elsewhere = Some(now);
            }
            if let Some(index) = path.pending_event.take() {
                if let Some(event) = self.failover_events.get_mut(index) {
                    event.duration = elapsed_between(event.start_time, now).unwrap_or_default();
                }
            }
        }
    }

    /// Mark paths down that went quiet while `from` kept delivering
    fn detect_path_loss(
        &mut self,
        from: PathId,
        previous_arrival: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        threshold: Duration,
    ) {
        // The reporting path must itself be delivering steadily
        let Some(previous) = previous_arrival else {
            return;
        };
        if elapsed_between(previous, now).map_or(true, |gap| gap > threshold) {
            return;
        }

        let stream_id = self.stream_id;
        for (id, path) in self.paths.iter_mut() {
            if *id == from || path.down {
                continue;
            }
            let Some(last) = path.last_arrival else {
                continue;
            };
            if previous <= last {
                continue;
            }
            let Some(silent) = elapsed_between(last, now) else {
                continue;
            };
            if silent <= threshold {
                continue;
            }

            path.down = true;
            let duration = path
                .first_accept_elsewhere
                .and_then(|end| elapsed_between(last, end))
                .unwrap_or(silent);
            if path.first_accept_elsewhere.is_none() {
                path.pending_event = Some(self.failover_events.len());
            }
            tracing::warn!(
                stream_id,
                path = %id,
                silent_ms = silent.as_millis() as u64,
                failover_us = duration.as_micros() as u64,
                "path_down"
            );
            self.failover_events.push(FailoverEvent {
                start_time: last,
                duration,
                failed_path: Some(*id),
            });
        }
    }

    fn track_accepted_gap(&mut self, now: DateTime<Utc>) {
        let previous = self.last_accepted_arrival;
        if let Some(last) = previous {
            if let Some(gap) = elapsed_between(last, now) {
                if self.failover_threshold().is_some_and(|threshold| gap > threshold) {
                    tracing::warn!(
                        stream_id = self.stream_id,
                        gap_us = gap.as_micros() as u64,
                        "stream_gap"
                    );
                    self.failover_events.push(FailoverEvent {
                        start_time: last,
                        duration: gap,
                        failed_path: None,
                    });
                } else {
                    let secs = gap.as_secs_f64();
                    self.interval_estimate = Some(match self.interval_estimate {
                        Some(estimate) => {
                            estimate + INTERVAL_SMOOTHING * (secs - estimate)
                        }
                        None => secs,
                    });
                }
            }
        }
        if previous.map_or(true, |last| last <= now) {
            self.last_accepted_arrival = Some(now);
        }
    }
}

/// Counters not attributable to a known stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TotalCounters {
    /// Every intake event, including malformed and unknown-stream frames
    pub frames_observed: u64,
    pub malformed_frames: u64,
    pub malformed_by_path: BTreeMap<PathId, u64>,
    pub unknown_stream_frames: u64,
    pub clock_skew_frames: u64,
}

/// Consistent copy of all aggregator state
#[derive(Debug, Clone)]
pub struct AggregateSnapshot {
    pub started_at: DateTime<Utc>,
    /// Ascending by stream id
    pub streams: Vec<StreamMetrics>,
    pub totals: TotalCounters,
}

impl AggregateSnapshot {
    pub fn stream(&self, stream_id: StreamId) -> Option<&StreamMetrics> {
        self.streams.iter().find(|s| s.stream_id == stream_id)
    }
}

/// Owner of all per-stream statistics
#[derive(Debug)]
pub struct MetricsAggregator {
    started_at: DateTime<Utc>,
    streams: BTreeMap<StreamId, StreamMetrics>,
    totals: TotalCounters,
}

impl MetricsAggregator {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            streams: BTreeMap::new(),
            totals: TotalCounters::default(),
        }
    }

    /// Create a stream's statistics, or update the failover settings of an
    /// existing one. Counters survive re-registration.
    pub fn register_stream(&mut self, config: &StreamConfig) {
        self.streams
            .entry(config.stream_id)
            .and_modify(|metrics| metrics.configure(config))
            .or_insert_with(|| StreamMetrics::new(config));
    }

    pub fn has_stream(&self, stream_id: StreamId) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn record(&mut self, sample: &MetricSample) {
        self.totals.frames_observed += 1;
        if sample.clock_skew {
            self.totals.clock_skew_frames += 1;
        }
        self.streams
            .entry(sample.stream_id)
            .or_insert_with(|| StreamMetrics::new(&StreamConfig::new(sample.stream_id)))
            .record(sample);
    }

    /// A frame that failed to parse on `path`
    pub fn record_malformed(&mut self, path: PathId) {
        self.totals.frames_observed += 1;
        self.totals.malformed_frames += 1;
        *self.totals.malformed_by_path.entry(path).or_insert(0) += 1;
    }

    /// A frame for a stream with no configuration
    pub fn record_unknown(&mut self) {
        self.totals.frames_observed += 1;
        self.totals.unknown_stream_frames += 1;
    }

    pub fn stream(&self, stream_id: StreamId) -> Option<&StreamMetrics> {
        self.streams.get(&stream_id)
    }

    pub fn totals(&self) -> &TotalCounters {
        &self.totals
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            started_at: self.started_at,
            streams: self.streams.values().cloned().collect(),
            totals: self.totals.clone(),
        }
    }
}
