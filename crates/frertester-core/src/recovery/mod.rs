//! Sequence recovery (duplicate elimination)
//!
//! Per-stream state lives in an explicit table owned by [`RecoveryEngine`].
//! Each observed frame is classified as accepted, duplicate or out-of-window
//! using a bounded history of recently accepted sequence numbers. An
//! inactivity check on every arrival clears the history once no frame has
//! been seen for `reset_timeout`, so recovery after a long outage starts
//! from a fresh window.
//!
//! The engine has no interior locking: exactly one task is expected to own
//! it (see [`crate::pipeline`]).

pub mod window;

use crate::clock::elapsed_between;
use crate::frame::{Frame, SequenceNumber, StreamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use window::{seq_distance, SequenceHistory, MAX_HISTORY_WINDOW};

/// Recovery engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("unknown stream {stream_id}")]
    UnknownStream { stream_id: StreamId },

    #[error("stream {stream_id} is already registered")]
    StreamExists { stream_id: StreamId },

    #[error("history window {size} out of range 1..={max}")]
    InvalidWindow { size: usize, max: usize },
}

fn default_history_window() -> usize {
    crate::DEFAULT_HISTORY_WINDOW
}

fn default_reset_timeout() -> Duration {
    Duration::from_millis(crate::DEFAULT_RESET_TIMEOUT_MS)
}

fn default_failover_factor() -> u32 {
    crate::DEFAULT_FAILOVER_FACTOR
}

/// Configuration of one FRER stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream identifier carried in the R-TAG
    pub stream_id: StreamId,
    /// Number of recently accepted sequence numbers remembered
    #[serde(default = "default_history_window")]
    pub history_window_size: usize,
    /// Inactivity period after which history is cleared
    #[serde(
        default = "default_reset_timeout",
        rename = "reset_timeout_ms",
        with = "crate::duration_ms"
    )]
    pub reset_timeout: Duration,
    /// Expected inter-frame interval, when the sender's rate is known
    #[serde(
        default,
        rename = "nominal_interval_ms",
        with = "crate::duration_ms::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub nominal_interval: Option<Duration>,
    /// Explicit failover gap threshold; overrides the nominal-interval rule
    #[serde(
        default,
        rename = "failover_threshold_ms",
        with = "crate::duration_ms::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub failover_threshold: Option<Duration>,
    /// Threshold as a multiple of the nominal interval
    #[serde(default = "default_failover_factor")]
    pub failover_factor: u32,
}

impl StreamConfig {
    /// Stream with default window and timeout
    pub fn new(stream_id: StreamId) -> Self {
        RecoveryDefaults::default().stream_config(stream_id)
    }

    pub fn with_history_window(mut self, size: usize) -> Self {
        self.history_window_size = size;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_nominal_interval(mut self, interval: Duration) -> Self {
        self.nominal_interval = Some(interval);
        self
    }

    pub fn with_failover_threshold(mut self, threshold: Duration) -> Self {
        self.failover_threshold = Some(threshold);
        self
    }

    /// Reject windows the signed distance cannot represent
    pub fn validate(&self) -> Result<(), RecoveryError> {
        if self.history_window_size == 0 || self.history_window_size > MAX_HISTORY_WINDOW {
            return Err(RecoveryError::InvalidWindow {
                size: self.history_window_size,
                max: MAX_HISTORY_WINDOW,
            });
        }
        Ok(())
    }

    /// Configured failover threshold, else `factor` x nominal interval
    ///
    /// `None` means the threshold must be estimated from observed traffic.
    pub fn static_failover_threshold(&self) -> Option<Duration> {
        self.failover_threshold.or_else(|| {
            self.nominal_interval
                .map(|interval| interval.saturating_mul(self.failover_factor.max(1)))
        })
    }
}

/// Settings applied to streams registered without explicit values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDefaults {
    #[serde(default = "default_history_window")]
    pub history_window_size: usize,
    #[serde(
        default = "default_reset_timeout",
        rename = "reset_timeout_ms",
        with = "crate::duration_ms"
    )]
    pub reset_timeout: Duration,
    #[serde(default = "default_failover_factor")]
    pub failover_factor: u32,
    /// Register streams on first sight instead of dropping their frames
    #[serde(default)]
    pub accept_unknown_streams: bool,
}

impl Default for RecoveryDefaults {
    fn default() -> Self {
        Self {
            history_window_size: default_history_window(),
            reset_timeout: default_reset_timeout(),
            failover_factor: default_failover_factor(),
            accept_unknown_streams: false,
        }
    }
}

impl RecoveryDefaults {
    /// Config for `stream_id` using these defaults
    pub fn stream_config(&self, stream_id: StreamId) -> StreamConfig {
        StreamConfig {
            stream_id,
            history_window_size: self.history_window_size,
            reset_timeout: self.reset_timeout,
            nominal_interval: None,
            failover_threshold: None,
            failover_factor: self.failover_factor,
        }
    }
}

/// Classification of one observed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    /// First arrival of this sequence number; delivered downstream
    Accepted,
    /// Sequence number already in the history window
    Duplicate,
    /// Too far behind the newest accepted number to prove uniqueness
    OutOfWindow,
}

impl Decision {
    pub fn is_accepted(self) -> bool {
        matches!(self, Decision::Accepted)
    }
}

/// Result of observing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    /// History was cleared by the inactivity timer before this frame
    pub reset: bool,
    /// For accepted frames: signed distance from the previous highest
    /// accepted sequence number (`None` on the first frame of a window)
    pub advance: Option<i32>,
}

/// Mutable recovery state of one stream
#[derive(Debug, Clone)]
pub struct RecoveryState {
    history: SequenceHistory,
    /// Highest accepted sequence number in modular order
    highest: Option<SequenceNumber>,
    last_seen_time: Option<DateTime<Utc>>,
    accepted_count: u64,
    duplicate_count: u64,
    out_of_window_count: u64,
    reset_count: u64,
}

impl RecoveryState {
    pub fn new(history_window_size: usize) -> Self {
        Self {
            history: SequenceHistory::new(history_window_size),
            highest: None,
            last_seen_time: None,
            accepted_count: 0,
            duplicate_count: 0,
            out_of_window_count: 0,
            reset_count: 0,
        }
    }

    /// Classify `seq` arriving at `arrival`
    pub fn evaluate(
        &mut self,
        seq: SequenceNumber,
        arrival: DateTime<Utc>,
        reset_timeout: Duration,
    ) -> Verdict {
        let reset = match self.last_seen_time {
            Some(last) => {
                elapsed_between(last, arrival).is_some_and(|idle| idle > reset_timeout)
            }
            None => false,
        };
        if reset {
            self.history.clear();
            self.highest = None;
            self.reset_count += 1;
        }

        // Arrivals from two paths may interleave out of timestamp order
        self.last_seen_time = Some(match self.last_seen_time {
            Some(last) if last > arrival => last,
            _ => arrival,
        });

        if self.history.contains(seq) {
            self.duplicate_count += 1;
            return Verdict {
                decision: Decision::Duplicate,
                reset,
                advance: None,
            };
        }

        let advance = self.highest.map(|highest| seq_distance(seq, highest));
        if let Some(distance) = advance {
            if distance <= -(self.history.capacity() as i32) {
                self.out_of_window_count += 1;
                return Verdict {
                    decision: Decision::OutOfWindow,
                    reset,
                    advance: None,
                };
            }
        }

        self.history.insert(seq);
        self.accepted_count += 1;
        match advance {
            Some(distance) if distance <= 0 => {}
            _ => self.highest = Some(seq),
        }

        Verdict {
            decision: Decision::Accepted,
            reset,
            advance,
        }
    }

    pub fn history(&self) -> &SequenceHistory {
        &self.history
    }

    pub fn highest(&self) -> Option<SequenceNumber> {
        self.highest
    }

    pub fn last_seen_time(&self) -> Option<DateTime<Utc>> {
        self.last_seen_time
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted_count
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicate_count
    }

    pub fn out_of_window_count(&self) -> u64 {
        self.out_of_window_count
    }

    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }
}

#[derive(Debug)]
struct StreamSlot {
    config: StreamConfig,
    /// Created on the first frame of the stream
    state: Option<RecoveryState>,
}

/// Table of per-stream recovery state
#[derive(Debug, Default)]
pub struct RecoveryEngine {
    defaults: RecoveryDefaults,
    streams: HashMap<StreamId, StreamSlot>,
    /// Frames dropped per unregistered stream id
    unknown: HashMap<StreamId, u64>,
}

impl RecoveryEngine {
    /// Engine with default settings and no streams
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: RecoveryDefaults) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    pub fn defaults(&self) -> &RecoveryDefaults {
        &self.defaults
    }

    /// Register a stream; its state is created on the first frame
    pub fn register_stream(&mut self, config: StreamConfig) -> Result<(), RecoveryError> {
        config.validate()?;
        if self.streams.contains_key(&config.stream_id) {
            return Err(RecoveryError::StreamExists {
                stream_id: config.stream_id,
            });
        }
        tracing::info!(
            stream_id = config.stream_id,
            window = config.history_window_size,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "stream_registered"
        );
        self.streams.insert(
            config.stream_id,
            StreamSlot {
                config,
                state: None,
            },
        );
        Ok(())
    }

    /// Destroy a stream's configuration and state
    ///
    /// Returns the final state, or `None` if no frame was ever observed.
    pub fn teardown_stream(
        &mut self,
        stream_id: StreamId,
    ) -> Result<Option<RecoveryState>, RecoveryError> {
        let slot = self
            .streams
            .remove(&stream_id)
            .ok_or(RecoveryError::UnknownStream { stream_id })?;
        tracing::info!(stream_id, "stream_torn_down");
        Ok(slot.state)
    }

    /// Classify one frame
    ///
    /// Frames for unregistered streams fail with `UnknownStream` and are
    /// counted, unless the defaults allow auto-registration.
    pub fn observe(&mut self, frame: &Frame) -> Result<Verdict, RecoveryError> {
        let stream_id = frame.stream_id;
        if !self.streams.contains_key(&stream_id) {
            if !self.defaults.accept_unknown_streams {
                let count = self.unknown.entry(stream_id).or_insert(0);
                *count += 1;
                if *count == 1 {
                    tracing::warn!(stream_id, path = %frame.path_id, "unknown_stream");
                }
                return Err(RecoveryError::UnknownStream { stream_id });
            }
            let config = self.defaults.stream_config(stream_id);
            self.register_stream(config)?;
        }

        let slot = self
            .streams
            .get_mut(&stream_id)
            .ok_or(RecoveryError::UnknownStream { stream_id })?;
        let window = slot.config.history_window_size;
        let state = slot.state.get_or_insert_with(|| RecoveryState::new(window));
        let verdict = state.evaluate(
            frame.sequence_number,
            frame.arrival_timestamp,
            slot.config.reset_timeout,
        );

        if verdict.reset {
            tracing::info!(
                stream_id,
                seq = frame.sequence_number,
                resets = state.reset_count(),
                "recovery_reset"
            );
        }
        tracing::trace!(
            stream_id,
            seq = frame.sequence_number,
            path = %frame.path_id,
            decision = ?verdict.decision,
            "frame_observed"
        );

        Ok(verdict)
    }

    pub fn state(&self, stream_id: StreamId) -> Option<&RecoveryState> {
        self.streams.get(&stream_id)?.state.as_ref()
    }

    pub fn config(&self, stream_id: StreamId) -> Option<&StreamConfig> {
        self.streams.get(&stream_id).map(|slot| &slot.config)
    }

    /// Registered stream ids, ascending
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Total frames dropped for unregistered streams
    pub fn unknown_stream_frames(&self) -> u64 {
        self.unknown.values().sum()
    }
}
