//! frertester - IEEE 802.1CB FRER test tool
//!
//! This library re-exports the R-TAG codec, traffic, recovery, metrics and
//! report functionality from `frertester-core`, and adds the persistent
//! configuration and the generate/analyze/simulate sessions driven by the
//! `frertester` binary.

pub mod config;
pub mod session;

pub use frertester_core::{clock, frame, metrics, pipeline, recovery, report, shutdown, traffic};

pub use frertester_core::{
    Clock, Frame, ManualClock, MetricsAggregator, MonotonicClock, PathId, PipelineHandle,
    RecoveryDefaults, RecoveryEngine, RecoveryPipeline, Report, ReportExporter, SequenceNumber,
    StreamConfig, StreamId, SystemClock,
};
pub use frertester_core::{DEFAULT_HISTORY_WINDOW, DEFAULT_RESET_TIMEOUT_MS, VERSION};
