//! frertester Core - R-TAG frames, sequence recovery, and FRER statistics
//!
//! This library provides the core functionality for verifying IEEE 802.1CB
//! Frame Replication and Elimination for Reliability (FRER) on a redundant
//! network. Tagged test frames are generated on one side, captured from two
//! disjoint paths on the other, reconciled by a per-stream sequence recovery
//! engine and summarized into latency, loss, duplicate-rate and failover
//! statistics for an external dashboard.

pub mod clock;
pub mod duration_ms;
pub mod frame;
pub mod metrics;
pub mod pipeline;
pub mod recovery;
pub mod report;
pub mod shutdown;
pub mod traffic;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use frame::{Frame, PathId, SequenceNumber, StreamId};
pub use metrics::aggregator::MetricsAggregator;
pub use pipeline::{PipelineHandle, RecoveryPipeline};
pub use recovery::{RecoveryDefaults, RecoveryEngine, StreamConfig};
pub use report::{Report, ReportExporter};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default number of accepted sequence numbers remembered per stream
pub const DEFAULT_HISTORY_WINDOW: usize = 32;

/// Default inactivity period after which a stream's history is cleared (ms)
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 1000;

/// Failover threshold as a multiple of the nominal inter-frame interval
pub const DEFAULT_FAILOVER_FACTOR: u32 = 3;

/// Capacity of the bounded channel between capture tasks and the pipeline
pub const INTAKE_CAPACITY: usize = 4096;
