//! Dual-path capture
//!
//! One task per physical path reads raw frames from its [`CaptureSource`],
//! stamps the arrival time, parses the R-TAG and forwards the result into
//! the shared pipeline intake. Each task preserves its own source's order;
//! nothing orders the two paths relative to each other.

use crate::clock::Clock;
use crate::frame::ethernet;
use crate::frame::{Frame, PathId};
use crate::pipeline::IntakeEvent;
use crate::shutdown::{self, ShutdownReceiver};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One raw frame as delivered by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedBytes {
    pub bytes: Vec<u8>,
    /// Arrival time supplied by the source (hardware timestamp); capture
    /// stamps with its own clock when absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl CapturedBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            timestamp: None,
        }
    }
}

/// Source read failure
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ingestion endpoint for one physical path
pub trait CaptureSource: Send + 'static {
    /// Next frame, or `None` once the source is exhausted
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Result<Option<CapturedBytes>, SourceError>> + Send;
}

/// Capture task failures; both are fatal to that path's task
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture source on path {path} unavailable after {received} frames: {source}")]
    SourceUnavailable {
        path: PathId,
        received: u64,
        #[source]
        source: SourceError,
    },

    #[error("capture task for path {path} aborted: {reason}")]
    Aborted { path: PathId, reason: String },
}

/// Why a capture task stopped normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEnd {
    /// Source reported no more frames
    Exhausted,
    /// Configured frame count reached
    Limit,
    Shutdown,
    /// Pipeline stopped accepting events
    IntakeClosed,
}

/// Per-path capture statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureReport {
    pub path: PathId,
    pub received: u64,
    pub malformed: u64,
    pub end: CaptureEnd,
}

/// Read `source` until it ends, forwarding every frame into `intake`
pub async fn capture_path<S, C>(
    path: PathId,
    mut source: S,
    clock: Arc<C>,
    intake: mpsc::Sender<IntakeEvent>,
    mut shutdown: ShutdownReceiver,
    limit: Option<u64>,
) -> Result<CaptureReport, CaptureError>
where
    S: CaptureSource,
    C: Clock + ?Sized,
{
    tracing::info!(%path, ?limit, "capture_started");
    let mut received: u64 = 0;
    let mut malformed: u64 = 0;

    let end = loop {
        if limit.is_some_and(|limit| received >= limit) {
            break CaptureEnd::Limit;
        }

        let next = tokio::select! {
            biased;
            _ = shutdown::requested(&mut shutdown) => break CaptureEnd::Shutdown,
            next = source.next_frame() => next,
        };

        let captured = match next {
            Ok(Some(captured)) => captured,
            Ok(None) => break CaptureEnd::Exhausted,
            Err(err) => {
                tracing::error!(%path, received, error = %err, "capture_source_failed");
                return Err(CaptureError::SourceUnavailable {
                    path,
                    received,
                    source: err,
                });
            }
        };

        let arrival = captured.timestamp.unwrap_or_else(|| clock.now());
        received += 1;

        let event = match ethernet::parse(&captured.bytes) {
            Ok(parsed) => IntakeEvent::Frame(Frame::from_parsed(&parsed, path, arrival)),
            Err(error) => {
                malformed += 1;
                IntakeEvent::Malformed { path, error }
            }
        };
        if intake.send(event).await.is_err() {
            break CaptureEnd::IntakeClosed;
        }
    };

    tracing::info!(%path, received, malformed, ?end, "capture_stopped");
    Ok(CaptureReport {
        path,
        received,
        malformed,
        end,
    })
}

/// The two capture tasks of a redundant receiver
pub struct DualPathCapture {
    path_a: JoinHandle<Result<CaptureReport, CaptureError>>,
    path_b: JoinHandle<Result<CaptureReport, CaptureError>>,
}

impl DualPathCapture {
    /// Spawn one capture task per path feeding the same intake
    pub fn spawn<A, B, C>(
        source_a: A,
        source_b: B,
        clock: Arc<C>,
        intake: mpsc::Sender<IntakeEvent>,
        shutdown: ShutdownReceiver,
        limit: Option<u64>,
    ) -> Self
    where
        A: CaptureSource,
        B: CaptureSource,
        C: Clock + ?Sized + 'static,
    {
        let path_a = tokio::spawn(capture_path(
            PathId::A,
            source_a,
            clock.clone(),
            intake.clone(),
            shutdown.clone(),
            limit,
        ));
        let path_b = tokio::spawn(capture_path(
            PathId::B,
            source_b,
            clock,
            intake,
            shutdown,
            limit,
        ));
        Self { path_a, path_b }
    }

    /// Wait for both tasks; results are `[path A, path B]`
    pub async fn join(self) -> [Result<CaptureReport, CaptureError>; 2] {
        let (a, b) = tokio::join!(self.path_a, self.path_b);
        [flatten(PathId::A, a), flatten(PathId::B, b)]
    }
}

fn flatten(
    path: PathId,
    joined: Result<Result<CaptureReport, CaptureError>, tokio::task::JoinError>,
) -> Result<CaptureReport, CaptureError> {
    joined.unwrap_or_else(|e| {
        Err(CaptureError::Aborted {
            path,
            reason: e.to_string(),
        })
    })
}
