//! Single-writer processing task
//!
//! One task owns the [`RecoveryEngine`] and the [`MetricsAggregator`].
//! Capture tasks feed it through a bounded intake channel; everything else
//! talks to it through a [`PipelineHandle`], which sends commands and awaits
//! `oneshot` replies. No other component touches recovery state or counters.

use crate::frame::ethernet::FrameError;
use crate::frame::{Frame, PathId, StreamId};
use crate::metrics::aggregator::{AggregateSnapshot, MetricsAggregator};
use crate::metrics::MetricSample;
use crate::recovery::{RecoveryEngine, RecoveryError, StreamConfig};
use crate::shutdown::{self, ShutdownReceiver};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Capacity of the command channel
const COMMAND_CAPACITY: usize = 32;

/// Input from a capture task
#[derive(Debug)]
pub enum IntakeEvent {
    Frame(Frame),
    /// Bytes on `path` that did not parse as a tagged frame
    Malformed { path: PathId, error: FrameError },
}

/// Bounded channel carrying [`IntakeEvent`]s from captures to the pipeline
pub fn intake_channel() -> (mpsc::Sender<IntakeEvent>, mpsc::Receiver<IntakeEvent>) {
    mpsc::channel(crate::INTAKE_CAPACITY)
}

/// Pipeline errors seen by handle holders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("recovery pipeline has stopped")]
    Closed,

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

/// Commands sent to the processing task
pub enum PipelineCommand {
    Snapshot {
        reply: oneshot::Sender<AggregateSnapshot>,
    },
    RegisterStream {
        config: StreamConfig,
        reply: oneshot::Sender<Result<(), RecoveryError>>,
    },
    TeardownStream {
        stream_id: StreamId,
        reply: oneshot::Sender<Result<(), RecoveryError>>,
    },
    ListStreams {
        reply: oneshot::Sender<Vec<StreamConfig>>,
    },
}

/// Handle to communicate with the processing task
#[derive(Clone, Debug)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineCommand>,
}

impl PipelineHandle {
    /// Consistent copy of all statistics
    pub async fn snapshot(&self) -> Result<AggregateSnapshot, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineCommand::Snapshot { reply })
            .await
            .map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)
    }

    pub async fn register_stream(&self, config: StreamConfig) -> Result<(), PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineCommand::RegisterStream { config, reply })
            .await
            .map_err(|_| PipelineError::Closed)?;
        Ok(rx.await.map_err(|_| PipelineError::Closed)??)
    }

    pub async fn teardown_stream(&self, stream_id: StreamId) -> Result<(), PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineCommand::TeardownStream { stream_id, reply })
            .await
            .map_err(|_| PipelineError::Closed)?;
        Ok(rx.await.map_err(|_| PipelineError::Closed)??)
    }

    /// Configurations of all registered streams, ascending by id
    pub async fn streams(&self) -> Result<Vec<StreamConfig>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineCommand::ListStreams { reply })
            .await
            .map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)
    }
}

/// Recovery engine plus aggregator, driven by intake events
#[derive(Debug)]
pub struct RecoveryPipeline {
    engine: RecoveryEngine,
    aggregator: MetricsAggregator,
}

impl RecoveryPipeline {
    /// Wrap an engine; statistics start at `started_at`
    pub fn new(engine: RecoveryEngine, started_at: DateTime<Utc>) -> Self {
        let mut aggregator = MetricsAggregator::new(started_at);
        for stream_id in engine.stream_ids() {
            if let Some(config) = engine.config(stream_id) {
                aggregator.register_stream(config);
            }
        }
        Self { engine, aggregator }
    }

    /// Apply one intake event; never fails
    pub fn process(&mut self, event: IntakeEvent) {
        match event {
            IntakeEvent::Frame(frame) => match self.engine.observe(&frame) {
                Ok(verdict) => {
                    if !self.aggregator.has_stream(frame.stream_id) {
                        if let Some(config) = self.engine.config(frame.stream_id) {
                            self.aggregator.register_stream(config);
                        }
                    }
                    self.aggregator.record(&MetricSample::new(&frame, &verdict));
                }
                Err(err) => {
                    tracing::trace!(
                        stream_id = frame.stream_id,
                        path = %frame.path_id,
                        error = %err,
                        "frame_dropped"
                    );
                    self.aggregator.record_unknown();
                }
            },
            IntakeEvent::Malformed { path, error } => {
                tracing::debug!(%path, %error, "malformed_frame");
                self.aggregator.record_malformed(path);
            }
        }
    }

    pub fn register_stream(&mut self, config: StreamConfig) -> Result<(), RecoveryError> {
        self.engine.register_stream(config.clone())?;
        self.aggregator.register_stream(&config);
        Ok(())
    }

    /// Destroy the stream's recovery state; its statistics stay in reports
    pub fn teardown_stream(&mut self, stream_id: StreamId) -> Result<(), RecoveryError> {
        self.engine.teardown_stream(stream_id).map(|_| ())
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        self.aggregator.snapshot()
    }

    pub fn engine(&self) -> &RecoveryEngine {
        &self.engine
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    /// Run as a task until shutdown or until every intake sender is gone
    ///
    /// The task resolves to the final snapshot, taken after every buffered
    /// intake event has been processed.
    pub fn spawn(
        self,
        intake: mpsc::Receiver<IntakeEvent>,
        shutdown: ShutdownReceiver,
    ) -> (PipelineHandle, JoinHandle<AggregateSnapshot>) {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(self.run(intake, commands, shutdown));
        (PipelineHandle { tx }, task)
    }

    fn handle_command(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            PipelineCommand::RegisterStream { config, reply } => {
                let _ = reply.send(self.register_stream(config));
            }
            PipelineCommand::TeardownStream { stream_id, reply } => {
                let _ = reply.send(self.teardown_stream(stream_id));
            }
            PipelineCommand::ListStreams { reply } => {
                let configs = self
                    .engine
                    .stream_ids()
                    .into_iter()
                    .filter_map(|id| self.engine.config(id).cloned())
                    .collect();
                let _ = reply.send(configs);
            }
        }
    }

    async fn run(
        mut self,
        mut intake: mpsc::Receiver<IntakeEvent>,
        mut commands: mpsc::Receiver<PipelineCommand>,
        mut shutdown: ShutdownReceiver,
    ) -> AggregateSnapshot {
        tracing::info!(streams = self.engine.stream_ids().len(), "pipeline_started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown) => {
                    tracing::info!("pipeline_shutdown_requested");
                    break;
                }
                event = intake.recv() => match event {
                    Some(event) => self.process(event),
                    None => {
                        tracing::info!("pipeline_intake_closed");
                        break;
                    }
                },
                Some(command) = commands.recv() => self.handle_command(command),
            }
        }

        // Refuse new events, then flush what is already queued
        intake.close();
        let mut drained = 0u64;
        while let Some(event) = intake.recv().await {
            self.process(event);
            drained += 1;
        }

        commands.close();
        while let Ok(command) = commands.try_recv() {
            self.handle_command(command);
        }

        let snapshot = self.snapshot();
        tracing::info!(
            drained,
            frames = snapshot.totals.frames_observed,
            "pipeline_stopped"
        );
        snapshot
    }
}
