//! Generator, analyzer and simulation sessions
//!
//! Each session wires core components into tasks and runs them to
//! completion. The stop sequence is always the same: sources end (limit,
//! shutdown or exhaustion), capture tasks drop their intake senders, the
//! pipeline drains what is queued and returns its final snapshot, and that
//! snapshot becomes the final report.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use frertester_core::clock::{Clock, MonotonicClock, SystemClock};
use frertester_core::frame::{PathId, StreamId};
use frertester_core::pipeline::{intake_channel, RecoveryPipeline};
use frertester_core::recovery::StreamConfig;
use frertester_core::report::{JsonFileSink, Report, ReportExporter};
use frertester_core::shutdown::{self, ShutdownReceiver};
use frertester_core::traffic::capture::{CaptureError, CaptureReport, DualPathCapture};
use frertester_core::traffic::generator::{
    FrameGenerator, GeneratorConfig, GeneratorReport, RunLimit,
};
use frertester_core::traffic::udp::{UdpSink, UdpSource};
use frertester_core::traffic::wire::{LoopbackWire, WireConfig};
use frertester_server::{AppState, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Send tagged frames to every target until the limit or shutdown
pub async fn run_generate(
    config: GeneratorConfig,
    targets: Vec<SocketAddr>,
    shutdown: ShutdownReceiver,
) -> Result<GeneratorReport> {
    let mut generator = FrameGenerator::new(config)?;
    let mut sink = UdpSink::connect(targets)
        .await
        .context("transmit sink unavailable")?;
    let report = generator.run(&mut sink, &SystemClock, shutdown).await?;
    Ok(report)
}

/// Analyzer parameters not covered by [`AppConfig`]
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub path_a: SocketAddr,
    pub path_b: SocketAddr,
    /// Frames per path before capture stops
    pub count: Option<u64>,
    /// Capture duration
    pub duration: Option<Duration>,
    /// Periodic report file, overriding the config
    pub report_path: Option<PathBuf>,
    /// Serve reports over HTTP/WebSocket while running
    pub serve: Option<ServerConfig>,
}

/// Outcome of an analyzer run
#[derive(Debug)]
pub struct AnalyzeOutcome {
    pub captures: Vec<CaptureReport>,
    pub report: Report,
}

/// Capture both paths, recover, and export reports until done
pub async fn run_analyze(
    app: &AppConfig,
    options: AnalyzeOptions,
    shutdown: ShutdownReceiver,
) -> Result<AnalyzeOutcome> {
    let engine = app.build_engine()?;
    let source_a = UdpSource::bind(options.path_a)
        .await
        .context("capture source for path A unavailable")?;
    let source_b = UdpSource::bind(options.path_b)
        .await
        .context("capture source for path B unavailable")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let exporter = ReportExporter::new(clock.clone());

    // Captures stop on the outer signal or when the duration elapses
    let (capture_stop_tx, capture_stop_rx) = shutdown::channel();
    let duration = options.duration;
    let mut outer = shutdown.clone();
    tokio::spawn(async move {
        match duration {
            Some(duration) => {
                tokio::select! {
                    _ = shutdown::requested(&mut outer) => {}
                    _ = tokio::time::sleep(duration) => {
                        tracing::info!(duration_ms = duration.as_millis() as u64, "capture_duration_elapsed");
                    }
                }
            }
            None => shutdown::requested(&mut outer).await,
        }
        let _ = capture_stop_tx.send(true);
    });

    // The pipeline ends when the captures drop the intake; the exporter and
    // server end once the final report is out.
    let (done_tx, done_rx) = shutdown::channel();
    let (intake_tx, intake_rx) = intake_channel();
    let (handle, pipeline_task) =
        RecoveryPipeline::new(engine, clock.now()).spawn(intake_rx, done_rx.clone());

    let mut broadcast = None;
    let mut server_task = None;
    if let Some(server_config) = options.serve.clone() {
        let state = AppState::new(handle.clone(), exporter.clone(), server_config);
        broadcast = Some(state.broadcast_sink());
        server_task = Some(tokio::spawn(frertester_server::start_server(
            state,
            done_rx.clone(),
        )));
    }

    let report_path = options.report_path.clone().or_else(|| app.report.path.clone());
    let file_task = report_path.map(|path| {
        let exporter = exporter.clone();
        let handle = handle.clone();
        let interval = app.report.interval();
        let stop = capture_stop_rx.clone();
        tokio::spawn(async move {
            exporter
                .run_periodic(&handle, JsonFileSink::new(path), interval, stop)
                .await
        })
    });
    let broadcast_task = broadcast.map(|sink| {
        let exporter = exporter.clone();
        let handle = handle.clone();
        let interval = app.report.interval();
        let stop = capture_stop_rx.clone();
        tokio::spawn(async move { exporter.run_periodic(&handle, sink, interval, stop).await })
    });
    drop(handle);

    let capture = DualPathCapture::spawn(
        source_a,
        source_b,
        clock,
        intake_tx,
        capture_stop_rx,
        options.count,
    );
    let captures = collect_captures(capture.join().await);

    let snapshot = pipeline_task.await.context("recovery pipeline task failed")?;

    if let Some(task) = file_task {
        let mut sink = task.await.context("report export task failed")??;
        exporter.publish_final(&mut sink, &snapshot)?;
    }
    if let Some(task) = broadcast_task {
        let mut sink = task.await.context("report broadcast task failed")??;
        exporter.publish_final(&mut sink, &snapshot)?;
    }
    let report = exporter.render(&snapshot);

    let _ = done_tx.send(true);
    if let Some(task) = server_task {
        task.await.context("report server task failed")??;
    }

    Ok(AnalyzeOutcome {
        captures: captures?,
        report,
    })
}

fn collect_captures(
    results: [Result<CaptureReport, CaptureError>; 2],
) -> Result<Vec<CaptureReport>> {
    let mut reports = Vec::with_capacity(2);
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(err) => {
                tracing::error!(error = %err, "capture_failed");
                return Err(err.into());
            }
        }
    }
    Ok(reports)
}

/// Generator, loopback wire, capture and pipeline in one process
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub stream_id: StreamId,
    pub count: u64,
    pub rate_fps: f64,
    /// Cut `cut_path` this long after the generator starts
    pub cut_after: Option<Duration>,
    pub cut_path: PathId,
    pub wire: WireConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            stream_id: 1,
            count: 1000,
            rate_fps: 100.0,
            cut_after: None,
            cut_path: PathId::B,
            wire: WireConfig::default(),
        }
    }
}

/// Outcome of a simulation run
#[derive(Debug)]
pub struct SimulationOutcome {
    pub generator: GeneratorReport,
    pub captures: Vec<CaptureReport>,
    /// Frames dropped on the cut path
    pub dropped: u64,
    pub report: Report,
}

/// Run a full generate-replicate-capture-recover cycle
///
/// Time comes from a [`MonotonicClock`], so under a paused tokio runtime the
/// whole run is virtual and its latencies are exactly the wire delays.
pub async fn simulate(
    app: &AppConfig,
    config: &SimulationConfig,
    shutdown: ShutdownReceiver,
) -> Result<SimulationOutcome> {
    let clock = Arc::new(MonotonicClock::anchored_at(Utc::now()));
    let exporter = ReportExporter::new(clock.clone());

    let generator_config = GeneratorConfig::new(config.stream_id)
        .with_rate(config.rate_fps)
        .with_limit(RunLimit::Count(config.count));
    let mut generator = FrameGenerator::new(generator_config)?;

    let mut engine = app.build_engine()?;
    if engine.config(config.stream_id).is_none() {
        engine.register_stream(simulated_stream(app, config, generator.interval()))?;
    }

    let LoopbackWire {
        mut sink,
        path_a,
        path_b,
        control_a,
        control_b,
    } = LoopbackWire::new(&config.wire);
    let control = if config.cut_path == PathId::A {
        control_a
    } else {
        control_b
    };

    let (_pipeline_guard, pipeline_rx) = shutdown::channel();
    let (intake_tx, intake_rx) = intake_channel();
    let (_handle, pipeline_task) =
        RecoveryPipeline::new(engine, clock.now()).spawn(intake_rx, pipeline_rx);

    let capture = DualPathCapture::spawn(
        path_a,
        path_b,
        clock.clone(),
        intake_tx,
        shutdown.clone(),
        None,
    );

    let cut_task = config.cut_after.map(|after| {
        let control = control.clone();
        let path = config.cut_path;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tracing::info!(%path, "simulated_path_cut");
            control.cut();
        })
    });

    let generated = generator.run(&mut sink, clock.as_ref(), shutdown).await;
    // Closing the wire lets both captures run dry
    drop(sink);
    if let Some(task) = cut_task {
        task.abort();
    }
    let generator_report = generated?;

    let captures = collect_captures(capture.join().await)?;
    let snapshot = pipeline_task.await.context("recovery pipeline task failed")?;
    let report = exporter.render(&snapshot);

    tracing::info!(
        sent = generator_report.sent,
        dropped = control.dropped(),
        "simulation_finished"
    );
    Ok(SimulationOutcome {
        generator: generator_report,
        captures,
        dropped: control.dropped(),
        report,
    })
}

/// Stream registered by a simulation when the config file has none
///
/// The nominal interval is known here, so the failover threshold does not
/// need to be estimated.
fn simulated_stream(app: &AppConfig, config: &SimulationConfig, interval: Duration) -> StreamConfig {
    app.defaults
        .stream_config(config.stream_id)
        .with_nominal_interval(interval)
}
