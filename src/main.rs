//! frertester - IEEE 802.1CB FRER test tool
//!
//! Entry point for the generator, the dual-path analyzer and the in-process
//! failover simulation.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use frertester::config::AppConfig;
use frertester::frame::ethernet::MacAddr;
use frertester::frame::{PathId, StreamId};
use frertester::report::{JsonFileSink, Report, ReportSink};
use frertester::session::{self, AnalyzeOptions, SimulationConfig};
use frertester::shutdown;
use frertester::traffic::generator::{GeneratorConfig, RunLimit};
use frertester_server::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "frertester")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate R-TAG test traffic and verify FRER recovery on two paths")]
struct Cli {
    /// Config file (default: <config_dir>/frertester/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send tagged test frames
    Generate(GenerateArgs),
    /// Capture two paths and report recovery statistics
    Analyze(AnalyzeArgs),
    /// Generator, replicated wire and analyzer in one process
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Target address; repeat to replicate onto several paths
    #[arg(short, long = "interface", required = true)]
    interfaces: Vec<SocketAddr>,

    #[arg(short, long, default_value = "1")]
    stream_id: StreamId,

    /// Frames per second
    #[arg(short, long, default_value = "1000")]
    rate: f64,

    /// Number of frames to send
    #[arg(short, long, conflicts_with = "duration")]
    count: Option<u64>,

    /// Seconds to send for
    #[arg(short, long)]
    duration: Option<f64>,

    #[arg(long, default_value = "0")]
    base_seq: u16,

    /// VLAN id of the 802.1Q tag
    #[arg(long, conflicts_with = "no_vlan")]
    vlan: Option<u16>,

    /// Priority code point of the 802.1Q tag
    #[arg(long)]
    priority: Option<u8>,

    /// Send untagged frames
    #[arg(long)]
    no_vlan: bool,

    #[arg(long)]
    dst_mac: Option<MacAddr>,

    #[arg(long)]
    src_mac: Option<MacAddr>,

    /// Payload bytes after the R-TAG
    #[arg(long, default_value = "100")]
    payload_size: usize,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Listen address for path A
    #[arg(long)]
    path_a: SocketAddr,

    /// Listen address for path B
    #[arg(long)]
    path_b: SocketAddr,

    /// Stream to register; repeatable
    #[arg(long = "stream-id")]
    stream_ids: Vec<StreamId>,

    #[arg(long)]
    history_window: Option<usize>,

    #[arg(long)]
    reset_timeout_ms: Option<u64>,

    /// Register unknown streams on first sight
    #[arg(long)]
    accept_unknown: bool,

    /// Frames per path before stopping
    #[arg(short, long)]
    count: Option<u64>,

    /// Seconds to capture for
    #[arg(short, long)]
    duration: Option<f64>,

    /// Report file rewritten periodically
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    report_interval_ms: Option<u64>,

    /// Serve reports over HTTP/WebSocket on this port
    #[arg(long)]
    serve: Option<u16>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PathArg {
    A,
    B,
}

#[derive(Args)]
struct SimulateArgs {
    #[arg(long, default_value = "1")]
    stream_id: StreamId,

    #[arg(short, long, default_value = "1000")]
    count: u64,

    /// Frames per second
    #[arg(short, long, default_value = "100")]
    rate: f64,

    /// Cut a path after this many seconds
    #[arg(long)]
    cut_after: Option<f64>,

    #[arg(long, value_enum, default_value = "b")]
    cut_path: PathArg,

    #[arg(long)]
    path_a_delay_us: Option<u64>,

    #[arg(long)]
    path_b_delay_us: Option<u64>,

    /// Also write the final report here
    #[arg(long)]
    report: Option<PathBuf>,
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {flag}: {value}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn generator_config(args: &GenerateArgs) -> Result<GeneratorConfig> {
    let limit = match (args.count, args.duration) {
        (Some(count), _) => RunLimit::Count(count),
        (None, Some(secs)) => RunLimit::Duration(seconds(secs, "--duration")?),
        (None, None) => RunLimit::default(),
    };
    let mut config = GeneratorConfig::new(args.stream_id)
        .with_rate(args.rate)
        .with_limit(limit)
        .with_base_sequence(args.base_seq);

    if args.no_vlan {
        config.vlan = None;
    } else if let Some(tag) = config.vlan.as_mut() {
        if let Some(vlan_id) = args.vlan {
            if vlan_id > 4095 {
                bail!("--vlan must be 0-4095, got {vlan_id}");
            }
            tag.vlan_id = vlan_id;
        }
        if let Some(priority) = args.priority {
            if priority > 7 {
                bail!("--priority must be 0-7, got {priority}");
            }
            tag.priority = priority;
        }
    }
    if let Some(mac) = args.dst_mac {
        config.dst_mac = mac;
    }
    if let Some(mac) = args.src_mac {
        config.src_mac = mac;
    }
    config.payload_size = args.payload_size;
    Ok(config)
}

async fn generate(args: GenerateArgs, shutdown: shutdown::ShutdownReceiver) -> Result<()> {
    let config = generator_config(&args)?;
    let report = session::run_generate(config, args.interfaces, shutdown).await?;
    print_json(&report)
}

async fn analyze(
    mut app: AppConfig,
    args: AnalyzeArgs,
    shutdown: shutdown::ShutdownReceiver,
) -> Result<()> {
    if let Some(window) = args.history_window {
        app.defaults.history_window_size = window;
    }
    if let Some(ms) = args.reset_timeout_ms {
        app.defaults.reset_timeout = Duration::from_millis(ms);
    }
    if args.accept_unknown {
        app.defaults.accept_unknown_streams = true;
    }
    if let Some(ms) = args.report_interval_ms {
        app.report.interval_ms = ms;
    }
    for stream_id in &args.stream_ids {
        app.ensure_stream(*stream_id);
    }
    if app.streams.is_empty() && !app.defaults.accept_unknown_streams {
        tracing::warn!("no_streams_configured");
    }

    let duration = args
        .duration
        .map(|secs| seconds(secs, "--duration"))
        .transpose()?;
    let serve = args.serve.map(|port| ServerConfig {
        port,
        ..app.server.clone()
    });

    let options = AnalyzeOptions {
        path_a: args.path_a,
        path_b: args.path_b,
        count: args.count,
        duration,
        report_path: args.report,
        serve,
    };
    let outcome = session::run_analyze(&app, options, shutdown).await?;
    for capture in &outcome.captures {
        tracing::info!(
            path = %capture.path,
            received = capture.received,
            malformed = capture.malformed,
            "capture_summary"
        );
    }
    print_json(&outcome.report)
}

async fn simulate(
    mut app: AppConfig,
    args: SimulateArgs,
    shutdown: shutdown::ShutdownReceiver,
) -> Result<()> {
    if let Some(us) = args.path_a_delay_us {
        app.wire.path_a_delay_us = us;
    }
    if let Some(us) = args.path_b_delay_us {
        app.wire.path_b_delay_us = us;
    }
    let config = SimulationConfig {
        stream_id: args.stream_id,
        count: args.count,
        rate_fps: args.rate,
        cut_after: args
            .cut_after
            .map(|secs| seconds(secs, "--cut-after"))
            .transpose()?,
        cut_path: match args.cut_path {
            PathArg::A => PathId::A,
            PathArg::B => PathId::B,
        },
        wire: app.wire.clone(),
    };

    let outcome = session::simulate(&app, &config, shutdown).await?;
    tracing::info!(
        sent = outcome.generator.sent,
        dropped = outcome.dropped,
        actual_rate = outcome.generator.actual_rate,
        "simulation_summary"
    );
    if let Some(path) = args.report {
        write_report(JsonFileSink::new(path), &outcome.report)?;
    }
    print_json(&outcome.report)
}

fn write_report(mut sink: JsonFileSink, report: &Report) -> Result<()> {
    sink.publish(report)?;
    tracing::info!(path = %sink.path().display(), "final_report_written");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "frertester=debug"
    } else {
        "frertester=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    eprintln!("frertester v{} ({})", frertester::VERSION, frertester_core::BUILD_DATE);

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let app = AppConfig::load(&config_path);

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown_requested");
        let _ = shutdown_tx.send(true);
    })
    .context("failed to install Ctrl+C handler")?;

    match cli.command {
        Command::Generate(args) => generate(args, shutdown_rx).await,
        Command::Analyze(args) => analyze(app, args, shutdown_rx).await,
        Command::Simulate(args) => simulate(app, args, shutdown_rx).await,
    }
}
