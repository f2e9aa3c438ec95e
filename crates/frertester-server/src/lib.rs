//! frertester Web Server - Axum report exporter
//!
//! Publishes FRER statistics to an external dashboard: point-in-time reports
//! over REST and a live report stream over WebSocket. Nothing is rendered
//! here; the dashboard consumes the JSON.

pub mod api;
pub mod ws;

use axum::http::{header, HeaderValue};
use axum::Router;
use frertester_core::pipeline::PipelineHandle;
use frertester_core::report::{BroadcastSink, ReportExporter};
use frertester_core::shutdown::{self, ShutdownReceiver};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the recovery pipeline task
    pub pipeline: PipelineHandle,
    /// Renders pipeline snapshots into reports
    pub exporter: ReportExporter,
    /// WebSocket broadcast channel (serialized reports)
    pub ws_tx: broadcast::Sender<String>,
    /// Server configuration
    pub config: ServerConfig,
}

fn default_port() -> u16 {
    8920
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

/// Server configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl AppState {
    pub fn new(pipeline: PipelineHandle, exporter: ReportExporter, config: ServerConfig) -> Self {
        let (ws_tx, _) = broadcast::channel(256);
        Self {
            pipeline,
            exporter,
            ws_tx,
            config,
        }
    }

    /// Report sink that fans out to every connected WebSocket client
    pub fn broadcast_sink(&self) -> BroadcastSink {
        BroadcastSink::new(self.ws_tx.clone())
    }
}

/// Build the Axum router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", axum::routing::get(api::get_status))
        .route("/api/v1/report", axum::routing::get(api::get_report))
        .route(
            "/api/v1/streams",
            axum::routing::get(api::list_streams).post(api::create_stream),
        )
        .route(
            "/api/v1/streams/{id}",
            axum::routing::get(api::get_stream).delete(api::delete_stream),
        )
        // WebSocket
        .route("/api/v1/ws", axum::routing::get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state)
}

/// Serve on an already bound listener until shutdown is requested
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: ShutdownReceiver,
) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown::requested(&mut shutdown).await })
        .await?;
    tracing::info!("report_server_stopped");
    Ok(())
}

/// Bind the configured address and serve
pub async fn start_server(state: AppState, shutdown: ShutdownReceiver) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "report_server_listening");
    serve(listener, state, shutdown).await
}
