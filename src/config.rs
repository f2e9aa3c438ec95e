//! Persistent application configuration
//!
//! Stores the registered streams, recovery defaults, report output and
//! server address in a JSON file at `<config_dir>/frertester/config.json`.
//! Every field has a default, so a partial file is valid.

use frertester_core::recovery::{RecoveryDefaults, RecoveryEngine, StreamConfig};
use frertester_core::traffic::wire::WireConfig;
use frertester_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_report_interval_ms() -> u64 {
    1000
}

/// Where and how often reports are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// JSON file rewritten on every periodic report (None = no file)
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_report_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval_ms: default_report_interval_ms(),
        }
    }
}

impl ReportConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Persistent application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Streams registered before the first frame arrives
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
    /// Settings for streams without explicit values
    #[serde(default)]
    pub defaults: RecoveryDefaults,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Path delays used by `simulate`
    #[serde(default)]
    pub wire: WireConfig,
}

impl AppConfig {
    /// Config file path: `<config_dir>/frertester/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("frertester")
            .join("config.json")
    }

    /// Load config from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "config_loaded");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "config_parse_failed_using_defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "config_missing_using_defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "config_saved");
        Ok(())
    }

    /// Recovery engine with every configured stream registered
    pub fn build_engine(&self) -> anyhow::Result<RecoveryEngine> {
        let mut engine = RecoveryEngine::with_defaults(self.defaults.clone());
        for stream in &self.streams {
            engine.register_stream(stream.clone())?;
        }
        Ok(engine)
    }

    /// Make sure `stream_id` is configured, using the defaults if it is new
    pub fn ensure_stream(&mut self, stream_id: u16) {
        if !self.streams.iter().any(|s| s.stream_id == stream_id) {
            self.streams.push(self.defaults.stream_config(stream_id));
        }
    }
}
