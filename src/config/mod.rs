//! Daemon configuration.
//!
//! Three layers, highest priority first: CLI flags / `COLLABD_*` env vars,
//! `{data_dir}/config.toml`, built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4800;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── TOML layer ──────────────────────────────────────────────────────────────

/// Optional overrides read from `{data_dir}/config.toml`. Every field is
/// optional — absent fields fall through to the built-in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlConfig {
    /// WebSocket server port (default: 4800).
    port: Option<u16>,
    /// Log level filter string, e.g. "debug", "info,collabd=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" | "json" (default: "pretty").
    log_format: Option<String>,
    /// Bind address for the WebSocket server (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── DaemonConfig ────────────────────────────────────────────────────────────

/// Resolved daemon configuration shared across the process.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json" (structured for log aggregators).
    pub log_format: String,
    /// Bind address for the WebSocket server (COLLABD_BIND env var, default: "127.0.0.1").
    pub bind_address: String,
}

impl DaemonConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("COLLABD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let bind_address = bind_address
            .or(std::env::var("COLLABD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        Self {
            port,
            data_dir,
            log,
            log_format,
            bind_address,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/collabd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("collabd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/collabd or ~/.local/share/collabd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("collabd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("collabd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\collabd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("collabd");
        }
    }
    // Last resort: relative to the working directory.
    PathBuf::from(".collabd")
}
