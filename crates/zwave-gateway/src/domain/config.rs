//! Gateway configuration types.
//!
//! [`GatewayConfig`] is the single source of truth for runtime settings.  It
//! is assembled in `main` from three layers, highest priority first:
//!
//! 1. CLI arguments (or their `ZWAVE_GATEWAY_*` environment fallbacks)
//! 2. An optional TOML file passed with `--config`
//! 3. The defaults below
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [simulation]
//! nodes = 3
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Host and port do not form a socket address.
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
}

/// All runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the WebSocket server binds to.
    pub bind_addr: SocketAddr,

    /// How long the accept loop waits before re-checking the shutdown flag.
    pub accept_poll_interval: Duration,

    /// Number of demo nodes the simulated driver starts with.
    pub simulated_nodes: u16,
}

impl Default for GatewayConfig {
    /// | Field                | Default        |
    /// |----------------------|----------------|
    /// | bind_addr            | `0.0.0.0:3000` |
    /// | accept_poll_interval | 200 ms         |
    /// | simulated_nodes      | 3              |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], default_port())),
            accept_poll_interval: Duration::from_millis(200),
            simulated_nodes: default_simulated_nodes(),
        }
    }
}

// ── File schema ───────────────────────────────────────────────────────────────

/// Contents of the optional TOML configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub simulation: SimulationSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationSection {
    #[serde(default = "default_simulated_nodes")]
    pub nodes: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_simulated_nodes() -> u16 {
    3
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            nodes: default_simulated_nodes(),
        }
    }
}

impl FileConfig {
    /// Builds a [`GatewayConfig`], letting `host` / `port` / `nodes` override
    /// the file's values when present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if the host is not an IP address.
    pub fn resolve(
        self,
        host: Option<String>,
        port: Option<u16>,
        nodes: Option<u16>,
    ) -> Result<GatewayConfig, ConfigError> {
        let host = host.unwrap_or(self.server.host);
        let port = port.unwrap_or(self.server.port);
        let addr = format!("{host}:{port}");
        let bind_addr = addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidAddress(addr))?;
        Ok(GatewayConfig {
            bind_addr,
            simulated_nodes: nodes.unwrap_or(self.simulation.nodes),
            ..GatewayConfig::default()
        })
    }
}

/// Loads a [`FileConfig`] from `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
