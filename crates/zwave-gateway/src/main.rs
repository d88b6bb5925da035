//! Z-Wave gateway: entry point.
//!
//! Serves the JSON-over-WebSocket gateway protocol on top of a controller
//! driver.  This binary links the in-memory simulated driver, seeded with a
//! few demo nodes, so the gateway can be exercised without radio hardware.
//!
//! # Usage
//!
//! ```text
//! zwave-gateway [OPTIONS]
//!
//! Options:
//!   --host <HOST>              Listen address [default: 0.0.0.0]
//!   --port <PORT>              Listen port [default: 3000]
//!   --config <PATH>            Optional TOML configuration file
//!   --simulated-nodes <COUNT>  Demo nodes in the simulated driver [default: 3]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                        | Description              |
//! |---------------------------------|--------------------------|
//! | `ZWAVE_GATEWAY_HOST`            | Listen address           |
//! | `ZWAVE_GATEWAY_PORT`            | Listen port              |
//! | `ZWAVE_GATEWAY_CONFIG`          | Configuration file path  |
//! | `ZWAVE_GATEWAY_SIMULATED_NODES` | Demo node count          |
//!
//! CLI arguments win over environment variables, which win over the file,
//! which wins over the built-in defaults.  Log verbosity follows `RUST_LOG`.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zwave_core::testing::SimulatedDriver;
use zwave_core::{NodeId, ValueId, ValueMetadata, ValueType};
use zwave_gateway::application::Gateway;
use zwave_gateway::domain::{load_config, FileConfig, GatewayConfig};
use zwave_gateway::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Z-Wave WebSocket gateway.
#[derive(Debug, Parser)]
#[command(
    name = "zwave-gateway",
    about = "WebSocket gateway exposing a Z-Wave controller driver",
    version
)]
struct Cli {
    /// IP address to listen on.
    #[arg(long, env = "ZWAVE_GATEWAY_HOST")]
    host: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "ZWAVE_GATEWAY_PORT")]
    port: Option<u16>,

    /// Path to a TOML configuration file.
    #[arg(long, env = "ZWAVE_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Number of demo nodes the simulated driver starts with.
    #[arg(long, env = "ZWAVE_GATEWAY_SIMULATED_NODES")]
    simulated_nodes: Option<u16>,
}

impl Cli {
    /// Layers the CLI over the optional config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if host and
    /// port do not form a socket address.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let file = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => FileConfig::default(),
        };
        file.resolve(self.host, self.port, self.simulated_nodes)
            .context("invalid gateway configuration")
    }
}

// ── Simulated driver ──────────────────────────────────────────────────────────

/// A driver with `count` ready nodes (ids start at 2; 1 is the controller).
fn simulated_driver(count: u16) -> Arc<SimulatedDriver> {
    let driver = Arc::new(SimulatedDriver::new());
    for offset in 0..count {
        let node_id: NodeId = 2 + offset;
        let node = driver.add_node(node_id);
        node.add_value(
            ValueId::new(37, "currentValue"),
            ValueMetadata::new(ValueType::Boolean)
                .with_label("Current value")
                .read_only(),
            Some(json!(false)),
        );
        node.add_value(
            ValueId::new(37, "targetValue"),
            ValueMetadata::new(ValueType::Boolean).with_label("Target value"),
            Some(json!(false)),
        );
        node.set_ready(true);
    }
    driver
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_gateway_config()?;

    let driver = simulated_driver(config.simulated_nodes);
    let gateway = Gateway::new(driver);
    info!(
        "Z-Wave gateway starting on {} with {} simulated nodes",
        config.bind_addr, config.simulated_nodes
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, gateway, running).await?;

    info!("Z-Wave gateway stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use zwave_core::Driver;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["zwave-gateway"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_cli_without_arguments_uses_defaults() {
        // Arrange: no overrides; env vars are not set in the test environment
        let cli = Cli {
            host: None,
            port: None,
            config: None,
            simulated_nodes: None,
        };

        // Act
        let config = cli.into_gateway_config().unwrap();

        // Assert
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.simulated_nodes, 3);
    }

    #[test]
    fn test_cli_port_override() {
        let cli = cli(&["--port", "9999"]);
        assert_eq!(cli.port, Some(9999));
    }

    #[test]
    fn test_cli_host_and_port_resolve_to_bind_addr() {
        let config = cli(&["--host", "127.0.0.1", "--port", "4000"])
            .into_gateway_config()
            .unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:4000");
    }

    #[test]
    fn test_cli_invalid_host_returns_error() {
        let result = Cli {
            host: Some("not.an.ip".to_string()),
            port: None,
            config: None,
            simulated_nodes: None,
        }
        .into_gateway_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_missing_config_file_returns_error() {
        let result = Cli {
            host: None,
            port: None,
            config: Some(PathBuf::from("/nonexistent/zwave-gateway.toml")),
            simulated_nodes: None,
        }
        .into_gateway_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_simulated_driver_seeds_ready_nodes() {
        let driver = simulated_driver(2);
        let controller = driver.controller();
        assert_eq!(controller.node_ids(), vec![2, 3]);
        let snapshot = controller.node(2).unwrap().snapshot().unwrap();
        assert!(snapshot.ready);
        assert_eq!(snapshot.values.len(), 2);
    }
}
