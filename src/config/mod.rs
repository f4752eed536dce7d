//! Configuration management for the MCP engine.

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::mcp::registry::DEFAULT_PAGE_SIZE;
use crate::mcp::server::ServerOptions;
use crate::mcp::tasks::DEFAULT_POLL_INTERVAL_MS;

/// Command-line arguments for the MCP engine server.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Embeddable MCP server engine with long-running task support")]
pub struct Args {
    /// Transport mode: stdio or http
    #[arg(short, long, default_value = "stdio", env = "MCP_ENGINE_TRANSPORT")]
    pub transport: Transport,

    /// HTTP bind address (only for http transport)
    #[arg(long, default_value = "127.0.0.1", env = "MCP_ENGINE_HOST")]
    pub host: String,

    /// HTTP port (only for http transport)
    #[arg(short, long, default_value = "8249", env = "MCP_ENGINE_PORT")]
    pub port: u16,

    /// Answer CORS preflight requests
    #[arg(long, env = "MCP_ENGINE_CORS")]
    pub cors: bool,

    /// Enable debug logging
    #[arg(short, long, env = "MCP_ENGINE_DEBUG")]
    pub debug: bool,

    /// Maximum items per list page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, env = "MCP_ENGINE_PAGE_SIZE")]
    pub page_size: usize,

    /// Poll interval suggested to clients for new tasks (milliseconds)
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS, env = "MCP_ENGINE_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    /// Expose Prometheus metrics at /metrics
    #[arg(long, env = "MCP_ENGINE_METRICS")]
    pub metrics: bool,

    /// Instructions returned to clients from initialize
    #[arg(long, env = "MCP_ENGINE_INSTRUCTIONS")]
    pub instructions: Option<String>,
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transport mode
    pub transport: Transport,
    /// HTTP bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// CORS preflight enabled
    pub cors: bool,
    /// Debug mode
    pub debug: bool,
    /// Page size for list results
    pub page_size: usize,
    /// Default task poll interval
    pub poll_interval_ms: u64,
    /// Metrics endpoint enabled
    pub metrics: bool,
    /// Instructions sent on initialize
    pub instructions: Option<String>,
}

impl Config {
    /// Socket address the HTTP transport binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            transport: args.transport,
            host: args.host,
            port: args.port,
            cors: args.cors,
            debug: args.debug,
            page_size: args.page_size.max(1),
            poll_interval_ms: args.poll_interval_ms,
            metrics: args.metrics,
            instructions: args.instructions,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            host: "127.0.0.1".to_string(),
            port: 8249,
            cors: false,
            debug: false,
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            metrics: false,
            instructions: None,
        }
    }
}

impl From<&Config> for ServerOptions {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            default_poll_interval_ms: config.poll_interval_ms,
            instructions: config.instructions.clone(),
        }
    }
}
