//! MCP Engine Server - Rust Implementation
//!
//! Serves the demo capability set over stdio or HTTP/SSE.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcp_engine_rs::config::{Args, Config, Transport};
use mcp_engine_rs::mcp::protocol::Implementation;
use mcp_engine_rs::mcp::server::{McpServer, ServerOptions};
use mcp_engine_rs::mcp::transport::StdioTransport;
use mcp_engine_rs::{tools, SERVER_NAME, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Logs go to stderr; stdout belongs to the stdio transport.
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Build configuration from args
    let config: Config = args.into();

    info!("MCP Engine v{}", VERSION);
    info!("Transport: {:?}", config.transport);

    let mut implementation = Implementation::new(SERVER_NAME, VERSION);
    implementation.title = Some("MCP Engine".to_string());
    implementation.description = Some("Embeddable MCP server engine".to_string());
    let server = McpServer::with_options(implementation, ServerOptions::from(&config));

    tools::register_all(&server);

    match config.transport {
        Transport::Stdio => {
            StdioTransport::new(server)
                .run()
                .await
                .context("stdio transport failed")?;
        }
        Transport::Http => {
            mcp_engine_rs::http::start_server(server, &config)
                .await
                .with_context(|| format!("HTTP server on {} failed", config.bind_address()))?;
        }
    }

    Ok(())
}
