//! MCP Engine - Rust Implementation
//!
//! An embeddable Model Context Protocol (MCP) server engine. Hosts register
//! tools, prompts and resources; clients discover and invoke them over
//! HTTP/SSE or a newline-delimited duplex pipe.
//!
//! # Architecture
//!
//! 1. **MCP Layer** (`mcp`) - Protocol types, sessions, dispatcher, tasks, fan-out
//! 2. **HTTP Layer** (`http`) - axum router for the HTTP/SSE transport
//! 3. **Tools Layer** (`tools`) - Demo capabilities served by the binary
//! 4. **Support** (`config`, `error`, `metrics`)
//!
//! # Features
//!
//! - **Long-running tasks**: tool calls that return a task handle which can be
//!   polled, cancelled, expire under a TTL and later yield their result
//! - **Push notifications**: list changes, logging, progress and task status
//!   delivered to every live subscriber of a session
//! - **Server-initiated requests**: elicitation and sampling, gated by the
//!   client's declared capabilities

pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod metrics;
pub mod tools;

pub use error::{Error, Result};

/// Server version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "mcp-engine";
