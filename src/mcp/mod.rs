//! Model Context Protocol (MCP) implementation.
//!
//! This module provides the protocol engine: JSON-RPC message handling,
//! sessions, capability registries, long-running tasks and push delivery.
//!
//! # Architecture
//!
//! - `protocol` - Core MCP types and message definitions
//! - `messages` - Method table and message classification
//! - `session` - Negotiated client sessions
//! - `registry` - Ordered registries with cursor pagination
//! - `tasks` - Long-running task records, TTL expiry and results
//! - `notify` - Push fan-out to SSE subscribers and the duplex pipe
//! - `server` - MCP server implementation and dispatcher
//! - `call` - Handles given to interactive tools
//! - `transport` - Duplex pipe and stdio transport

pub mod call;
pub mod handler;
pub mod messages;
pub mod notify;
pub mod progress;
pub mod prompts;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod server;
pub mod session;
pub mod tasks;
pub mod transport;

pub use call::{TaskHandle, ToolCall};
pub use handler::{CompletionHandler, InteractiveToolHandler, ToolHandler};
pub use messages::ServerNotification;
pub use notify::NotificationStream;
pub use prompts::{Prompt, PromptArgument, PromptHandler, PromptTemplate};
pub use protocol::*;
pub use resources::{Resource, ResourceHandler, ResourceTemplate, TextResource};
pub use server::{McpServer, Outcome, ServerOptions, WeakServer};
pub use tasks::{Task, TaskCallbacks, TaskStatus, TaskUpdate};
pub use transport::{IoInput, StdioTransport};
