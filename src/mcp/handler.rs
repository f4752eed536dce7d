//! Capability handler traits and tool-building helpers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mcp::call::ToolCall;
use crate::mcp::protocol::{CompleteParams, CompleteResult, ContentBlock, Tool, ToolResult};

/// A tool that answers synchronously from its arguments.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Execute the tool. An `Err` is reported to the client as a tool
    /// result with `isError: true`, not as a protocol error.
    async fn execute(&self, arguments: HashMap<String, Value>) -> Result<ToolResult>;
}

/// A tool that drives its own reply through a [`ToolCall`] handle.
///
/// The handler may answer inline, start a task, or move the handle into a
/// spawned future and answer later. It may also elicit input from the
/// client or request sampling before it answers.
#[async_trait]
pub trait InteractiveToolHandler: Send + Sync {
    fn definition(&self) -> Tool;

    async fn invoke(&self, call: ToolCall);
}

/// Answers `completion/complete`.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn complete(&self, params: CompleteParams) -> Result<CompleteResult>;
}

/// The two handler shapes a registered tool can have.
#[derive(Clone)]
pub enum ToolKind {
    Simple(Arc<dyn ToolHandler>),
    Interactive(Arc<dyn InteractiveToolHandler>),
}

/// A registered tool: its advertised definition plus its handler.
#[derive(Clone)]
pub struct ToolEntry {
    pub tool: Tool,
    pub handler: ToolKind,
}

impl ToolEntry {
    pub fn simple(handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            tool: handler.definition(),
            handler: ToolKind::Simple(handler),
        }
    }

    pub fn interactive(handler: Arc<dyn InteractiveToolHandler>) -> Self {
        Self {
            tool: handler.definition(),
            handler: ToolKind::Interactive(handler),
        }
    }
}

/// Helper macro for creating tool input schemas.
#[macro_export]
macro_rules! tool_schema {
    ($($json:tt)+) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $($json)+
            }
        })
    };
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        ..ToolResult::default()
    }
}

/// Helper to create a successful result that also carries structured output.
pub fn structured_result(text: impl Into<String>, structured: Value) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        structured_content: Some(structured),
        ..ToolResult::default()
    }
}

/// Helper to create an error tool result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: true,
        ..ToolResult::default()
    }
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    get_optional_string_arg(args, name)
        .ok_or_else(|| Error::InvalidParams(format!("Missing required argument: {name}")))
}

/// Helper to extract an optional string argument.
pub fn get_optional_string_arg(args: &HashMap<String, Value>, name: &str) -> Option<String> {
    args.get(name).and_then(Value::as_str).map(String::from)
}

/// Helper to extract an optional unsigned integer argument.
pub fn get_u64_arg(args: &HashMap<String, Value>, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

/// Helper to extract a boolean argument with a default.
pub fn get_bool_arg(args: &HashMap<String, Value>, name: &str, default: bool) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(default)
}
