//! Echo tools: one per call shape (direct, interactive, task).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::mcp::call::ToolCall;
use crate::mcp::handler::{get_string_arg, structured_result, InteractiveToolHandler, ToolHandler};
use crate::mcp::protocol::{TaskSupport, Tool, ToolResult};
use crate::mcp::tasks::{Task, TaskCallbacks, TaskStatus, TaskUpdate};

fn message_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "message": { "type": "string", "description": "Text to echo back" }
        },
        "required": ["message"]
    })
}

fn echoed_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "echoedMessage": { "type": "string" }
        },
        "required": ["echoedMessage"]
    })
}

fn echoed(message: &str) -> ToolResult {
    structured_result(message, json!({ "echoedMessage": message }))
}

/// Echo tool.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> Tool {
        Tool::new(
            "echo",
            "A simple tool that echoes back the input message.",
            message_schema(),
        )
        .with_title("Echo Tool")
        .with_output_schema(echoed_schema())
    }

    async fn execute(&self, args: HashMap<String, Value>) -> Result<ToolResult> {
        let message = get_string_arg(&args, "message")?;
        Ok(echoed(&message))
    }
}

/// Echoes after a few ticks, reporting progress on each one.
pub struct AsyncEchoTool {
    tick: Duration,
    ticks: u64,
}

impl AsyncEchoTool {
    pub fn new(tick: Duration, ticks: u64) -> Self {
        Self { tick, ticks }
    }
}

impl Default for AsyncEchoTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 5)
    }
}

#[async_trait]
impl InteractiveToolHandler for AsyncEchoTool {
    fn definition(&self) -> Tool {
        Tool::new(
            "async_echo",
            "An asynchronous tool that echoes back the input message after a delay.",
            message_schema(),
        )
        .with_title("Async Echo Tool")
        .with_output_schema(echoed_schema())
    }

    async fn invoke(&self, call: ToolCall) {
        let message = match get_string_arg(call.arguments(), "message") {
            Ok(message) => message,
            Err(e) => {
                let _ = call.fail(format!("Invalid arguments for async echo tool: {e}"));
                return;
            }
        };

        let (tick, ticks) = (self.tick, self.ticks);
        tokio::spawn(async move {
            let progress = call.progress(Some(ticks));
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            for count in 0..ticks {
                interval.tick().await;
                if let Some(reporter) = &progress {
                    if reporter.report(count, Some("reticulating splines ...")).is_err() {
                        return;
                    }
                }
            }
            debug!("Async echo completed");
            let _ = call.finish(echoed(&message));
        });
    }
}

/// Echoes through a task that completes after `duration`.
pub struct TaskEchoTool {
    duration: Duration,
}

impl TaskEchoTool {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for TaskEchoTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

struct EchoTask {
    deadline: Instant,
    cancelled: AtomicBool,
}

impl EchoTask {
    fn refresh(&self) -> TaskUpdate {
        if self.cancelled.load(Ordering::SeqCst) {
            return TaskUpdate::status(TaskStatus::Cancelled).with_message("Task is cancelled");
        }
        let now = Instant::now();
        if now >= self.deadline {
            return TaskUpdate::status(TaskStatus::Completed).with_message("Task is done.");
        }
        let remaining = self.deadline.duration_since(now).as_secs();
        TaskUpdate::message(format!("Time remaining: {remaining} seconds"))
    }
}

#[async_trait]
impl InteractiveToolHandler for TaskEchoTool {
    fn definition(&self) -> Tool {
        Tool::new(
            "task_echo",
            "A tool that creates a task which echoes back the input message after a delay.",
            message_schema(),
        )
        .with_title("Task Echo Tool")
        .with_output_schema(echoed_schema())
        .with_task_support(TaskSupport::Required)
    }

    async fn invoke(&self, call: ToolCall) {
        let message = match get_string_arg(call.arguments(), "message") {
            Ok(message) => message,
            Err(e) => {
                let _ = call.fail(format!("Invalid arguments for task echo tool: {e}"));
                return;
            }
        };

        let state = Arc::new(EchoTask {
            deadline: Instant::now() + self.duration,
            cancelled: AtomicBool::new(false),
        });
        let callbacks = TaskCallbacks::new(move || {
            let message = message.clone();
            async move { Ok(echoed(&message)) }
        })
        .with_refresh({
            let state = state.clone();
            move |_: &Task| state.refresh()
        })
        .with_cancel({
            let state = state.clone();
            move || state.cancelled.store(true, Ordering::SeqCst)
        })
        .with_poll_interval(500);

        let handle = match call.start_task(callbacks) {
            Ok(handle) => handle,
            Err(e) => {
                debug!(error = %e, "Could not start echo task");
                return;
            }
        };

        // Push the completion instead of waiting for the next poll.
        tokio::spawn(async move {
            tokio::time::sleep_until(state.deadline).await;
            if !state.cancelled.load(Ordering::SeqCst) {
                let _ = handle.update(state.refresh());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{Implementation, PROTOCOL_VERSION};
    use crate::mcp::server::{McpServer, Outcome};
    use tokio_stream::StreamExt;

    async fn send(server: &McpServer, message: Value) -> Value {
        match server
            .handle_message(Some("s"), message.to_string().as_bytes())
            .await
        {
            Outcome::Reply(response) => serde_json::to_value(response).unwrap(),
            other => panic!("expected reply, got {other:?}"),
        }
    }

    async fn setup() -> McpServer {
        let server = McpServer::new(Implementation::new("echo-test", "0.1"));
        server.add_tool(EchoTool);
        server.add_interactive_tool(AsyncEchoTool::new(Duration::from_millis(10), 3));
        server.add_interactive_tool(TaskEchoTool::new(Duration::from_secs(10)));
        send(
            &server,
            json!({"jsonrpc": "2.0", "id": 0, "method": "initialize",
                   "params": {"protocolVersion": PROTOCOL_VERSION}}),
        )
        .await;
        server
    }

    fn call(id: u64, params: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": "tools/call", "params": params})
    }

    #[tokio::test]
    async fn test_echo() {
        let tool = EchoTool;
        let mut args = HashMap::new();
        args.insert("message".to_string(), json!("hi"));

        let result = tool.execute(args).await.unwrap();
        assert_eq!(result.structured_content, Some(json!({"echoedMessage": "hi"})));
        assert!(!result.is_error);

        assert!(tool.execute(HashMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_async_echo_reports_progress() {
        let server = setup().await;
        let mut stream = server.subscribe("s").unwrap();

        let reply = send(
            &server,
            call(1, json!({"name": "async_echo", "arguments": {"message": "later"},
                           "_meta": {"progressToken": "p1"}})),
        )
        .await;
        assert_eq!(reply["result"]["structuredContent"]["echoedMessage"], "later");

        for expected in 0..3 {
            let pushed: Value = serde_json::from_str(&stream.next().await.unwrap()).unwrap();
            assert_eq!(pushed["method"], "notifications/progress");
            assert_eq!(pushed["params"]["progressToken"], "p1");
            assert_eq!(pushed["params"]["progress"], expected);
            assert_eq!(pushed["params"]["total"], 3);
        }
    }

    #[tokio::test]
    async fn test_async_echo_rejects_missing_message() {
        let server = setup().await;
        let reply = send(&server, call(1, json!({"name": "async_echo"}))).await;
        assert_eq!(reply["result"]["isError"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_echo_completes_and_pushes() {
        let server = setup().await;
        let mut stream = server.subscribe("s").unwrap();

        let reply = send(
            &server,
            call(1, json!({"name": "task_echo", "arguments": {"message": "hello"}, "task": {"ttl": 60000}})),
        )
        .await;
        let task_id = reply["result"]["task"]["taskId"].as_str().unwrap().to_string();
        assert_eq!(reply["result"]["task"]["status"], "working");
        assert_eq!(reply["result"]["task"]["pollInterval"], 500);

        let polled = send(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "tasks/get",
                                          "params": {"taskId": task_id}})).await;
        assert_eq!(polled["result"]["status"], "working");
        assert_eq!(polled["result"]["statusMessage"], "Time remaining: 10 seconds");

        tokio::time::advance(Duration::from_secs(11)).await;
        let pushed: Value = serde_json::from_str(&stream.next().await.unwrap()).unwrap();
        assert_eq!(pushed["method"], "notifications/tasks/status");
        assert_eq!(pushed["params"]["status"], "completed");

        let result = send(&server, json!({"jsonrpc": "2.0", "id": 3, "method": "tasks/result",
                                          "params": {"taskId": task_id}})).await;
        assert_eq!(result["result"]["structuredContent"]["echoedMessage"], "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_echo_cancel() {
        let server = setup().await;

        let reply = send(
            &server,
            call(1, json!({"name": "task_echo", "arguments": {"message": "x"}, "task": {}})),
        )
        .await;
        let task_id = reply["result"]["task"]["taskId"].as_str().unwrap().to_string();

        let cancelled = send(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "tasks/cancel",
                                             "params": {"taskId": task_id}})).await;
        assert_eq!(cancelled["result"]["status"], "cancelled");

        let polled = send(&server, json!({"jsonrpc": "2.0", "id": 3, "method": "tasks/get",
                                          "params": {"taskId": task_id}})).await;
        assert_eq!(polled["result"]["status"], "cancelled");
    }

    #[tokio::test]
    async fn test_task_echo_requires_task() {
        let server = setup().await;
        let reply = send(
            &server,
            call(1, json!({"name": "task_echo", "arguments": {"message": "x"}})),
        )
        .await;
        assert_eq!(reply["error"]["code"], -32602);
    }
}
