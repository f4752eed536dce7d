//! MCP Server Integration Tests
//!
//! These tests spawn the server binary and talk JSON-RPC to it over stdio.

#![allow(deprecated)] // Allow deprecated cargo_bin for now

use assert_cmd::cargo::CommandCargoExt;
use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

const PROTOCOL_VERSION: &str = "2025-11-25";

/// MCP Test Client that communicates with the server via stdio
struct McpTestClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    request_id: i64,
}

impl McpTestClient {
    /// Spawn a new MCP server and connect to it
    fn spawn() -> Result<Self, Box<dyn std::error::Error>> {
        let mut child = Command::cargo_bin("mcp-engine")?
            .arg("--transport")
            .arg("stdio")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().ok_or("Failed to get stdin")?;
        let stdout = BufReader::new(child.stdout.take().ok_or("Failed to get stdout")?);

        Ok(Self {
            child,
            stdin,
            stdout,
            request_id: 0,
        })
    }

    fn send_line(&mut self, line: &str) -> Result<(), Box<dyn std::error::Error>> {
        writeln!(self.stdin, "{}", line)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        let mut line = String::new();
        self.stdout.read_line(&mut line)?;
        Ok(line.trim_end().to_string())
    }

    /// Send a JSON-RPC request and wait for its response, skipping pushes.
    fn request(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        self.request_id += 1;
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.request_id,
            "method": method,
            "params": params
        });
        self.send_line(&serde_json::to_string(&request)?)?;

        loop {
            let message: Value = serde_json::from_str(&self.read_line()?)?;
            if message.get("method").is_none() && message["id"] == self.request_id {
                return Ok(message);
            }
        }
    }

    fn initialize(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "roots": { "listChanged": true } },
                "clientInfo": { "name": "test-client", "version": "1.0.0" }
            }),
        )
    }

    fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        self.request(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn initialized_client() -> McpTestClient {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");
    let response = client.initialize().expect("Failed to initialize");
    assert!(response.get("result").is_some(), "Expected result: {response}");
    client
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_binary_help() {
    AssertCommand::cargo_bin("mcp-engine")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("MCP server"));
}

#[test]
fn test_binary_version() {
    AssertCommand::cargo_bin("mcp-engine")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mcp-engine"));
}

#[test]
fn test_exits_cleanly_on_eof() {
    let initialize = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": { "protocolVersion": PROTOCOL_VERSION }
    });

    AssertCommand::cargo_bin("mcp-engine")
        .unwrap()
        .arg("--transport")
        .arg("stdio")
        .write_stdin(format!("{initialize}\n"))
        .assert()
        .success()
        .stdout(predicate::str::contains(PROTOCOL_VERSION));
}

#[test]
fn test_mcp_initialize() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");

    let response = client.initialize().expect("Failed to initialize");
    let result = &response["result"];
    assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(result["serverInfo"]["name"], "mcp-engine");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
    assert!(result["capabilities"].get("completions").is_some());

    let again = client.initialize().expect("Failed to send initialize");
    assert_eq!(again["error"]["code"], -32600);
}

#[test]
fn test_request_before_initialize_rejected() {
    let mut client = McpTestClient::spawn().expect("Failed to spawn MCP server");

    client
        .send_line(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
        .unwrap();
    assert_eq!(client.read_line().unwrap(), "Unknown session id");
}

#[test]
fn test_mcp_list_tools() {
    let mut client = initialized_client();
    let response = client.request("tools/list", json!({})).unwrap();

    let tools = response["result"]["tools"]
        .as_array()
        .expect("tools should be array");
    let tool_names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(tool_names, vec!["async_echo", "echo", "task_echo"]);
    assert!(response["result"].get("nextCursor").is_none());
}

#[test]
fn test_mcp_call_echo() {
    let mut client = initialized_client();
    let response = client.call_tool("echo", json!({ "message": "hi" })).unwrap();

    let result = &response["result"];
    assert_eq!(result["content"][0]["text"], "hi");
    assert_eq!(result["structuredContent"]["echoedMessage"], "hi");
    assert!(result.get("isError").is_none());

    let response = client.call_tool("echo", json!({})).unwrap();
    assert_eq!(response["result"]["isError"], true);
}

#[test]
fn test_mcp_invalid_tool() {
    let mut client = initialized_client();
    let response = client.call_tool("nonexistent_tool", json!({})).unwrap();
    assert_eq!(response["error"]["code"], -32601);
}

#[test]
fn test_mcp_task_lifecycle() {
    let mut client = initialized_client();

    let response = client
        .request(
            "tools/call",
            json!({ "name": "task_echo", "arguments": { "message": "later" }, "task": { "ttl": 60000 } }),
        )
        .unwrap();
    let task = &response["result"]["task"];
    assert_eq!(task["status"], "working");
    assert_eq!(task["ttl"], 60000);
    let task_id = task["taskId"].as_str().unwrap().to_string();

    let polled = client
        .request("tasks/get", json!({ "taskId": task_id }))
        .unwrap();
    assert_eq!(polled["result"]["status"], "working");

    let listed = client.request("tasks/list", json!({})).unwrap();
    assert_eq!(listed["result"]["tasks"].as_array().unwrap().len(), 1);

    let output = client
        .request("tasks/result", json!({ "taskId": task_id }))
        .unwrap();
    assert_eq!(output["result"]["structuredContent"]["echoedMessage"], "later");

    let cancelled = client
        .request("tasks/cancel", json!({ "taskId": task_id }))
        .unwrap();
    assert_eq!(cancelled["result"]["status"], "cancelled");
}

#[test]
fn test_mcp_prompts_and_resources() {
    let mut client = initialized_client();

    let prompts = client.request("prompts/list", json!({})).unwrap();
    assert_eq!(prompts["result"]["prompts"].as_array().unwrap().len(), 2);

    let prompt = client
        .request(
            "prompts/get",
            json!({ "name": "greeting", "arguments": { "name": "Ada" } }),
        )
        .unwrap();
    assert_eq!(
        prompt["result"]["messages"][0]["content"]["text"],
        "Please greet Ada warmly."
    );

    let readme = client
        .request("resources/read", json!({ "uri": "memo://readme" }))
        .unwrap();
    assert!(readme["result"]["contents"][0]["text"]
        .as_str()
        .unwrap()
        .contains("task_echo"));

    let fallback = client
        .request("resources/read", json!({ "uri": "test:///a.txt" }))
        .unwrap();
    assert_eq!(
        fallback["result"]["contents"][0]["text"],
        "Contents of test file a.txt"
    );

    let missing = client
        .request("resources/read", json!({ "uri": "memo://missing" }))
        .unwrap();
    assert_eq!(missing["error"]["code"], -32602);
}

#[test]
fn test_mcp_completion() {
    let mut client = initialized_client();
    let response = client
        .request(
            "completion/complete",
            json!({
                "ref": { "type": "ref/prompt", "name": "greeting" },
                "argument": { "name": "name", "value": "Gr" }
            }),
        )
        .unwrap();
    assert_eq!(response["result"]["completion"]["values"], json!(["Grace"]));
}
