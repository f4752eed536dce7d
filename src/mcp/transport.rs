//! Duplex pipe and stdio transport.
//!
//! The pipe is the message-per-call alternative to HTTP: bytes go in through
//! an [`IoInput`], and everything the server produces (replies, pushes,
//! server-initiated requests) comes out of one output callback. All traffic
//! belongs to the implicit session [`IO_SESSION_ID`].

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::mcp::notify::OutputHandler;
use crate::mcp::server::{McpServer, Outcome, WeakServer};
use crate::mcp::session::IO_SESSION_ID;

/// Input side of a bound duplex pipe.
#[derive(Clone)]
pub struct IoInput {
    server: WeakServer,
    output: OutputHandler,
}

impl IoInput {
    pub(crate) fn new(server: WeakServer, output: OutputHandler) -> Self {
        Self { server, output }
    }

    /// Handle one message and write whatever it produces to the output.
    pub async fn process(&self, message: &[u8]) -> Result<()> {
        let server = self.server.upgrade().ok_or(Error::ServerShutDown)?;
        match server.handle_message(Some(IO_SESSION_ID), message).await {
            Outcome::Reply(response) => (self.output)(serde_json::to_string(&response)?),
            Outcome::Accepted => {}
            Outcome::Rejected(reason) => {
                warn!(%reason, "Pipe message rejected");
                (self.output)(reason.to_string());
            }
        }
        Ok(())
    }

    /// Handle one message in the background.
    pub fn feed(&self, message: Vec<u8>) {
        let input = self.clone();
        tokio::spawn(async move {
            if let Err(e) = input.process(&message).await {
                debug!(error = %e, "Dropped pipe message");
            }
        });
    }
}

/// Longest stdin line accepted by default, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// Newline-delimited JSON-RPC over stdin/stdout.
pub struct StdioTransport {
    server: McpServer,
    max_line_length: usize,
}

impl StdioTransport {
    pub fn new(server: McpServer) -> Self {
        Self {
            server,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Lines longer than this are discarded unread.
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Serve until stdin closes.
    pub async fn run(self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve newline-delimited messages from `reader`, writing to `output`,
    /// until `reader` reaches EOF.
    pub async fn serve<R, W>(self, reader: R, mut output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let input = self.server.bind_io(move |payload| {
            let _ = tx.send(payload);
        })?;

        let writer = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                trace!("Sending: {}", payload);
                if let Err(e) = write_line(&mut output, &payload).await {
                    error!("Error writing to stdout: {}", e);
                    break;
                }
            }
        });

        info!("Serving MCP over stdio");
        let codec = LinesCodec::new_with_max_length(self.max_line_length);
        let mut lines = FramedRead::new(reader, codec);
        let mut in_flight = JoinSet::new();
        // A decode error is followed by one `None` before reading resumes.
        let mut resuming = false;
        loop {
            let line = match lines.next().await {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(max = self.max_line_length, "Discarding over-long stdin line");
                    resuming = true;
                    continue;
                }
                Some(Err(e)) => {
                    error!("Error reading stdin: {}", e);
                    break;
                }
                None if resuming => {
                    resuming = false;
                    continue;
                }
                None => break,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            trace!("Received: {}", line);

            // Each message runs on its own so a tool waiting on the client
            // does not stall the reader that will deliver the answer.
            let input = input.clone();
            let message = line.as_bytes().to_vec();
            in_flight.spawn(async move { input.process(&message).await });
            while in_flight.try_join_next().is_some() {}
        }

        debug!("EOF on stdin, draining in-flight messages");
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(Err(e)) => debug!(error = %e, "Dropped stdio message"),
                Err(e) => error!(error = %e, "Message handler panicked"),
                Ok(Ok(())) => {}
            }
        }

        self.server.unbind_io();
        drop(input);
        if writer.await.is_err() {
            error!("stdout writer panicked");
        }
        info!("Stdio transport stopped");
        Ok(())
    }
}

async fn write_line<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &str) -> std::io::Result<()> {
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{Implementation, PROTOCOL_VERSION};
    use serde_json::{json, Value};

    fn bound() -> (McpServer, IoInput, mpsc::UnboundedReceiver<String>) {
        let server = McpServer::new(Implementation::new("pipe-test", "1.0"));
        let (tx, rx) = mpsc::unbounded_channel();
        let input = server
            .bind_io(move |payload| {
                let _ = tx.send(payload);
            })
            .unwrap();
        (server, input, rx)
    }

    fn initialize() -> Vec<u8> {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": PROTOCOL_VERSION}
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_pipe_uses_implicit_session() {
        let (server, input, mut rx) = bound();

        input.process(&initialize()).await.unwrap();
        let reply: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(server.session(IO_SESSION_ID).is_some());

        let initialized = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        input.process(initialized.to_string().as_bytes()).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pipe_rejection_writes_reason() {
        let (_server, input, mut rx) = bound();

        let ping = json!({"jsonrpc": "2.0", "id": 2, "method": "ping"});
        input.process(ping.to_string().as_bytes()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "Unknown session id");

        input.process(b"][").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "Invalid JSON body");
    }

    #[tokio::test]
    async fn test_feed_runs_in_background() {
        let (_server, input, mut rx) = bound();

        input.feed(initialize());
        let reply: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply["result"]["serverInfo"]["name"], "pipe-test");
    }

    #[tokio::test]
    async fn test_pipe_receives_broadcasts() {
        let (server, input, mut rx) = bound();
        input.process(&initialize()).await.unwrap();
        rx.recv().await.unwrap();

        server.notify_resource_updated("memo://nobody-subscribed");
        server.remove_tool("missing");
        assert!(rx.try_recv().is_err());

        server.send_notification(
            &crate::mcp::messages::ServerNotification::ToolListChanged,
            Some("another-session"),
        );
        let pushed: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["method"], "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn test_unbind_removes_session() {
        let (server, input, mut rx) = bound();
        input.process(&initialize()).await.unwrap();
        rx.recv().await.unwrap();

        server.unbind_io();
        assert!(server.session(IO_SESSION_ID).is_none());
        assert!(server.bind_io(|_| {}).is_ok());
    }

    #[tokio::test]
    async fn test_overlong_line_skipped() {
        use tokio::io::AsyncReadExt;

        let server = McpServer::new(Implementation::new("pipe-test", "1.0"));
        let mut input = vec![b'x'; 400];
        input.push(b'\n');
        input.extend(initialize());
        input.push(b'\n');

        let (output, mut reader) = tokio::io::duplex(64 * 1024);
        StdioTransport::new(server.clone())
            .with_max_line_length(128)
            .serve(&input[..], output)
            .await
            .unwrap();

        let mut written = String::new();
        reader.read_to_string(&mut written).await.unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 1);
        let reply: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(reply["id"], 1);
        // EOF tears the implicit session down.
        assert!(server.session(IO_SESSION_ID).is_none());
    }

    #[tokio::test]
    async fn test_input_after_shutdown() {
        let (server, input, _rx) = bound();
        drop(server);
        assert!(matches!(
            input.process(&initialize()).await,
            Err(Error::ServerShutDown)
        ));
    }
}
