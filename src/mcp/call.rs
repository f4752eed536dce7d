//! Handles given to interactive tools.
//!
//! A [`ToolCall`] represents one in-flight `tools/call` request. Exactly one
//! of [`ToolCall::finish`], [`ToolCall::fail`] or [`ToolCall::start_task`]
//! answers it; later attempts return [`Error::AlreadyResponded`]. A call
//! dropped without an answer is replied to with an internal error.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mcp::handler::error_result;
use crate::mcp::messages::ServerNotification;
use crate::mcp::progress::{ProgressReporter, ProgressToken};
use crate::mcp::protocol::{
    CallToolParams, CreateMessageParams, CreateMessageResult, ElicitRequestParams, ElicitResult,
    TaskMetadata, ToolResult,
};
use crate::mcp::server::WeakServer;
use crate::mcp::tasks::{Task, TaskCallbacks, TaskUpdate};

/// The single answer a tool call produces.
#[derive(Debug)]
pub(crate) enum ToolReply {
    Finished(ToolResult),
    TaskCreated(Task),
}

/// One in-flight tool invocation.
pub struct ToolCall {
    server: WeakServer,
    session_id: String,
    params: CallToolParams,
    reply: Mutex<Option<oneshot::Sender<ToolReply>>>,
}

impl ToolCall {
    pub(crate) fn new(
        server: WeakServer,
        session_id: impl Into<String>,
        params: CallToolParams,
    ) -> (Self, oneshot::Receiver<ToolReply>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            server,
            session_id: session_id.into(),
            params,
            reply: Mutex::new(Some(tx)),
        };
        (call, rx)
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn arguments(&self) -> &HashMap<String, Value> {
        &self.params.arguments
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Task metadata attached to the request, if the caller asked for a task.
    pub fn task_request(&self) -> Option<&TaskMetadata> {
        self.params.task.as_ref()
    }

    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.params.meta.as_ref()?.progress_token.as_ref()
    }

    /// Whether an answer has already been given.
    pub fn is_answered(&self) -> bool {
        self.reply.lock().is_none()
    }

    fn answer(&self, reply: ToolReply) -> Result<()> {
        let sender = self.reply.lock().take().ok_or(Error::AlreadyResponded)?;
        if sender.send(reply).is_err() {
            debug!(tool = %self.params.name, "Tool call answered after the request went away");
        }
        Ok(())
    }

    /// Answer with a result.
    pub fn finish(&self, result: ToolResult) -> Result<()> {
        self.answer(ToolReply::Finished(result))
    }

    /// Answer with an application-level failure (`isError: true`).
    pub fn fail(&self, message: impl Into<String>) -> Result<()> {
        self.answer(ToolReply::Finished(error_result(message)))
    }

    /// Answer by creating a task driven by `callbacks`.
    pub fn start_task(&self, callbacks: TaskCallbacks) -> Result<TaskHandle> {
        let server = self.server.upgrade().ok_or(Error::ServerShutDown)?;
        let sender = self.reply.lock().take().ok_or(Error::AlreadyResponded)?;

        let requested_ttl = self.params.task.as_ref().and_then(|t| t.ttl);
        let task = server.create_task(callbacks, Some(self.session_id.clone()), requested_ttl);
        let handle = TaskHandle {
            server: self.server.clone(),
            task_id: task.task_id.clone(),
        };
        if sender.send(ToolReply::TaskCreated(task)).is_err() {
            debug!(tool = %self.params.name, "Task created after the request went away");
        }
        Ok(handle)
    }

    /// Ask the client for structured input.
    pub async fn elicit(&self, params: ElicitRequestParams) -> Result<ElicitResult> {
        let server = self.server.upgrade().ok_or(Error::ServerShutDown)?;
        server.elicit(&self.session_id, params).await
    }

    /// Ask the client to run an LLM completion.
    pub async fn sample(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        let server = self.server.upgrade().ok_or(Error::ServerShutDown)?;
        server.sample(&self.session_id, params).await
    }

    /// Push a notification to the caller's session.
    pub fn notify(&self, notification: ServerNotification) -> Result<()> {
        let server = self.server.upgrade().ok_or(Error::ServerShutDown)?;
        server.send_notification(&notification, Some(&self.session_id));
        Ok(())
    }

    /// Progress reporter for this call, if the caller supplied a token.
    pub fn progress(&self, total: Option<u64>) -> Option<ProgressReporter> {
        let token = self.progress_token()?.clone();
        Some(ProgressReporter::new(
            self.server.clone(),
            self.session_id.clone(),
            token,
            total,
        ))
    }
}

/// Lets a tool push status changes for the task it started.
#[derive(Clone)]
pub struct TaskHandle {
    server: WeakServer,
    task_id: String,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Merge `update` into the task and notify the originating session.
    pub fn update(&self, update: TaskUpdate) -> Result<Task> {
        let server = self.server.upgrade().ok_or(Error::ServerShutDown)?;
        server.update_task(&self.task_id, update)
    }
}
