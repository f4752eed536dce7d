//! MCP server implementation.
//!
//! [`McpServer`] owns the session registry, the capability registries, the
//! task manager and the notification fan-out. Transports hand it raw message
//! bodies through [`McpServer::handle_message`] and deliver the resulting
//! [`Outcome`]. The server is a cheap, cloneable handle; callbacks that
//! outlive a request hold a [`WeakServer`] instead.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result, TransportError};
use crate::mcp::call::{ToolCall, ToolReply};
use crate::mcp::handler::{
    error_result, CompletionHandler, InteractiveToolHandler, ToolEntry, ToolHandler, ToolKind,
};
use crate::mcp::messages::{classify, ClientNotification, ClientRequest, Incoming, ServerNotification};
use crate::mcp::notify::{Fanout, NotificationStream, OutputHandler, ResponseCallback, SubscriberId};
use crate::mcp::prompts::{GetPromptParams, GetPromptResult, ListPromptsResult, Prompt, PromptHandler};
use crate::mcp::protocol::*;
use crate::mcp::registry::{Registry, DEFAULT_PAGE_SIZE};
use crate::mcp::resources::{
    ListResourceTemplatesResult, ListResourcesResult, ReadResourceParams, Resource,
    ResourceHandler, ResourceTemplate, SubscribeParams,
};
use crate::mcp::session::{Session, SessionRegistry, IO_SESSION_ID};
use crate::mcp::tasks::{
    CreateTaskResult, ListTasksResult, Task, TaskCallbacks, TaskManager, TaskUpdate,
    DEFAULT_POLL_INTERVAL_MS,
};
use crate::mcp::transport::IoInput;
use crate::metrics::{Metrics, Timer};

/// Tunables for a server instance.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Maximum items per `*/list` page.
    pub page_size: usize,
    /// Poll interval suggested for tasks whose tool does not pick one.
    pub default_poll_interval_ms: u64,
    /// Free-form text returned from `initialize`.
    pub instructions: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            default_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            instructions: None,
        }
    }
}

/// What a transport should do with one inbound message.
#[derive(Debug)]
pub enum Outcome {
    /// Send this response back.
    Reply(JsonRpcResponse),
    /// Acknowledge without a body (notifications and responses).
    Accepted,
    /// Refuse at the transport level with the given reason.
    Rejected(TransportError),
}

#[derive(Clone)]
struct PromptEntry {
    prompt: Prompt,
    handler: Arc<dyn PromptHandler>,
}

#[derive(Clone)]
struct ResourceEntry {
    resource: Resource,
    handler: Arc<dyn ResourceHandler>,
}

struct ServerInner {
    info: Implementation,
    options: ServerOptions,
    sessions: SessionRegistry,
    tools: Registry<ToolEntry>,
    prompts: Registry<PromptEntry>,
    resources: Registry<ResourceEntry>,
    templates: Registry<ResourceTemplate>,
    resource_fallback: RwLock<Option<Arc<dyn ResourceHandler>>>,
    completion: RwLock<Option<Arc<dyn CompletionHandler>>>,
    tasks: TaskManager,
    fanout: Fanout,
    metrics: Arc<Metrics>,
}

/// MCP server.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

/// Non-owning reference to a server.
#[derive(Clone)]
pub struct WeakServer {
    inner: Weak<ServerInner>,
}

impl WeakServer {
    pub fn upgrade(&self) -> Option<McpServer> {
        self.inner.upgrade().map(|inner| McpServer { inner })
    }
}

/// Collapse handler failures into an internal error, keeping the message.
fn into_internal(err: Error) -> Error {
    match err {
        Error::Internal(_) => err,
        other => Error::Internal(other.to_string()),
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

impl McpServer {
    /// Create a new MCP server.
    pub fn new(info: Implementation) -> Self {
        Self::with_options(info, ServerOptions::default())
    }

    /// Create a new MCP server with explicit options.
    pub fn with_options(info: Implementation, options: ServerOptions) -> Self {
        let tasks = TaskManager::new(options.default_poll_interval_ms);
        Self {
            inner: Arc::new(ServerInner {
                info,
                options,
                sessions: SessionRegistry::new(),
                tools: Registry::new(),
                prompts: Registry::new(),
                resources: Registry::new(),
                templates: Registry::new(),
                resource_fallback: RwLock::new(None),
                completion: RwLock::new(None),
                tasks,
                fanout: Fanout::new(),
                metrics: Metrics::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakServer {
        WeakServer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn info(&self) -> &Implementation {
        &self.inner.info
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.inner.metrics.clone()
    }

    // ===== Capability Registration =====

    /// Register a tool that answers directly from its arguments.
    pub fn add_tool<T: ToolHandler + 'static>(&self, handler: T) {
        self.insert_tool(ToolEntry::simple(Arc::new(handler)));
    }

    /// Register a tool that drives its own reply through a [`ToolCall`].
    pub fn add_interactive_tool<T: InteractiveToolHandler + 'static>(&self, handler: T) {
        self.insert_tool(ToolEntry::interactive(Arc::new(handler)));
    }

    fn insert_tool(&self, entry: ToolEntry) {
        let name = entry.tool.name.clone();
        debug!(tool = %name, "Registering tool");
        self.inner.tools.insert(name, entry);
        self.send_notification(&ServerNotification::ToolListChanged, None);
    }

    pub fn remove_tool(&self, name: &str) -> bool {
        let removed = self.inner.tools.remove(name).is_some();
        if removed {
            self.send_notification(&ServerNotification::ToolListChanged, None);
        }
        removed
    }

    pub fn add_prompt(&self, prompt: Prompt, handler: impl PromptHandler + 'static) {
        debug!(prompt = %prompt.name, "Registering prompt");
        let entry = PromptEntry {
            prompt,
            handler: Arc::new(handler),
        };
        self.inner.prompts.insert(entry.prompt.name.clone(), entry);
        self.send_notification(&ServerNotification::PromptListChanged, None);
    }

    pub fn remove_prompt(&self, name: &str) -> bool {
        let removed = self.inner.prompts.remove(name).is_some();
        if removed {
            self.send_notification(&ServerNotification::PromptListChanged, None);
        }
        removed
    }

    pub fn add_resource(&self, resource: Resource, handler: impl ResourceHandler + 'static) {
        debug!(uri = %resource.uri, "Registering resource");
        let entry = ResourceEntry {
            resource,
            handler: Arc::new(handler),
        };
        self.inner.resources.insert(entry.resource.uri.clone(), entry);
        self.send_notification(&ServerNotification::ResourceListChanged, None);
    }

    pub fn remove_resource(&self, uri: &str) -> bool {
        let removed = self.inner.resources.remove(uri).is_some();
        if removed {
            self.send_notification(&ServerNotification::ResourceListChanged, None);
        }
        removed
    }

    pub fn add_resource_template(&self, template: ResourceTemplate) {
        self.inner.templates.insert(template.name.clone(), template);
        self.send_notification(&ServerNotification::ResourceListChanged, None);
    }

    pub fn remove_resource_template(&self, name: &str) -> bool {
        let removed = self.inner.templates.remove(name).is_some();
        if removed {
            self.send_notification(&ServerNotification::ResourceListChanged, None);
        }
        removed
    }

    /// Handler consulted for URIs that match no registered resource.
    pub fn set_resource_fallback(&self, handler: impl ResourceHandler + 'static) {
        *self.inner.resource_fallback.write() = Some(Arc::new(handler));
    }

    /// Install the `completion/complete` handler; also enables the
    /// `completions` capability for sessions initialized afterwards.
    pub fn set_completion_handler(&self, handler: impl CompletionHandler + 'static) {
        *self.inner.completion.write() = Some(Arc::new(handler));
    }

    /// Capabilities advertised in `initialize`.
    pub fn capabilities(&self) -> ServerCapabilities {
        let has_completion = self.inner.completion.read().is_some();
        ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: true }),
            resources: Some(ResourcesCapability {
                subscribe: true,
                list_changed: true,
            }),
            prompts: Some(PromptsCapability { list_changed: true }),
            logging: Some(EmptyObject {}),
            completions: has_completion.then_some(EmptyObject {}),
            tasks: Some(TasksCapability {
                list: Some(EmptyObject {}),
                cancel: Some(EmptyObject {}),
                requests: Some(TaskRequestsCapability {
                    tools: Some(TaskToolsCapability {
                        call: Some(EmptyObject {}),
                    }),
                }),
            }),
        }
    }

    // ===== Sessions =====

    pub fn session(&self, id: &str) -> Option<Session> {
        self.inner.sessions.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Tear a session down and end its SSE streams. Tasks it started live on.
    pub fn remove_session(&self, id: &str) -> bool {
        let removed = self.inner.sessions.remove(id).is_some();
        self.inner.fanout.detach_session(id);
        self.inner.fanout.drop_pending_for(id);
        if removed {
            info!(session = id, "Session removed");
            self.inner
                .metrics
                .set_active_sessions(self.inner.sessions.len() as u64);
        }
        removed
    }

    /// Open a push stream for a registered session.
    pub fn subscribe(&self, session_id: &str) -> Option<NotificationStream> {
        if !self.inner.sessions.contains(session_id) {
            return None;
        }
        let (id, receiver) = self.inner.fanout.attach(session_id);
        Some(NotificationStream::new(id, receiver, self.downgrade()))
    }

    pub(crate) fn detach_subscriber(&self, id: SubscriberId) {
        if let Some(session) = self.inner.fanout.detach(id) {
            debug!(session = %session, "Last subscriber of session went away");
            self.remove_session(&session);
        }
    }

    /// Bind the duplex pipe. Everything the server pushes is also written to
    /// `output`; the returned [`IoInput`] feeds messages in under
    /// [`IO_SESSION_ID`].
    pub fn bind_io(&self, output: impl Fn(String) + Send + Sync + 'static) -> Result<IoInput> {
        let output: OutputHandler = Arc::new(output);
        self.inner.fanout.bind_output(output.clone())?;
        info!("Duplex pipe bound");
        Ok(IoInput::new(self.downgrade(), output))
    }

    /// Release the duplex pipe and its implicit session.
    pub fn unbind_io(&self) {
        if self.inner.fanout.unbind_output().is_some() {
            info!("Duplex pipe unbound");
        }
        self.remove_session(IO_SESSION_ID);
    }

    // ===== Message Handling =====

    /// Classify and handle one inbound message for `session_id`.
    pub async fn handle_message(&self, session_id: Option<&str>, body: &[u8]) -> Outcome {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Rejecting unparsable message");
                return self.reject(TransportError::InvalidJson);
            }
        };
        let incoming = match classify(value) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed message");
                return self.reject(e);
            }
        };

        let Some(session_id) = session_id else {
            return self.reject(TransportError::MissingSession);
        };
        if !incoming.is_initialize() && !self.inner.sessions.contains(session_id) {
            warn!(session = session_id, "Rejecting message for unknown session");
            return self.reject(TransportError::UnknownSession);
        }

        match incoming {
            Incoming::Request { id, request } => {
                Outcome::Reply(self.dispatch(session_id, id, request).await)
            }
            Incoming::UnknownMethod { id, method } => {
                Outcome::Reply(self.fail(id, Error::MethodNotFound(method)))
            }
            Incoming::InvalidParams { id, method, message } => {
                debug!(method = %method, "Invalid params");
                Outcome::Reply(self.fail(id, Error::InvalidParams(message)))
            }
            Incoming::Notification(notification) => {
                self.on_notification(session_id, notification);
                Outcome::Accepted
            }
            Incoming::Response { id, outcome } => {
                self.on_response(id, outcome);
                Outcome::Accepted
            }
        }
    }

    fn reject(&self, reason: TransportError) -> Outcome {
        self.inner.metrics.inc_rejected();
        Outcome::Rejected(reason)
    }

    fn fail(&self, id: RequestId, err: Error) -> JsonRpcResponse {
        if err.is_client_fault() {
            warn!(error = %err, "Request failed");
        } else {
            error!(error = %err, "Request failed");
        }
        self.inner.metrics.record_request(true);
        JsonRpcResponse::failure(id, JsonRpcError::from(&err))
    }

    async fn dispatch(&self, session_id: &str, id: RequestId, request: ClientRequest) -> JsonRpcResponse {
        let method = request.method();
        debug!(method, ?id, session = session_id, "Handling request");
        let timer = Timer::start();

        let result = match request {
            ClientRequest::Initialize(params) => self.initialize(session_id, params),
            ClientRequest::Ping => Ok(json!({})),
            ClientRequest::ListTools(params) => self.list_tools(params),
            ClientRequest::CallTool(params) => self.call_tool(session_id, params).await,
            ClientRequest::ListPrompts(params) => self.list_prompts(params),
            ClientRequest::GetPrompt(params) => self.get_prompt(params).await,
            ClientRequest::ListResources(params) => self.list_resources(params),
            ClientRequest::ReadResource(params) => self.read_resource(params).await,
            ClientRequest::ListResourceTemplates(params) => self.list_resource_templates(params),
            ClientRequest::Subscribe(params) => self.subscribe_resource(session_id, params),
            ClientRequest::Unsubscribe(params) => self.unsubscribe_resource(session_id, params),
            ClientRequest::Complete(params) => self.complete(params).await,
            ClientRequest::SetLevel(params) => self.set_level(session_id, params),
            ClientRequest::GetTask(params) => self.get_task(&params.task_id).and_then(to_json),
            ClientRequest::GetTaskResult(params) => {
                self.task_result(&params.task_id).await.and_then(to_json)
            }
            ClientRequest::CancelTask(params) => {
                self.cancel_task(&params.task_id).and_then(to_json)
            }
            ClientRequest::ListTasks(params) => self.list_tasks(params),
        };

        debug!(method, elapsed_ms = timer.elapsed_ms(), "Request handled");
        match result {
            Ok(value) => {
                self.inner.metrics.record_request(false);
                JsonRpcResponse::success(id, value)
            }
            Err(err) => self.fail(id, err),
        }
    }

    fn on_notification(&self, session_id: &str, notification: ClientNotification) {
        self.inner.metrics.inc_notifications_received();
        match notification {
            ClientNotification::Initialized => info!(session = session_id, "Client initialized"),
            ClientNotification::Cancelled(params) => info!(
                session = session_id,
                request = ?params.request_id,
                reason = ?params.reason,
                "Client cancelled request"
            ),
            ClientNotification::Progress(params) => debug!(
                session = session_id,
                token = ?params.progress_token,
                progress = params.progress,
                "Client progress"
            ),
            ClientNotification::TaskStatus(status) => {
                debug!(session = session_id, %status, "Client task status")
            }
            ClientNotification::RootsListChanged => {
                info!(session = session_id, "Client roots changed")
            }
            ClientNotification::Other(method) => {
                debug!(session = session_id, method = %method, "Ignoring notification")
            }
        }
    }

    fn on_response(&self, id: i64, outcome: std::result::Result<Value, JsonRpcError>) {
        match self.inner.fanout.take_pending(id) {
            Some(callback) => callback(outcome),
            None => warn!(id, "Response for unknown request"),
        }
    }

    // ===== Request Handlers =====

    fn initialize(&self, session_id: &str, params: InitializeParams) -> Result<Value> {
        if self.inner.sessions.contains(session_id) {
            return Err(Error::SessionExists(session_id.to_string()));
        }
        if params.protocol_version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedProtocolVersion(params.protocol_version));
        }

        let client = params.client_info.name.clone();
        self.inner.sessions.create(Session::new(session_id, params))?;
        self.inner
            .metrics
            .set_active_sessions(self.inner.sessions.len() as u64);
        info!(session = session_id, client = %client, "Session initialized");

        to_json(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities(),
            server_info: self.inner.info.clone(),
            instructions: self.inner.options.instructions.clone(),
        })
    }

    fn list_tools(&self, params: PaginatedParams) -> Result<Value> {
        let page = self.inner.tools.page(
            params.cursor.as_deref(),
            self.inner.options.page_size,
            |entry| entry.tool.clone(),
        );
        to_json(ListToolsResult {
            tools: page.items,
            next_cursor: page.next_cursor,
        })
    }

    async fn call_tool(&self, session_id: &str, params: CallToolParams) -> Result<Value> {
        let entry = self
            .inner
            .tools
            .get(&params.name)
            .ok_or_else(|| Error::ToolNotFound(params.name.clone()))?;
        self.inner.metrics.inc_tool_calls();
        let name = params.name.clone();

        match entry.handler {
            ToolKind::Simple(handler) => {
                if params.task.is_some() {
                    return Err(Error::ToolTaskUnsupported(name));
                }
                let result = match handler.execute(params.arguments).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(tool = %name, error = %e, "Tool execution failed");
                        error_result(e.to_string())
                    }
                };
                to_json(result)
            }
            ToolKind::Interactive(handler) => {
                match (entry.tool.task_support(), params.task.is_some()) {
                    (TaskSupport::Required, false) => return Err(Error::ToolTaskRequired(name)),
                    (TaskSupport::Forbidden, true) => {
                        return Err(Error::ToolTaskUnsupported(name))
                    }
                    _ => {}
                }

                let (call, reply) = ToolCall::new(self.downgrade(), session_id, params);
                handler.invoke(call).await;
                match reply.await {
                    Ok(ToolReply::Finished(result)) => to_json(result),
                    Ok(ToolReply::TaskCreated(task)) => to_json(CreateTaskResult { task }),
                    Err(_) => Err(Error::Internal(format!(
                        "Tool \"{name}\" finished without a reply"
                    ))),
                }
            }
        }
    }

    fn list_prompts(&self, params: PaginatedParams) -> Result<Value> {
        let page = self.inner.prompts.page(
            params.cursor.as_deref(),
            self.inner.options.page_size,
            |entry| entry.prompt.clone(),
        );
        to_json(ListPromptsResult {
            prompts: page.items,
            next_cursor: page.next_cursor,
        })
    }

    async fn get_prompt(&self, params: GetPromptParams) -> Result<Value> {
        let entry = self
            .inner
            .prompts
            .get(&params.name)
            .ok_or_else(|| Error::PromptNotFound(params.name.clone()))?;
        entry.prompt.validate(&params.arguments)?;

        let messages = entry.handler.messages(&params.arguments).await?;
        to_json(GetPromptResult {
            description: entry.prompt.description.clone(),
            messages,
        })
    }

    fn list_resources(&self, params: PaginatedParams) -> Result<Value> {
        let page = self.inner.resources.page(
            params.cursor.as_deref(),
            self.inner.options.page_size,
            |entry| entry.resource.clone(),
        );
        to_json(ListResourcesResult {
            resources: page.items,
            next_cursor: page.next_cursor,
        })
    }

    fn list_resource_templates(&self, params: PaginatedParams) -> Result<Value> {
        let page = self.inner.templates.page(
            params.cursor.as_deref(),
            self.inner.options.page_size,
            Clone::clone,
        );
        to_json(ListResourceTemplatesResult {
            resource_templates: page.items,
            next_cursor: page.next_cursor,
        })
    }

    async fn read_resource(&self, params: ReadResourceParams) -> Result<Value> {
        let uri = params.uri;
        if let Some(entry) = self.inner.resources.get(&uri) {
            let result = entry.handler.read(&uri).await.map_err(into_internal)?;
            return to_json(result);
        }

        let fallback = self.inner.resource_fallback.read().clone();
        let Some(fallback) = fallback else {
            return Err(Error::ResourceNotFound(uri));
        };
        let result = fallback.read(&uri).await.map_err(|e| match e {
            Error::ResourceNotFound(_) => e,
            other => into_internal(other),
        })?;
        to_json(result)
    }

    fn subscribe_resource(&self, session_id: &str, params: SubscribeParams) -> Result<Value> {
        self.inner.sessions.subscribe(session_id, &params.uri)?;
        debug!(session = session_id, uri = %params.uri, "Resource subscribed");
        Ok(json!({}))
    }

    fn unsubscribe_resource(&self, session_id: &str, params: SubscribeParams) -> Result<Value> {
        self.inner.sessions.unsubscribe(session_id, &params.uri)?;
        Ok(json!({}))
    }

    async fn complete(&self, params: CompleteParams) -> Result<Value> {
        let handler = self.inner.completion.read().clone();
        let handler =
            handler.ok_or_else(|| Error::MethodNotFound("completion/complete".to_string()))?;
        let result = handler.complete(params).await.map_err(into_internal)?;
        to_json(result)
    }

    fn set_level(&self, session_id: &str, params: SetLevelParams) -> Result<Value> {
        self.inner.sessions.set_log_level(session_id, params.level)?;
        debug!(session = session_id, level = ?params.level, "Log level set");
        Ok(json!({}))
    }

    fn list_tasks(&self, params: PaginatedParams) -> Result<Value> {
        let page = self
            .inner
            .tasks
            .list(params.cursor.as_deref(), self.inner.options.page_size);
        to_json(ListTasksResult {
            tasks: page.items,
            next_cursor: page.next_cursor,
        })
    }

    // ===== Tasks =====

    /// Create a task owned by `session_id`.
    pub fn create_task(
        &self,
        callbacks: TaskCallbacks,
        session_id: Option<String>,
        requested_ttl: Option<u64>,
    ) -> Task {
        self.inner.metrics.inc_tasks_created();
        self.inner.tasks.create(callbacks, session_id, requested_ttl)
    }

    /// Poll a task.
    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.inner.tasks.get(task_id)
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<Task> {
        self.inner.tasks.cancel(task_id)
    }

    pub async fn task_result(&self, task_id: &str) -> Result<ToolResult> {
        self.inner.tasks.result(task_id).await
    }

    /// Merge `update` into a task and push `notifications/tasks/status` to
    /// the session that started it.
    pub fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<Task> {
        let task = self.inner.tasks.apply(task_id, update)?;
        let session = self.inner.tasks.session_of(task_id);
        self.send_notification(&ServerNotification::TaskStatus(task.clone()), session.as_deref());
        Ok(task)
    }

    // ===== Server to Client =====

    /// Push a notification to one session, or to every session when
    /// `session` is `None`.
    pub fn send_notification(&self, notification: &ServerNotification, session: Option<&str>) {
        let payload = match notification
            .to_message()
            .and_then(|message| serde_json::to_string(&message))
        {
            Ok(payload) => payload,
            Err(e) => {
                error!(method = notification.method(), error = %e, "Failed to serialize notification");
                return;
            }
        };

        self.inner.metrics.inc_notifications_sent();
        let delivery = self.inner.fanout.deliver(&payload, session);
        for orphan in delivery.orphaned {
            self.remove_session(&orphan);
        }
    }

    /// Send a request to a session's client; `callback` receives the answer.
    /// Returns the request id.
    pub fn send_request(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
        callback: ResponseCallback,
    ) -> Result<i64> {
        let id = self.inner.fanout.register_pending(session_id, callback);
        let request = JsonRpcRequest::new(RequestId::Number(id), method, Some(params));
        let payload = match serde_json::to_string(&request) {
            Ok(payload) => payload,
            Err(e) => {
                self.inner.fanout.take_pending(id);
                return Err(e.into());
            }
        };

        let delivery = self.inner.fanout.deliver(&payload, Some(session_id));
        for orphan in delivery.orphaned {
            self.remove_session(&orphan);
        }
        if delivery.delivered == 0 {
            self.inner.fanout.take_pending(id);
            return Err(Error::Internal(format!(
                "No open channel to session {session_id}"
            )));
        }

        self.inner.metrics.inc_client_requests();
        debug!(id, method, session = session_id, "Sent request to client");
        Ok(id)
    }

    /// Send a request and wait for the client's answer.
    pub async fn request(&self, session_id: &str, method: &str, params: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let id = self.send_request(
            session_id,
            method,
            params,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )?;
        let _guard = self.inner.fanout.pending_guard(id);

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::ClientError {
                code: e.code,
                message: e.message,
            }),
            Err(_) => Err(Error::Cancelled),
        }
    }

    fn client_capabilities(&self, session_id: &str) -> Result<ClientCapabilities> {
        self.inner
            .sessions
            .client_capabilities(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Ask a session's client for structured input (`elicitation/create`).
    pub async fn elicit(&self, session_id: &str, params: ElicitRequestParams) -> Result<ElicitResult> {
        if !self.client_capabilities(session_id)?.supports_elicitation() {
            return Err(Error::ClientCapabilityMissing("elicitation"));
        }
        if params.task.is_some() {
            return Err(Error::TaskAugmentationUnsupported("elicitation"));
        }
        let value = self
            .request(session_id, "elicitation/create", to_json(params)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ask a session's client to sample an LLM (`sampling/createMessage`).
    pub async fn sample(
        &self,
        session_id: &str,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult> {
        if !self.client_capabilities(session_id)?.supports_sampling() {
            return Err(Error::ClientCapabilityMissing("sampling"));
        }
        if params.task.is_some() {
            return Err(Error::TaskAugmentationUnsupported("sampling"));
        }
        let value = self
            .request(session_id, "sampling/createMessage", to_json(params)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Emit `notifications/message` to every session whose level admits it.
    pub fn log(&self, level: LoggingLevel, logger: Option<&str>, data: Value) {
        let notification = ServerNotification::LoggingMessage(LoggingMessageParams {
            level,
            logger: logger.map(String::from),
            data,
        });
        for session in self.inner.sessions.admitting(level) {
            self.send_notification(&notification, Some(&session));
        }
    }

    /// Tell subscribed sessions that a resource changed.
    pub fn notify_resource_updated(&self, uri: &str) {
        let notification = ServerNotification::ResourceUpdated {
            uri: uri.to_string(),
        };
        for session in self.inner.sessions.subscribers_of(uri) {
            self.send_notification(&notification, Some(&session));
        }
    }
}
