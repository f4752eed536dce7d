//! Typed view of inbound and outbound MCP messages.
//!
//! [`classify`] turns a parsed JSON value into an [`Incoming`] message,
//! resolving request methods through a single string-keyed table.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::mcp::progress::ProgressParams;
use crate::mcp::prompts::GetPromptParams;
use crate::mcp::protocol::{
    CallToolParams, CompleteParams, InitializeParams, JsonRpcError, JsonRpcNotification,
    LoggingMessageParams, PaginatedParams, RequestId, SetLevelParams,
};
use crate::mcp::resources::{ReadResourceParams, SubscribeParams};
use crate::mcp::tasks::{Task, TaskIdParams};

/// A request the client may send, keyed by method.
#[derive(Debug, Clone)]
pub enum ClientRequest {
    Initialize(InitializeParams),
    Ping,
    ListTools(PaginatedParams),
    CallTool(CallToolParams),
    ListPrompts(PaginatedParams),
    GetPrompt(GetPromptParams),
    ListResources(PaginatedParams),
    ReadResource(ReadResourceParams),
    ListResourceTemplates(PaginatedParams),
    Subscribe(SubscribeParams),
    Unsubscribe(SubscribeParams),
    Complete(CompleteParams),
    SetLevel(SetLevelParams),
    GetTask(TaskIdParams),
    GetTaskResult(TaskIdParams),
    CancelTask(TaskIdParams),
    ListTasks(PaginatedParams),
}

/// Outcome of looking a method up in the request table.
pub(crate) enum Lookup {
    Found(ClientRequest),
    Unknown,
    BadParams(String),
}

impl ClientRequest {
    /// Resolve `method` and decode its params. Absent params decode as `{}`.
    pub(crate) fn from_parts(method: &str, params: Option<Value>) -> Lookup {
        let params = params.unwrap_or_else(|| json!({}));

        fn decode<T: DeserializeOwned>(
            params: Value,
            wrap: impl FnOnce(T) -> ClientRequest,
        ) -> Lookup {
            match serde_json::from_value(params) {
                Ok(p) => Lookup::Found(wrap(p)),
                Err(e) => Lookup::BadParams(e.to_string()),
            }
        }

        match method {
            "initialize" => decode(params, Self::Initialize),
            "ping" => Lookup::Found(Self::Ping),
            "tools/list" => decode(params, Self::ListTools),
            "tools/call" => decode(params, Self::CallTool),
            "prompts/list" => decode(params, Self::ListPrompts),
            "prompts/get" => decode(params, Self::GetPrompt),
            "resources/list" => decode(params, Self::ListResources),
            "resources/read" => decode(params, Self::ReadResource),
            "resources/templates/list" => decode(params, Self::ListResourceTemplates),
            "resources/subscribe" => decode(params, Self::Subscribe),
            "resources/unsubscribe" => decode(params, Self::Unsubscribe),
            "completion/complete" => decode(params, Self::Complete),
            "logging/setLevel" => decode(params, Self::SetLevel),
            "tasks/get" => decode(params, Self::GetTask),
            "tasks/result" => decode(params, Self::GetTaskResult),
            "tasks/cancel" => decode(params, Self::CancelTask),
            "tasks/list" => decode(params, Self::ListTasks),
            _ => Lookup::Unknown,
        }
    }

    /// Wire method name.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::Ping => "ping",
            Self::ListTools(_) => "tools/list",
            Self::CallTool(_) => "tools/call",
            Self::ListPrompts(_) => "prompts/list",
            Self::GetPrompt(_) => "prompts/get",
            Self::ListResources(_) => "resources/list",
            Self::ReadResource(_) => "resources/read",
            Self::ListResourceTemplates(_) => "resources/templates/list",
            Self::Subscribe(_) => "resources/subscribe",
            Self::Unsubscribe(_) => "resources/unsubscribe",
            Self::Complete(_) => "completion/complete",
            Self::SetLevel(_) => "logging/setLevel",
            Self::GetTask(_) => "tasks/get",
            Self::GetTaskResult(_) => "tasks/result",
            Self::CancelTask(_) => "tasks/cancel",
            Self::ListTasks(_) => "tasks/list",
        }
    }
}

/// Params of `notifications/cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A notification the client may send.
#[derive(Debug, Clone)]
pub enum ClientNotification {
    Initialized,
    Cancelled(CancelledParams),
    Progress(ProgressParams),
    TaskStatus(Value),
    RootsListChanged,
    Other(String),
}

impl ClientNotification {
    fn from_parts(method: &str, params: Option<Value>) -> Self {
        match method {
            "notifications/initialized" => Self::Initialized,
            "notifications/cancelled" => params
                .and_then(|p| serde_json::from_value(p).ok())
                .map_or_else(|| Self::Other(method.to_string()), Self::Cancelled),
            "notifications/progress" => params
                .and_then(|p| serde_json::from_value(p).ok())
                .map_or_else(|| Self::Other(method.to_string()), Self::Progress),
            "notifications/tasks/status" => Self::TaskStatus(params.unwrap_or(Value::Null)),
            "notifications/roots/list_changed" => Self::RootsListChanged,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A push the server sends to clients.
#[derive(Debug, Clone)]
pub enum ServerNotification {
    ToolListChanged,
    PromptListChanged,
    ResourceListChanged,
    ResourceUpdated { uri: String },
    LoggingMessage(LoggingMessageParams),
    Progress(ProgressParams),
    TaskStatus(Task),
}

impl ServerNotification {
    pub fn method(&self) -> &'static str {
        match self {
            Self::ToolListChanged => "notifications/tools/list_changed",
            Self::PromptListChanged => "notifications/prompts/list_changed",
            Self::ResourceListChanged => "notifications/resources/list_changed",
            Self::ResourceUpdated { .. } => "notifications/resources/updated",
            Self::LoggingMessage(_) => "notifications/message",
            Self::Progress(_) => "notifications/progress",
            Self::TaskStatus(_) => "notifications/tasks/status",
        }
    }

    /// Build the JSON-RPC envelope for this push.
    pub fn to_message(&self) -> serde_json::Result<JsonRpcNotification> {
        let params = match self {
            Self::ToolListChanged | Self::PromptListChanged | Self::ResourceListChanged => None,
            Self::ResourceUpdated { uri } => Some(json!({ "uri": uri })),
            Self::LoggingMessage(params) => Some(serde_json::to_value(params)?),
            Self::Progress(params) => Some(serde_json::to_value(params)?),
            Self::TaskStatus(task) => Some(serde_json::to_value(task)?),
        };
        Ok(JsonRpcNotification::new(self.method(), params))
    }
}

/// A classified inbound message.
#[derive(Debug)]
pub enum Incoming {
    Request {
        id: RequestId,
        request: ClientRequest,
    },
    UnknownMethod {
        id: RequestId,
        method: String,
    },
    InvalidParams {
        id: RequestId,
        method: String,
        message: String,
    },
    Notification(ClientNotification),
    Response {
        id: i64,
        outcome: Result<Value, JsonRpcError>,
    },
}

impl Incoming {
    /// True for `initialize`, including one whose params fail to decode,
    /// so it is answered with an error instead of failing the session gate.
    pub fn is_initialize(&self) -> bool {
        match self {
            Self::Request {
                request: ClientRequest::Initialize(_),
                ..
            } => true,
            Self::InvalidParams { method, .. } => method == "initialize",
            _ => false,
        }
    }
}

/// Classify a parsed JSON value as request, notification or response.
pub fn classify(value: Value) -> Result<Incoming, TransportError> {
    let Value::Object(mut object) = value else {
        return Err(TransportError::InvalidMessage);
    };

    let method = match object.remove("method") {
        Some(Value::String(method)) => Some(method),
        Some(_) => return Err(TransportError::InvalidMessage),
        None => None,
    };
    let params = object.remove("params");
    let id = object.remove("id");

    match (method, id) {
        (Some(method), Some(id)) => {
            let id: RequestId =
                serde_json::from_value(id).map_err(|_| TransportError::InvalidMessage)?;
            Ok(match ClientRequest::from_parts(&method, params) {
                Lookup::Found(request) => Incoming::Request { id, request },
                Lookup::Unknown => Incoming::UnknownMethod { id, method },
                Lookup::BadParams(message) => Incoming::InvalidParams {
                    id,
                    method,
                    message,
                },
            })
        }
        (Some(method), None) => Ok(Incoming::Notification(ClientNotification::from_parts(
            &method, params,
        ))),
        (None, id) => {
            let result = object.remove("result");
            let error = object.remove("error");
            if result.is_none() && error.is_none() {
                return Err(TransportError::InvalidMessage);
            }
            let id = id
                .and_then(|id| id.as_i64())
                .ok_or(TransportError::MalformedResponse)?;
            let outcome = match error {
                Some(error) => Err(serde_json::from_value(error)
                    .map_err(|_| TransportError::MalformedResponse)?),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            Ok(Incoming::Response { id, outcome })
        }
    }
}
