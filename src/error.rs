//! Error types for the MCP engine.

use thiserror::Error;

use crate::mcp::protocol::error_codes;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the MCP engine.
///
/// Protocol variants carry enough information to be turned into a JSON-RPC
/// error object (see [`Error::code`]); the remaining variants are either
/// internal or only ever reported to the embedding host.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Session Errors =====
    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("Session already initialized: {0}")]
    SessionExists(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // ===== Dispatch Errors =====
    #[error("Method \"{0}\" not implemented")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    // ===== Registry Errors =====
    #[error("Invalid tool: {0}")]
    ToolNotFound(String),

    #[error("Tool does not support tasks: {0}")]
    ToolTaskUnsupported(String),

    #[error("Tool requires tasks: {0}")]
    ToolTaskRequired(String),

    #[error("Prompt \"{0}\" not found")]
    PromptNotFound(String),

    #[error("Resource \"{0}\" not found")]
    ResourceNotFound(String),

    // ===== Task Errors =====
    #[error("Task with ID \"{0}\" not found")]
    TaskNotFound(String),

    #[error("Task with ID \"{0}\" cannot be cancelled")]
    TaskNotCancellable(String),

    // ===== Tool Call Handle Errors =====
    #[error("Tool call already responded")]
    AlreadyResponded,

    #[error("Client does not support {0}")]
    ClientCapabilityMissing(&'static str),

    #[error("Task-augmented {0} requests are not supported")]
    TaskAugmentationUnsupported(&'static str),

    #[error("Client returned error {code}: {message}")]
    ClientError { code: i32, message: String },

    #[error("Server has shut down")]
    ServerShutDown,

    #[error("IO already bound")]
    IoAlreadyBound,

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Cancelled: operation was cancelled")]
    Cancelled,
}

impl Error {
    /// JSON-RPC error code reported when this error answers a request.
    pub fn code(&self) -> i32 {
        match self {
            Self::UnsupportedProtocolVersion(_) | Self::SessionExists(_) => {
                error_codes::INVALID_REQUEST
            }
            Self::SessionNotFound(_) => error_codes::SERVER_NOT_INITIALIZED,
            Self::MethodNotFound(_) | Self::ToolNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_)
            | Self::ToolTaskUnsupported(_)
            | Self::ToolTaskRequired(_)
            | Self::PromptNotFound(_)
            | Self::ResourceNotFound(_)
            | Self::TaskNotFound(_)
            | Self::TaskNotCancellable(_)
            | Self::ClientCapabilityMissing(_)
            | Self::TaskAugmentationUnsupported(_) => error_codes::INVALID_PARAMS,
            Self::ClientError { code, .. } => *code,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Returns true for errors caused by the caller rather than the server.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self.code(),
            error_codes::INVALID_REQUEST
                | error_codes::METHOD_NOT_FOUND
                | error_codes::INVALID_PARAMS
        )
    }
}

/// Reasons a message is refused before it reaches the dispatcher.
///
/// These never produce a JSON-RPC envelope; transports report them with a
/// bare status (HTTP 400) and the display text as the body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid JSON body")]
    InvalidJson,

    #[error("Invalid JSON-RPC message")]
    InvalidMessage,

    #[error("Invalid JSON-RPC response")]
    MalformedResponse,

    #[error("Missing session id")]
    MissingSession,

    #[error("Unknown session id")]
    UnknownSession,

    #[error("Missing Accept header")]
    MissingAccept,

    #[error("Invalid Accept header")]
    InvalidAccept,

    #[error("Origin not allowed")]
    OriginNotAllowed,

    #[error("Unsupported Mcp protocol version")]
    UnsupportedProtocolVersion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TaskNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Task with ID \"abc\" not found");

        let err = Error::MethodNotFound("foo/bar".to_string());
        assert_eq!(err.to_string(), "Method \"foo/bar\" not implemented");

        let err = Error::ClientCapabilityMissing("elicitation");
        assert_eq!(err.to_string(), "Client does not support elicitation");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::UnsupportedProtocolVersion("1999-01-01".into()).code(),
            -32600
        );
        assert_eq!(Error::ToolNotFound("x".into()).code(), -32601);
        assert_eq!(Error::TaskNotCancellable("x".into()).code(), -32602);
        assert_eq!(Error::Internal("boom".into()).code(), -32603);
        assert_eq!(Error::SessionNotFound("s".into()).code(), -32002);
        assert_eq!(
            Error::ClientError {
                code: -1,
                message: "declined".into()
            }
            .code(),
            -1
        );
    }

    #[test]
    fn test_client_fault() {
        assert!(Error::InvalidParams("missing name".into()).is_client_fault());
        assert!(Error::ToolNotFound("nope".into()).is_client_fault());
        assert!(!Error::Internal("boom".into()).is_client_fault());
        assert!(!Error::AlreadyResponded.is_client_fault());
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::InvalidJson.to_string(), "Invalid JSON body");
        assert_eq!(
            TransportError::OriginNotAllowed.to_string(),
            "Origin not allowed"
        );
    }
}
