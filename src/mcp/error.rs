//! Error types for the base server.
//!
//! Startup failures (bad configuration, inconsistent transport, name
//! collisions) are `ServerError`s and abort construction or `connect()`.
//! Failures raised by a tool or resource handler are `HandlerError`s and only
//! ever fail the single invocation that produced them.

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

use crate::mcp::config::TransportMode;
use crate::mcp::schema::SchemaError;

/// Which registry namespace a duplicate name was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Tool,
    Resource,
    ResourceUri,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool => f.write_str("tool"),
            Self::Resource => f.write_str("resource"),
            Self::ResourceUri => f.write_str("resource uri"),
        }
    }
}

/// Main error type for server construction and lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration for {field}: {message}")]
    Validation {
        field: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("No {mode} transport initialized")]
    TransportNotInitialized { mode: TransportMode },

    #[error("{kind} '{name}' is already registered")]
    DuplicateName { kind: ComponentKind, name: String },

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub(crate) fn validation(
        field: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Opaque error raised by a registered tool or resource handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("Invalid data: {}", err))
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("IO error: {}", err))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors raised when the protocol engine invokes a registered component.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Resource not found: {0}")]
    UnknownResource(String),

    #[error("Invalid arguments for tool {tool}: {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: SchemaError,
    },

    #[error("{0}")]
    Handler(#[from] HandlerError),
}

/// Errors raised while the streamable HTTP transport handles a request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is not connected to a protocol engine")]
    NotConnected,

    #[error("Failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type alias for ServerError.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias used by handlers.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;
