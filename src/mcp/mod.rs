//! MCP base server
//!
//! Validated configuration, transport selection, a shared tool/resource
//! registry and the lifecycle that ties them together.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;
pub mod transport;
pub mod utils;

pub use config::{ServerConfig, ServerMetadata, ServerOptions, TransportMode};
pub use error::{HandlerError, HandlerResult, InvocationError, Result, ServerError};
pub use registry::{Registry, ResourceSpec, ToolContext, ToolSpec};
pub use schema::{Field, Schema};
pub use server::{BaseServer, LifecycleState, ServerComponents};
pub use transport::{StdioTransport, StreamableHttpTransport, Transport};
