//! Reusable MCP base server with stdio and streamable HTTP transports,
//! plus a few demo servers built on it.

pub mod mcp;
pub mod servers;

pub use mcp::{BaseServer, Registry, ServerComponents, ServerError, ServerOptions, TransportMode};
