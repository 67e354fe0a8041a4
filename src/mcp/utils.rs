//! Environment helpers shared by the binary and the HTTP layer.

use std::str::FromStr;

/// Get an environment variable, falling back to `default` when unset.
///
/// ```
/// use mcp_base_server::mcp::utils::get_env_var;
/// let server = get_env_var("MCP_EXAMPLE_SERVER", "greetings");
/// assert!(!server.is_empty());
/// ```
pub fn get_env_var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, ignoring it when unset or malformed.
pub fn parse_env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
