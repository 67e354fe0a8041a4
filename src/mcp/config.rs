//! Server configuration: raw options, validation and defaults.
//!
//! Options can be built in code or read from the environment:
//! - SERVER_NAME: Name of the server (default: "mcp-server")
//! - SERVER_VERSION: Version string (default: "0.1.0")
//! - MCP_TRANSPORT_MODE: "stdio" or "streamable-http" (default: "stdio")
//! - HOST: Host reported for HTTP mode (default: "localhost")
//! - PORT: Port number for HTTP mode (default: 3000)

use serde::Serialize;
use std::fmt;

use crate::mcp::error::{Result, ServerError};
use crate::mcp::transport::Transport;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3000;

const NAME_LEN: (usize, usize) = (2, 100);
const VERSION_LEN: (usize, usize) = (1, 10);
const HOST_LEN: (usize, usize) = (1, 255);

/// Transport the server speaks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum TransportMode {
    #[default]
    #[serde(rename = "stdio")]
    Stdio,
    #[serde(rename = "streamable-http")]
    StreamableHttp,
}

impl TransportMode {
    /// Parse one of the two recognized mode names. Matching is exact.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdio" => Some(Self::Stdio),
            "streamable-http" => Some(Self::StreamableHttp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::StreamableHttp => "streamable-http",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TransportMode {
    type Error = ServerError;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            ServerError::validation(
                "transport_mode",
                format!(
                    "Unknown transport mode '{}'. Must be 'stdio' or 'streamable-http'",
                    s
                ),
            )
        })
    }
}

/// Raw, unvalidated server options.
///
/// Optional fields fall back to their defaults during validation. A
/// pre-built `transport` is only adopted when its kind matches the declared
/// transport mode.
#[derive(Debug, Default)]
pub struct ServerOptions {
    pub name: String,
    pub version: String,
    pub host: Option<String>,
    pub port: Option<u32>,
    pub transport_mode: Option<String>,
    pub transport: Option<Transport>,
}

impl ServerOptions {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u32) -> Self {
        self.port = Some(port);
        self
    }

    pub fn transport_mode(mut self, mode: impl Into<String>) -> Self {
        self.transport_mode = Some(mode.into());
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build options from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build options from an arbitrary key lookup.
    ///
    /// Only PORT is interpreted here (it must be an integer); every other
    /// bound is checked by [`ServerConfig::validate`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                ServerError::validation("PORT", format!("'{}' is not a valid port number", raw))
            })?),
            None => None,
        };

        Ok(Self {
            name: lookup("SERVER_NAME").unwrap_or_else(|| "mcp-server".to_string()),
            version: lookup("SERVER_VERSION").unwrap_or_else(|| "0.1.0".to_string()),
            host: lookup("HOST"),
            port,
            transport_mode: lookup("MCP_TRANSPORT_MODE"),
            transport: None,
        })
    }
}

/// Validated, immutable server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub transport_mode: TransportMode,
}

impl ServerConfig {
    /// Validate raw options and apply defaults.
    ///
    /// Pure: the supplied transport handle (if any) is left in `options` for
    /// the transport selector.
    pub fn validate(options: &ServerOptions) -> Result<Self> {
        check_len("name", &options.name, NAME_LEN)?;
        check_len("version", &options.version, VERSION_LEN)?;

        let host = options.host.as_deref().unwrap_or(DEFAULT_HOST);
        check_len("host", host, HOST_LEN)?;
        if host.chars().any(char::is_whitespace) {
            return Err(ServerError::validation(
                "host",
                "must not contain whitespace",
            ));
        }

        let port = match options.port {
            None => DEFAULT_PORT,
            Some(p) => u16::try_from(p)
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| {
                    ServerError::validation("port", format!("{} is outside 1-65535", p))
                })?,
        };

        let transport_mode = match options.transport_mode.as_deref() {
            None => TransportMode::default(),
            Some(mode) => TransportMode::try_from(mode)?,
        };

        Ok(Self {
            name: options.name.clone(),
            version: options.version.clone(),
            host: host.to_string(),
            port,
            transport_mode,
        })
    }
}

/// Read-only snapshot of the server identity, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    pub transport_mode: TransportMode,
    pub host: String,
    pub port: u16,
}

impl From<&ServerConfig> for ServerMetadata {
    fn from(config: &ServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            version: config.version.clone(),
            transport_mode: config.transport_mode,
            host: config.host.clone(),
            port: config.port,
        }
    }
}

fn check_len(field: &'static str, value: &str, (min, max): (usize, usize)) -> Result<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ServerError::validation(
            field,
            format!("length {} is outside {}-{} characters", len, min, max),
        ));
    }
    Ok(())
}
