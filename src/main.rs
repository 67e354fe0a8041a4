//! MCP Server Entry Point
//!
//! Reads the server configuration from environment variables, builds the
//! selected demo server and runs it over stdio or streamable HTTP.
//!
//! Environment Variables:
//! - SERVER_NAME: Name of the server (default: "mcp-server")
//! - SERVER_VERSION: Version string (default: "0.1.0")
//! - MCP_TRANSPORT_MODE: "stdio" or "streamable-http" (default: "stdio")
//! - HOST: Bind address for HTTP mode (default: "localhost")
//! - PORT: Port number for HTTP mode (default: 3000)
//! - WORKER_THREADS: Actix worker count for HTTP mode
//! - MCP_EXAMPLE_SERVER: "greetings", "weather" or "calculator" (default: "greetings")
//! - RUST_LOG: tracing filter (default: "mcp_base_server=info,actix_web=info")

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mcp_base_server::mcp::http::run_http_server;
use mcp_base_server::mcp::utils::get_env_var;
use mcp_base_server::servers::{EXAMPLE_SERVERS, example_server};
use mcp_base_server::{BaseServer, ServerOptions, TransportMode};

fn init_tracing() {
    // Logs go to stderr: stdout carries protocol messages in stdio mode
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mcp_base_server=info,actix_web=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let example = get_env_var("MCP_EXAMPLE_SERVER", "greetings");
    let components = example_server(&example).ok_or_else(|| {
        format!(
            "Unknown example server '{}'. Must be one of: {}",
            example,
            EXAMPLE_SERVERS.join(", ")
        )
    })?;

    let options = ServerOptions::from_env()?;
    let server = Arc::new(BaseServer::new(options, components.as_ref())?);
    server.start().await?;

    match server.config().transport_mode {
        TransportMode::StreamableHttp => run_http_server(Arc::clone(&server)).await?,
        TransportMode::Stdio => server.wait().await?,
    }

    info!("Server {} stopped", server.config().name);
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}
