//! HTTP mounting for the streamable HTTP transport.
//!
//! Actix Web receives the request and hands its method, session header and
//! raw body to `StreamableHttpTransport::handle_request`. Transport failures
//! are logged and answered with a 500 carrying a `message` field.
//!
//! Routes:
//! - POST/GET/DELETE /mcp and POST / : MCP endpoint
//! - GET /health : liveness probe
//! - GET /metrics : request and tool-call counters

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, web,
    http::StatusCode,
    middleware::{Compress, DefaultHeaders, Logger},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::mcp::server::BaseServer;
use crate::mcp::transport::{SESSION_HEADER, TransportRequest};
use crate::mcp::utils::parse_env_var;

/// Register the MCP, health and metrics routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/mcp", web::post().to(mcp_endpoint))
        .route("/mcp", web::get().to(mcp_endpoint))
        .route("/mcp", web::delete().to(mcp_endpoint))
        .route("/", web::post().to(mcp_endpoint))
        .route("/", web::get().to(health));
}

async fn health(server: web::Data<BaseServer>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": server.config().name
    }))
}

async fn metrics_handler(server: web::Data<BaseServer>) -> HttpResponse {
    match server.metrics_snapshot() {
        Some(snapshot) => HttpResponse::Ok().json(snapshot),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "message": "Metrics are not collected in process"
        })),
    }
}

fn internal_error(message: impl std::fmt::Display) -> HttpResponse {
    error!("Error handling MCP request: {}", message);
    HttpResponse::InternalServerError().json(serde_json::json!({
        "message": message.to_string()
    }))
}

/// MCP endpoint: delegate to the server's HTTP transport.
async fn mcp_endpoint(server: web::Data<BaseServer>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
    let transport = match server.transport() {
        Ok(_) => match server.http_transport() {
            Some(transport) => transport,
            None => return internal_error("Server is not running in streamable-http mode"),
        },
        Err(e) => return internal_error(e),
    };

    let session_id = req
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = TransportRequest {
        method: req.method().as_str().to_string(),
        session_id,
        body,
    };

    match transport.handle_request(request).await {
        Ok(response) => {
            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut builder = HttpResponse::build(status);
            for (name, value) in &response.headers {
                builder.insert_header((name.as_str(), value.as_str()));
            }
            builder.body(response.body)
        }
        Err(e) => internal_error(e),
    }
}

/// Run the Actix Web server hosting the MCP endpoint.
///
/// Binds to the validated host and port of `server` and serves the routes
/// registered by [`configure`] until the process is asked to shut down.
///
/// # Arguments
/// * `server` - A server in streamable HTTP mode. It must already be started
///   (see `BaseServer::start`); otherwise every MCP request is answered with
///   a 500.
///
/// # Configuration
/// The server is configured with:
/// - Worker threads: CPU count capped at 16, or WORKER_THREADS
/// - Max connections: 10,000 concurrent connections
/// - Connection rate limit: 1,000 connections per second
/// - Keep-alive: 30 seconds
/// - Request timeout: 30 seconds
/// - Disconnect timeout: 2 seconds
/// - Shutdown timeout: 10 seconds
///
/// # Implementation Details
/// The `BaseServer` is shared with every worker through `web::Data`, so all
/// workers answer from the same registry and transport.
pub async fn run_http_server(server: Arc<BaseServer>) -> std::io::Result<()> {
    let bind_addr = format!("{}:{}", server.config().host, server.config().port);
    // Shared across workers without copying the registry
    let data = web::Data::from(server);

    // Auto-detect worker count from CPU cores (capped at 16) unless overridden
    let workers = parse_env_var::<usize>("WORKER_THREADS")
        .filter(|n| *n > 0)
        .unwrap_or_else(|| num_cpus::get().clamp(1, 16));

    info!("Binding MCP HTTP endpoint on {} with {} workers", bind_addr, workers);

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            // Enable compression for JSON responses (gzip/brotli)
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
            )
            // Format: %r = request line, %s = status, %Dms = duration in milliseconds
            .wrap(Logger::new("%r %s %Dms"))
            .configure(configure)
    })
    // Use all available CPU cores (capped) for maximum throughput
    .workers(workers)
    // Allow many concurrent connections for high-traffic scenarios
    .max_connections(10000)
    .max_connection_rate(1000)
    // Reuse connections and bound slow clients
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)?
    .run()
    .await
}
