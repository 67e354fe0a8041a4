//! Transports and transport selection.
//!
//! A server owns exactly one transport, chosen once at construction:
//! - `StdioTransport`: line-delimited JSON-RPC on stdin/stdout (or supplied
//!   streams)
//! - `StreamableHttpTransport`: JSON-RPC over HTTP POST, mounted into an
//!   actix-web route by `mcp::http`
//!
//! Neither transport answers anything until `BaseServer::connect` binds it to
//! a protocol engine.

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, error, warn};

use crate::mcp::config::TransportMode;
use crate::mcp::engine::ProtocolEngine;
use crate::mcp::error::TransportError;
use crate::mcp::protocol::{McpError, McpResponse};

/// Header carrying the session id in stateful HTTP mode.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// The single transport a server speaks on.
pub enum Transport {
    Stdio(StdioTransport),
    StreamableHttp(StreamableHttpTransport),
}

impl Transport {
    pub fn mode(&self) -> TransportMode {
        match self {
            Self::Stdio(_) => TransportMode::Stdio,
            Self::StreamableHttp(_) => TransportMode::StreamableHttp,
        }
    }

    /// Pick the transport for `mode`.
    ///
    /// A supplied transport is adopted only when its kind matches `mode`;
    /// otherwise it is dropped and a default transport for `mode` is built.
    pub fn select(mode: TransportMode, supplied: Option<Transport>) -> Transport {
        match (mode, supplied) {
            (TransportMode::Stdio, Some(t @ Transport::Stdio(_)))
            | (TransportMode::StreamableHttp, Some(t @ Transport::StreamableHttp(_))) => t,
            (mode, supplied) => {
                if let Some(other) = supplied {
                    warn!(
                        "Ignoring supplied {} transport for {} mode, using default",
                        other.mode(),
                        mode
                    );
                }
                match mode {
                    TransportMode::Stdio => Transport::Stdio(StdioTransport::new()),
                    TransportMode::StreamableHttp => {
                        Transport::StreamableHttp(StreamableHttpTransport::stateless())
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio(t) => f.debug_tuple("Stdio").field(t).finish(),
            Self::StreamableHttp(t) => f.debug_tuple("StreamableHttp").field(t).finish(),
        }
    }
}

type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct StdioStreams {
    reader: BoxedReader,
    writer: BoxedWriter,
}

/// Stdio transport: one JSON-RPC message per line.
///
/// Serves the process's stdin/stdout unless other streams were supplied with
/// `with_streams`. Supplied streams are consumed by the first run.
#[derive(Clone)]
pub struct StdioTransport {
    buffer_capacity: usize,
    streams: Arc<Mutex<Option<StdioStreams>>>,
}

impl StdioTransport {
    pub fn new() -> Self {
        // 8KB balances memory usage with I/O efficiency
        Self::with_buffer_capacity(8192)
    }

    pub fn with_buffer_capacity(buffer_capacity: usize) -> Self {
        Self {
            buffer_capacity,
            streams: Arc::new(Mutex::new(None)),
        }
    }

    /// Serve `reader`/`writer` instead of stdin/stdout.
    pub fn with_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = Self::new();
        *transport.lock_streams() = Some(StdioStreams {
            reader: Box::new(reader),
            writer: Box::new(writer),
        });
        transport
    }

    fn lock_streams(&self) -> MutexGuard<'_, Option<StdioStreams>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the stdio loop until the input closes.
    ///
    /// Spawned by `BaseServer::connect`. This is the mode used by MCP
    /// Inspector and by clients that launch the server as a subprocess.
    ///
    /// # Arguments
    /// * `engine` - Protocol engine answering every request line
    ///
    /// # Implementation Details
    /// - Uses supplied streams when present, otherwise stdin/stdout
    /// - stdin and stdout are buffered with `buffer_capacity` bytes
    /// - Each response is written as one line and flushed immediately
    /// - Logging goes to stderr, never to stdout
    pub(crate) async fn run(self, engine: Arc<ProtocolEngine>) -> std::io::Result<()> {
        // Take supplied streams out so the guard is released before awaiting
        let supplied = self.lock_streams().take();

        match supplied {
            Some(StdioStreams { reader, writer }) => serve_lines(&engine, reader, writer).await,
            None => {
                // Buffered reader for efficient line-by-line reading from stdin
                let reader = BufReader::with_capacity(self.buffer_capacity, tokio::io::stdin());
                // Buffered writer for stdout, flushed after every response
                let writer = BufWriter::with_capacity(self.buffer_capacity, tokio::io::stdout());
                serve_lines(&engine, reader, writer).await
            }
        }
    }
}

impl fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioTransport")
            .field("buffer_capacity", &self.buffer_capacity)
            .field("supplied_streams", &self.lock_streams().is_some())
            .finish()
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Read JSON-RPC messages line by line from `reader` and write each response
/// as a single line to `writer`.
///
/// Empty lines and notifications produce no output. The writer is flushed
/// after every response. Returns when the reader reaches EOF.
pub async fn serve_lines<R, W>(engine: &ProtocolEngine, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let Some(response) = engine.handle_text(&line).await else {
            continue;
        };

        let response_json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                error!("Error serializing response: {}", e);
                continue;
            }
        };

        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    debug!("Stdin closed, stopping stdio transport");
    Ok(())
}

/// Generates session ids for stateful HTTP mode.
pub type SessionIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Inbound HTTP request as handed over by the web framework.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    pub session_id: Option<String>,
    pub body: Bytes,
}

/// Outbound HTTP response for the web framework to send.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl TransportResponse {
    fn json(status: u16, value: &Value) -> Result<Self, TransportError> {
        Ok(Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Bytes::from(serde_json::to_vec(value)?),
        })
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    fn rpc_error(status: u16, error: McpError) -> Result<Self, TransportError> {
        let body = serde_json::to_value(McpResponse::failure(None, error))?;
        Self::json(status, &body)
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Streamable HTTP transport.
///
/// Without a session id generator (the default) every request stands on its
/// own. With one, `initialize` opens a session whose id is returned in the
/// `Mcp-Session-Id` header and must accompany every later request.
pub struct StreamableHttpTransport {
    session_id_generator: Option<SessionIdGenerator>,
    sessions: RwLock<HashSet<String>>,
    engine: OnceLock<Arc<ProtocolEngine>>,
}

impl StreamableHttpTransport {
    pub fn stateless() -> Self {
        Self {
            session_id_generator: None,
            sessions: RwLock::new(HashSet::new()),
            engine: OnceLock::new(),
        }
    }

    pub fn with_session_id_generator<F>(generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            session_id_generator: Some(Arc::new(generator)),
            ..Self::stateless()
        }
    }

    pub fn is_stateless(&self) -> bool {
        self.session_id_generator.is_none()
    }

    pub fn is_connected(&self) -> bool {
        self.engine.get().is_some()
    }

    /// Attach the protocol engine. Only the first call has an effect.
    pub(crate) fn bind(&self, engine: Arc<ProtocolEngine>) -> bool {
        self.engine.set(engine).is_ok()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Request-handling entry point for the web framework.
    ///
    /// Protocol-level problems (bad JSON, unknown session) are answered with
    /// a 4xx response; `Err` is reserved for failures of the transport itself.
    pub async fn handle_request(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let engine = self.engine.get().ok_or(TransportError::NotConnected)?;

        match request.method.to_ascii_uppercase().as_str() {
            "POST" => self.handle_post(engine, request).await,
            "DELETE" if !self.is_stateless() => self.handle_delete(request),
            _ => self.method_not_allowed(),
        }
    }

    async fn handle_post(
        &self,
        engine: &ProtocolEngine,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let message: Value = match serde_json::from_slice(&request.body) {
            Ok(value) => value,
            Err(e) => return TransportResponse::rpc_error(400, McpError::parse_error(e)),
        };

        let mut new_session = None;
        if let Some(generator) = &self.session_id_generator {
            if contains_initialize(&message) {
                let id = generator();
                self.sessions
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id.clone());
                debug!("Opened session {}", id);
                new_session = Some(id);
            } else if let Some(rejection) = self.check_session(request.session_id.as_deref())? {
                return Ok(rejection);
            }
        }

        let response = match engine.handle_value(message).await {
            Some(body) => TransportResponse::json(200, &body)?,
            None => TransportResponse::empty(202),
        };

        Ok(match new_session {
            Some(id) => response.with_header(SESSION_HEADER, id),
            None => response,
        })
    }

    fn handle_delete(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        if let Some(rejection) = self.check_session(request.session_id.as_deref())? {
            return Ok(rejection);
        }
        if let Some(id) = request.session_id {
            self.sessions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            debug!("Closed session {}", id);
        }
        Ok(TransportResponse::empty(200))
    }

    fn check_session(&self, session_id: Option<&str>) -> Result<Option<TransportResponse>, TransportError> {
        let Some(id) = session_id else {
            return TransportResponse::rpc_error(
                400,
                McpError::new(-32000, "Bad Request: Mcp-Session-Id header is required"),
            )
            .map(Some);
        };
        let known = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id);
        if known {
            Ok(None)
        } else {
            TransportResponse::rpc_error(404, McpError::new(-32001, "Session not found")).map(Some)
        }
    }

    fn method_not_allowed(&self) -> Result<TransportResponse, TransportError> {
        let allow = if self.is_stateless() { "POST" } else { "POST, DELETE" };
        Ok(TransportResponse::rpc_error(405, McpError::new(-32000, "Method not allowed."))?
            .with_header("Allow", allow))
    }
}

impl Default for StreamableHttpTransport {
    fn default() -> Self {
        Self::stateless()
    }
}

impl fmt::Debug for StreamableHttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpTransport")
            .field("stateless", &self.is_stateless())
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn contains_initialize(message: &Value) -> bool {
    let is_init = |v: &Value| v.get("method").and_then(Value::as_str) == Some("initialize");
    match message {
        Value::Array(batch) => batch.iter().any(is_init),
        single => is_init(single),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::{ServerMetadata, TransportMode};
    use crate::mcp::metrics::ServerMetrics;
    use crate::mcp::protocol::ToolResult;
    use crate::mcp::registry::{Registry, ToolSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> Arc<ProtocolEngine> {
        let registry = Registry::new(ServerMetadata {
            name: "test".into(),
            version: "1.0".into(),
            transport_mode: TransportMode::StreamableHttp,
            host: "localhost".into(),
            port: 3000,
        });
        registry
            .register_sync_tool("ping_tool", ToolSpec::new("Replies pong"), |_, _| {
                Ok(ToolResult::text("pong"))
            })
            .unwrap();
        Arc::new(ProtocolEngine::new(registry, Arc::new(ServerMetrics::new())))
    }

    fn post(body: &str, session_id: Option<&str>) -> TransportRequest {
        TransportRequest {
            method: "POST".into(),
            session_id: session_id.map(str::to_string),
            body: Bytes::from(body.to_string()),
        }
    }

    const INIT: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#;
    const LIST: &str = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;

    #[test]
    fn test_select_keeps_matching_transport() {
        let supplied = Transport::StreamableHttp(StreamableHttpTransport::with_session_id_generator(|| "s".into()));
        let selected = Transport::select(TransportMode::StreamableHttp, Some(supplied));
        match selected {
            Transport::StreamableHttp(t) => assert!(!t.is_stateless()),
            other => panic!("unexpected transport {:?}", other),
        }

        let selected = Transport::select(TransportMode::Stdio, Some(Transport::Stdio(StdioTransport::with_buffer_capacity(16))));
        assert!(matches!(selected, Transport::Stdio(StdioTransport { buffer_capacity: 16, .. })));
    }

    #[test]
    fn test_select_replaces_mismatched_transport() {
        let selected = Transport::select(TransportMode::Stdio, Some(Transport::StreamableHttp(StreamableHttpTransport::stateless())));
        assert_eq!(selected.mode(), TransportMode::Stdio);

        let supplied = Transport::Stdio(StdioTransport::new());
        match Transport::select(TransportMode::StreamableHttp, Some(supplied)) {
            Transport::StreamableHttp(t) => assert!(t.is_stateless()),
            other => panic!("unexpected transport {:?}", other),
        }
    }

    #[test]
    fn test_select_defaults_when_none_supplied() {
        assert_eq!(Transport::select(TransportMode::Stdio, None).mode(), TransportMode::Stdio);
        assert_eq!(
            Transport::select(TransportMode::StreamableHttp, None).mode(),
            TransportMode::StreamableHttp
        );
    }

    #[tokio::test]
    async fn test_serve_lines() {
        let engine = engine();
        let input = format!(
            "{}\n\n{}\n{}\nnot json\n",
            INIT,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"ping_tool"}}"#
        );
        let mut output = Vec::new();
        serve_lines(&engine, input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[0]["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(lines[1]["id"], 3);
        assert_eq!(lines[1]["result"]["content"][0]["text"], "pong");
        assert_eq!(lines[2]["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_http_requires_engine() {
        let transport = StreamableHttpTransport::stateless();
        let err = transport.handle_request(post(LIST, None)).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_stateless_post_and_notification() {
        let transport = StreamableHttpTransport::stateless();
        assert!(transport.bind(engine()));
        assert!(!transport.bind(engine()));

        let response = transport.handle_request(post(LIST, None)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("application/json"));
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["result"]["tools"][0]["name"], "ping_tool");

        let response = transport
            .handle_request(post(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status, 202);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_stateless_rejects_get_and_bad_json() {
        let transport = StreamableHttpTransport::stateless();
        transport.bind(engine());

        let get = TransportRequest {
            method: "GET".into(),
            session_id: None,
            body: Bytes::new(),
        };
        let response = transport.handle_request(get).await.unwrap();
        assert_eq!(response.status, 405);
        assert_eq!(response.header("Allow"), Some("POST"));

        let response = transport.handle_request(post("{oops", None)).await.unwrap();
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ids = Arc::clone(&counter);
        let transport = StreamableHttpTransport::with_session_id_generator(move || {
            format!("session-{}", ids.fetch_add(1, Ordering::SeqCst))
        });
        transport.bind(engine());

        let response = transport.handle_request(post(INIT, None)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header(SESSION_HEADER), Some("session-0"));
        assert_eq!(transport.session_count(), 1);

        let missing = transport.handle_request(post(LIST, None)).await.unwrap();
        assert_eq!(missing.status, 400);
        let unknown = transport.handle_request(post(LIST, Some("nope"))).await.unwrap();
        assert_eq!(unknown.status, 404);
        let known = transport.handle_request(post(LIST, Some("session-0"))).await.unwrap();
        assert_eq!(known.status, 200);

        let delete = TransportRequest {
            method: "DELETE".into(),
            session_id: Some("session-0".into()),
            body: Bytes::new(),
        };
        assert_eq!(transport.handle_request(delete).await.unwrap().status, 200);
        assert_eq!(transport.session_count(), 0);
        let after = transport.handle_request(post(LIST, Some("session-0"))).await.unwrap();
        assert_eq!(after.status, 404);
    }
}
