//! Protocol engine.
//!
//! Turns parsed JSON-RPC messages into responses by dispatching MCP methods
//! onto the component registry. Both transports share this engine; it never
//! touches I/O itself.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::mcp::error::InvocationError;
use crate::mcp::metrics::MetricsRecorder;
use crate::mcp::protocol::{
    CallToolParams, LATEST_PROTOCOL_VERSION, McpError, McpRequest, McpResponse, RESOURCE_NOT_FOUND,
    ReadResourceParams, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::registry::Registry;

pub struct ProtocolEngine {
    registry: Registry,
    metrics: Arc<dyn MetricsRecorder>,
}

impl ProtocolEngine {
    pub fn new(registry: Registry, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self { registry, metrics }
    }

    /// Handle one raw line or body. Unparsable input yields a parse error
    /// response with a null id.
    pub async fn handle_text(&self, text: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_value(value).await,
            Err(e) => {
                warn!("Parse error: {}", e);
                to_value(McpResponse::failure(None, McpError::parse_error(e)))
            }
        }
    }

    /// Handle a single message or a batch. Returns `None` when nothing needs
    /// to be sent back (notifications only).
    pub async fn handle_value(&self, message: Value) -> Option<Value> {
        match message {
            Value::Array(batch) => {
                if batch.is_empty() {
                    return to_value(McpResponse::failure(
                        None,
                        McpError::invalid_request("Empty batch"),
                    ));
                }
                let mut responses = Vec::with_capacity(batch.len());
                for item in batch {
                    if let Some(response) = self.handle_single(item).await {
                        responses.push(response);
                    }
                }
                (!responses.is_empty()).then_some(Value::Array(responses))
            }
            single => self.handle_single(single).await,
        }
    }

    async fn handle_single(&self, message: Value) -> Option<Value> {
        let id = message.get("id").cloned();
        let request: McpRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                // Without an id there is nobody to answer
                return id.and_then(|id| {
                    to_value(McpResponse::failure(
                        Some(id),
                        McpError::invalid_request(format!("Invalid request: {}", e)),
                    ))
                });
            }
        };

        self.handle_request(request).await.and_then(to_value)
    }

    /// Handle a typed request.
    pub async fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        self.metrics.record_request();

        if request.is_notification() {
            debug!("Received notification: {}", request.method);
            return None;
        }

        if request.jsonrpc != "2.0" {
            return Some(McpResponse::failure(
                request.id,
                McpError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        debug!("Received request: method={}", request.method);
        let response = match self.dispatch(&request.method, request.params).await {
            Ok(result) => McpResponse::success(request.id, result),
            Err(error) => McpResponse::failure(request.id, error),
        };
        Some(response)
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        match method {
            "initialize" => Ok(self.initialize(params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.list_tools() })),
            "tools/call" => self.call_tool(params).await,
            "resources/list" => Ok(json!({ "resources": self.registry.list_resources() })),
            "resources/read" => self.read_resource(params).await,
            _ => Err(McpError::method_not_found(method)),
        }
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);
        let protocol_version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(LATEST_PROTOCOL_VERSION);

        let metadata = self.registry.metadata();
        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": { "listChanged": false }
            },
            "serverInfo": {
                "name": metadata.name,
                "version": metadata.version
            }
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, McpError> {
        let params: CallToolParams = parse_params(params)?;
        let arguments = params.arguments.unwrap_or_else(|| json!({}));

        let started = Instant::now();
        let outcome = self.registry.call_tool(&params.name, arguments).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(result) => {
                self.metrics
                    .record_tool_call(&params.name, elapsed, result.is_error);
                serde_json::to_value(result).map_err(|e| McpError::internal(e.to_string()))
            }
            Err(e) => {
                // Unknown tools never ran, so they are not counted
                if !matches!(e, InvocationError::UnknownTool(_)) {
                    self.metrics.record_tool_call(&params.name, elapsed, true);
                }
                Err(invocation_error(e))
            }
        }
    }

    async fn read_resource(&self, params: Option<Value>) -> Result<Value, McpError> {
        let params: ReadResourceParams = parse_params(params)?;
        let result = self
            .registry
            .read_resource(&params.uri)
            .await
            .map_err(invocation_error)?;
        serde_json::to_value(result).map_err(|e| McpError::internal(e.to_string()))
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    let params = params.ok_or_else(|| McpError::invalid_params("Invalid params"))?;
    serde_json::from_value(params).map_err(|e| McpError::invalid_params(format!("Invalid params: {}", e)))
}

fn invocation_error(err: InvocationError) -> McpError {
    match err {
        InvocationError::UnknownResource(uri) => McpError {
            code: RESOURCE_NOT_FOUND,
            message: "Resource not found".to_string(),
            data: Some(json!({ "uri": uri })),
        },
        InvocationError::UnknownTool(_) | InvocationError::InvalidArguments { .. } => {
            McpError::invalid_params(err.to_string())
        }
        InvocationError::Handler(e) => McpError::internal(e.to_string()),
    }
}

fn to_value(response: McpResponse) -> Option<Value> {
    match serde_json::to_value(response) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Error serializing response: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::{ServerMetadata, TransportMode};
    use crate::mcp::error::HandlerError;
    use crate::mcp::metrics::ServerMetrics;
    use crate::mcp::protocol::{ResourceResult, ToolResult};
    use crate::mcp::registry::{ResourceSpec, ToolSpec};
    use crate::mcp::schema::{Field, Schema};

    fn setup() -> (ProtocolEngine, Arc<ServerMetrics>) {
        let registry = Registry::new(ServerMetadata {
            name: "engine-test".into(),
            version: "0.3".into(),
            transport_mode: TransportMode::Stdio,
            host: "localhost".into(),
            port: 3000,
        });
        registry
            .register_sync_tool(
                "echo",
                ToolSpec::new("Echo").input(Schema::object().field(Field::string("message"))),
                |args, _| Ok(ToolResult::text(args["message"].as_str().unwrap_or_default())),
            )
            .unwrap();
        registry
            .register_sync_resource("info", "test://info", ResourceSpec::new("Info"), || {
                Ok(ResourceResult::text("test://info", "text/plain", "hello"))
            })
            .unwrap();
        registry
            .register_sync_resource("broken", "test://broken", ResourceSpec::new("Broken"), || {
                Err(HandlerError::new("disk on fire"))
            })
            .unwrap();
        let metrics = Arc::new(ServerMetrics::new());
        (ProtocolEngine::new(registry, metrics.clone()), metrics)
    }

    async fn call(engine: &ProtocolEngine, message: Value) -> Value {
        engine.handle_value(message).await.expect("response expected")
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let (engine, _) = setup();
        let resp = call(&engine, json!({"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05"}})).await;
        assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(resp["result"]["serverInfo"]["name"], "engine-test");

        let resp = call(&engine, json!({"jsonrpc":"2.0","id":2,"method":"initialize","params":{"protocolVersion":"1999-01-01"}})).await;
        assert_eq!(resp["result"]["protocolVersion"], LATEST_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_tools_call_records_metrics() {
        let (engine, metrics) = setup();
        let resp = call(&engine, json!({"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"echo","arguments":{"message":"hey"}}})).await;
        assert_eq!(resp["id"], "a");
        assert_eq!(resp["result"]["content"][0]["text"], "hey");
        assert_eq!(resp["result"]["isError"], false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 1);
        assert_eq!(snapshot.tools["echo"].calls, 1);
    }

    #[tokio::test]
    async fn test_tools_call_errors() {
        let (engine, metrics) = setup();
        let unknown = call(&engine, json!({"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"nope"}})).await;
        assert_eq!(unknown["error"]["code"], -32602);

        let invalid = call(&engine, json!({"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{}}})).await;
        assert_eq!(invalid["error"]["code"], -32602);
        assert!(invalid["error"]["message"].as_str().unwrap().contains("message"));

        let no_params = call(&engine, json!({"jsonrpc":"2.0","id":3,"method":"tools/call"})).await;
        assert_eq!(no_params["error"]["code"], -32602);

        let snapshot = metrics.snapshot();
        assert!(!snapshot.tools.contains_key("nope"));
        assert_eq!(snapshot.tools["echo"].calls, 1);
        assert_eq!(snapshot.tools["echo"].errors, 1);
    }

    #[tokio::test]
    async fn test_resources() {
        let (engine, _) = setup();
        let list = call(&engine, json!({"jsonrpc":"2.0","id":1,"method":"resources/list"})).await;
        assert_eq!(list["result"]["resources"][0]["uri"], "test://info");

        let read = call(&engine, json!({"jsonrpc":"2.0","id":2,"method":"resources/read","params":{"uri":"test://info"}})).await;
        assert_eq!(read["result"]["contents"][0]["text"], "hello");

        let missing = call(&engine, json!({"jsonrpc":"2.0","id":3,"method":"resources/read","params":{"uri":"test://none"}})).await;
        assert_eq!(missing["error"]["code"], RESOURCE_NOT_FOUND);

        let broken = call(&engine, json!({"jsonrpc":"2.0","id":4,"method":"resources/read","params":{"uri":"test://broken"}})).await;
        assert_eq!(broken["error"]["code"], -32603);
        assert_eq!(broken["error"]["message"], "disk on fire");
    }

    #[tokio::test]
    async fn test_notifications_and_unknown_methods() {
        let (engine, _) = setup();
        assert!(engine.handle_value(json!({"jsonrpc":"2.0","method":"notifications/initialized"})).await.is_none());

        let resp = call(&engine, json!({"jsonrpc":"2.0","id":9,"method":"prompts/list"})).await;
        assert_eq!(resp["error"]["code"], -32601);

        let resp = call(&engine, json!({"jsonrpc":"1.0","id":10,"method":"ping"})).await;
        assert_eq!(resp["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_batch() {
        let (engine, _) = setup();
        let resp = call(&engine, json!([
            {"jsonrpc":"2.0","id":1,"method":"ping"},
            {"jsonrpc":"2.0","method":"notifications/initialized"},
            {"jsonrpc":"2.0","id":2,"method":"tools/list"}
        ])).await;
        let items = resp.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["result"]["tools"][0]["name"], "echo");
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let (engine, _) = setup();
        let resp = engine.handle_text("{not json").await.unwrap();
        assert_eq!(resp["error"]["code"], -32700);
        assert!(resp["id"].is_null());
    }
}
