//! Calculator Server
//!
//! Basic arithmetic. Division by zero and results that overflow to infinity
//! are reported as failed tool results with a structured `error` payload
//! rather than as protocol errors.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::mcp::error::{HandlerResult, Result};
use crate::mcp::protocol::{Content, ResourceResult, ToolResult};
use crate::mcp::registry::{Registry, ResourceSpec, ToolContext, ToolSpec};
use crate::mcp::schema::{Field, Schema};
use crate::mcp::server::ServerComponents;

pub const OPERATIONS_URI: &str = "calculator://operations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    const ALL: [&'static str; 4] = ["add", "subtract", "multiply", "divide"];

    fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Subtract => '-',
            Self::Multiply => '*',
            Self::Divide => '/',
        }
    }

    fn apply(self, a: f64, b: f64) -> Option<f64> {
        match self {
            Self::Add => Some(a + b),
            Self::Subtract => Some(a - b),
            Self::Multiply => Some(a * b),
            Self::Divide if b == 0.0 => None,
            Self::Divide => Some(a / b),
        }
    }
}

#[derive(Deserialize)]
struct CalculateArgs {
    operation: Operation,
    a: f64,
    b: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CalculatorServer;

impl ServerComponents for CalculatorServer {
    fn register(&self, registry: &Registry) -> Result<()> {
        registry.register_sync_tool(
            "calculate",
            ToolSpec::new("Perform a basic arithmetic operation")
                .input(
                    Schema::object()
                        .field(
                            Field::string("operation")
                                .describe("Operation to perform")
                                .one_of(Operation::ALL),
                        )
                        .field(Field::number("a").describe("First operand"))
                        .field(Field::number("b").describe("Second operand")),
                )
                .output(
                    Schema::object()
                        .field(Field::number("result").optional())
                        .field(Field::string("error").optional()),
                ),
            calculate,
        )?;

        registry.register_sync_resource(
            "calculator-operations",
            OPERATIONS_URI,
            ResourceSpec::new("Supported arithmetic operations").mime_type("application/json"),
            || {
                Ok(ResourceResult::text(
                    OPERATIONS_URI,
                    "application/json",
                    json!({ "operations": Operation::ALL }).to_string(),
                ))
            },
        )
    }
}

fn calculate(args: Value, _ctx: &ToolContext) -> HandlerResult<ToolResult> {
    let CalculateArgs { operation, a, b } = serde_json::from_value(args)?;

    let Some(result) = operation.apply(a, b) else {
        return Ok(failure("Division by zero", "Division by zero is not allowed"));
    };
    // JSON has no representation for inf or NaN
    if !result.is_finite() {
        return Ok(failure(
            "Result is not a finite number",
            format!("{} {} {} does not fit in a finite number", a, operation.symbol(), b),
        ));
    }

    Ok(ToolResult {
        content: vec![Content::text(format!("{} {} {} = {}", a, operation.symbol(), b, result))],
        structured_content: Some(json!({ "result": result })),
        is_error: false,
    })
}

fn failure(summary: &str, detail: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![Content::text(format!("Error: {}", summary))],
        structured_content: Some(json!({ "error": detail.into() })),
        is_error: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::ServerOptions;
    use crate::mcp::server::BaseServer;

    fn server() -> BaseServer {
        BaseServer::new(ServerOptions::new("calculator", "1.0"), &CalculatorServer).unwrap()
    }

    #[tokio::test]
    async fn test_operations() {
        let server = server();
        let cases = [("add", 6.0), ("subtract", 2.0), ("multiply", 8.0), ("divide", 2.0)];
        for (operation, expected) in cases {
            let result = server
                .registry()
                .call_tool("calculate", json!({"operation": operation, "a": 4, "b": 2}))
                .await
                .unwrap();
            assert!(!result.is_error, "{operation} failed");
            assert_eq!(result.structured_content.unwrap()["result"], expected);
        }
    }

    #[tokio::test]
    async fn test_divide_by_zero() {
        let server = server();
        let result = server
            .registry()
            .call_tool("calculate", json!({"operation": "divide", "a": 1, "b": 0}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.content[0].as_text(), "Error: Division by zero");
        assert_eq!(
            result.structured_content.unwrap()["error"],
            "Division by zero is not allowed"
        );
    }

    #[tokio::test]
    async fn test_overflow_is_failed_result() {
        let server = server();
        let result = server
            .registry()
            .call_tool("calculate", json!({"operation": "multiply", "a": 1e308, "b": 1e308}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.content[0].as_text(), "Error: Result is not a finite number");
        let payload = result.structured_content.unwrap();
        assert!(payload.get("result").is_none());
        assert!(payload["error"].as_str().unwrap().contains("finite"));
    }

    #[tokio::test]
    async fn test_unknown_operation_rejected() {
        let server = server();
        let err = server
            .registry()
            .call_tool("calculate", json!({"operation": "modulo", "a": 1, "b": 2}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("calculate"));
    }

    #[tokio::test]
    async fn test_operations_resource() {
        let server = server();
        let result = server.registry().read_resource(OPERATIONS_URI).await.unwrap();
        let body: Value = serde_json::from_str(&result.contents[0].text).unwrap();
        assert_eq!(body["operations"][3], "divide");
    }
}
