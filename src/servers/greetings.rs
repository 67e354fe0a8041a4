//! Greetings Server
//!
//! Demonstrates the basic structure of a server: a synchronous tool with a
//! structured payload, an async tool that registers another tool at call
//! time, and a static resource.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::mcp::error::{HandlerResult, Result, ServerError};
use crate::mcp::protocol::{Content, ResourceResult, ToolResult};
use crate::mcp::registry::{Registry, ResourceSpec, ToolContext, ToolSpec};
use crate::mcp::schema::{Field, Schema};
use crate::mcp::server::ServerComponents;

pub const INFO_URI: &str = "greetings://info";

#[derive(Debug, Default, Clone, Copy)]
pub struct GreetingsServer;

impl ServerComponents for GreetingsServer {
    fn register(&self, registry: &Registry) -> Result<()> {
        registry.register_sync_tool(
            "greet",
            ToolSpec::new("Greet someone by name")
                .input(Schema::object().field(Field::string("name").describe("Name of the person to greet")))
                .output(Schema::object().field(Field::string("text"))),
            greet,
        )?;

        registry.register_tool(
            "enable_farewell",
            ToolSpec::new("Add a farewell tool to this server"),
            enable_farewell,
        )?;

        let metadata = registry.metadata().clone();
        registry.register_sync_resource(
            "greetings-info",
            INFO_URI,
            ResourceSpec::new("What this server is").mime_type("text/plain"),
            move || {
                Ok(ResourceResult::text(
                    INFO_URI,
                    "text/plain",
                    format!(
                        "{} version {} greets people by name over {}.",
                        metadata.name, metadata.version, metadata.transport_mode
                    ),
                ))
            },
        )
    }
}

#[derive(Deserialize)]
struct NameArgs {
    name: String,
}

fn greet(args: Value, ctx: &ToolContext) -> HandlerResult<ToolResult> {
    let NameArgs { name } = serde_json::from_value(args)?;
    let metadata = ctx.metadata();
    let text = format!(
        "Hello, {}! Welcome to {} version {}.",
        name, metadata.name, metadata.version
    );

    Ok(ToolResult {
        content: vec![Content::text(text.clone())],
        structured_content: Some(json!({ "text": text })),
        is_error: false,
    })
}

async fn enable_farewell(_args: Value, ctx: ToolContext) -> HandlerResult<ToolResult> {
    let spec = ToolSpec::new("Say goodbye to someone")
        .input(Schema::object().field(Field::string("name").describe("Name of the person leaving")));

    match ctx.registry().register_sync_tool("farewell", spec, farewell) {
        Ok(()) => Ok(ToolResult::text("The farewell tool is now available.")),
        Err(ServerError::DuplicateName { .. }) => {
            Ok(ToolResult::text("The farewell tool is already enabled."))
        }
        Err(e) => Err(e.to_string().into()),
    }
}

fn farewell(args: Value, ctx: &ToolContext) -> HandlerResult<ToolResult> {
    let NameArgs { name } = serde_json::from_value(args)?;
    Ok(ToolResult::text(format!(
        "Goodbye, {}! Thanks for visiting {}.",
        name,
        ctx.metadata().name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::{ServerMetadata, ServerOptions, TransportMode};
    use crate::mcp::server::BaseServer;

    fn registry_named(name: &str, version: &str) -> Registry {
        let registry = Registry::new(ServerMetadata {
            name: name.into(),
            version: version.into(),
            transport_mode: TransportMode::Stdio,
            host: "localhost".into(),
            port: 3000,
        });
        GreetingsServer.register(&registry).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_greet_single_letter_server() {
        let registry = registry_named("T", "1.0");
        let result = registry.call_tool("greet", json!({"name": "Ada"})).await.unwrap();
        assert_eq!(
            result.structured_content.unwrap()["text"],
            "Hello, Ada! Welcome to T version 1.0."
        );
    }

    #[tokio::test]
    async fn test_greet_through_base_server() {
        let options = ServerOptions::new("Tea", "1.0").transport_mode("stdio");
        let server = BaseServer::new(options, &GreetingsServer).unwrap();
        let result = server
            .registry()
            .call_tool("greet", json!({"name": "Ada"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content[0].as_text(), "Hello, Ada! Welcome to Tea version 1.0.");
    }

    #[tokio::test]
    async fn test_enable_farewell_registers_once() {
        let registry = registry_named("greeter", "1.0");
        assert!(!registry.contains_tool("farewell"));

        let first = registry.call_tool("enable_farewell", json!({})).await.unwrap();
        assert_eq!(first.content[0].as_text(), "The farewell tool is now available.");
        let second = registry.call_tool("enable_farewell", json!({})).await.unwrap();
        assert_eq!(second.content[0].as_text(), "The farewell tool is already enabled.");

        assert_eq!(registry.tool_names(), vec!["greet", "enable_farewell", "farewell"]);
        let bye = registry.call_tool("farewell", json!({"name": "Ada"})).await.unwrap();
        assert_eq!(bye.content[0].as_text(), "Goodbye, Ada! Thanks for visiting greeter.");

        let greet = registry.call_tool("greet", json!({"name": "Bo"})).await.unwrap();
        assert!(!greet.is_error);
    }

    #[tokio::test]
    async fn test_info_resource() {
        let registry = registry_named("greeter", "2.0");
        let result = registry.read_resource(INFO_URI).await.unwrap();
        assert_eq!(result.contents[0].uri, INFO_URI);
        assert_eq!(
            result.contents[0].text,
            "greeter version 2.0 greets people by name over stdio."
        );
    }
}
