//! Component registry for tools and resources.
//!
//! Concrete servers declare their tools and resources here from their
//! registration hook. Handlers may register further tools while they run:
//! the registry lock is only held for the insert itself and never across an
//! `.await`, so a late registration is atomic with respect to every other
//! invocation.

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::mcp::config::ServerMetadata;
use crate::mcp::error::{ComponentKind, HandlerError, HandlerResult, InvocationError, Result, ServerError};
use crate::mcp::protocol::{ResourceInfo, ResourceResult, ToolInfo, ToolResult};
use crate::mcp::schema::{CompiledSchema, Schema};

/// MIME type used when a resource does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "text/plain";

/// Metadata key holding a resource's MIME type.
pub const MIME_TYPE_KEY: &str = "mimeType";

pub type ToolFuture = BoxFuture<'static, HandlerResult<ToolResult>>;
pub type ResourceFuture = BoxFuture<'static, HandlerResult<ResourceResult>>;

/// Boxed tool handler. Sync and async handlers are both stored in this form.
pub type ToolHandler = Arc<dyn Fn(Value, ToolContext) -> ToolFuture + Send + Sync>;

/// Boxed resource handler.
pub type ResourceHandler = Arc<dyn Fn() -> ResourceFuture + Send + Sync>;

/// Declared shape of a tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Option<Schema>,
}

impl ToolSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            input_schema: Schema::object(),
            output_schema: None,
        }
    }

    pub fn input(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Declared shape of a resource.
#[derive(Debug, Clone, Default)]
pub struct ResourceSpec {
    pub description: String,
    /// Optional path of a file holding the resource's content.
    pub content: Option<PathBuf>,
    pub metadata: BTreeMap<String, String>,
}

impl ResourceSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn content(mut self, path: impl Into<PathBuf>) -> Self {
        self.content = Some(path.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn mime_type(self, mime_type: impl Into<String>) -> Self {
        self.metadata(MIME_TYPE_KEY, mime_type)
    }

    fn declared_mime_type(&self) -> Option<&str> {
        self.metadata.get(MIME_TYPE_KEY).map(String::as_str)
    }
}

/// What a tool handler can see while it runs.
#[derive(Clone)]
pub struct ToolContext {
    registry: Registry,
}

impl ToolContext {
    pub fn metadata(&self) -> &ServerMetadata {
        self.registry.metadata()
    }

    /// Registry of the running server, for late registration.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

struct ToolEntry {
    name: String,
    spec: ToolSpec,
    input: CompiledSchema,
    output: Option<CompiledSchema>,
    handler: ToolHandler,
}

struct ResourceEntry {
    name: String,
    uri: String,
    spec: ResourceSpec,
    handler: ResourceHandler,
}

#[derive(Default)]
struct Components {
    tools: Vec<Arc<ToolEntry>>,
    tool_index: HashMap<String, usize>,
    resources: Vec<Arc<ResourceEntry>>,
    resource_names: HashMap<String, usize>,
    resource_uris: HashMap<String, usize>,
}

/// Shared handle to one server's tools and resources.
///
/// Cloning is cheap and every clone sees the same components.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<Components>>,
    metadata: Arc<ServerMetadata>,
}

impl Registry {
    pub fn new(metadata: ServerMetadata) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Components::default())),
            metadata: Arc::new(metadata),
        }
    }

    pub fn metadata(&self) -> &ServerMetadata {
        &self.metadata
    }

    // Handlers never run under the lock, so a poisoned lock still guards
    // consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Components> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Components> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an async tool handler.
    ///
    /// # Errors
    /// `ServerError::DuplicateName` if a tool with this name exists, or
    /// `ServerError::Validation` if one of its schemas does not compile.
    pub fn register_tool<F, Fut>(&self, name: impl Into<String>, spec: ToolSpec, handler: F) -> Result<()>
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<ToolResult>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args, ctx| handler(args, ctx).boxed());
        self.insert_tool(name.into(), spec, handler)
    }

    /// Register a synchronous tool handler. It is invoked exactly like an
    /// async one.
    pub fn register_sync_tool<F>(&self, name: impl Into<String>, spec: ToolSpec, handler: F) -> Result<()>
    where
        F: Fn(Value, &ToolContext) -> HandlerResult<ToolResult> + Send + Sync + 'static,
    {
        let handler: ToolHandler =
            Arc::new(move |args, ctx| future::ready(handler(args, &ctx)).boxed());
        self.insert_tool(name.into(), spec, handler)
    }

    fn insert_tool(&self, name: String, spec: ToolSpec, handler: ToolHandler) -> Result<()> {
        // Validators are compiled once here and reused for every call
        let compile = |field: &'static str, schema: &Schema| {
            schema
                .compile()
                .map_err(|e| ServerError::validation(field, format!("tool '{}': {}", name, e)))
        };
        let input = compile("input_schema", &spec.input_schema)?;
        let output = spec
            .output_schema
            .as_ref()
            .map(|schema| compile("output_schema", schema))
            .transpose()?;

        let mut components = self.write();
        if components.tool_index.contains_key(&name) {
            return Err(ServerError::DuplicateName {
                kind: ComponentKind::Tool,
                name,
            });
        }

        debug!("Registering tool: {}", name);
        let position = components.tools.len();
        components.tool_index.insert(name.clone(), position);
        components.tools.push(Arc::new(ToolEntry {
            name,
            spec,
            input,
            output,
            handler,
        }));
        Ok(())
    }

    /// Register an async resource handler.
    ///
    /// # Errors
    /// `ServerError::DuplicateName` if the name or the URI is taken.
    pub fn register_resource<F, Fut>(
        &self,
        name: impl Into<String>,
        uri: impl Into<String>,
        spec: ResourceSpec,
        handler: F,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<ResourceResult>> + Send + 'static,
    {
        let handler: ResourceHandler = Arc::new(move || handler().boxed());
        self.insert_resource(name.into(), uri.into(), spec, handler)
    }

    pub fn register_sync_resource<F>(
        &self,
        name: impl Into<String>,
        uri: impl Into<String>,
        spec: ResourceSpec,
        handler: F,
    ) -> Result<()>
    where
        F: Fn() -> HandlerResult<ResourceResult> + Send + Sync + 'static,
    {
        let handler: ResourceHandler = Arc::new(move || future::ready(handler()).boxed());
        self.insert_resource(name.into(), uri.into(), spec, handler)
    }

    /// Register a resource served from the file named by `spec.content`.
    pub fn register_file_resource(
        &self,
        name: impl Into<String>,
        uri: impl Into<String>,
        spec: ResourceSpec,
    ) -> Result<()> {
        let name = name.into();
        let uri = uri.into();
        let path = spec.content.clone().ok_or_else(|| {
            ServerError::validation("content", format!("resource '{}' has no content path", name))
        })?;
        let mime_type = spec.declared_mime_type().unwrap_or(DEFAULT_MIME_TYPE).to_string();
        let handler = file_resource_handler(path, uri.clone(), mime_type);
        self.register_resource(name, uri, spec, handler)
    }

    fn insert_resource(
        &self,
        name: String,
        uri: String,
        spec: ResourceSpec,
        handler: ResourceHandler,
    ) -> Result<()> {
        let mut components = self.write();
        if components.resource_names.contains_key(&name) {
            return Err(ServerError::DuplicateName {
                kind: ComponentKind::Resource,
                name,
            });
        }
        if components.resource_uris.contains_key(&uri) {
            return Err(ServerError::DuplicateName {
                kind: ComponentKind::ResourceUri,
                name: uri,
            });
        }

        debug!("Registering resource: {} ({})", name, uri);
        let position = components.resources.len();
        components.resource_names.insert(name.clone(), position);
        components.resource_uris.insert(uri.clone(), position);
        components.resources.push(Arc::new(ResourceEntry {
            name,
            uri,
            spec,
            handler,
        }));
        Ok(())
    }

    pub fn contains_tool(&self, name: &str) -> bool {
        self.read().tool_index.contains_key(name)
    }

    pub fn contains_resource(&self, uri: &str) -> bool {
        self.read().resource_uris.contains_key(uri)
    }

    pub fn tool_count(&self) -> usize {
        self.read().tools.len()
    }

    pub fn resource_count(&self) -> usize {
        self.read().resources.len()
    }

    /// Tool names in registration order.
    pub fn tool_names(&self) -> Vec<String> {
        self.read().tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.read()
            .tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name.clone(),
                description: t.spec.description.clone(),
                input_schema: t.spec.input_schema.to_json_schema(),
                output_schema: t.spec.output_schema.as_ref().map(Schema::to_json_schema),
            })
            .collect()
    }

    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        self.read()
            .resources
            .iter()
            .map(|r| ResourceInfo {
                name: r.name.clone(),
                uri: r.uri.clone(),
                description: r.spec.description.clone(),
                mime_type: r.spec.declared_mime_type().map(str::to_string),
                metadata: r.spec.metadata.clone(),
            })
            .collect()
    }

    /// Invoke a tool by name.
    ///
    /// Arguments are validated against the input schema first. A failing
    /// handler, or structured output that breaks the output schema, yields a
    /// result with `is_error` set rather than an `Err`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> std::result::Result<ToolResult, InvocationError> {
        let entry = {
            let components = self.read();
            components
                .tool_index
                .get(name)
                .and_then(|i| components.tools.get(*i).cloned())
        }
        .ok_or_else(|| InvocationError::UnknownTool(name.to_string()))?;

        let arguments = entry
            .input
            .validate(&arguments)
            .map_err(|source| InvocationError::InvalidArguments {
                tool: name.to_string(),
                source,
            })?;

        let ctx = ToolContext {
            registry: self.clone(),
        };
        let result = match (entry.handler)(arguments, ctx).await {
            Ok(result) => result,
            Err(e) => {
                debug!("Tool {} failed: {}", name, e);
                return Ok(ToolResult::error(e.message()));
            }
        };

        Ok(check_output(&entry, result))
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> std::result::Result<ResourceResult, InvocationError> {
        let entry = {
            let components = self.read();
            components
                .resource_uris
                .get(uri)
                .and_then(|i| components.resources.get(*i).cloned())
        }
        .ok_or_else(|| InvocationError::UnknownResource(uri.to_string()))?;

        Ok((entry.handler)().await?)
    }
}

fn check_output(entry: &ToolEntry, result: ToolResult) -> ToolResult {
    let Some(schema) = &entry.output else {
        return result;
    };
    if result.is_error {
        return result;
    }
    match &result.structured_content {
        None => ToolResult::error(format!(
            "Tool {} has an output schema but returned no structured content",
            entry.name
        )),
        Some(payload) => match schema.validate(payload) {
            Ok(_) => result,
            Err(e) => ToolResult::error(format!(
                "Invalid structured content for tool {}: {}",
                entry.name, e
            )),
        },
    }
}

/// Handler serving a file's contents as a single text entry.
pub fn file_resource_handler(
    path: PathBuf,
    uri: String,
    mime_type: String,
) -> impl Fn() -> ResourceFuture + Send + Sync + 'static {
    move || {
        let path = path.clone();
        let uri = uri.clone();
        let mime_type = mime_type.clone();
        async move {
            let text = tokio::fs::read_to_string(&path).await?;
            Ok::<_, HandlerError>(ResourceResult::text(uri, mime_type, text))
        }
        .boxed()
    }
}
