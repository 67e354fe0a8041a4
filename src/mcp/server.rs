//! Base server: construction order, lifecycle and introspection.
//!
//! Construction runs validate → select transport → registration hook, after
//! which the server is `Registered`. `start()` (or `connect()` directly)
//! binds the transport to a protocol engine and moves it to `Connected`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::mcp::config::{ServerConfig, ServerMetadata, ServerOptions, TransportMode};
use crate::mcp::engine::ProtocolEngine;
use crate::mcp::error::{Result, ServerError};
use crate::mcp::metrics::{MetricsRecorder, MetricsSnapshot, ServerMetrics};
use crate::mcp::registry::Registry;
use crate::mcp::transport::{StdioTransport, StreamableHttpTransport, Transport};

/// Registration hook implemented by concrete servers.
///
/// Called exactly once, after transport selection and before the server is
/// handed back to the caller.
pub trait ServerComponents {
    fn register(&self, registry: &Registry) -> Result<()>;
}

impl<F> ServerComponents for F
where
    F: Fn(&Registry) -> Result<()>,
{
    fn register(&self, registry: &Registry) -> Result<()> {
        self(registry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Constructed,
    Registered,
    Connected,
}

/// A configured MCP server owning one transport and one registry.
pub struct BaseServer {
    config: ServerConfig,
    transport: Transport,
    registry: Registry,
    metrics: Arc<dyn MetricsRecorder>,
    state: Mutex<LifecycleState>,
    stdio_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl BaseServer {
    /// Build a server with an in-memory metrics recorder.
    ///
    /// # Errors
    /// `Validation` for bad options, or whatever the registration hook
    /// returns (typically `DuplicateName`).
    pub fn new<C: ServerComponents + ?Sized>(options: ServerOptions, components: &C) -> Result<Self> {
        Self::with_metrics(options, components, Arc::new(ServerMetrics::new()))
    }

    pub fn with_metrics<C: ServerComponents + ?Sized>(
        mut options: ServerOptions,
        components: &C,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Result<Self> {
        let config = ServerConfig::validate(&options)?;
        let transport = Transport::select(config.transport_mode, options.transport.take());
        let registry = Registry::new(ServerMetadata::from(&config));

        let server = Self {
            config,
            transport,
            registry,
            metrics,
            state: Mutex::new(LifecycleState::Constructed),
            stdio_task: Mutex::new(None),
        };

        components.register(&server.registry)?;
        *server.lock_state() = LifecycleState::Registered;
        debug!(
            "Server {} registered {} tools and {} resources",
            server.config.name,
            server.registry.tool_count(),
            server.registry.resource_count()
        );
        Ok(server)
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the selected transport to a new protocol engine.
    ///
    /// In stdio mode this spawns the stdin loop on the current tokio runtime.
    /// Calls after the first successful one do nothing.
    ///
    /// # Errors
    /// `TransportNotInitialized` if no transport exists for the declared mode.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.lock_state();
        if *state == LifecycleState::Connected {
            debug!("Server {} already connected", self.config.name);
            return Ok(());
        }

        let engine = Arc::new(ProtocolEngine::new(self.registry.clone(), Arc::clone(&self.metrics)));
        match self.transport()? {
            Transport::Stdio(stdio) => {
                let stdio = stdio.clone();
                let handle = tokio::spawn(stdio.run(engine));
                *self.stdio_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Transport::StreamableHttp(http) => {
                http.bind(engine);
            }
        }

        *state = LifecycleState::Connected;
        info!("Server {} connected over {}", self.config.name, self.config.transport_mode);
        Ok(())
    }

    /// Announce the server and connect it.
    ///
    /// This does not open a socket in HTTP mode; see `mcp::http`.
    pub async fn start(&self) -> Result<()> {
        match self.config.transport_mode {
            TransportMode::StreamableHttp => info!(
                "{} v{} running on http://{}:{}/mcp",
                self.config.name, self.config.version, self.config.host, self.config.port
            ),
            TransportMode::Stdio => info!(
                "{} v{} running on stdio",
                self.config.name, self.config.version
            ),
        }
        self.connect().await
    }

    /// Wait for the stdio loop to finish (stdin closed). Returns immediately
    /// in HTTP mode or before `connect()`.
    pub async fn wait(&self) -> Result<()> {
        let handle = self
            .stdio_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.await.map_err(std::io::Error::other)??;
        }
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn metadata(&self) -> ServerMetadata {
        self.registry.metadata().clone()
    }

    pub fn metrics_snapshot(&self) -> Option<MetricsSnapshot> {
        self.metrics.report()
    }

    /// The transport for the declared mode.
    ///
    /// # Errors
    /// `TransportNotInitialized` when the live transport does not belong to
    /// the declared mode.
    pub fn transport(&self) -> Result<&Transport> {
        if self.transport.mode() == self.config.transport_mode {
            Ok(&self.transport)
        } else {
            Err(ServerError::TransportNotInitialized {
                mode: self.config.transport_mode,
            })
        }
    }

    pub fn stdio_transport(&self) -> Option<&StdioTransport> {
        match &self.transport {
            Transport::Stdio(t) => Some(t),
            Transport::StreamableHttp(_) => None,
        }
    }

    pub fn http_transport(&self) -> Option<&StreamableHttpTransport> {
        match &self.transport {
            Transport::StreamableHttp(t) => Some(t),
            Transport::Stdio(_) => None,
        }
    }
}
