//! Tool registry and the adapter contract

pub mod cve;
pub mod descriptor;
pub mod email;
pub mod idempotency;
pub mod inventory;
pub mod telemetry;
pub mod ticket;

pub use cve::CveLookupTool;
pub use descriptor::{ArgType, ArgumentError, ArgumentSpec, ToolCategory, ToolDescriptor};
pub use email::{EmailSendTool, MailRelay, OutgoingMail, SmtpRelay};
pub use idempotency::{IdempotencyKey, IdempotencyLedger};
pub use inventory::InventoryLookupTool;
pub use telemetry::{TelemetryNlTool, TelemetryRawTool};
pub use ticket::{ServiceNowBackend, TicketBackend, TicketCreateTool, TicketRequest};

use async_trait::async_trait;
use netsage_config::Config;
use netsage_provider::Tool;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transcript::{ErrorKind, Observation};
use crate::{AgentError, Result};

/// Failure of a single backend call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("{0}")]
    Argument(String),

    #[error("{0}")]
    Backend(String),

    #[error("call timed out")]
    Timeout,

    #[error("call cancelled")]
    Cancelled,
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Argument(_) => ErrorKind::ArgumentError,
            AdapterError::Backend(_) => ErrorKind::BackendError,
            AdapterError::Timeout => ErrorKind::Timeout,
            AdapterError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdapterError::Timeout
        } else {
            AdapterError::Backend(e.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for AdapterError {
    fn from(e: tokio::task::JoinError) -> Self {
        AdapterError::Backend(format!("backend call failed: {}", e))
    }
}

impl From<ArgumentError> for AdapterError {
    fn from(e: ArgumentError) -> Self {
        AdapterError::Argument(e.to_string())
    }
}

/// A backend exposed to the reasoning step
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Perform the backend call with already-validated arguments
    async fn call(&self, args: Map<String, Value>) -> std::result::Result<Value, AdapterError>;

    /// Validate, call under a timeout, and wrap the outcome
    async fn invoke(
        &self,
        arguments: &Map<String, Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Observation {
        invoke_with(&self.descriptor(), self, arguments, timeout, cancel).await
    }
}

/// Shared invoke path: never fails, always yields an Observation
pub async fn invoke_with<A: ToolAdapter + ?Sized>(
    descriptor: &ToolDescriptor,
    adapter: &A,
    arguments: &Map<String, Value>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Observation {
    let source = descriptor.name.as_str();
    let args = match descriptor.validate(arguments) {
        Ok(args) => args,
        Err(e) => {
            debug!("{}: rejected arguments: {}", source, e);
            return Observation::error(source, ErrorKind::ArgumentError, e.to_string());
        }
    };

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AdapterError::Cancelled),
        res = tokio::time::timeout(timeout, adapter.call(args)) => match res {
            Ok(inner) => inner,
            Err(_) => Err(AdapterError::Timeout),
        },
    };

    match outcome {
        Ok(payload) => Observation::ok(source, payload),
        Err(e) => {
            warn!("{}: {} ({})", source, e, e.kind());
            Observation::error(source, e.kind(), e.to_string())
        }
    }
}

/// A resolved registry entry
#[derive(Clone, Copy)]
pub struct RegisteredTool<'a> {
    pub descriptor: &'a ToolDescriptor,
    pub adapter: &'a dyn ToolAdapter,
}

impl<'a> RegisteredTool<'a> {
    /// Invoke against the registered descriptor
    pub async fn invoke(
        &self,
        arguments: &Map<String, Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Observation {
        invoke_with(self.descriptor, self.adapter, arguments, timeout, cancel).await
    }
}

/// Tool name → adapter, in registration order
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
    adapters: Vec<Arc<dyn ToolAdapter>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            adapters: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn register(&mut self, descriptor: ToolDescriptor, adapter: Arc<dyn ToolAdapter>) -> Result<()> {
        if self.index.contains_key(&descriptor.name) {
            return Err(AgentError::DuplicateTool(descriptor.name));
        }
        debug!("registering tool {}", descriptor.name);
        self.index.insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        self.adapters.push(adapter);
        Ok(())
    }

    /// Register under the adapter's own descriptor
    pub fn register_adapter<T: ToolAdapter + 'static>(&mut self, adapter: T) -> Result<()> {
        let descriptor = adapter.descriptor();
        self.register(descriptor, Arc::new(adapter))
    }

    pub fn describe_all(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, name: &str) -> Result<RegisteredTool<'_>> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        Ok(RegisteredTool {
            descriptor: &self.descriptors[idx],
            adapter: self.adapters[idx].as_ref(),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Function-calling definitions for the reasoning backend
    pub fn definitions(&self) -> Vec<Tool> {
        self.descriptors.iter().map(|d| d.to_provider_tool()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the network-operations tools from configuration
pub fn register_default_tools(registry: &mut ToolRegistry, config: &Config) -> Result<()> {
    let backends = &config.backends;

    registry.register_adapter(TelemetryNlTool::from_config(&backends.telemetry))?;
    registry.register_adapter(TelemetryRawTool::from_config(&backends.telemetry))?;
    registry.register_adapter(InventoryLookupTool::from_config(&backends.inventory))?;
    registry.register_adapter(TicketCreateTool::new(Arc::new(
        ServiceNowBackend::from_config(&backends.ticketing),
    )))?;
    registry.register_adapter(EmailSendTool::from_config(&backends.email))?;
    registry.register_adapter(CveLookupTool::from_config(&backends.cve))?;

    Ok(())
}

/// Reusable HTTP client for the adapters
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("netsage/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Non-empty string argument
pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Shorten a backend body for error messages
pub(crate) fn snippet(body: &str) -> String {
    const LIMIT: usize = 200;
    if body.chars().count() <= LIMIT {
        body.to_string()
    } else {
        let cut: String = body.chars().take(LIMIT).collect();
        format!("{}...", cut)
    }
}
