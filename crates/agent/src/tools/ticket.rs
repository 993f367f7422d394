//! Incident ticket creation with idempotent replay

use async_trait::async_trait;
use netsage_config::TicketingConfig;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::idempotency::{content_digest, IdempotencyKey, IdempotencyLedger};
use super::{http_client, snippet, str_arg, AdapterError, ArgType, ToolAdapter, ToolCategory, ToolDescriptor};

/// What the ticketing backend is asked to file
#[derive(Debug, Clone, PartialEq)]
pub struct TicketRequest {
    pub title: String,
    pub description: String,
    pub device_id: String,
    pub urgency: u8,
    pub idempotency_key: IdempotencyKey,
}

/// Incident system the tool files into
#[async_trait]
pub trait TicketBackend: Send + Sync {
    /// Create one ticket and return its identifier
    async fn create(&self, request: &TicketRequest) -> Result<String, AdapterError>;
}

/// ServiceNow table API client
pub struct ServiceNowBackend {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct IncidentReply {
    result: IncidentRecord,
}

#[derive(Deserialize)]
struct IncidentList {
    #[serde(default)]
    result: Vec<IncidentRecord>,
}

#[derive(Deserialize)]
struct IncidentRecord {
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    sys_id: Option<String>,
}

impl ServiceNowBackend {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_config(config: &TicketingConfig) -> Self {
        Self::new(&config.base_url, &config.username, &config.password)
    }

    /// Incident already filed under this key by an earlier attempt
    async fn find_existing(&self, key: &IdempotencyKey) -> Result<Option<String>, AdapterError> {
        let url = format!("{}/api/now/table/incident", self.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .query(&[
                ("sysparm_query", format!("correlation_id={}", key.as_str())),
                ("sysparm_fields", "number,sys_id".to_string()),
                ("sysparm_limit", "1".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AdapterError::Backend(format!(
                "ticketing lookup returned {}: {}",
                status,
                snippet(&text)
            )));
        }

        let list: IncidentList = serde_json::from_str(&text)
            .map_err(|e| AdapterError::Backend(format!("ticketing lookup not understood: {}", e)))?;
        Ok(list
            .result
            .into_iter()
            .next()
            .and_then(|record| record.number.or(record.sys_id)))
    }
}

#[async_trait]
impl TicketBackend for ServiceNowBackend {
    async fn create(&self, request: &TicketRequest) -> Result<String, AdapterError> {
        if self.base_url.is_empty() {
            return Err(AdapterError::Backend("ticketing endpoint not configured".to_string()));
        }

        if let Some(existing) = self.find_existing(&request.idempotency_key).await? {
            debug!("incident {} already filed under key {}", existing, request.idempotency_key);
            return Ok(existing);
        }

        let url = format!("{}/api/now/table/incident", self.base_url);
        let body = json!({
            "short_description": request.title,
            "description": request.description,
            "urgency": request.urgency.to_string(),
            "cmdb_ci": request.device_id,
            "correlation_id": request.idempotency_key.as_str(),
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Idempotency-Key", request.idempotency_key.as_str())
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AdapterError::Backend(format!(
                "ticketing returned {}: {}",
                status,
                snippet(&text)
            )));
        }

        let reply: IncidentReply = serde_json::from_str(&text)
            .map_err(|e| AdapterError::Backend(format!("ticketing reply not understood: {}", e)))?;
        reply
            .result
            .number
            .or(reply.result.sys_id)
            .ok_or_else(|| AdapterError::Backend("ticketing reply has no ticket number".to_string()))
    }
}

/// `ticket_create`: files at most one ticket per idempotency key
pub struct TicketCreateTool {
    backend: Arc<dyn TicketBackend>,
    ledger: IdempotencyLedger<String>,
}

impl TicketCreateTool {
    pub fn new(backend: Arc<dyn TicketBackend>) -> Self {
        Self {
            backend,
            ledger: IdempotencyLedger::new(),
        }
    }

    /// Explicit key wins; else (device_id, fingerprint); else (device_id, title digest)
    pub fn key_for(args: &Map<String, Value>) -> IdempotencyKey {
        if let Some(key) = str_arg(args, "idempotency_key") {
            return IdempotencyKey::from_raw(key);
        }
        let device_id = str_arg(args, "device_id").unwrap_or_default();
        match str_arg(args, "fingerprint") {
            Some(fingerprint) => IdempotencyKey::derive(device_id, fingerprint),
            None => IdempotencyKey::derive(device_id, &content_digest(str_arg(args, "title").unwrap_or_default())),
        }
    }

    pub fn tickets_filed(&self) -> usize {
        self.ledger.len()
    }
}

#[async_trait]
impl ToolAdapter for TicketCreateTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "ticket_create",
            "Open an incident ticket for a device. Pass the discrepancy fingerprint so retries do not duplicate it.",
            ToolCategory::Action,
        )
        .required("title", ArgType::String, "Short summary")
        .required("description", ArgType::String, "Full incident description")
        .required("device_id", ArgType::String, "Affected device")
        .optional("fingerprint", ArgType::String, "Discrepancy fingerprint from reconciliation")
        .optional("idempotency_key", ArgType::String, "Explicit idempotency key")
        .optional("urgency", ArgType::Integer, "1 (high) to 3 (low), default 2")
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, AdapterError> {
        let urgency = match args.get("urgency").and_then(Value::as_i64) {
            None => 2,
            Some(u @ 1..=3) => u as u8,
            Some(other) => {
                return Err(AdapterError::Argument(format!(
                    "argument 'urgency' must be between 1 and 3, got {}",
                    other
                )))
            }
        };
        let key = Self::key_for(&args);
        let request = TicketRequest {
            title: str_arg(&args, "title").unwrap_or_default().to_string(),
            description: str_arg(&args, "description").unwrap_or_default().to_string(),
            device_id: str_arg(&args, "device_id").unwrap_or_default().to_string(),
            urgency,
            idempotency_key: key.clone(),
        };

        let backend = Arc::clone(&self.backend);
        let (ticket_id, replayed) = self
            .ledger
            .get_or_try_insert(&key, move || async move { backend.create(&request).await })
            .await?;

        if replayed {
            debug!("ticket {} replayed for key {}", ticket_id, key);
        } else {
            info!("ticket {} filed for device {}", ticket_id, str_arg(&args, "device_id").unwrap_or_default());
        }

        Ok(json!({
            "ticket_id": ticket_id,
            "idempotency_key": key.as_str(),
            "replayed": replayed,
        }))
    }
}
