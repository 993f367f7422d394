//! Telemetry assistants: natural-language and raw-data endpoints

use async_trait::async_trait;
use netsage_config::TelemetryConfig;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{http_client, snippet, str_arg, AdapterError, ArgType, ToolAdapter, ToolCategory, ToolDescriptor};

/// POST a JSON body with bearer auth and return the decoded reply
async fn post_json(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: Value,
) -> Result<Value, AdapterError> {
    if url.is_empty() {
        return Err(AdapterError::Backend("telemetry endpoint not configured".to_string()));
    }

    let response = client.post(url).bearer_auth(api_key).json(&body).send().await?;
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(AdapterError::Backend(format!(
            "telemetry returned {}: {}",
            status,
            snippet(&text)
        )));
    }

    serde_json::from_str(&text)
        .map_err(|e| AdapterError::Backend(format!("telemetry reply is not JSON: {}", e)))
}

fn attach_device(mut payload: Value, device_id: Option<&str>) -> Value {
    if let (Some(id), Value::Object(map)) = (device_id, &mut payload) {
        map.entry("device_id").or_insert_with(|| Value::String(id.to_string()));
    }
    payload
}

/// Free-form questions answered by the telemetry assistant
pub struct TelemetryNlTool {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl TelemetryNlTool {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(&config.nl_url, &config.api_key)
    }

    /// Structured content is kept; prose is wrapped as `{"answer": ...}`
    fn shape(content: Value) -> Value {
        match content {
            Value::Object(_) => content,
            Value::String(text) => match serde_json::from_str::<Value>(text.trim()) {
                Ok(parsed @ Value::Object(_)) => parsed,
                _ => json!({ "answer": text }),
            },
            Value::Null => json!({ "answer": "" }),
            other => json!({ "answer": other }),
        }
    }
}

#[async_trait]
impl ToolAdapter for TelemetryNlTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "telemetry_nl",
            "Ask the telemetry assistant a natural-language question about live device state.",
            ToolCategory::Telemetry,
        )
        .required("query", ArgType::String, "Question to ask, e.g. 'What is the status of S6?'")
        .optional("device_id", ArgType::String, "Device the question is about")
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, AdapterError> {
        let query = str_arg(&args, "query").unwrap_or_default();
        debug!("telemetry_nl query: {}", query);

        let reply = post_json(&self.client, &self.url, &self.api_key, json!({ "content": query })).await?;
        let content = reply.get("content").cloned().unwrap_or(Value::Null);
        Ok(attach_device(Self::shape(content), str_arg(&args, "device_id")))
    }
}

/// Raw telemetry queries returning structured data
pub struct TelemetryRawTool {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl TelemetryRawTool {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(&config.raw_url, &config.api_key)
    }
}

#[async_trait]
impl ToolAdapter for TelemetryRawTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "telemetry_raw",
            "Run a raw telemetry command and get structured counters and state.",
            ToolCategory::Telemetry,
        )
        .required("command", ArgType::String, "Telemetry command, e.g. 'show device S6'")
        .optional("device_id", ArgType::String, "Device the command targets")
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, AdapterError> {
        let command = str_arg(&args, "command").unwrap_or_default();
        debug!("telemetry_raw command: {}", command);

        let reply = post_json(&self.client, &self.url, &self.api_key, json!({ "command": command })).await?;
        let data = match reply.get("data") {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(other) => json!({ "data": other }),
            None => return Err(AdapterError::Backend("telemetry reply has no data".to_string())),
        };
        Ok(attach_device(data, str_arg(&args, "device_id")))
    }
}
