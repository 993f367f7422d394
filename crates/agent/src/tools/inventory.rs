//! Device inventory lookup (NetBox-style DCIM API)

use async_trait::async_trait;
use netsage_config::InventoryConfig;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{http_client, snippet, str_arg, AdapterError, ArgType, ToolAdapter, ToolCategory, ToolDescriptor};

#[derive(Deserialize)]
struct DeviceList {
    #[serde(default)]
    results: Vec<Value>,
}

pub struct InventoryLookupTool {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl InventoryLookupTool {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn from_config(config: &InventoryConfig) -> Self {
        Self::new(&config.base_url, &config.token)
    }

    /// Flatten a device record into comparable facts
    pub fn normalize(device_id: &str, record: &Value) -> Value {
        fn nested<'a>(record: &'a Value, key: &str, inner: &[&str]) -> Option<&'a Value> {
            let value = record.get(key)?;
            if value.is_object() {
                inner.iter().find_map(|k| value.get(*k)).filter(|v| !v.is_null())
            } else if value.is_null() {
                None
            } else {
                Some(value)
            }
        }

        let mut facts = Map::new();
        facts.insert(
            "device_id".to_string(),
            record.get("name").cloned().unwrap_or_else(|| json!(device_id)),
        );
        let fields: [(&str, &str, &[&str]); 6] = [
            ("status", "status", &["value", "label"]),
            ("location", "site", &["name", "slug"]),
            ("platform", "platform", &["name", "slug"]),
            ("role", "role", &["name", "slug"]),
            ("serial", "serial", &[]),
            ("primary_ip", "primary_ip", &["address"]),
        ];
        for (fact, key, inner) in fields {
            if let Some(value) = nested(record, key, inner) {
                facts.insert(fact.to_string(), value.clone());
            }
        }
        // Older NetBox releases call the role field device_role
        if !facts.contains_key("role") {
            if let Some(value) = nested(record, "device_role", &["name", "slug"]) {
                facts.insert("role".to_string(), value.clone());
            }
        }
        if let Some(count) = record
            .get("interface_count")
            .or_else(|| record.get("interfaces_count"))
            .filter(|v| !v.is_null())
        {
            facts.insert("interface_count".to_string(), count.clone());
        }
        Value::Object(facts)
    }
}

#[async_trait]
impl ToolAdapter for InventoryLookupTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "inventory_lookup",
            "Look up a device's intended state in the inventory (status, site, interfaces, platform).",
            ToolCategory::Inventory,
        )
        .required("device_id", ArgType::String, "Device name, e.g. 'S6'")
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, AdapterError> {
        let device_id = str_arg(&args, "device_id").unwrap_or_default();
        if self.base_url.is_empty() {
            return Err(AdapterError::Backend("inventory endpoint not configured".to_string()));
        }

        let url = format!("{}/api/dcim/devices/", self.base_url);
        debug!("inventory lookup {} at {}", device_id, url);
        let response = self
            .client
            .get(&url)
            .query(&[("name", device_id)])
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AdapterError::Backend(format!(
                "inventory returned {}: {}",
                status,
                snippet(&text)
            )));
        }

        let list: DeviceList = serde_json::from_str(&text)
            .map_err(|e| AdapterError::Backend(format!("inventory reply is not a device list: {}", e)))?;
        let record = list
            .results
            .first()
            .ok_or_else(|| AdapterError::Backend(format!("no device named '{}' in inventory", device_id)))?;

        Ok(Self::normalize(device_id, record))
    }
}
