//! Known-vulnerability lookup by vendor and software version (OpenCVE API)

use async_trait::async_trait;
use netsage_config::CveConfig;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{http_client, snippet, str_arg, AdapterError, ArgType, ToolAdapter, ToolCategory, ToolDescriptor};

const MAX_CVES: usize = 10;

#[derive(Deserialize)]
struct CvePage {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    results: Vec<CveRecord>,
}

#[derive(Deserialize)]
struct CveRecord {
    cve_id: String,
    #[serde(default)]
    description: Option<String>,
}

pub struct CveLookupTool {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl CveLookupTool {
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

    pub fn from_config(config: &CveConfig) -> Self {
        Self::new(&config.base_url, &config.username, &config.password)
    }

    /// Map marketing names onto the vendor slugs the database indexes
    pub fn normalize_vendor(vendor: &str) -> String {
        let vendor = vendor.trim().to_lowercase();
        match vendor.as_str() {
            "cisco systems" => "cisco".to_string(),
            "juniper networks" => "juniper".to_string(),
            "arista networks" => "arista".to_string(),
            _ => vendor,
        }
    }

    /// `major.minor` of a version that also carries a patch part
    pub fn without_patch(version: &str) -> Option<String> {
        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() > 2 {
            Some(parts[..2].join("."))
        } else {
            None
        }
    }

    async fn search(&self, vendor: &str, version: &str) -> Result<CvePage, AdapterError> {
        let url = format!("{}/cve", self.base_url);
        debug!("cve search {} {} at {}", vendor, version, url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("vendor", vendor), ("version", version)])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AdapterError::Backend(format!(
                "cve database returned {}: {}",
                status,
                snippet(&text)
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| AdapterError::Backend(format!("cve database reply not understood: {}", e)))
    }
}

#[async_trait]
impl ToolAdapter for CveLookupTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "cve_lookup",
            "List known CVEs for a vendor and software version, e.g. a device's platform release.",
            ToolCategory::Advisory,
        )
        .required("vendor", ArgType::String, "Vendor, e.g. 'cisco' or 'Juniper Networks'")
        .required("version", ArgType::String, "Software version, e.g. '17.3.4'")
        .optional("device_id", ArgType::String, "Device the version was read from")
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, AdapterError> {
        if self.base_url.is_empty() {
            return Err(AdapterError::Backend("cve database endpoint not configured".to_string()));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(AdapterError::Backend("cve database credentials not configured".to_string()));
        }

        let vendor = Self::normalize_vendor(str_arg(&args, "vendor").unwrap_or_default());
        let requested = str_arg(&args, "version").unwrap_or_default();

        let mut version = requested.to_string();
        let mut page = self.search(&vendor, &version).await?;
        if page.count == 0 && page.results.is_empty() {
            if let Some(shorter) = Self::without_patch(requested) {
                warn!("no CVEs for {} {}, retrying with {}", vendor, requested, shorter);
                page = self.search(&vendor, &shorter).await?;
                version = shorter;
            }
        }

        let total = page.count.max(page.results.len() as u64);
        let cves: Vec<Value> = page
            .results
            .iter()
            .take(MAX_CVES)
            .map(|cve| {
                json!({
                    "cve_id": cve.cve_id,
                    "description": snippet(cve.description.as_deref().unwrap_or_default()),
                })
            })
            .collect();
        info!("{} CVEs for {} {}", total, vendor, version);

        let mut payload = json!({
            "vendor": vendor,
            "version": version,
            "cve_count": total,
            "cves": cves,
        });
        if let Some(device_id) = str_arg(&args, "device_id") {
            payload["device_id"] = json!(device_id);
        }
        if total == 0 {
            payload["message"] = json!(format!("No CVEs found for {} {}", vendor, requested));
        }
        Ok(payload)
    }
}
