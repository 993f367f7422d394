//! Configuration for netsage
//!
//! Loaded once at startup into an immutable [`Config`] that is handed to the
//! tool adapters and the orchestrator. Nothing reads configuration ambiently
//! after that.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir};

/// Errors in the configuration layer
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("◆ CONFIG IO ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("◆ CONFIG PARSE ERROR: {0}")]
    Json(#[from] serde_json::Error),

    #[error("◆ INVALID CONFIG: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Reasoning backend (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_model() -> String {
    "openai/gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.1
}

/// Loop limits applied to every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_per_tool_timeout_secs")]
    pub per_tool_timeout_secs: u64,
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            per_tool_timeout_secs: default_per_tool_timeout_secs(),
            overall_timeout_secs: default_overall_timeout_secs(),
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}

fn default_per_tool_timeout_secs() -> u64 {
    20
}

fn default_overall_timeout_secs() -> u64 {
    360
}

/// Telemetry assistant endpoints (natural-language and raw-data)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub nl_url: String,
    #[serde(default)]
    pub raw_url: String,
    #[serde(default)]
    pub api_key: String,
}

/// Device inventory (NetBox-style REST API)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InventoryConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
}

/// Incident ticketing (ServiceNow-style table API)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TicketingConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Vulnerability database (OpenCVE-style REST API)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CveConfig {
    #[serde(default = "default_cve_url")]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Default for CveConfig {
    fn default() -> Self {
        Self {
            base_url: default_cve_url(),
            username: String::new(),
            password: String::new(),
        }
    }
}

fn default_cve_url() -> String {
    "https://app.opencve.io/api".to_string()
}

/// Mail relay the email tool submits to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_recipient: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            from: default_from(),
            default_recipient: None,
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    1025
}

fn default_from() -> String {
    "netsage@localhost".to_string()
}

/// All backend sections
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendsConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub ticketing: TicketingConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub cve: CveConfig,
}

/// Reconciliation policy input.
///
/// The critical set decides which discrepancies are major. Aliases map
/// backend-specific vocabulary onto a shared one before comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_comparable_fields")]
    pub comparable_fields: Vec<String>,
    #[serde(default = "default_critical_fields")]
    pub critical_fields: Vec<String>,
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            comparable_fields: default_comparable_fields(),
            critical_fields: default_critical_fields(),
            aliases: default_aliases(),
        }
    }
}

fn default_comparable_fields() -> Vec<String> {
    ["status", "location", "interface_count"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_critical_fields() -> Vec<String> {
    vec!["status".to_string()]
}

fn default_aliases() -> BTreeMap<String, String> {
    [("active", "up"), ("offline", "down"), ("failed", "down")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

impl Config {
    /// Load from the default location
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from a specific location; a missing file yields defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("◆ NO CONFIG AT {:?}, USING DEFAULTS", path);
            return Ok(Config::default());
        }

        debug!("◆ READING CONFIG FROM {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to a specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("◆ WRITING CONFIG TO {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        let limits = &self.orchestrator;
        if limits.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_iterations must be positive".to_string(),
            ));
        }
        if limits.per_tool_timeout_secs == 0 || limits.overall_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator timeouts must be positive".to_string(),
            ));
        }
        for field in &self.reconciliation.critical_fields {
            if !self.reconciliation.comparable_fields.contains(field) {
                warn!(
                    "◆ CRITICAL FIELD '{}' IS NOT COMPARED, IT WILL NEVER FIRE",
                    field
                );
            }
        }
        Ok(())
    }

    /// Fill empty secrets and endpoints from `NETSAGE_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        fn fill(slot: &mut String, var: &str) {
            if slot.is_empty() {
                if let Ok(value) = std::env::var(var) {
                    if !value.is_empty() {
                        debug!("◆ {} TAKEN FROM ENVIRONMENT", var);
                        *slot = value;
                    }
                }
            }
        }

        fill(&mut self.reasoning.api_key, "NETSAGE_REASONING_API_KEY");
        let telemetry = &mut self.backends.telemetry;
        fill(&mut telemetry.api_key, "NETSAGE_TELEMETRY_API_KEY");
        fill(&mut telemetry.nl_url, "NETSAGE_TELEMETRY_NL_URL");
        fill(&mut telemetry.raw_url, "NETSAGE_TELEMETRY_RAW_URL");
        let inventory = &mut self.backends.inventory;
        fill(&mut inventory.base_url, "NETSAGE_INVENTORY_URL");
        fill(&mut inventory.token, "NETSAGE_INVENTORY_TOKEN");
        let ticketing = &mut self.backends.ticketing;
        fill(&mut ticketing.base_url, "NETSAGE_TICKETING_URL");
        fill(&mut ticketing.username, "NETSAGE_TICKETING_USER");
        fill(&mut ticketing.password, "NETSAGE_TICKETING_PASSWORD");
        let cve = &mut self.backends.cve;
        fill(&mut cve.username, "NETSAGE_CVE_USER");
        fill(&mut cve.password, "NETSAGE_CVE_PASSWORD");
    }

    /// Reasoning backend key, if any
    pub fn reasoning_api_key(&self) -> Option<String> {
        let key = &self.reasoning.api_key;
        if key.is_empty() {
            None
        } else {
            Some(key.clone())
        }
    }

    /// Which backends have enough configuration to be called
    pub fn configured_backends(&self) -> Vec<(&'static str, bool)> {
        let b = &self.backends;
        vec![
            ("reasoning", self.reasoning_api_key().is_some()),
            (
                "telemetry_nl",
                !b.telemetry.nl_url.is_empty() && !b.telemetry.api_key.is_empty(),
            ),
            (
                "telemetry_raw",
                !b.telemetry.raw_url.is_empty() && !b.telemetry.api_key.is_empty(),
            ),
            ("inventory", !b.inventory.base_url.is_empty()),
            ("ticketing", !b.ticketing.base_url.is_empty()),
            ("email", !b.email.smtp_host.is_empty() && b.email.smtp_port != 0),
            (
                "cve",
                !b.cve.base_url.is_empty() && !b.cve.username.is_empty() && !b.cve.password.is_empty(),
            ),
        ]
    }
}

/// Write a default config if none exists, then load it
pub async fn init() -> Result<Config> {
    let path = config_path();

    if path.exists() {
        warn!("◆ CONFIG ALREADY PRESENT AT {:?}", path);
    } else {
        Config::default().save().await?;
        info!("◆ CONFIG WRITTEN TO {:?}", path);
    }

    Config::load().await
}
