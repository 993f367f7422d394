//! Tool descriptors and argument validation

use netsage_provider::Tool;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

/// Argument validation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgumentError {
    #[error("missing required argument '{0}'")]
    Missing(String),

    #[error("argument '{name}' must be {expected}")]
    WrongType { name: String, expected: &'static str },

    #[error("argument '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

/// What kind of backend a tool fronts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Telemetry,
    Inventory,
    /// Read-only lookups that say nothing about a device's live state
    Advisory,
    Action,
}

impl ToolCategory {
    /// Telemetry and inventory payloads feed reconciliation
    pub fn carries_device_facts(&self) -> bool {
        matches!(self, ToolCategory::Telemetry | ToolCategory::Inventory)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Telemetry => "telemetry",
            ToolCategory::Inventory => "inventory",
            ToolCategory::Advisory => "advisory",
            ToolCategory::Action => "action",
        }
    }
}

/// JSON type of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
}

impl ArgType {
    fn schema_name(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
            ArgType::Object => "object",
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            ArgType::String => "a string",
            ArgType::Integer => "an integer",
            ArgType::Number => "a number",
            ArgType::Boolean => "a boolean",
            ArgType::Object => "an object",
        }
    }

    /// Accept or coerce a value; None means a type mismatch
    fn check(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ArgType::String, Value::String(_)) => Some(value.clone()),
            (ArgType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ArgType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ArgType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
            (ArgType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ArgType::Number, Value::Number(_)) => Some(value.clone()),
            (ArgType::Number, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
            (ArgType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (ArgType::Object, Value::Object(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

/// One entry of a tool's argument schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    pub kind: ArgType,
    pub required: bool,
    pub description: String,
}

/// Machine-readable description of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub arguments: Vec<ArgumentSpec>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            arguments: Vec::new(),
        }
    }

    pub fn required(mut self, name: &str, kind: ArgType, description: &str) -> Self {
        self.arguments.push(ArgumentSpec {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: ArgType, description: &str) -> Self {
        self.arguments.push(ArgumentSpec {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        });
        self
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentSpec> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// JSON schema for function calling
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for arg in &self.arguments {
            properties.insert(
                arg.name.clone(),
                json!({
                    "type": arg.kind.schema_name(),
                    "description": arg.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .arguments
            .iter()
            .filter(|a| a.required)
            .map(|a| a.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn to_provider_tool(&self) -> Tool {
        Tool::new(&self.name, &self.description, self.json_schema())
    }

    /// One line per tool for the system prompt
    pub fn summary_line(&self) -> String {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|a| {
                if a.required {
                    format!("{}: {}", a.name, a.kind.schema_name())
                } else {
                    format!("{}?: {}", a.name, a.kind.schema_name())
                }
            })
            .collect();
        format!(
            "- {} [{}]({}): {}",
            self.name,
            self.category.as_str(),
            args.join(", "),
            self.description
        )
    }

    /// Check arguments against the schema and return the cleaned map.
    ///
    /// Unknown keys are dropped. Null optional values count as absent.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<Map<String, Value>, ArgumentError> {
        for key in arguments.keys() {
            if self.argument(key).is_none() {
                debug!("{}: dropping unknown argument '{}'", self.name, key);
            }
        }

        let mut cleaned = Map::new();
        for spec in &self.arguments {
            let value = match arguments.get(&spec.name) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) if s.trim().is_empty() && spec.required => None,
                Some(v) => Some(v),
            };

            match value {
                None if spec.required => return Err(ArgumentError::Missing(spec.name.clone())),
                None => {}
                Some(v) => {
                    let checked = spec.kind.check(v).ok_or_else(|| ArgumentError::WrongType {
                        name: spec.name.clone(),
                        expected: spec.kind.expected(),
                    })?;
                    cleaned.insert(spec.name.clone(), checked);
                }
            }
        }
        Ok(cleaned)
    }
}
