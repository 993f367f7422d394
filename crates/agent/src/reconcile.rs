//! Cross-source reconciliation of device facts
//!
//! Pure functions: the loop hands in two fact maps for one device and gets a
//! [`DiscrepancyReport`] back. Comparison is symmetric, so swapping the
//! sources yields the same fields, severities and fingerprint.

use netsage_config::ReconciliationConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::tools::IdempotencyKey;

/// Field name → value as reported by one source
pub type DeviceFacts = BTreeMap<String, Value>;

const NUMERIC_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Minor,
    Major,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Minor => "minor",
            Severity::Major => "major",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiscrepancy {
    pub field: String,
    pub value_a: Value,
    pub value_b: Value,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyReport {
    pub device_id: String,
    pub source_a: String,
    pub source_b: String,
    pub discrepancies: Vec<FieldDiscrepancy>,
    pub severity: Severity,
    pub fingerprint: String,
}

impl DiscrepancyReport {
    pub fn is_actionable(&self) -> bool {
        self.severity != Severity::None
    }

    /// Key a ticket or email about this report should carry
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::derive(&self.device_id, &self.fingerprint)
    }

    /// Payload of the synthetic observation injected into the transcript
    pub fn to_payload(&self) -> Value {
        let recommendation = match self.severity {
            Severity::Major => format!(
                "Sources disagree on critical fields of {}. Open a ticket with ticket_create passing device_id and this fingerprint.",
                self.device_id
            ),
            Severity::Minor => format!(
                "Sources disagree on non-critical fields of {}. Mention it in the answer; a ticket is optional.",
                self.device_id
            ),
            Severity::None => format!("Sources agree on {}.", self.device_id),
        };
        json!({
            "kind": "discrepancy_report",
            "device_id": self.device_id,
            "source_a": self.source_a,
            "source_b": self.source_b,
            "severity": self.severity,
            "discrepancies": self.discrepancies,
            "fingerprint": self.fingerprint,
            "idempotency_key": self.idempotency_key().as_str(),
            "recommendation": recommendation,
        })
    }
}

/// Which fields to compare and how to judge them
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationPolicy {
    pub comparable_fields: Vec<String>,
    pub critical_fields: BTreeSet<String>,
    pub aliases: BTreeMap<String, String>,
}

impl ReconciliationPolicy {
    pub fn from_config(config: &ReconciliationConfig) -> Self {
        Self {
            comparable_fields: config.comparable_fields.clone(),
            critical_fields: config.critical_fields.iter().cloned().collect(),
            aliases: config
                .aliases
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_lowercase()))
                .collect(),
        }
    }

    fn severity_of(&self, field: &str) -> Severity {
        if self.critical_fields.contains(field) {
            Severity::Major
        } else {
            Severity::Minor
        }
    }
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self::from_config(&ReconciliationConfig::default())
    }
}

/// Facts from one named source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFacts {
    pub source: String,
    pub facts: DeviceFacts,
}

impl SourceFacts {
    pub fn new(source: impl Into<String>, facts: DeviceFacts) -> Self {
        Self {
            source: source.into(),
            facts,
        }
    }
}

/// Normalized comparison value
#[derive(Debug, Clone, PartialEq)]
enum Norm {
    Number(f64),
    Text(String),
    Bool(bool),
    Other(String),
}

impl Norm {
    fn of(value: &Value, aliases: &BTreeMap<String, String>) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Norm::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Norm::Number),
            Value::String(s) => {
                let folded = s.trim().to_lowercase();
                if let Ok(n) = folded.parse::<f64>() {
                    if n.is_finite() {
                        return Some(Norm::Number(n));
                    }
                }
                let folded = aliases.get(&folded).cloned().unwrap_or(folded);
                Some(Norm::Text(folded))
            }
            other => Some(Norm::Other(other.to_string())),
        }
    }

    fn same(&self, other: &Norm) -> bool {
        match (self, other) {
            (Norm::Number(a), Norm::Number(b)) => (a - b).abs() <= NUMERIC_EPSILON,
            _ => self == other,
        }
    }

    fn key(&self) -> String {
        match self {
            Norm::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Norm::Number(n) => format!("{}", n),
            Norm::Text(s) => s.clone(),
            Norm::Bool(b) => b.to_string(),
            Norm::Other(s) => s.clone(),
        }
    }
}

/// Compare two sources' facts about one device
pub fn reconcile(
    policy: &ReconciliationPolicy,
    device_id: &str,
    a: &SourceFacts,
    b: &SourceFacts,
) -> DiscrepancyReport {
    let mut discrepancies = Vec::new();
    let mut pairs: Vec<(String, String, String)> = Vec::new();

    for field in &policy.comparable_fields {
        let (Some(raw_a), Some(raw_b)) = (a.facts.get(field), b.facts.get(field)) else {
            continue;
        };
        let (Some(norm_a), Some(norm_b)) = (Norm::of(raw_a, &policy.aliases), Norm::of(raw_b, &policy.aliases)) else {
            continue;
        };
        if norm_a.same(&norm_b) {
            continue;
        }

        let (ka, kb) = (norm_a.key(), norm_b.key());
        let (lo, hi) = match ka.cmp(&kb) {
            Ordering::Greater => (kb, ka),
            _ => (ka, kb),
        };
        pairs.push((field.clone(), lo, hi));
        discrepancies.push(FieldDiscrepancy {
            field: field.clone(),
            value_a: raw_a.clone(),
            value_b: raw_b.clone(),
            severity: policy.severity_of(field),
        });
    }

    let severity = discrepancies
        .iter()
        .map(|d| d.severity)
        .max()
        .unwrap_or(Severity::None);

    DiscrepancyReport {
        device_id: device_id.to_string(),
        source_a: a.source.clone(),
        source_b: b.source.clone(),
        discrepancies,
        severity,
        fingerprint: fingerprint(&mut pairs),
    }
}

fn fingerprint(pairs: &mut [(String, String, String)]) -> String {
    pairs.sort();
    let mut hasher = Sha256::new();
    for (field, lo, hi) in pairs.iter() {
        hasher.update(format!("{}={}|{}\n", field, lo, hi).as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn canonical_field(name: &str) -> String {
    let name = name.trim().to_lowercase().replace([' ', '-'], "_");
    match name.as_str() {
        "site" => "location".to_string(),
        "interfaces" | "interface_total" | "interfaces_count" | "num_interfaces" => "interface_count".to_string(),
        "state" | "oper_status" | "operational_status" => "status".to_string(),
        "device" | "name" | "hostname" => "device_id".to_string(),
        _ => name,
    }
}

/// Collapse `{value}` / `{name}` / `{label}` wrappers to their scalar
fn unwrap_scalar(value: &Value) -> Value {
    match value {
        Value::Object(map) => ["value", "name", "label"]
            .iter()
            .find_map(|k| map.get(*k).filter(|v| !v.is_object() && !v.is_array()))
            .cloned()
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) if items.iter().all(|v| v.is_object()) => Value::from(items.len()),
        other => other.clone(),
    }
}

fn fact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(status|state|location|site|interface[ _]count|interfaces|platform|role|serial)\b\s*(?:is|:|=)\s*([A-Za-z0-9_.\-/]+)",
        )
        .expect("fact pattern is a valid regex")
    })
}

fn mine_text(text: &str, facts: &mut DeviceFacts) {
    for caps in fact_pattern().captures_iter(text) {
        let field = canonical_field(&caps[1]);
        let value = caps[2].trim_end_matches(['.', ',']).to_string();
        facts.entry(field).or_insert(Value::String(value));
    }
}

fn merge_object(map: &Map<String, Value>, facts: &mut DeviceFacts, depth: usize) {
    for (key, value) in map {
        let lowered = key.to_lowercase();
        match lowered.as_str() {
            "data" | "facts" | "device" if value.is_object() && depth < 3 => {
                if let Value::Object(inner) = value {
                    merge_object(inner, facts, depth + 1);
                }
            }
            "answer" | "content" | "text" => {
                if let Value::String(text) = value {
                    mine_text(text, facts);
                }
            }
            _ => {
                let scalar = unwrap_scalar(value);
                if !scalar.is_null() {
                    facts.insert(canonical_field(key), scalar);
                }
            }
        }
    }
}

/// Pull comparable facts out of a telemetry or inventory payload
pub fn extract_facts(payload: &Value) -> DeviceFacts {
    let mut facts = DeviceFacts::new();
    match payload {
        Value::Object(map) => merge_object(map, &mut facts, 0),
        Value::String(text) => mine_text(text, &mut facts),
        _ => {}
    }
    facts
}
