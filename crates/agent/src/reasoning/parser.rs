//! Strict decision parser for reasoning backend replies
//!
//! Three reply shapes are understood: one native function call, a JSON
//! decision object (bare or fenced), and ReAct-labelled text. Everything
//! else is a [`ParseError`].

use netsage_provider::ChatResponse;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

use crate::transcript::Action;

/// What the reasoning step decided
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NextAction {
        thought: Option<String>,
        action: Action,
    },
    FinalAnswer {
        thought: Option<String>,
        answer: String,
    },
    Clarification {
        thought: Option<String>,
        question: String,
    },
}

impl Decision {
    pub fn thought(&self) -> Option<&str> {
        match self {
            Decision::NextAction { thought, .. }
            | Decision::FinalAnswer { thought, .. }
            | Decision::Clarification { thought, .. } => thought.as_deref(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty reply")]
    Empty,

    #[error("{0} function calls in one reply, expected one")]
    MultipleToolCalls(usize),

    #[error("reply carries more than one decision")]
    Ambiguous,

    #[error("reply carries no decision")]
    NoDecision,

    #[error("bad arguments for '{tool}': {reason}")]
    BadArguments { tool: String, reason: String },

    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// Interpret one backend reply
pub fn parse_decision(response: &ChatResponse) -> Result<Decision, ParseError> {
    let text = response.content.as_deref().map(str::trim).unwrap_or_default();

    match response.tool_calls.len() {
        0 => {}
        1 => {
            let call = &response.tool_calls[0];
            if label_pattern()
                .captures_iter(text)
                .any(|c| c[1].eq_ignore_ascii_case("final answer"))
            {
                return Err(ParseError::Ambiguous);
            }
            let arguments = arguments_object(&call.name, &call.arguments)?;
            debug!("decision: function call {}", call.name);
            return Ok(Decision::NextAction {
                thought: non_empty(strip_label(text, "Thought")),
                action: Action::new(call.name.trim(), arguments),
            });
        }
        n => return Err(ParseError::MultipleToolCalls(n)),
    }

    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    if text.starts_with('{') || text.starts_with("```") {
        return parse_json_reply(text);
    }
    if label_pattern().is_match(text) {
        return parse_react(text);
    }
    Err(ParseError::NoDecision)
}

fn label_pattern() -> &'static Regex {
    static LABELS: OnceLock<Regex> = OnceLock::new();
    LABELS.get_or_init(|| {
        Regex::new(r"(?mi)^[ \t]*(Thought|Action Input|Action|Final Answer|Clarification|Observation)[ \t]*:[ \t]*")
            .expect("label pattern is a valid regex")
    })
}

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("fence pattern is a valid regex")
    })
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn strip_label<'a>(text: &'a str, label: &str) -> &'a str {
    let trimmed = text.trim_start();
    match trimmed.get(..label.len()) {
        Some(head) if head.eq_ignore_ascii_case(label) => {
            trimmed[label.len()..].trim_start().trim_start_matches(':').trim()
        }
        _ => text,
    }
}

fn strip_fences(text: &str) -> &str {
    match fence_pattern().captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

fn arguments_object(tool: &str, raw: &Value) -> Result<Map<String, Value>, ParseError> {
    let bad = |reason: &str| ParseError::BadArguments {
        tool: tool.to_string(),
        reason: reason.to_string(),
    };
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(strip_fences(s)) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(bad("arguments must be a JSON object")),
            Err(e) => Err(bad(&format!("arguments are not JSON: {}", e))),
        },
        _ => Err(bad("arguments must be a JSON object")),
    }
}

fn parse_json_reply(text: &str) -> Result<Decision, ParseError> {
    match serde_json::from_str::<Value>(strip_fences(text)) {
        Ok(Value::Object(map)) => parse_json_decision(map),
        Ok(_) => Err(ParseError::Malformed("decision must be a JSON object".to_string())),
        Err(e) => Err(ParseError::Malformed(format!("invalid JSON: {}", e))),
    }
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => non_empty(s),
        other => Some(other.to_string()),
    }
}

fn parse_json_decision(map: Map<String, Value>) -> Result<Decision, ParseError> {
    let present: Vec<&str> = ["action", "final_answer", "clarification"]
        .into_iter()
        .filter(|k| map.get(*k).is_some_and(|v| !v.is_null()))
        .collect();
    let thought = map.get("thought").and_then(text_value);

    match present.as_slice() {
        [] => Err(ParseError::NoDecision),
        ["action"] => {
            let action = map
                .get("action")
                .and_then(Value::as_object)
                .ok_or_else(|| ParseError::Malformed("'action' must be an object".to_string()))?;
            let tool = ["tool", "tool_name", "name"]
                .iter()
                .find_map(|k| action.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ParseError::Malformed("'action' names no tool".to_string()))?;
            let raw = ["arguments", "args", "input"]
                .iter()
                .find_map(|k| action.get(*k))
                .cloned()
                .unwrap_or(Value::Null);
            let arguments = arguments_object(tool, &raw)?;
            debug!("decision: json action {}", tool);
            Ok(Decision::NextAction {
                thought,
                action: Action::new(tool, arguments),
            })
        }
        ["final_answer"] => {
            let answer = map
                .get("final_answer")
                .and_then(text_value)
                .ok_or(ParseError::NoDecision)?;
            Ok(Decision::FinalAnswer { thought, answer })
        }
        ["clarification"] => {
            let question = map
                .get("clarification")
                .and_then(text_value)
                .ok_or(ParseError::NoDecision)?;
            Ok(Decision::Clarification { thought, question })
        }
        _ => Err(ParseError::Ambiguous),
    }
}

fn parse_react(text: &str) -> Result<Decision, ParseError> {
    let mut sections: HashMap<String, String> = HashMap::new();
    let labels: Vec<_> = label_pattern().captures_iter(text).collect();

    for (i, caps) in labels.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let label = name.as_str().to_ascii_lowercase();
        // Anything from an invented Observation onwards is ignored
        if label == "observation" {
            break;
        }
        let end = labels
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let body = text[whole.end()..end].trim().to_string();
        if sections.insert(label, body).is_some() {
            return Err(ParseError::Ambiguous);
        }
    }

    let thought = sections.get("thought").and_then(|t| non_empty(t));
    let action = sections.get("action");
    let final_answer = sections.get("final answer");
    let clarification = sections.get("clarification");

    let shapes = [action.is_some(), final_answer.is_some(), clarification.is_some()]
        .iter()
        .filter(|present| **present)
        .count();
    if shapes > 1 {
        return Err(ParseError::Ambiguous);
    }

    if let Some(tool) = action {
        let tool = tool
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .trim_matches(|c| c == '`' || c == '"' || c == '\'')
            .to_string();
        if tool.is_empty() {
            return Err(ParseError::Malformed("'Action' names no tool".to_string()));
        }
        let input = sections.get("action input").ok_or_else(|| ParseError::BadArguments {
            tool: tool.clone(),
            reason: "missing Action Input".to_string(),
        })?;
        let arguments = arguments_object(&tool, &Value::String(input.clone()))?;
        debug!("decision: react action {}", tool);
        return Ok(Decision::NextAction {
            thought,
            action: Action::new(tool, arguments),
        });
    }
    if sections.contains_key("action input") {
        return Err(ParseError::Malformed("'Action Input' without 'Action'".to_string()));
    }
    if let Some(answer) = final_answer {
        let answer = non_empty(answer).ok_or(ParseError::NoDecision)?;
        return Ok(Decision::FinalAnswer { thought, answer });
    }
    if let Some(question) = clarification {
        let question = non_empty(question).ok_or(ParseError::NoDecision)?;
        return Ok(Decision::Clarification { thought, question });
    }
    Err(ParseError::NoDecision)
}
