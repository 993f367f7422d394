//! Context builder for reasoning prompts

use chrono::Local;

use netsage_provider::Message;

use crate::tools::ToolDescriptor;
use crate::transcript::Transcript;

/// Builds the system prompt and message list for one reasoning call
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    operator_notes: Option<String>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra site-specific guidance appended to the system prompt
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.operator_notes = Some(notes.into());
        self
    }

    /// Build the system prompt
    pub fn build_system_prompt(&self, tools: &[ToolDescriptor]) -> String {
        let mut parts = vec![self.identity(), Self::tool_section(tools), Self::format_section()];
        if let Some(notes) = &self.operator_notes {
            parts.push(format!("## Operator Notes\n\n{}", notes));
        }
        parts.join("\n\n---\n\n")
    }

    fn identity(&self) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!(
            r#"# netsage

You are netsage, a network operations assistant. You answer questions about
network devices by consulting telemetry, inventory, ticketing and email tools.

## Current Time
{}

## Rules
- Call one tool at a time and wait for its Observation.
- Always pass device_id when a question concerns a specific device.
- When telemetry and inventory disagree, a discrepancy report is added as an
  Observation from "reconciliation". For severity "major", open a ticket with
  ticket_create and pass device_id and the report's fingerprint.
- Never repeat a side-effecting action that already succeeded.
- If the question is too vague to act on, ask for clarification."#,
            now
        )
    }

    fn tool_section(tools: &[ToolDescriptor]) -> String {
        let lines: Vec<String> = tools.iter().map(ToolDescriptor::summary_line).collect();
        format!("## Tools\n\n{}", lines.join("\n"))
    }

    fn format_section() -> String {
        r#"## Reply Format

Reply with exactly one decision, either as a function call or as text:

Thought: <your reasoning>
Action: <tool name>
Action Input: <JSON object of arguments>

or

Thought: <your reasoning>
Final Answer: <answer for the operator>

or

Clarification: <question for the operator>

A JSON object with one of "action" ({"tool", "arguments"}), "final_answer" or
"clarification", plus an optional "thought", is also accepted."#
            .to_string()
    }

    /// System prompt plus the rendered transcript
    pub fn build_messages(&self, transcript: &Transcript, tools: &[ToolDescriptor]) -> Vec<Message> {
        vec![
            Message::system(self.build_system_prompt(tools)),
            Message::user(transcript.render()),
        ]
    }
}
