//! Reasoning step: transcript in, backend reply out

pub mod parser;

pub use parser::{parse_decision, Decision, ParseError};

use async_trait::async_trait;
use netsage_config::ReasoningConfig;
use netsage_provider::{ChatParams, ChatResponse, Provider, ProviderError};
use tracing::debug;

use crate::context::ContextBuilder;
use crate::tools::ToolDescriptor;
use crate::transcript::Transcript;

/// Produces the raw reply the loop parses into a [`Decision`]
#[async_trait]
pub trait ReasoningStep: Send + Sync {
    async fn reason(
        &self,
        transcript: &Transcript,
        tools: &[ToolDescriptor],
    ) -> Result<ChatResponse, ProviderError>;
}

/// Reasoning backed by a chat-completion provider
pub struct LlmReasoner<P: Provider> {
    provider: P,
    context: ContextBuilder,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl<P: Provider> LlmReasoner<P> {
    pub fn new(provider: P) -> Self {
        let model = provider.default_model();
        Self {
            provider,
            context: ContextBuilder::new(),
            model,
            max_tokens: 2048,
            temperature: 0.1,
        }
    }

    pub fn from_config(provider: P, config: &ReasoningConfig) -> Self {
        let mut reasoner = Self::new(provider);
        if !config.model.is_empty() {
            reasoner.model = config.model.clone();
        }
        reasoner.max_tokens = config.max_tokens;
        reasoner.temperature = config.temperature;
        reasoner
    }

    pub fn with_context(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl<P: Provider> ReasoningStep for LlmReasoner<P> {
    async fn reason(
        &self,
        transcript: &Transcript,
        tools: &[ToolDescriptor],
    ) -> Result<ChatResponse, ProviderError> {
        let params = ChatParams {
            model: self.model.clone(),
            messages: self.context.build_messages(transcript, tools),
            tools: tools.iter().map(ToolDescriptor::to_provider_tool).collect(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        debug!(
            "reasoning over {} steps with {} tools",
            transcript.len(),
            params.tools.len()
        );
        self.provider.chat(params).await
    }
}
