//! Shared fakes for the agent integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use netsage_agent::tools::{
    AdapterError, ArgType, TicketBackend, TicketRequest, ToolAdapter, ToolCategory, ToolDescriptor,
};
use netsage_agent::{ReasoningStep, Transcript};
use netsage_provider::{ChatResponse, ProviderError};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ReplyFn = dyn Fn(&Map<String, Value>, usize) -> Result<Value, AdapterError> + Send + Sync;

/// Adapter with a canned reply and an optional delay
pub struct FakeTool {
    descriptor: ToolDescriptor,
    reply: Box<ReplyFn>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl FakeTool {
    pub fn new<F>(descriptor: ToolDescriptor, reply: F) -> Self
    where
        F: Fn(&Map<String, Value>, usize) -> Result<Value, AdapterError> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            reply: Box::new(reply),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always answer with the same payload
    pub fn returning(descriptor: ToolDescriptor, payload: Value) -> Self {
        Self::new(descriptor, move |_, _| Ok(payload.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Handle on the call counter, usable after the tool is registered
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl ToolAdapter for FakeTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, AdapterError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.reply)(&args, n)
    }
}

pub fn telemetry_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("telemetry_nl", "Ask telemetry", ToolCategory::Telemetry)
        .required("query", ArgType::String, "Question")
        .optional("device_id", ArgType::String, "Device")
}

pub fn inventory_descriptor() -> ToolDescriptor {
    ToolDescriptor::new("inventory_lookup", "Look up inventory", ToolCategory::Inventory)
        .required("device_id", ArgType::String, "Device")
}

/// Ticket backend that counts creations
#[derive(Default)]
pub struct CountingTickets {
    pub created: AtomicUsize,
    pub requests: Mutex<Vec<TicketRequest>>,
    pub delay: Duration,
}

impl CountingTickets {
    /// Counts the ticket, then takes `delay` to answer
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketBackend for CountingTickets {
    async fn create(&self, request: &TicketRequest) -> Result<String, AdapterError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("INC{:04}", n))
    }
}

/// Reasoner replaying a fixed list of replies; `None` is a transport failure
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<Option<ChatResponse>>>,
    repeat_last: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<Option<ChatResponse>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            repeat_last: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(replies: Vec<ChatResponse>) -> Self {
        Self::new(replies.into_iter().map(Some).collect())
    }

    /// Keep returning the final reply once the script runs out
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningStep for ScriptedReasoner {
    async fn reason(
        &self,
        transcript: &Transcript,
        _tools: &[ToolDescriptor],
    ) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(transcript.render());
        }
        let next = {
            let mut replies = self.replies.lock().map_err(|_| ProviderError::InvalidResponse)?;
            if self.repeat_last && replies.len() == 1 {
                replies.front().cloned()
            } else {
                replies.pop_front()
            }
        };
        match next {
            Some(Some(reply)) => Ok(reply),
            Some(None) => Err(ProviderError::Api("backend unavailable".to_string())),
            None => Err(ProviderError::InvalidResponse),
        }
    }
}

type DecideFn = dyn Fn(&Transcript, usize) -> ChatResponse + Send + Sync;

/// Reasoner that looks at the transcript to pick its reply
pub struct FnReasoner {
    decide: Box<DecideFn>,
    calls: AtomicUsize,
}

impl FnReasoner {
    pub fn new<F>(decide: F) -> Self
    where
        F: Fn(&Transcript, usize) -> ChatResponse + Send + Sync + 'static,
    {
        Self {
            decide: Box::new(decide),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReasoningStep for FnReasoner {
    async fn reason(
        &self,
        transcript: &Transcript,
        _tools: &[ToolDescriptor],
    ) -> Result<ChatResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((self.decide)(transcript, n))
    }
}
