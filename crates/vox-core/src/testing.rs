//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

use crate::error::Error;
use crate::message::{Message, Usage};
use crate::provider::{CompletionRequest, CompletionResponse, FinishReason, Provider};

enum MockReply {
    Text(String),
    Fail(Error),
}

#[derive(Clone)]
enum Fallback {
    Text(String),
    Fail(String),
}

/// A mock provider that returns pre-configured responses.
///
/// Queued replies are used first (FIFO). Once they run out the fallback is
/// used; without a fallback the call fails with `Error::Unknown`.
pub struct MockProvider {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: Mutex<Option<Fallback>>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    call_times: Mutex<Vec<Instant>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            captured_requests: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    /// Queue a response to be returned by the next complete() call.
    pub fn queue_response(&self, content: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::Text(content.to_string()));
    }

    /// Queue an error to be returned by the next complete() call.
    pub fn queue_error(&self, error: Error) {
        self.replies.lock().unwrap().push_back(MockReply::Fail(error));
    }

    /// Reply with `content` whenever the queue is empty.
    pub fn always_respond(&self, content: &str) {
        *self.fallback.lock().unwrap() = Some(Fallback::Text(content.to_string()));
    }

    /// Fail with a network error whenever the queue is empty.
    pub fn always_fail(&self, message: &str) {
        *self.fallback.lock().unwrap() = Some(Fallback::Fail(message.to_string()));
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    /// Get the last captured request.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }

    /// Last user message of every captured request, in call order.
    pub fn user_prompts(&self) -> Vec<String> {
        self.captured_requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }

    /// Instants at which complete() was entered.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    fn respond(content: String) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(content),
            usage: Usage::new(0, 0),
            model: "mock-model".to_string(),
            finish_reason: FinishReason::Stop,
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        self.call_times.lock().unwrap().push(Instant::now());
        self.captured_requests.lock().unwrap().push(request);

        let queued = self.replies.lock().unwrap().pop_front();
        match queued {
            Some(MockReply::Text(content)) => Ok(Self::respond(content)),
            Some(MockReply::Fail(error)) => Err(error),
            None => match self.fallback.lock().unwrap().clone() {
                Some(Fallback::Text(content)) => Ok(Self::respond(content)),
                Some(Fallback::Fail(message)) => Err(Error::network(message)),
                None => Err(Error::Unknown("No mock response queued".to_string())),
            },
        }
    }
}
