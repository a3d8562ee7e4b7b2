//! In-crate fakes for the remote collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::errors::RagError;
use crate::llm::{ChatRequest, LlmProvider};

pub const FAKE_DIM: usize = 256;

/// Bag-of-characters embedding: each non-whitespace char adds 1.0 to the
/// axis `codepoint % FAKE_DIM`. Texts sharing characters score higher.
pub fn char_bag(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; FAKE_DIM];
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        v[c as usize % FAKE_DIM] += 1.0;
    }
    v
}

pub struct FakeProvider {
    embed_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    embed_failures: AtomicUsize,
    chat_replies: Mutex<VecDeque<String>>,
    chat_error: Option<String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            embed_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            embed_failures: AtomicUsize::new(0),
            chat_replies: Mutex::new(VecDeque::new()),
            chat_error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The next `n` embed calls fail with a retryable remote error.
    pub fn failing_embeds(self, n: usize) -> Self {
        self.embed_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.chat_replies.lock().unwrap().push_back(text.into());
        self
    }

    pub fn failing_chat(mut self, message: &str) -> Self {
        self.chat_error = Some(message.to_string());
        self
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<String, RagError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(message) = &self.chat_error {
            return Err(RagError::Remote(message.clone()));
        }
        Ok(self
            .chat_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| r#"{"answer": "", "citations": []}"#.to_string()))
    }

    async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, RagError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .embed_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RagError::remote("503 service unavailable"));
        }
        Ok(inputs.iter().map(|text| char_bag(text)).collect())
    }
}
