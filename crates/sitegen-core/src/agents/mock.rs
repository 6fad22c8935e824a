//! Canned backends for tests and `--offline` runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{AgentError, CompletionRequest, ImageBackend, LlmClient};

type Responder = dyn Fn(CompletionRequest<'_>) -> Result<String, AgentError> + Send + Sync;

/// [`LlmClient`] that answers from a closure and counts calls.
pub struct MockLlmClient {
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(CompletionRequest<'_>) -> Result<String, AgentError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always reply with the same text.
    pub fn replying(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::from_fn(move |_| Ok(reply.clone()))
    }

    /// Always fail with a request error.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::from_fn(move |_| Err(AgentError::Request(message.clone())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for MockLlmClient {
    fn complete(&self, request: CompletionRequest<'_>) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(request)
    }
}

/// [`ImageBackend`] that returns a fixed URL and fixed bytes.
pub struct MockImageBackend {
    url: String,
    bytes: Option<Arc<Vec<u8>>>,
}

impl MockImageBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bytes: Some(Arc::new(b"\x89PNG\r\n\x1a\n".to_vec())),
        }
    }

    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = Some(Arc::new(bytes));
        self
    }

    /// Generation succeeds, download fails.
    pub fn without_download(mut self) -> Self {
        self.bytes = None;
        self
    }
}

impl ImageBackend for MockImageBackend {
    fn generate(&self, _prompt: &str) -> Result<String, AgentError> {
        Ok(self.url.clone())
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, AgentError> {
        match &self.bytes {
            Some(bytes) => Ok(bytes.as_ref().clone()),
            None => Err(AgentError::Request(format!("download failed: {url}"))),
        }
    }
}
