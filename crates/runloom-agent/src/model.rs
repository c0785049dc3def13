// Model provider interface
//
// Streaming is the required operation; the single-shot form is provided
// by folding the stream. Concrete providers live outside this crate;
// ScriptedModel is the in-memory double used by tests and examples.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::RwLock;

use runloom_runtime::{Result, RuntimeError};

use crate::message::Message;
use crate::tool::ToolSpec;

/// Incremental text deltas produced by a streaming model call.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One model request: the conversation so far plus the tools the model
/// may ask for.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// A complete (non-streaming) model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelResponse {
    text: String,
}

impl ModelResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text_content(&self) -> &str {
        &self.text
    }
}

/// Chat-style inference backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Request a streamed reply.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream>;

    /// Request a single-shot reply by folding the stream.
    async fn create(&self, request: ModelRequest) -> Result<ModelResponse> {
        let mut stream = self.stream(request).await?;
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            text.push_str(&delta?);
        }
        Ok(ModelResponse::new(text))
    }
}

/// Scripted model double: replies are queued up front and popped per
/// call, with every request logged for assertions.
#[derive(Debug, Default, Clone)]
pub struct ScriptedModel {
    replies: Arc<RwLock<VecDeque<Result<String>>>>,
    calls: Arc<RwLock<Vec<ModelRequest>>>,
    chunk_size: Option<usize>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver each reply split into chunks of at most `size` characters,
    /// instead of one delta per reply.
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Queue a successful reply.
    pub async fn reply(&self, text: impl Into<String>) -> &Self {
        self.replies.write().await.push_back(Ok(text.into()));
        self
    }

    /// Queue a failure.
    pub async fn fail(&self, error: RuntimeError) -> &Self {
        self.replies.write().await.push_back(Err(error));
        self
    }

    /// Every request made so far, in order.
    pub async fn calls(&self) -> Vec<ModelRequest> {
        self.calls.read().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.replies.read().await.len()
    }

    fn split(&self, text: String) -> Vec<String> {
        match self.chunk_size {
            None => vec![text],
            Some(size) => {
                let chars: Vec<char> = text.chars().collect();
                chars
                    .chunks(size)
                    .map(|chunk| chunk.iter().collect())
                    .collect()
            }
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream> {
        self.calls.write().await.push(request);
        match self.replies.write().await.pop_front() {
            Some(Ok(text)) => {
                let chunks: Vec<Result<String>> = self.split(text).into_iter().map(Ok).collect();
                Ok(tokio_stream::iter(chunks).boxed())
            }
            Some(Err(err)) => Err(err),
            None => Err(RuntimeError::model("scripted model ran out of replies")),
        }
    }
}
