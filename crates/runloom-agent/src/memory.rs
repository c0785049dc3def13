// Conversation memory
//
// The loop reads the whole ordered history before each model request and
// appends results through the trait; it never mutates messages in place.
// Production strategies (windowed, summarizing, token-budgeted) plug in
// behind the same trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use runloom_runtime::Result;

use crate::message::Message;

/// Ordered role-tagged message list backing one conversation.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Append a message.
    async fn add(&self, message: Message) -> Result<()>;

    /// Append several messages, in order.
    async fn add_many(&self, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            self.add(message).await?;
        }
        Ok(())
    }

    /// Remove a message by id. Returns whether anything was removed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// The full ordered history.
    async fn messages(&self) -> Vec<Message>;

    async fn is_empty(&self) -> bool {
        self.messages().await.is_empty()
    }
}

/// In-memory message list with no retention policy.
///
/// Keeps every message for the lifetime of the run; the default choice
/// for tests, examples and short-lived invocations.
#[derive(Debug, Default, Clone)]
pub struct UnboundedMemory {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl UnboundedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with messages, replacing any existing history.
    pub async fn seed(&self, messages: Vec<Message>) {
        *self.messages.write().await = messages;
    }

    pub async fn clear(&self) {
        self.messages.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl Memory for UnboundedMemory {
    async fn add(&self, message: Message) -> Result<()> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| m.id != id);
        Ok(messages.len() < before)
    }

    async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }
}
