//! Providers module - the chat client seam
//!
//! The HTTP chat-completion client lives outside this crate. The compactor
//! only needs "send these messages to this model, give me the reply", which
//! is what [`ChatClient`] captures. Retries and backoff are the client's
//! business.
//!
//! # Example
//!
//! ```rust,ignore
//! use loopkeeper::providers::ChatClient;
//! use loopkeeper::session::Message;
//!
//! async fn example(client: &dyn ChatClient) {
//!     let response = client.chat("claude-haiku", vec![Message::user("Hello!")]).await.unwrap();
//!     println!("Response: {}", response.content);
//! }
//! ```

use async_trait::async_trait;

use crate::error::Result;
use crate::session::{Message, ToolCall};

/// Reply from a chat completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    /// Assistant text
    pub content: String,
    /// Tool calls requested by the model, if any
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    /// A plain-text reply with no tool calls.
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            tool_calls: Vec::new(),
        }
    }

    /// Check if the model requested any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Chat-completion client consumed by LLM-assisted summarisation.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send `messages` to `model` and return the assistant reply.
    async fn chat(&self, model: &str, messages: Vec<Message>) -> Result<ChatResponse>;
}
