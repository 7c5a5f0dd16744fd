//! Conversation types shared by the token counter, the pruner and the stores.
//!
//! A history is a plain `Vec<Message>` in conversation order. Nothing in this
//! crate reorders a history; pruning only ever removes entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored conversation: its messages plus activity timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session (e.g., "cli:7f3c")
    pub id: String,
    /// Ordered list of messages in this conversation
    pub messages: Vec<Message>,
    /// When this session was created
    pub created_at: DateTime<Utc>,
    /// Last time a message was saved or the session was touched
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session with the given id.
    ///
    /// # Example
    /// ```
    /// use loopkeeper::session::Session;
    ///
    /// let session = Session::new("cli:1");
    /// assert!(session.messages.is_empty());
    /// ```
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a message and bump `last_activity`.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Bump `last_activity` without changing the history.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// A single message in a conversation.
///
/// Equality is structural, so two messages with the same role, content and
/// tool references compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender
    pub role: Role,
    /// The text content of the message
    pub content: String,
    /// Tool calls made by the assistant (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message is responding to (for tool results)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new user message.
    ///
    /// # Example
    /// ```
    /// use loopkeeper::session::{Message, Role};
    ///
    /// let msg = Message::user("What's in src/?");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: &str) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: &str) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: &str) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Create an assistant message carrying tool calls.
    ///
    /// # Example
    /// ```
    /// use loopkeeper::session::{Message, ToolCall};
    ///
    /// let call = ToolCall::new("call_1", "grep", r#"{"pattern": "TODO"}"#);
    /// let msg = Message::assistant_with_tools("Searching.", vec![call]);
    /// assert!(msg.has_tool_calls());
    /// ```
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// Check if this message has tool calls.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }

    /// Check if this is a tool result message.
    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool && self.tool_call_id.is_some()
    }

    /// Check if this is a system message.
    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompts and instructions
    System,
    /// Messages from the user
    User,
    /// Messages from the AI assistant
    Assistant,
    /// Results from tool executions
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// JSON-encoded arguments for the tool
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_add_message_bumps_activity() {
        let mut session = Session::new("s1");
        let before = session.last_activity;
        std::thread::sleep(std::time::Duration::from_millis(5));

        session.add_message(Message::user("hi"));
        assert_eq!(session.messages.len(), 1);
        assert!(session.last_activity > before);
        assert!(session.created_at < session.last_activity);
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("a").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert!(Message::system("a").is_system());

        let tool = Message::tool_result("call_9", "ok");
        assert_eq!(tool.role, Role::Tool);
        assert!(tool.is_tool_result());
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_9"));
    }

    #[test]
    fn test_empty_tool_calls_is_not_tool_calls() {
        let msg = Message::assistant_with_tools("nothing", vec![]);
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn test_message_structural_equality() {
        let call = ToolCall::new("c1", "read_file", r#"{"path":"a"}"#);
        let a = Message::assistant_with_tools("x", vec![call.clone()]);
        let b = Message::assistant_with_tools("x", vec![call]);
        assert_eq!(a, b);
        assert_ne!(a, Message::assistant("x"));
    }

    #[test]
    fn test_role_display_and_serde() {
        assert_eq!(Role::Tool.to_string(), "tool");
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, r#""assistant""#);
        let parsed: Role = serde_json::from_str(r#""system""#).unwrap();
        assert_eq!(parsed, Role::System);
    }

    #[test]
    fn test_message_deserialize_without_optional_fields() {
        let msg: Message = serde_json::from_str(r#"{"role":"user","content":"hey"}"#).unwrap();
        assert_eq!(msg, Message::user("hey"));

        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }
}
