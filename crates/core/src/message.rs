//! Message and conversation-state domain types.
//!
//! A run starts from one user input: the engine seeds a [`ConversationState`],
//! the model appends assistant turns, tools append `tool` turns, and the
//! final state is handed back to the caller when the run ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolInvocationRequest;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,

    pub role: Role,

    pub content: String,

    /// Tool calls requested by the assistant (kept for audit/history)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocationRequest>,

    /// If this is a tool result, which call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Attach requested tool calls to an assistant message.
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolInvocationRequest>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Working state of one orchestration run.
///
/// Exclusively owned by the run that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Create an empty state.
    pub fn new(id: Option<ConversationId>, system_message: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_default(),
            messages: Vec::new(),
            system_message,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seed a state for a new run: a leading system message (if configured
    /// and not already present) followed by the user's input.
    pub fn seed(
        user_input: impl Into<String>,
        id: Option<ConversationId>,
        system_message: Option<String>,
    ) -> Self {
        let mut state = Self::new(id, system_message);
        if let Some(system) = state.system_message.clone() {
            if !state.messages.iter().any(|m| m.role == Role::System) {
                state.push(Message::system(system));
            }
        }
        state.push(Message::user(user_input));
        state
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = Message::tool_result("call_7", "22C");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_7"));
    }

    #[test]
    fn seed_without_system_message() {
        let state = ConversationState::seed("What's the weather?", None, None);
        assert_eq!(state.len(), 1);
        assert_eq!(state.messages[0].role, Role::User);
        assert!(!state.id.0.is_empty());
    }

    #[test]
    fn seed_with_system_message_leads() {
        let state = ConversationState::seed(
            "hi",
            Some(ConversationId::from("conv-1")),
            Some("You are helpful.".into()),
        );
        assert_eq!(state.id.0, "conv-1");
        assert_eq!(state.len(), 2);
        assert_eq!(state.messages[0].role, Role::System);
        assert_eq!(state.messages[0].content, "You are helpful.");
        assert_eq!(state.messages[1].role, Role::User);
    }

    #[test]
    fn last_assistant_finds_latest() {
        let mut state = ConversationState::seed("q", None, None);
        assert!(state.last_assistant().is_none());
        state.push(Message::assistant("first"));
        state.push(Message::tool_result("c1", "out"));
        state.push(Message::assistant("second"));
        assert_eq!(state.last_assistant().unwrap().content, "second");
        assert!(state.updated_at >= state.created_at);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
