//! Message types
//!
//! Defines conversation turns and the request handed to the chat service.

use serde::{Deserialize, Serialize};

/// One exchanged (user, assistant) pair.
///
/// On the wire a turn is a two-element array `[user, assistant]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ConversationTurn {
    /// What the user said
    pub user: String,
    /// What the assistant answered
    pub assistant: String,
}

impl ConversationTurn {
    /// Create a new turn
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

impl From<(String, String)> for ConversationTurn {
    fn from((user, assistant): (String, String)) -> Self {
        Self { user, assistant }
    }
}

impl From<ConversationTurn> for (String, String) {
    fn from(turn: ConversationTurn) -> Self {
        (turn.user, turn.assistant)
    }
}

/// Prior turns, oldest first.
pub type ChatHistory = Vec<ConversationTurn>;

/// A single chat request: the new message plus the history before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    message: String,
    history: ChatHistory,
}

impl GenerationRequest {
    pub fn new(message: impl Into<String>, history: ChatHistory) -> Self {
        Self {
            message: message.into(),
            history,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }
}
