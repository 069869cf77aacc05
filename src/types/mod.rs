//! Shared data types

pub mod message;

pub use message::{ChatHistory, ConversationTurn, GenerationRequest};
