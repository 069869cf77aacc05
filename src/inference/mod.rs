//! LLM inference
//!
//! Model loading, single generation calls, and running those calls under a
//! deadline.

pub mod coordinator;
pub mod engine;
pub mod model;
pub mod outcome;
pub mod prompt;

// Re-export main types for convenience
pub use coordinator::{BoundedCallResult, InferenceCoordinator};
pub use engine::{EngineError, GenerationParams, LlamaEngine, LoadedModelInfo, RuntimeParams};
pub use model::{validate_gguf, GgufHeader, ModelError, GGUF_MAGIC};
pub use outcome::{InferenceOutcome, ModelState, TextGenerator, MIN_RESPONSE_CHARS};
pub use prompt::format_chat_prompt;
