//! Chat response service
//!
//! Turns a chat request into exactly one reply string and a status. Every
//! failure below this point (missing model, inference error, timeout, junk
//! output) ends here as one of three statuses with a user-safe message.

pub mod fallback;

use std::time::Duration;

use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ServiceSettings;
use crate::inference::{
    format_chat_prompt, BoundedCallResult, GenerationParams, InferenceCoordinator, InferenceOutcome,
    ModelState, MIN_RESPONSE_CHARS,
};
use crate::truncate_str;
use crate::types::GenerationRequest;

pub use fallback::{is_greeting, FallbackResponder, GREETING_REPLY};

pub const TIMEOUT_REPLY: &str = "I'm sorry, it's taking me longer than expected to generate a response. The Portenta X8 has limited resources, so complex queries might take time to process.";

pub const ERROR_REPLY: &str = "I'm sorry, I encountered an error processing your request.";

/// Messages mentioning any of these get generation stats appended
const DIAGNOSTIC_KEYWORDS: [&str; 3] = ["gpu", "hardware", "accelerator"];

/// Outcome category reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    Timeout,
    Error,
}

/// The answer to one chat request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub status: ReplyStatus,
    /// Internal failure detail, for logs only
    pub detail: Option<String>,
}

impl ChatReply {
    fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: ReplyStatus::Success,
            detail: None,
        }
    }
}

/// Top-level chat orchestrator
pub struct ChatResponseService {
    model: ModelState,
    accelerated: bool,
    fallback: FallbackResponder,
    coordinator: InferenceCoordinator,
    params: GenerationParams,
    deadline: Duration,
}

impl ChatResponseService {
    pub fn new(model: ModelState, accelerated: bool, settings: &ServiceSettings) -> Self {
        Self {
            model,
            accelerated,
            fallback: FallbackResponder::new(accelerated),
            coordinator: InferenceCoordinator::new(settings.max_in_flight),
            params: settings.generation.clone(),
            deadline: settings.deadline(),
        }
    }

    /// Replace the fallback responder, e.g. with a seeded one
    pub fn with_fallback(mut self, fallback: FallbackResponder) -> Self {
        self.fallback = fallback;
        self
    }

    /// Override the inference deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn model_state(&self) -> &ModelState {
        &self.model
    }

    /// True when a model is loaded and layers were offloaded
    pub fn is_accelerated(&self) -> bool {
        self.accelerated && self.model.is_loaded()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Answer one chat request
    pub async fn handle(&self, request: GenerationRequest) -> ChatReply {
        let span = tracing::info_span!("chat", request_id = %Uuid::new_v4());
        async move {
            let reply = self.respond(request).await;
            tracing::info!(status = ?reply.status, "Chat request finished");
            reply
        }
        .instrument(span)
        .await
    }

    async fn respond(&self, request: GenerationRequest) -> ChatReply {
        let message = request.message();
        tracing::info!("Generating response for: {}...", truncate_str(message, 50));

        if message.trim().chars().count() < 3 && is_greeting(message) {
            return ChatReply::success(GREETING_REPLY);
        }

        let Some(generator) = self.model.generator() else {
            tracing::info!("Model not loaded ({:?}), using fallback response mode", self.model);
            return ChatReply::success(self.fallback.respond(message));
        };

        let prompt = format_chat_prompt(request.history(), message);
        tracing::debug!("Using prompt: {}...", truncate_str(&prompt, 100));

        let result = self
            .coordinator
            .run(generator.clone(), prompt, self.params.clone(), self.deadline)
            .await;

        match result {
            BoundedCallResult::DeadlineExceeded => ChatReply {
                text: TIMEOUT_REPLY.to_string(),
                status: ReplyStatus::Timeout,
                detail: None,
            },
            BoundedCallResult::Completed(InferenceOutcome::Error(detail)) => {
                tracing::error!("Error generating response: {}", detail);
                ChatReply {
                    text: ERROR_REPLY.to_string(),
                    status: ReplyStatus::Error,
                    detail: Some(detail),
                }
            }
            BoundedCallResult::Completed(InferenceOutcome::EmptyOutput) => {
                tracing::warn!("Model returned empty response, using fallback");
                ChatReply::success(self.fallback.respond(message))
            }
            BoundedCallResult::Completed(InferenceOutcome::Success { text, elapsed }) => {
                let text = text.trim();
                if text.chars().count() < MIN_RESPONSE_CHARS {
                    tracing::warn!("Response too short, using fallback");
                    return ChatReply::success(self.fallback.respond(message));
                }

                let mut text = text.to_string();
                if wants_diagnostics(message) {
                    text.push_str(&self.diagnostic_suffix(elapsed));
                }
                ChatReply::success(text)
            }
        }
    }

    fn diagnostic_suffix(&self, elapsed: Duration) -> String {
        format!(
            "\n\nTechnical info: I'm running on a Portenta X8 with {} mode. Generated this response in {:.2} seconds.",
            if self.is_accelerated() { "GPU acceleration" } else { "CPU only" },
            elapsed.as_secs_f64()
        )
    }
}

fn wants_diagnostics(message: &str) -> bool {
    let lowered = message.to_lowercase();
    DIAGNOSTIC_KEYWORDS.iter().any(|k| lowered.contains(k))
}
