//! Generation results and model state

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::inference::engine::GenerationParams;

/// Outputs shorter than this (in chars, after trimming) are degenerate.
pub const MIN_RESPONSE_CHARS: usize = 5;

/// Result of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    /// Usable, trimmed text and how long the call took
    Success { text: String, elapsed: Duration },
    /// The model produced nothing worth showing
    EmptyOutput,
    /// The call itself failed
    Error(String),
}

impl InferenceOutcome {
    /// Classify a raw generation result.
    pub fn classify<E: fmt::Display>(raw: Result<String, E>, elapsed: Duration) -> Self {
        match raw {
            Ok(text) => {
                let text = text.trim();
                if text.chars().count() < MIN_RESPONSE_CHARS {
                    InferenceOutcome::EmptyOutput
                } else {
                    InferenceOutcome::Success {
                        text: text.to_string(),
                        elapsed,
                    }
                }
            }
            Err(e) => InferenceOutcome::Error(e.to_string()),
        }
    }
}

/// Something that turns a formatted prompt into text.
///
/// `generate` blocks until the model is done. Callers that cannot wait run
/// it on a blocking worker and may stop listening at any time, so
/// implementations must not hand results back through shared state.
///
/// `stop_signal` is set once nobody will read the result; implementations
/// should give up as soon as they notice.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        stop_signal: &Arc<AtomicBool>,
    ) -> InferenceOutcome;
}

/// Whether the process has a model to talk to.
///
/// Set once at startup and never changed afterwards.
#[derive(Clone, Default)]
pub enum ModelState {
    #[default]
    Uninitialized,
    Loaded(Arc<dyn TextGenerator>),
    Unavailable(String),
}

impl ModelState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelState::Loaded(_))
    }

    /// The generator, if a model is loaded
    pub fn generator(&self) -> Option<&Arc<dyn TextGenerator>> {
        match self {
            ModelState::Loaded(generator) => Some(generator),
            _ => None,
        }
    }
}

impl fmt::Debug for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Uninitialized => f.write_str("Uninitialized"),
            ModelState::Loaded(_) => f.write_str("Loaded"),
            ModelState::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_trims_success() {
        let elapsed = Duration::from_millis(1200);
        let outcome = InferenceOutcome::classify::<String>(Ok("  Hello there \n".into()), elapsed);
        assert_eq!(
            outcome,
            InferenceOutcome::Success {
                text: "Hello there".to_string(),
                elapsed
            }
        );
    }

    #[test]
    fn test_classify_short_output_is_empty() {
        let outcome = InferenceOutcome::classify::<String>(Ok("  ok  ".into()), Duration::ZERO);
        assert_eq!(outcome, InferenceOutcome::EmptyOutput);

        let outcome = InferenceOutcome::classify::<String>(Ok(String::new()), Duration::ZERO);
        assert_eq!(outcome, InferenceOutcome::EmptyOutput);
    }

    #[test]
    fn test_classify_counts_chars_not_bytes() {
        // four chars, eight bytes
        let outcome = InferenceOutcome::classify::<String>(Ok("éééé".into()), Duration::ZERO);
        assert_eq!(outcome, InferenceOutcome::EmptyOutput);
    }

    #[test]
    fn test_classify_error() {
        let outcome = InferenceOutcome::classify::<&str>(Err("decode failed"), Duration::ZERO);
        assert_eq!(outcome, InferenceOutcome::Error("decode failed".to_string()));
    }

    #[test]
    fn test_model_state_default_is_uninitialized() {
        let state = ModelState::default();
        assert!(!state.is_loaded());
        assert!(state.generator().is_none());
        assert_eq!(format!("{:?}", state), "Uninitialized");
    }
}
