//! Rule-based replies
//!
//! Used whenever the model is missing or its answer is unusable. Never
//! touches the model and always returns something non-empty.

use std::sync::atomic::{AtomicU64, Ordering};

pub const GREETING_REPLY: &str =
    "Hello! I'm a small LLM running on your Portenta X8. How can I help you today?";

pub const PLATFORM_REPLY: &str = "The Arduino Portenta X8 is a powerful SoM (System on Module) designed for industrial applications and edge computing.";

pub const DEPLOYMENT_REPLY: &str = "Docker containers are great for deploying applications on embedded Linux devices like the Portenta X8. They provide isolation and ease of deployment.";

pub const MODEL_REPLY: &str = "I'm a small LLM designed to run on the Portenta X8's limited resources. I'm using a quantized version of the TinyLlama model.";

/// Generic replies when nothing more specific matches
pub const FILLER_REPLIES: [&str; 8] = [
    "I'm a simple LLM running on the Portenta X8. My capabilities are limited but I'm doing my best!",
    "The Portenta X8 is a powerful board for edge computing applications.",
    "I can provide basic responses, but I'm not as capable as larger models running on more powerful hardware.",
    "Docker containers are a great way to package applications for embedded systems like the Portenta X8.",
    "Edge AI is becoming increasingly important for applications that need real-time processing with low latency.",
    "I'm designed to be lightweight and run efficiently on the Portenta X8's limited resources.",
    "The Arduino Portenta X8 combines a Linux-capable processor with real-time processing capabilities.",
    "I'm currently running in a Debian container on your Portenta X8 board.",
];

const GREETINGS: [&str; 3] = ["hi", "hello", "hey"];

/// Whether `message` is one of the plain greetings, ignoring case and padding
pub fn is_greeting(message: &str) -> bool {
    let normalized = message.trim().to_lowercase();
    GREETINGS.contains(&normalized.as_str())
}

/// Topics with a canned explanation, in match priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Platform,
    Deployment,
    Model,
    Accelerator,
}

impl Topic {
    const ALL: [Topic; 4] = [Topic::Platform, Topic::Deployment, Topic::Model, Topic::Accelerator];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Topic::Platform => &["portenta", "x8"],
            Topic::Deployment => &["docker", "container"],
            Topic::Model => &["model", "llm"],
            Topic::Accelerator => &["gpu", "hardware"],
        }
    }

    /// First topic whose keywords appear in `message`
    pub fn detect(message: &str) -> Option<Topic> {
        let lowered = message.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|topic| topic.keywords().iter().any(|k| lowered.contains(k)))
    }
}

/// How filler replies are picked
#[derive(Debug)]
enum Selection {
    /// Fresh entropy per reply
    Random,
    /// Reproducible sequence, for tests
    Seeded(AtomicU64),
}

/// Keyword-driven responder
///
/// Filler selection is random unless built with [`FallbackResponder::seeded`].
#[derive(Debug)]
pub struct FallbackResponder {
    accelerated: bool,
    selection: Selection,
}

impl FallbackResponder {
    pub fn new(accelerated: bool) -> Self {
        Self {
            accelerated,
            selection: Selection::Random,
        }
    }

    /// Same seed, same sequence of filler replies
    pub fn seeded(accelerated: bool, seed: u64) -> Self {
        Self {
            accelerated,
            selection: Selection::Seeded(AtomicU64::new(seed)),
        }
    }

    pub fn respond(&self, message: &str) -> String {
        tracing::info!("Using fallback response generator");

        if is_greeting(message) {
            return GREETING_REPLY.to_string();
        }

        match Topic::detect(message) {
            Some(Topic::Platform) => PLATFORM_REPLY.to_string(),
            Some(Topic::Deployment) => DEPLOYMENT_REPLY.to_string(),
            Some(Topic::Model) => MODEL_REPLY.to_string(),
            Some(Topic::Accelerator) => self.accelerator_reply(),
            None => FILLER_REPLIES[self.next_index(FILLER_REPLIES.len())].to_string(),
        }
    }

    fn accelerator_reply(&self) -> String {
        format!(
            "The Portenta X8 features an i.MX 8M Mini SoC with GC NanoUltra (3D) and GC320 (2D) GPUs. I'm currently running in {} mode.",
            if self.accelerated { "GPU-accelerated" } else { "CPU-only" }
        )
    }

    fn next_index(&self, len: usize) -> usize {
        let value = match &self.selection {
            Selection::Random => random_u64(),
            Selection::Seeded(state) => {
                splitmix64(state.fetch_add(SPLITMIX_GAMMA, Ordering::Relaxed))
            }
        };
        (value % len as u64) as usize
    }
}

const SPLITMIX_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(SPLITMIX_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Random value from system entropy
fn random_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish()
}
