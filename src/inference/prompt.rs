//! Chat prompt formatting
//!
//! TinyLlama chat grammar: every turn is a `<human>:` line followed by an
//! `<assistant>:` line. The prompt ends with an open assistant tag so the
//! model continues from there.

use std::fmt::Write;

use crate::types::ConversationTurn;

pub const USER_TAG: &str = "<human>:";
pub const ASSISTANT_TAG: &str = "<assistant>:";

/// Stop sequences that end generation when the model starts a new user turn
pub fn default_stop_sequences() -> Vec<String> {
    vec![USER_TAG.to_string(), format!("\n{}", USER_TAG.trim_end_matches(':'))]
}

/// Build the prompt for `message` given the prior `history`, oldest first.
pub fn format_chat_prompt(history: &[ConversationTurn], message: &str) -> String {
    let mut prompt = String::new();

    for turn in history {
        // Writing to a String cannot fail
        let _ = write!(
            prompt,
            "{USER_TAG} {}\n{ASSISTANT_TAG} {}\n",
            turn.user, turn.assistant
        );
    }

    let _ = write!(prompt, "{USER_TAG} {message}\n{ASSISTANT_TAG}");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history() {
        assert_eq!(
            format_chat_prompt(&[], "What is edge AI?"),
            "<human>: What is edge AI?\n<assistant>:"
        );
    }

    #[test]
    fn test_history_is_kept_in_order() {
        let history = vec![
            ConversationTurn::new("first question", "first answer"),
            ConversationTurn::new("second question", "second answer"),
        ];
        let prompt = format_chat_prompt(&history, "third question");

        assert_eq!(
            prompt,
            "<human>: first question\n<assistant>: first answer\n\
             <human>: second question\n<assistant>: second answer\n\
             <human>: third question\n<assistant>:"
        );

        let first = prompt.find("<human>: first question").unwrap();
        let second = prompt.find("<human>: second question").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_prompt_ends_with_open_assistant_tag() {
        let prompt = format_chat_prompt(&[ConversationTurn::new("a", "b")], "c");
        assert!(prompt.ends_with(ASSISTANT_TAG));
    }

    #[test]
    fn test_default_stop_sequences() {
        assert_eq!(
            default_stop_sequences(),
            vec!["<human>:".to_string(), "\n<human>".to_string()]
        );
    }
}
