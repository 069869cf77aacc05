//! EdgeChat Library
//!
//! Bounded-latency chat serving over a small local model on edge hardware.

pub mod api;
pub mod config;
pub mod inference;
pub mod service;
pub mod system;
pub mod types;

/// Safely truncate a string at a char boundary, never panics.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Walk backwards from max_bytes to find a valid char boundary
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_char_boundary() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 3), "hel");
        // 'é' is two bytes; cutting in the middle backs off
        assert_eq!(truncate_str("aé", 2), "a");
    }
}
