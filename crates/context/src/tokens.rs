//! Token counting.
//!
//! The counter is injected so provider-accurate tokenizers can replace the
//! default heuristic. Whatever the implementation, counts must be
//! deterministic for a given input — truncation idempotence depends on it.

use ad_domain::message::Message;

pub trait TokenCounter: Send + Sync {
    fn count_messages(&self, messages: &[Message]) -> usize;
}

/// Character-based estimate: serialized length / chars-per-token.
///
/// Counts everything the model will actually see, including tool-call
/// arguments and base64 image payloads.
pub struct CharEstimateCounter {
    chars_per_token: usize,
}

impl CharEstimateCounter {
    pub fn new() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl Default for CharEstimateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for CharEstimateCounter {
    fn count_messages(&self, messages: &[Message]) -> usize {
        let chars: usize = messages
            .iter()
            .map(|m| serde_json::to_string(m).map(|s| s.len()).unwrap_or(0))
            .sum();
        chars / self.chars_per_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_is_deterministic() {
        let counter = CharEstimateCounter::new();
        let messages = vec![
            Message::user("hello world"),
            Message::tool_call("c1", "ls", serde_json::json!({"path": "/w"})),
        ];
        let a = counter.count_messages(&messages);
        let b = counter.count_messages(&messages);
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn longer_input_counts_more() {
        let counter = CharEstimateCounter::new();
        let short = vec![Message::user("hi")];
        let long = vec![Message::user("hi ".repeat(100))];
        assert!(counter.count_messages(&long) > counter.count_messages(&short));
    }
}
