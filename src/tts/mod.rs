//! Text-to-speech adapters
//!
//! The gateway streams MP3 audio chunk-by-chunk as the vendor produces
//! them; synthesis is requested per sentence for low first-byte latency.

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use openai::OpenAiTts;

/// A streaming TTS backend.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Convert text to audio, yielding MP3 byte chunks as they arrive.
    async fn synthesize(&self, text: &str) -> Result<BoxStream<'static, Result<Vec<u8>>>>;
}

/// Split text on sentence boundaries: after `.`, `!` or `?` followed by
/// whitespace. Sentences come back trimmed, empty ones dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.trim().chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_basic() {
        assert_eq!(
            split_sentences("One. Two! Three?"),
            vec!["One.", "Two!", "Three?"]
        );
    }

    #[test]
    fn test_split_keeps_unterminated_tail() {
        assert_eq!(
            split_sentences("Done. And then some"),
            vec!["Done.", "And then some"]
        );
    }

    #[test]
    fn test_split_no_boundary_is_one_sentence() {
        assert_eq!(split_sentences("Hello there"), vec!["Hello there"]);
    }

    #[test]
    fn test_split_requires_trailing_whitespace() {
        // Dots without following whitespace do not split
        assert_eq!(split_sentences("v1.2.3 released"), vec!["v1.2.3 released"]);
    }

    #[test]
    fn test_split_handles_newlines_and_repeats() {
        assert_eq!(
            split_sentences("Wow!! Really?\nYes."),
            vec!["Wow!!", "Really?", "Yes."]
        );
    }

    #[test]
    fn test_split_empty_and_whitespace() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   \n  ").is_empty());
    }
}
